use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_with_registry, register_int_gauge_with_registry, Encoder, IntCounter,
    IntGauge, Registry, TextEncoder,
};
use serde_json::json;

lazy_static! {
    pub static ref FOLLOWER_REGISTRY: Registry =
        Registry::new_custom(Some("follower".to_string()), None).unwrap();
    pub static ref BLOCKS_FOLLOWED: IntCounter = register_int_counter_with_registry!(
        "blocks_followed_total",
        "Block events consumed from the follower",
        FOLLOWER_REGISTRY
    )
    .unwrap();
    pub static ref ROLLBACKS: IntCounter = register_int_counter_with_registry!(
        "rollbacks_total",
        "Chain reorganizations observed",
        FOLLOWER_REGISTRY
    )
    .unwrap();
    pub static ref CHAIN_HEIGHT: IntGauge = register_int_gauge_with_registry!(
        "chain_height",
        "Height of the last persisted position",
        FOLLOWER_REGISTRY
    )
    .unwrap();
}

async fn handle_request(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let metric_families = FOLLOWER_REGISTRY.gather();

            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            encoder.encode(&metric_families, &mut buffer).unwrap();

            let response = Response::builder()
                .status(StatusCode::OK)
                .header(hyper::header::CONTENT_TYPE, encoder.format_type())
                .body(Body::from(buffer))
                .unwrap();

            Ok(response)
        }
        (&Method::GET, "/health") => {
            let health_status = json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
            });

            let response = Response::builder()
                .status(StatusCode::OK)
                .header(hyper::header::CONTENT_TYPE, "application/json")
                .body(Body::from(health_status.to_string()))
                .unwrap();

            Ok(response)
        }
        _ => {
            let response = Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Body::empty())
                .unwrap();

            Ok(response)
        }
    }
}

pub async fn start_server(port_number: Option<u16>) {
    const DEFAULT_PORT: u16 = 9001;

    let port = port_number.unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle_request)) });

    let server = Server::bind(&addr).serve(make_svc);

    tokio::spawn(async move {
        tracing::info!("Starting metrics server on {}", addr);

        if let Err(e) = server.await {
            tracing::error!("Metrics server error: {}", e);
        }
    });
}
