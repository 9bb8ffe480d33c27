use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use eyre::{Result, WrapErr};
use follower::ChainPosition;

/// On-disk snapshot of the follower position, one JSON document per file.
///
/// A missing file is a fresh start, never an error.
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Option<ChainPosition>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).wrap_err(format!("failed to read {}", self.path.display()))
            }
        };

        let position = serde_json::from_str(&raw)
            .wrap_err(format!("failed to decode {}", self.path.display()))?;
        Ok(Some(position))
    }

    pub fn save(&self, position: &ChainPosition) -> Result<()> {
        // write-then-rename, so a crash never leaves a half-written snapshot
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(position)?)
            .wrap_err(format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .wrap_err(format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use follower::bitcoin::hashes::Hash;
    use follower::bitcoin::BlockHash;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_a_fresh_start() {
        let dir = tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("position.json"));

        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn round_trips_the_position() {
        let dir = tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("position.json"));

        let mut position = ChainPosition::new(BlockHash::all_zeros(), 7);
        position.waiting_for_next_hash = true;
        store.save(&position).unwrap();

        assert_eq!(store.load().unwrap(), Some(position));
    }

    #[test]
    fn rejects_a_corrupt_position_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("position.json");
        fs::write(&path, "not json").unwrap();

        let store = PositionStore::new(path);
        assert!(store.load().is_err());
    }
}
