//! Fingerprint persistence.
//!
//! One JSON document per anchor, keyed by (repository, version, node id) in
//! the storage layout. Matching later reloads the high-version fingerprint
//! by the same key.

use std::fs;

use tracing::debug;

use crate::config::StorageLayout;
use crate::errors::Result;
use crate::features::fingerprint::Fingerprint;
use crate::shared::models::NodeId;

pub struct FingerprintStore {
    layout: StorageLayout,
}

impl FingerprintStore {
    pub fn new(layout: StorageLayout) -> Self {
        FingerprintStore { layout }
    }

    pub fn save(&self, repository: &str, version: &str, fingerprint: &Fingerprint) -> Result<()> {
        let dir = self
            .layout
            .fingerprint_dir(repository, version, fingerprint.anchor);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("series-{}.json", fingerprint.anchor));
        let body = serde_json::to_string(fingerprint)?;
        fs::write(&path, body)?;
        debug!(?path, members = fingerprint.ids.len(), "fingerprint stored");
        Ok(())
    }

    pub fn load(&self, repository: &str, version: &str, node_id: NodeId) -> Result<Fingerprint> {
        let path = self
            .layout
            .fingerprint_dir(repository, version, node_id)
            .join(format!("series-{node_id}.json"));
        let body = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::new(StorageLayout::new(dir.path()));
        let fingerprint = Fingerprint {
            anchor: 42,
            ids: vec![7, 12, 42],
            lines: vec![Some(2), Some(3), Some(6)],
        };
        store.save("repo", "abc_prepatch", &fingerprint).unwrap();
        let loaded = store.load("repo", "abc_prepatch", 42).unwrap();
        assert_eq!(loaded, fingerprint);
    }

    #[test]
    fn missing_fingerprint_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FingerprintStore::new(StorageLayout::new(dir.path()));
        assert!(store.load("repo", "v", 1).is_err());
    }
}
