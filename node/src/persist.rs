//! Backup file persistence.
//!
//! Backups are written to a temporary file next to the target and renamed
//! into place, so a crash mid-write never leaves a truncated backup.

use crate::error::Result;
use infodb_engine::StoreSnapshot;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Write `snapshot` to `path`.
pub async fn save_snapshot(path: &Path, snapshot: &StoreSnapshot) -> Result<()> {
    let json = snapshot.to_json_pretty()?;
    let temp = temp_path(path);
    tokio::fs::write(&temp, json.as_bytes()).await?;
    tokio::fs::rename(&temp, path).await?;
    tracing::debug!(path = %path.display(), items = snapshot.item_count(), "Saved backup");
    Ok(())
}

/// Read a snapshot from `path`. A missing file is not an error.
pub async fn load_snapshot(path: &Path) -> Result<Option<StoreSnapshot>> {
    let json = match tokio::fs::read_to_string(path).await {
        Ok(json) => json,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(StoreSnapshot::from_json(&json)?))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NodeError;
    use uuid::Uuid;

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        let snapshot = StoreSnapshot::new(Uuid::new_v4(), 42);

        save_snapshot(&path, &snapshot).await.unwrap();
        assert!(!temp_path(&path).exists());

        let loaded = load_snapshot(&path).await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_snapshot(&dir.path().join("absent.json")).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            load_snapshot(&path).await,
            Err(NodeError::Engine(_))
        ));
    }
}
