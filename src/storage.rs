//! Data directory resolution and crash-safe file writes.

use crate::error::{WalletError, WalletResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// `explicit`, else `$SWIFTPAY_ROOT/<app>`, else the platform data dir.
pub fn data_root(app: &str, explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    let root = std::env::var("SWIFTPAY_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")));
    root.join(app)
}

/// Write to a sibling temp file, then rename over the target.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> WalletResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| WalletError::Storage(format!("mkdir {}: {e}", parent.display())))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)
        .map_err(|e| WalletError::Storage(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| WalletError::Storage(format!("rename {}: {e}", path.display())))?;
    Ok(())
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> WalletResult<()> {
    let raw = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &raw)
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> WalletResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read(path)
        .map_err(|e| WalletError::Storage(format!("read {}: {e}", path.display())))?;
    Ok(Some(serde_json::from_slice(&raw)?))
}

pub(crate) fn remove_file(path: &Path) -> WalletResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(WalletError::Storage(format!("remove {}: {e}", path.display()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_json_roundtrip_and_missing() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");
        assert!(read_json::<serde_json::Value>(&path).unwrap().is_none());

        write_json(&path, &json!({"network": "testnet"})).unwrap();
        let back: serde_json::Value = read_json(&path).unwrap().unwrap();
        assert_eq!(back["network"], "testnet");
        assert!(!path.with_extension("tmp").exists());

        remove_file(&path).unwrap();
        remove_file(&path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_explicit_root_wins() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(data_root("app", Some(dir.path())), dir.path());
    }
}
