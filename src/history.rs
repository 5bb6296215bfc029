//! Transaction history - a read/write log of what the wallet sent, received
//! and bridged. Records share one shape; the variant carries what differs.

use crate::error::{WalletError, WalletResult};
use crate::network::Network;
use crate::storage;
use bitcoin::Txid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RecordKind {
    Send {
        recipient: String,
    },
    Receive {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    Bridge {
        from: Network,
        to: Network,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bridge_id: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    #[serde(flatten)]
    pub kind: RecordKind,
    pub amount_sat: u64,
    pub status: RecordStatus,
    pub timestamp: DateTime<Utc>,
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<Txid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_sat: Option<u64>,
}

impl TransactionRecord {
    pub fn new(id: impl Into<String>, kind: RecordKind, amount_sat: u64, network: Network) -> Self {
        Self {
            id: id.into(),
            kind,
            amount_sat,
            status: RecordStatus::Pending,
            timestamp: Utc::now(),
            network,
            txid: None,
            fee_sat: None,
        }
    }

    pub fn with_txid(mut self, txid: Txid) -> Self {
        self.txid = Some(txid);
        self
    }

    pub fn with_fee(mut self, fee_sat: u64) -> Self {
        self.fee_sat = Some(fee_sat);
        self
    }

    pub fn with_status(mut self, status: RecordStatus) -> Self {
        self.status = status;
        self
    }

    /// Stable id for an incoming output, so repeated refreshes don't
    /// record it twice.
    pub fn receive_id(txid: &Txid, vout: u32) -> String {
        format!("rx:{txid}:{vout}")
    }
}

pub trait HistoryLog: Send + Sync {
    fn append(&self, record: &TransactionRecord) -> WalletResult<()>;

    /// Apply `edit` to the record with `id`. Returns whether it existed.
    fn update(&self, id: &str, edit: &mut dyn FnMut(&mut TransactionRecord)) -> WalletResult<bool>;

    /// Oldest first.
    fn read_all(&self) -> WalletResult<Vec<TransactionRecord>>;

    fn update_status(&self, id: &str, status: RecordStatus) -> WalletResult<bool> {
        self.update(id, &mut |r| r.status = status)
    }

    fn contains(&self, id: &str) -> WalletResult<bool> {
        Ok(self.read_all()?.iter().any(|r| r.id == id))
    }

    fn clear(&self) -> WalletResult<()>;
}

/// JSON lines at `<data_root>/history.jsonl`. Appends are single writes;
/// updates rewrite the file atomically.
#[derive(Debug)]
pub struct FileHistoryLog {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileHistoryLog {
    pub fn new(data_root: &Path) -> Self {
        Self { path: data_root.join("history.jsonl"), guard: Mutex::new(()) }
    }

    fn lock(&self) -> WalletResult<std::sync::MutexGuard<'_, ()>> {
        self.guard.lock().map_err(|_| WalletError::InvalidState("history lock poisoned".into()))
    }

    fn load(&self) -> WalletResult<Vec<TransactionRecord>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(WalletError::Storage(format!("read {}: {e}", self.path.display()))),
        };
        let mut records = Vec::new();
        for (n, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                // A torn final line after a crash is the only expected case.
                Err(e) => warn!(line = n + 1, error = %e, "Skipping unreadable history line"),
            }
        }
        Ok(records)
    }
}

impl HistoryLog for FileHistoryLog {
    fn append(&self, record: &TransactionRecord) -> WalletResult<()> {
        let _guard = self.lock()?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&self.path)?;
        let mut line = String::new();
        // Terminate a torn tail so the new record starts on its own line.
        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                line.push('\n');
            }
        }
        line.push_str(&serde_json::to_string(record)?);
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        Ok(())
    }

    fn update(&self, id: &str, edit: &mut dyn FnMut(&mut TransactionRecord)) -> WalletResult<bool> {
        let _guard = self.lock()?;
        let mut records = self.load()?;
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return Ok(false);
        };
        edit(record);

        let mut out = String::new();
        for record in &records {
            out.push_str(&serde_json::to_string(record)?);
            out.push('\n');
        }
        storage::write_atomic(&self.path, out.as_bytes())?;
        Ok(true)
    }

    fn read_all(&self) -> WalletResult<Vec<TransactionRecord>> {
        let _guard = self.lock()?;
        self.load()
    }

    fn clear(&self) -> WalletResult<()> {
        let _guard = self.lock()?;
        storage::remove_file(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use tempfile::TempDir;

    #[test]
    fn test_tagged_json_shape() {
        let record = TransactionRecord::new(
            "b1",
            RecordKind::Bridge { from: Network::Mainnet, to: Network::Rollup, bridge_id: Some("br-9".into()) },
            25_000,
            Network::Mainnet,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "bridge");
        assert_eq!(json["from"], "mainnet");
        assert_eq!(json["status"], "pending");
        assert!(json.get("txid").is_none());

        let back: TransactionRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_file_log_append_update() {
        let dir = TempDir::new().expect("tempdir");
        let log = FileHistoryLog::new(dir.path());
        assert!(log.read_all().unwrap().is_empty());

        let txid = Txid::from_byte_array([3; 32]);
        log.append(&TransactionRecord::new("s1", RecordKind::Send { recipient: "tb1q..".into() }, 10, Network::Testnet))
            .unwrap();
        log.append(
            &TransactionRecord::new(TransactionRecord::receive_id(&txid, 1), RecordKind::Receive { sender: None }, 5, Network::Testnet)
                .with_txid(txid),
        )
        .unwrap();

        assert!(log.update_status("s1", RecordStatus::Confirmed).unwrap());
        assert!(!log.update_status("missing", RecordStatus::Failed).unwrap());
        assert!(log.contains(&format!("rx:{txid}:1")).unwrap());

        let all = log.read_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].status, RecordStatus::Confirmed);
        assert_eq!(all[1].txid, Some(txid));
    }

    #[test]
    fn test_torn_line_skipped() {
        let dir = TempDir::new().expect("tempdir");
        let log = FileHistoryLog::new(dir.path());
        log.append(&TransactionRecord::new("s1", RecordKind::Send { recipient: "x".into() }, 1, Network::Mainnet))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(dir.path().join("history.jsonl")).unwrap();
        file.write_all(b"{\"id\":\"s2\",\"ty").unwrap();
        assert_eq!(log.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_append_after_torn_line_survives() {
        let dir = TempDir::new().expect("tempdir");
        let log = FileHistoryLog::new(dir.path());
        log.append(&TransactionRecord::new("s1", RecordKind::Send { recipient: "x".into() }, 1, Network::Mainnet))
            .unwrap();
        let mut file = OpenOptions::new().append(true).open(dir.path().join("history.jsonl")).unwrap();
        file.write_all(b"{\"id\":\"s2\",\"ty").unwrap();
        drop(file);

        log.append(&TransactionRecord::new("s3", RecordKind::Send { recipient: "y".into() }, 2, Network::Mainnet))
            .unwrap();
        let ids: Vec<String> = log.read_all().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["s1".to_string(), "s3".to_string()]);
    }
}
