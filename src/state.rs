//! Non-secret wallet state kept for fast resume. A cache: every field can
//! be rebuilt from the ledger, and a refresh always overwrites it.

use crate::error::WalletResult;
use crate::ledger::Balance;
use crate::network::Network;
use crate::storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    /// Ties the cache to one wallet so a restore never shows stale balances.
    pub wallet_id: String,
    pub network: Network,
    pub mainnet_balance: Option<Balance>,
    pub testnet_balance: Option<Balance>,
    pub rollup_balance: Option<Balance>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WalletState {
    pub fn new(wallet_id: impl Into<String>, network: Network) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            network,
            mainnet_balance: None,
            testnet_balance: None,
            rollup_balance: None,
            updated_at: None,
        }
    }

    /// Last known balance; `None` means never fetched.
    pub fn balance(&self, network: Network) -> Option<Balance> {
        match network {
            Network::Mainnet => self.mainnet_balance,
            Network::Testnet => self.testnet_balance,
            Network::Rollup => self.rollup_balance,
        }
    }

    pub fn set_balance(&mut self, network: Network, balance: Balance) {
        let slot = match network {
            Network::Mainnet => &mut self.mainnet_balance,
            Network::Testnet => &mut self.testnet_balance,
            Network::Rollup => &mut self.rollup_balance,
        };
        *slot = Some(balance);
        self.updated_at = Some(Utc::now());
    }
}

/// Short public fingerprint of the wallet's output script.
pub fn wallet_id(script_pubkey: &[u8]) -> String {
    let digest = Sha256::digest(script_pubkey);
    hex::encode(&digest[..8])
}

pub trait StateStore: Send + Sync {
    fn load(&self) -> WalletResult<Option<WalletState>>;
    fn save(&self, state: &WalletState) -> WalletResult<()>;
}

/// `<data_root>/state.json`.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(data_root: &Path) -> Self {
        Self { path: data_root.join("state.json") }
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> WalletResult<Option<WalletState>> {
        storage::read_json(&self.path)
    }

    fn save(&self, state: &WalletState) -> WalletResult<()> {
        storage::write_json(&self.path, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_balances_per_network() {
        let mut state = WalletState::new("abc", Network::Testnet);
        assert_eq!(state.balance(Network::Testnet), None);
        state.set_balance(Network::Testnet, Balance { confirmed: 10, pending: 2 });
        assert_eq!(state.balance(Network::Testnet).unwrap().total(), 12);
        assert_eq!(state.balance(Network::Mainnet), None);
        assert!(state.updated_at.is_some());
    }

    #[test]
    fn test_file_store_camel_case() {
        let dir = TempDir::new().expect("tempdir");
        let store = FileStateStore::new(dir.path());
        assert!(store.load().unwrap().is_none());

        let mut state = WalletState::new(wallet_id(b"script"), Network::Rollup);
        state.set_balance(Network::Rollup, Balance { confirmed: 5, pending: 0 });
        store.save(&state).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join("state.json")).unwrap()).unwrap();
        assert_eq!(raw["rollupBalance"]["confirmed"], 5);
        assert_eq!(raw["network"], "rollup");
        assert_eq!(store.load().unwrap().unwrap(), state);
    }

    #[test]
    fn test_wallet_id_is_short_hex() {
        let id = wallet_id(b"script");
        assert_eq!(id.len(), 16);
        assert_eq!(id, wallet_id(b"script"));
        assert_ne!(id, wallet_id(b"other"));
    }
}
