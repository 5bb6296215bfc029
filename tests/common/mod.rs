//! Shared fixtures: an in-memory chain, a scripted bridge, fast configs.

#![allow(dead_code)]

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{ScriptBuf, Txid, WPubkeyHash};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swiftpay::bridge::BridgeRequest;
use swiftpay::{
    Address, BridgeService, BridgeStatus, ChainSource, FeeEstimate, KdfParams, Network, SessionParts, TxStatus, Utxo,
    WalletConfig, WalletError, WalletResult, WalletSession,
};
use tempfile::TempDir;

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const PASSWORD: &str = "correct horse battery staple";

/// What the next broadcast does.
#[derive(Debug, Clone)]
pub enum Outcome {
    Accept,
    Reject(String),
    NetworkDown,
    Hang,
}

#[derive(Default)]
pub struct MockChain {
    utxos: Mutex<HashMap<Network, Vec<Utxo>>>,
    utxo_failure: Mutex<Option<String>>,
    fees: Mutex<Option<FeeEstimate>>,
    outcomes: Mutex<VecDeque<Outcome>>,
    broadcasts: Mutex<Vec<Vec<u8>>>,
    statuses: Mutex<HashMap<Txid, TxStatus>>,
    delay: Mutex<Duration>,
    utxo_calls: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_utxos(&self, network: Network, utxos: Vec<Utxo>) {
        self.utxos.lock().unwrap().insert(network, utxos);
    }

    pub fn fail_utxos(&self, message: Option<&str>) {
        *self.utxo_failure.lock().unwrap() = message.map(str::to_string);
    }

    pub fn set_fees(&self, fees: FeeEstimate) {
        *self.fees.lock().unwrap() = Some(fees);
    }

    pub fn push_outcome(&self, outcome: Outcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn set_status(&self, txid: Txid, status: TxStatus) {
        self.statuses.lock().unwrap().insert(txid, status);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn broadcasts(&self) -> Vec<Vec<u8>> {
        self.broadcasts.lock().unwrap().clone()
    }

    pub fn utxo_calls(&self) -> usize {
        self.utxo_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn get_utxos(&self, _address: &Address, network: Network) -> WalletResult<Vec<Utxo>> {
        self.utxo_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if let Some(message) = self.utxo_failure.lock().unwrap().clone() {
            return Err(WalletError::Network(message));
        }
        Ok(self.utxos.lock().unwrap().get(&network).cloned().unwrap_or_default())
    }

    async fn get_fee_estimates(&self, _network: Network) -> WalletResult<FeeEstimate> {
        self.pause().await;
        let fees = *self.fees.lock().unwrap();
        fees.ok_or_else(|| WalletError::Network("no fee data".into()))
    }

    async fn broadcast(&self, raw_tx: &[u8], _network: Network) -> WalletResult<Txid> {
        let outcome = self.outcomes.lock().unwrap().pop_front().unwrap_or(Outcome::Accept);
        match outcome {
            Outcome::Accept => {
                self.broadcasts.lock().unwrap().push(raw_tx.to_vec());
                Ok(swiftpay::tx::deserialize(raw_tx)?.compute_txid())
            }
            Outcome::Reject(reason) => Err(WalletError::BroadcastRejected { reason }),
            Outcome::NetworkDown => Err(WalletError::Network("connection reset".into())),
            Outcome::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(WalletError::Network("hung".into()))
            }
        }
    }

    async fn get_tx_status(&self, txid: &Txid, _address: &Address, _network: Network) -> WalletResult<TxStatus> {
        Ok(self.statuses.lock().unwrap().get(txid).copied().unwrap_or(TxStatus::Mempool))
    }
}

#[derive(Default)]
pub struct MockBridge {
    pub failures_left: AtomicUsize,
    pub status: Mutex<Option<BridgeStatus>>,
    pub requests: Mutex<Vec<BridgeRequest>>,
}

impl MockBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl BridgeService for MockBridge {
    async fn initiate_bridge(&self, request: &BridgeRequest) -> WalletResult<String> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(WalletError::Network("bridge unavailable".into()));
        }
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        Ok(format!("bridge-{}", requests.len()))
    }

    async fn get_bridge_status(&self, _bridge_id: &str) -> WalletResult<BridgeStatus> {
        let status = *self.status.lock().unwrap();
        Ok(status.unwrap_or(BridgeStatus::Pending))
    }
}

/// Cheap KDF, short timeouts, one quick retry.
pub fn config(dir: &TempDir) -> WalletConfig {
    WalletConfig::new("swiftpay-test")
        .with_data_dir(dir.path())
        .with_network(Network::Testnet)
        .with_kdf(KdfParams::new(64, 1, 1))
        .with_timeout(Duration::from_millis(200))
        .with_retries(1, Duration::from_millis(1))
}

pub fn open(config: WalletConfig, chain: Arc<MockChain>) -> WalletSession {
    WalletSession::open(config, chain).expect("session")
}

pub fn open_with_bridge(config: WalletConfig, chain: Arc<MockChain>, bridge: Arc<MockBridge>) -> WalletSession {
    let parts = SessionParts::files(&config.data_root(), chain).with_bridge(bridge);
    WalletSession::from_parts(config, parts).expect("session")
}

/// Session restored from the test mnemonic and unlocked.
pub fn restored(dir: &TempDir, chain: Arc<MockChain>) -> WalletSession {
    let session = open(config(dir), chain);
    session.restore_wallet(TEST_MNEMONIC, PASSWORD).expect("restore");
    session
}

pub fn txid(tag: u8) -> Txid {
    Txid::from_byte_array([tag; 32])
}

/// Output paying `address`.
pub fn utxo(address: &Address, tag: u8, vout: u32, value_sat: u64, confirmations: u32) -> Utxo {
    Utxo {
        txid: txid(tag),
        vout,
        value_sat,
        script_pubkey: address.script_pubkey(),
        confirmations,
        address: address.to_string(),
    }
}

/// A P2WPKH address nobody in these tests holds the key for.
pub fn stranger(network: Network) -> Address {
    let script = ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array([7u8; 20]));
    Address::from_script(&script, network).expect("address")
}

pub fn fees() -> FeeEstimate {
    FeeEstimate { fastest_fee: 40, half_hour_fee: 20, hour_fee: 10, economy_fee: 5, minimum_fee: 1 }
}
