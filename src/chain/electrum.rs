//! Electrum-backed [`ChainSource`]. The client is blocking, so every call
//! runs on the blocking pool. One connection per network, opened on first
//! use and dropped after a transport error so the next call reconnects.

use super::{ChainSource, FeeEstimate, TxStatus};
use crate::address::Address;
use crate::error::{WalletError, WalletResult};
use crate::ledger::Utxo;
use crate::network::Network;
use async_trait::async_trait;
use bdk_electrum::electrum_client::{Client, ElectrumApi, Error as ElectrumError};
use bitcoin::Txid;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Confirmation targets (blocks) for each fee tier.
const FASTEST_TARGET: usize = 1;
const HALF_HOUR_TARGET: usize = 3;
const HOUR_TARGET: usize = 6;
const ECONOMY_TARGET: usize = 144;

pub struct ElectrumSource {
    urls: HashMap<Network, String>,
    clients: Mutex<HashMap<Network, Arc<Client>>>,
}

impl ElectrumSource {
    pub fn new(urls: HashMap<Network, String>) -> Self {
        Self { urls, clients: Mutex::new(HashMap::new()) }
    }

    pub fn url(&self, network: Network) -> Option<&str> {
        self.urls.get(&network).map(String::as_str)
    }

    fn client(&self, network: Network) -> WalletResult<Arc<Client>> {
        let mut clients = self.clients.lock().map_err(|_| WalletError::InvalidState("electrum lock".into()))?;
        if let Some(client) = clients.get(&network) {
            return Ok(client.clone());
        }
        let url = self
            .url(network)
            .ok_or_else(|| WalletError::Network(format!("no electrum endpoint configured for {network}")))?;
        let client = Arc::new(Client::new(url).map_err(|e| WalletError::Network(format!("electrum {url}: {e}")))?);
        info!(%network, url, "Electrum connected");
        clients.insert(network, client.clone());
        Ok(client)
    }

    fn forget(&self, network: Network) {
        if let Ok(mut clients) = self.clients.lock() {
            clients.remove(&network);
        }
    }

    /// Run a blocking client call for `network` off the async runtime.
    async fn call<T, F>(&self, network: Network, f: F) -> WalletResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> WalletResult<T> + Send + 'static,
    {
        let client = self.client(network)?;
        let result = tokio::task::spawn_blocking(move || f(&client))
            .await
            .map_err(|e| WalletError::Network(format!("electrum task: {e}")))?;
        if matches!(result, Err(WalletError::Network(_))) {
            self.forget(network);
        }
        result
    }
}

fn transport(e: ElectrumError) -> WalletError {
    WalletError::Network(e.to_string())
}

/// BTC/kvB to sat/vB, rounded up, at least 1.
fn btc_per_kvb_to_sat_per_vb(rate: f64) -> u64 {
    if !rate.is_finite() || rate <= 0.0 {
        return 1;
    }
    // Round away float noise before taking the ceiling.
    let sat_per_vb = (rate * 100_000_000.0).round() / 1_000.0;
    (sat_per_vb.ceil() as u64).max(1)
}

#[async_trait]
impl ChainSource for ElectrumSource {
    async fn get_utxos(&self, address: &Address, network: Network) -> WalletResult<Vec<Utxo>> {
        let script = address.script_pubkey();
        let encoded = address.to_string();
        self.call(network, move |client| {
            let tip = client.block_headers_subscribe().map_err(transport)?.height as u32;
            let unspent = client.script_list_unspent(&script).map_err(transport)?;
            debug!(count = unspent.len(), tip, "Electrum listunspent");
            Ok(unspent
                .into_iter()
                .map(|u| {
                    let height = u.height as u32;
                    let confirmations = if height == 0 || height > tip { 0 } else { tip - height + 1 };
                    Utxo {
                        txid: u.tx_hash,
                        vout: u.tx_pos as u32,
                        value_sat: u.value,
                        script_pubkey: script.clone(),
                        confirmations,
                        address: encoded.clone(),
                    }
                })
                .collect())
        })
        .await
    }

    async fn get_fee_estimates(&self, network: Network) -> WalletResult<FeeEstimate> {
        self.call(network, |client| {
            let minimum = btc_per_kvb_to_sat_per_vb(client.relay_fee().map_err(transport)?);
            let rate = |target: usize| -> WalletResult<u64> {
                let btc = client.estimate_fee(target).map_err(transport)?;
                // -1 means the server has no estimate for this target.
                Ok(if btc > 0.0 { btc_per_kvb_to_sat_per_vb(btc) } else { minimum })
            };
            let fees = FeeEstimate {
                fastest_fee: rate(FASTEST_TARGET)?,
                half_hour_fee: rate(HALF_HOUR_TARGET)?,
                hour_fee: rate(HOUR_TARGET)?,
                economy_fee: rate(ECONOMY_TARGET)?,
                minimum_fee: minimum,
            };
            Ok(fees.normalized())
        })
        .await
    }

    async fn broadcast(&self, raw_tx: &[u8], network: Network) -> WalletResult<Txid> {
        let raw = raw_tx.to_vec();
        self.call(network, move |client| {
            client.transaction_broadcast_raw(&raw).map_err(|e| match e {
                ElectrumError::Protocol(reason) => WalletError::BroadcastRejected {
                    reason: reason
                        .get("message")
                        .and_then(|m| m.as_str())
                        .map(str::to_string)
                        .unwrap_or_else(|| reason.to_string()),
                },
                other => transport(other),
            })
        })
        .await
    }

    async fn get_tx_status(&self, txid: &Txid, address: &Address, network: Network) -> WalletResult<TxStatus> {
        let script = address.script_pubkey();
        let txid = *txid;
        self.call(network, move |client| {
            let history = client.script_get_history(&script).map_err(transport)?;
            Ok(match history.into_iter().find(|h| h.tx_hash == txid) {
                Some(h) if h.height > 0 => TxStatus::Confirmed(h.height as u32),
                Some(_) => TxStatus::Mempool,
                None => TxStatus::Unknown,
            })
        })
        .await
    }
}
