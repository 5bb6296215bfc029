//! Chain - the external data source the wallet reads from and submits to.
//!
//! The engine never trusts a value from here to be present or fresh: every
//! call goes through [`RetryPolicy`], which bounds it with a timeout and
//! retries transport failures with exponential backoff.

#[cfg(feature = "electrum")]
pub mod electrum;

mod retry;

pub use retry::RetryPolicy;

use crate::address::Address;
use crate::error::{WalletError, WalletResult};
use crate::ledger::Utxo;
use crate::network::Network;
use async_trait::async_trait;
use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a transaction stands according to the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "height")]
pub enum TxStatus {
    /// Not seen in the mempool or any block.
    Unknown,
    Mempool,
    Confirmed(u32),
}

#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Current unspent outputs paying `address`.
    async fn get_utxos(&self, address: &Address, network: Network) -> WalletResult<Vec<Utxo>>;

    async fn get_fee_estimates(&self, network: Network) -> WalletResult<FeeEstimate>;

    /// Submit raw bytes. A node refusal is [`WalletError::BroadcastRejected`]
    /// with the node's reason; transport failures are [`WalletError::Network`].
    async fn broadcast(&self, raw_tx: &[u8], network: Network) -> WalletResult<Txid>;

    /// Status of `txid`, looked up through the history of `address`.
    async fn get_tx_status(&self, txid: &Txid, address: &Address, network: Network) -> WalletResult<TxStatus>;
}

/// Named fee tiers. Maps onto the fields of [`FeeEstimate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeLevel {
    Fastest,
    #[default]
    HalfHour,
    Hour,
    Economy,
    Minimum,
}

impl FeeLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeLevel::Fastest => "fastest",
            FeeLevel::HalfHour => "half_hour",
            FeeLevel::Hour => "hour",
            FeeLevel::Economy => "economy",
            FeeLevel::Minimum => "minimum",
        }
    }
}

impl fmt::Display for FeeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeeLevel {
    type Err = WalletError;

    fn from_str(value: &str) -> WalletResult<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fastest" | "fast" => Ok(FeeLevel::Fastest),
            "half_hour" | "halfhour" | "medium" => Ok(FeeLevel::HalfHour),
            "hour" | "slow" => Ok(FeeLevel::Hour),
            "economy" => Ok(FeeLevel::Economy),
            "minimum" | "min" => Ok(FeeLevel::Minimum),
            other => Err(WalletError::Validation(format!("unknown fee level: {other}"))),
        }
    }
}

/// Advisory fee rates in sat/vB. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    pub hour_fee: u64,
    pub economy_fee: u64,
    pub minimum_fee: u64,
}

impl FeeEstimate {
    pub fn rate(&self, level: FeeLevel) -> u64 {
        match level {
            FeeLevel::Fastest => self.fastest_fee,
            FeeLevel::HalfHour => self.half_hour_fee,
            FeeLevel::Hour => self.hour_fee,
            FeeLevel::Economy => self.economy_fee,
            FeeLevel::Minimum => self.minimum_fee,
        }
    }

    /// Clamp every tier to at least 1 sat/vB and make slower tiers no
    /// more expensive than faster ones.
    pub fn normalized(self) -> Self {
        let minimum_fee = self.minimum_fee.max(1);
        let economy_fee = self.economy_fee.max(minimum_fee);
        let hour_fee = self.hour_fee.max(economy_fee);
        let half_hour_fee = self.half_hour_fee.max(hour_fee);
        let fastest_fee = self.fastest_fee.max(half_hour_fee);
        Self { fastest_fee, half_hour_fee, hour_fee, economy_fee, minimum_fee }
    }
}
