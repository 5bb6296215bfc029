//! Bridge - moving value between mainnet and the rollup.
//!
//! Settlement is somebody else's problem. The wallet signs and broadcasts
//! the lock (or burn) on the source chain, hands the txid to the bridge
//! service, and keeps the id it gets back.

use crate::error::{WalletError, WalletResult};
use crate::network::Network;
use async_trait::async_trait;
use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeDirection {
    ToRollup,
    ToMainnet,
}

impl BridgeDirection {
    pub fn source(&self) -> Network {
        match self {
            BridgeDirection::ToRollup => Network::Mainnet,
            BridgeDirection::ToMainnet => Network::Rollup,
        }
    }

    pub fn destination(&self) -> Network {
        match self {
            BridgeDirection::ToRollup => Network::Rollup,
            BridgeDirection::ToMainnet => Network::Mainnet,
        }
    }
}

impl fmt::Display for BridgeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source(), self.destination())
    }
}

impl FromStr for BridgeDirection {
    type Err = WalletError;

    fn from_str(value: &str) -> WalletResult<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "to_rollup" | "deposit" => Ok(BridgeDirection::ToRollup),
            "to_mainnet" | "withdraw" => Ok(BridgeDirection::ToMainnet),
            other => Err(WalletError::Validation(format!("unknown bridge direction: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    Pending,
    Confirmed,
    Failed,
}

impl BridgeStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, BridgeStatus::Pending)
    }
}

/// What the bridge service is told after the source-chain lock is out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub amount_sat: u64,
    pub direction: BridgeDirection,
    pub source_txid: Txid,
}

#[async_trait]
pub trait BridgeService: Send + Sync {
    /// Register a transfer. Returns the service's id for it.
    async fn initiate_bridge(&self, request: &BridgeRequest) -> WalletResult<String>;

    async fn get_bridge_status(&self, bridge_id: &str) -> WalletResult<BridgeStatus>;
}

/// Where lock/burn outputs are paid, per source chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Mainnet address receiving deposits headed to the rollup.
    pub to_rollup_deposit: Option<String>,
    /// Rollup address receiving burns headed to mainnet.
    pub to_mainnet_burn: Option<String>,
}

impl BridgeConfig {
    pub fn target(&self, direction: BridgeDirection) -> WalletResult<&str> {
        let target = match direction {
            BridgeDirection::ToRollup => self.to_rollup_deposit.as_deref(),
            BridgeDirection::ToMainnet => self.to_mainnet_burn.as_deref(),
        };
        target.ok_or_else(|| WalletError::Validation(format!("no bridge address configured for {direction}")))
    }
}

/// A submitted transfer as the wallet sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeTransfer {
    pub payment_id: String,
    pub direction: BridgeDirection,
    pub amount_sat: u64,
    pub source_txid: Txid,
    /// `None` until the service has accepted the registration.
    pub bridge_id: Option<String>,
}
