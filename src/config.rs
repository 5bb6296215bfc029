//! Wallet configuration - constructed by the embedding app or the CLI.

use crate::bridge::BridgeConfig;
use crate::chain::RetryPolicy;
use crate::network::Network;
use crate::storage;
use crate::vault::KdfParams;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_APP: &str = "swiftpay";
pub const DEFAULT_DUST_THRESHOLD: u64 = 546;

/// Public Electrum servers. The rollup has none by default.
pub fn default_electrum_url(network: Network) -> Option<&'static str> {
    match network {
        Network::Mainnet => Some("ssl://electrum.blockstream.info:50002"),
        Network::Testnet => Some("ssl://electrum.blockstream.info:60002"),
        Network::Rollup => None,
    }
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub app: String,
    pub data_dir: Option<PathBuf>,
    /// Network selected on first run. Later runs use the persisted choice.
    pub network: Network,
    pub kdf: KdfParams,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub min_confirmations: u32,
    pub dust_threshold: u64,
    /// A broadcast payment unseen for this long is marked dropped.
    pub drop_after: Duration,
    pub auto_lock_after: Option<Duration>,
    pub electrum: HashMap<Network, String>,
    pub bridge: BridgeConfig,
}

impl Default for WalletConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            app: DEFAULT_APP.into(),
            data_dir: None,
            network: Network::default(),
            kdf: KdfParams::default(),
            request_timeout: retry.timeout,
            max_retries: retry.max_retries,
            retry_backoff: retry.backoff,
            min_confirmations: 1,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            drop_after: Duration::from_secs(72 * 3600),
            auto_lock_after: None,
            electrum: Network::ALL
                .into_iter()
                .filter_map(|n| default_electrum_url(n).map(|url| (n, url.to_string())))
                .collect(),
            bridge: BridgeConfig::default(),
        }
    }
}

impl WalletConfig {
    pub fn new(app: impl Into<String>) -> Self {
        Self { app: app.into(), ..Default::default() }
    }
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self { self.data_dir = Some(path.into()); self }
    pub fn with_network(mut self, network: Network) -> Self { self.network = network; self }
    pub fn with_kdf(mut self, kdf: KdfParams) -> Self { self.kdf = kdf; self }
    pub fn with_timeout(mut self, timeout: Duration) -> Self { self.request_timeout = timeout; self }
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }
    pub fn with_min_confirmations(mut self, n: u32) -> Self { self.min_confirmations = n.max(1); self }
    pub fn with_dust_threshold(mut self, sat: u64) -> Self { self.dust_threshold = sat; self }
    pub fn with_drop_after(mut self, after: Duration) -> Self { self.drop_after = after; self }
    pub fn with_auto_lock(mut self, idle: Duration) -> Self { self.auto_lock_after = Some(idle); self }
    pub fn with_electrum(mut self, network: Network, url: impl Into<String>) -> Self {
        self.electrum.insert(network, url.into());
        self
    }
    pub fn with_bridge(mut self, bridge: BridgeConfig) -> Self { self.bridge = bridge; self }

    /// Resolved storage root: explicit dir, else `$SWIFTPAY_ROOT/<app>`,
    /// else the platform data dir.
    pub fn data_root(&self) -> PathBuf {
        storage::data_root(&self.app, self.data_dir.as_deref())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { timeout: self.request_timeout, max_retries: self.max_retries, backoff: self.retry_backoff }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = WalletConfig::new("demo");
        assert_eq!(cfg.app, "demo");
        assert_eq!(cfg.min_confirmations, 1);
        assert_eq!(cfg.dust_threshold, 546);
        assert_eq!(cfg.drop_after, Duration::from_secs(259_200));
        assert!(cfg.electrum.contains_key(&Network::Mainnet));
        assert!(!cfg.electrum.contains_key(&Network::Rollup));
    }

    #[test]
    fn test_builder() {
        let cfg = WalletConfig::new("demo")
            .with_data_dir("/tmp/demo")
            .with_network(Network::Testnet)
            .with_electrum(Network::Rollup, "tcp://localhost:50001")
            .with_min_confirmations(0)
            .with_retries(0, Duration::ZERO);
        assert_eq!(cfg.data_root(), PathBuf::from("/tmp/demo"));
        assert_eq!(cfg.network, Network::Testnet);
        assert_eq!(cfg.electrum[&Network::Rollup], "tcp://localhost:50001");
        assert_eq!(cfg.min_confirmations, 1);
        assert_eq!(cfg.retry_policy().max_retries, 0);
    }
}
