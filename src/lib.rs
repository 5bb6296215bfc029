//! SwiftPay: non-custodial Bitcoin wallet engine.
//!
//! Keys never leave the process. The mnemonic is sealed at rest with a
//! password-derived key; signing happens locally; the chain is only ever
//! asked for UTXOs, fee rates and to relay a finished transaction.
//!
//! # Architecture
//!
//! ```text
//! WalletSession (entry point, one per wallet)
//!   │
//!   ├── vault      mnemonic ⇄ EncryptedVaultRecord (Argon2id + ChaCha20-Poly1305)
//!   ├── keys       mnemonic → BIP32 master → m/84'/0'/0'/0/0
//!   ├── address    key + network → bech32 P2WPKH (bc / tb / sprt)
//!   │
//!   ├── ledger     per (address, network) UTXO snapshots + reservations
//!   │     └── chain::ChainSource (Electrum, or any mock)
//!   │
//!   ├── tx         select → build → sign → serialize, payment state machine
//!   ├── bridge     mainnet ⇄ rollup transfers over a BridgeService
//!   │
//!   └── state / history   JSON files under the data root
//! ```
//!
//! # Payment lifecycle
//!
//! | State | Reached by |
//! |-------|------------|
//! | `Drafting` | `prepare_send` validated the request |
//! | `InputsSelected` | UTXOs reserved, unsigned tx built |
//! | `Signed` | every input signed and verified |
//! | `Broadcasting` | handed to the chain source (may repeat) |
//! | `Confirmed` / `Rejected` / `Dropped` | terminal |
//!
//! # Features
//!
//! - `electrum` (default) - Electrum-backed [`chain::ChainSource`]
//!
//! # Usage
//!
//! ```ignore
//! use swiftpay::{FeeChoice, Network, SendRequest, WalletConfig, WalletSession};
//!
//! let config = WalletConfig::new("myapp").with_network(Network::Testnet);
//! let session = WalletSession::open(config, chain)?;
//!
//! let mnemonic = session.create_wallet("correct horse", 128)?;
//! let balance = session.refresh().await?;
//!
//! let payment = session
//!     .send(&SendRequest::new("tb1q...", 50_000, FeeChoice::Rate(10)))
//!     .await?;
//! ```

pub mod address;
pub mod bridge;
pub mod chain;
pub mod config;
pub mod error;
pub mod history;
pub mod keys;
pub mod ledger;
pub mod logging;
pub mod network;
pub mod runtime;
pub mod session;
pub mod state;
pub mod storage;
pub mod tx;
pub mod vault;

pub use address::{Address, ScriptType};
pub use bridge::{BridgeConfig, BridgeDirection, BridgeService, BridgeStatus, BridgeTransfer};
pub use chain::{ChainSource, FeeEstimate, FeeLevel, RetryPolicy, TxStatus};
pub use config::WalletConfig;
pub use error::{WalletError, WalletResult};
pub use history::{RecordKind, RecordStatus, TransactionRecord};
pub use keys::Mnemonic;
pub use ledger::{Balance, Utxo};
pub use network::Network;
pub use runtime::{install_signal_handlers, Shutdown};
pub use session::{SessionParts, WalletSession};
pub use tx::{FeeChoice, OutgoingPayment, PaymentState, SendRequest, SignedTransaction};
pub use vault::KdfParams;
