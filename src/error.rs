//! Wallet error taxonomy.
//!
//! Every fallible engine operation returns [`WalletResult`]. Errors are split
//! by how the caller should react: fix the input, re-enter the password,
//! add funds, retry later, or treat it as a defect.

use thiserror::Error;

pub type WalletResult<T> = Result<T, WalletError>;

#[derive(Debug, Error)]
pub enum WalletError {
    // -- validation: fix the input, never retried automatically --
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("Invalid derivation path: {0}")]
    InvalidPath(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // -- secrets --
    #[error("Entropy source unavailable: {0}")]
    EntropySource(String),

    #[error("Authentication failed: wrong password or corrupted vault record")]
    Authentication,

    // -- funds --
    #[error("Insufficient funds: need {required} sat, have {available} sat")]
    InsufficientFunds { required: u64, available: u64 },

    /// An input script matches no key this session can derive. Indicates a
    /// derivation-path bug rather than bad user input.
    #[error("Key mismatch on input {input}: script does not belong to this wallet")]
    KeyMismatch { input: usize },

    // -- external collaborators --
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Broadcast rejected: {reason}")]
    BroadcastRejected { reason: String },

    // -- session --
    #[error("Wallet is locked")]
    Locked,

    #[error("No wallet has been created on this device")]
    NoWallet,

    #[error("A wallet already exists on this device")]
    WalletExists,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // -- plumbing --
    #[error("Storage: {0}")]
    Storage(String),

    #[error("Encoding: {0}")]
    Encoding(String),
}

impl WalletError {
    /// Whether retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::Network(_) | WalletError::Timeout(_))
    }

    /// Missing satoshis for an [`WalletError::InsufficientFunds`] failure.
    pub fn shortfall(&self) -> Option<u64> {
        match self {
            WalletError::InsufficientFunds { required, available } => {
                Some(required.saturating_sub(*available))
            }
            _ => None,
        }
    }

    /// Input-correctable errors (bad mnemonic, path, address or amount).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            WalletError::InvalidMnemonic(_)
                | WalletError::InvalidPath(_)
                | WalletError::InvalidAddress(_)
                | WalletError::InvalidAmount(_)
                | WalletError::Validation(_)
        )
    }
}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        WalletError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_only_for_transport_failures() {
        assert!(WalletError::Network("refused".into()).is_retryable());
        assert!(WalletError::Timeout(5000).is_retryable());
        assert!(!WalletError::Authentication.is_retryable());
        assert!(!WalletError::BroadcastRejected { reason: "min relay fee not met".into() }.is_retryable());
    }

    #[test]
    fn test_shortfall() {
        let err = WalletError::InsufficientFunds { required: 52_000, available: 50_000 };
        assert_eq!(err.shortfall(), Some(2_000));
        assert_eq!(WalletError::Locked.shortfall(), None);
    }
}
