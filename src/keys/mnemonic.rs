//! BIP39 recovery phrases. Plaintext lives only inside [`Mnemonic`], which
//! wipes its buffer on drop.

use crate::error::{WalletError, WalletResult};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::Zeroizing;

/// A validated 12- or 24-word English recovery phrase.
#[derive(Clone, PartialEq, Eq)]
pub struct Mnemonic {
    phrase: Zeroizing<String>,
}

impl Mnemonic {
    /// Draw fresh entropy from the OS and encode it. `entropy_bits` is 128 or 256.
    pub fn generate(entropy_bits: usize) -> WalletResult<Self> {
        let entropy_len = match entropy_bits {
            128 => 16,
            256 => 32,
            _ => {
                return Err(WalletError::Validation(format!(
                    "entropy must be 128 or 256 bits, got {entropy_bits}"
                )))
            }
        };

        let mut entropy = Zeroizing::new(vec![0u8; entropy_len]);
        OsRng
            .try_fill_bytes(&mut entropy)
            .map_err(|e| WalletError::EntropySource(e.to_string()))?;

        let mnemonic = bip39::Mnemonic::from_entropy(&entropy)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(Self { phrase: Zeroizing::new(mnemonic.to_string()) })
    }

    /// Parse and checksum-verify a phrase. Case and extra whitespace are tolerated.
    pub fn parse(phrase: &str) -> WalletResult<Self> {
        let normalized = Zeroizing::new(
            phrase
                .split_whitespace()
                .map(|w| w.to_lowercase())
                .collect::<Vec<_>>()
                .join(" "),
        );
        let parsed = bip39::Mnemonic::parse_normalized(&normalized)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        match parsed.word_count() {
            12 | 24 => Ok(Self { phrase: normalized }),
            n => Err(WalletError::InvalidMnemonic(format!("expected 12 or 24 words, got {n}"))),
        }
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn word_count(&self) -> usize {
        self.phrase.split(' ').count()
    }

    /// PBKDF2-HMAC-SHA512 stretch of phrase + passphrase into the 64-byte seed.
    pub(crate) fn to_seed(&self, passphrase: &str) -> WalletResult<Zeroizing<[u8; 64]>> {
        let parsed = bip39::Mnemonic::parse_normalized(&self.phrase)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
        Ok(Zeroizing::new(parsed.to_seed(passphrase)))
    }
}

impl fmt::Debug for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mnemonic({} words, redacted)", self.word_count())
    }
}

/// Generate a new recovery phrase with 128 or 256 bits of entropy.
pub fn generate_mnemonic(entropy_bits: usize) -> WalletResult<Mnemonic> {
    Mnemonic::generate(entropy_bits)
}

/// Checksum check only. Never touches the network.
pub fn validate_mnemonic(phrase: &str) -> bool {
    Mnemonic::parse(phrase).is_ok()
}
