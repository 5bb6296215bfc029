//! Vault - password-based sealing of the recovery phrase.
//!
//! Argon2id stretches the password with a fresh random salt; ChaCha20-Poly1305
//! encrypts the phrase and appends a 16-byte tag. The KDF parameters and
//! record version are bound into the associated data, so a tampered header
//! fails the same tag check as a wrong password.
//!
//! The vault holds no state. Persisting records is the caller's job, usually
//! through a [`VaultStore`].

mod store;

pub use store::{FileVaultStore, VaultSlot, VaultStore};

use crate::error::{WalletError, WalletResult};
use crate::keys::Mnemonic;
use argon2::{Algorithm, Argon2, Params, Version};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

pub const RECORD_VERSION: u8 = 1;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Argon2id cost parameters, stored alongside the ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { memory_kib: 19_456, iterations: 2, parallelism: 1 }
    }
}

impl KdfParams {
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self { memory_kib, iterations, parallelism }
    }

    /// Minimal cost for full-entropy device keys, where stretching buys nothing.
    pub fn device() -> Self {
        Self { memory_kib: 8, iterations: 1, parallelism: 1 }
    }

    fn argon2(&self) -> Result<Argon2<'static>, argon2::Error> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, Some(KEY_LEN))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

/// Everything needed to unseal, minus the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedVaultRecord {
    pub version: u8,
    pub kdf: KdfParams,
    #[serde(with = "b64")]
    pub salt: Vec<u8>,
    #[serde(with = "b64")]
    pub nonce: Vec<u8>,
    /// Ciphertext with the Poly1305 tag appended.
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,
}

impl EncryptedVaultRecord {
    fn aad(&self) -> Vec<u8> {
        aad(self.version, &self.kdf)
    }
}

fn aad(version: u8, kdf: &KdfParams) -> Vec<u8> {
    format!(
        "swiftpay-vault|v{version}|argon2id|m={}|t={}|p={}",
        kdf.memory_kib, kdf.iterations, kdf.parallelism
    )
    .into_bytes()
}

/// Seal under a password with default KDF cost.
pub fn seal(mnemonic: &Mnemonic, password: &str) -> WalletResult<EncryptedVaultRecord> {
    seal_with(mnemonic, password.as_bytes(), &KdfParams::default())
}

/// Seal under an arbitrary secret with explicit KDF cost.
pub fn seal_with(mnemonic: &Mnemonic, secret: &[u8], kdf: &KdfParams) -> WalletResult<EncryptedVaultRecord> {
    let mut salt = vec![0u8; SALT_LEN];
    let mut nonce = vec![0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .and_then(|_| OsRng.try_fill_bytes(&mut nonce))
        .map_err(|e| WalletError::EntropySource(e.to_string()))?;

    let key = derive_key(secret, &salt, kdf)
        .map_err(|e| WalletError::Validation(format!("kdf params: {e}")))?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let aad = aad(RECORD_VERSION, kdf);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: mnemonic.phrase().as_bytes(), aad: &aad })
        .map_err(|e| WalletError::Encoding(format!("seal: {e}")))?;

    Ok(EncryptedVaultRecord { version: RECORD_VERSION, kdf: *kdf, salt, nonce, ciphertext })
}

/// Verify the tag and return the phrase. Any failure, whether a wrong
/// password, a flipped bit or a malformed header, is [`WalletError::Authentication`].
pub fn unseal(record: &EncryptedVaultRecord, password: &str) -> WalletResult<Mnemonic> {
    unseal_with(record, password.as_bytes())
}

pub fn unseal_with(record: &EncryptedVaultRecord, secret: &[u8]) -> WalletResult<Mnemonic> {
    if record.version != RECORD_VERSION || record.nonce.len() != NONCE_LEN {
        return Err(WalletError::Authentication);
    }
    let key = derive_key(secret, &record.salt, &record.kdf).map_err(|_| WalletError::Authentication)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
    let aad = record.aad();
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&record.nonce), Payload { msg: &record.ciphertext, aad: &aad })
            .map_err(|_| WalletError::Authentication)?,
    );
    let phrase = std::str::from_utf8(&plaintext).map_err(|_| WalletError::Authentication)?;
    Mnemonic::parse(phrase).map_err(|_| WalletError::Authentication)
}

/// Seal under a platform-released 32-byte key (biometric unlock slot).
pub fn seal_with_device_key(mnemonic: &Mnemonic, device_key: &[u8; 32]) -> WalletResult<EncryptedVaultRecord> {
    seal_with(mnemonic, device_key, &KdfParams::device())
}

pub fn unseal_with_device_key(record: &EncryptedVaultRecord, device_key: &[u8; 32]) -> WalletResult<Mnemonic> {
    unseal_with(record, device_key)
}

fn derive_key(secret: &[u8], salt: &[u8], kdf: &KdfParams) -> Result<Zeroizing<[u8; KEY_LEN]>, argon2::Error> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    kdf.argon2()?.hash_password_into(secret, salt, &mut key[..])?;
    Ok(key)
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}
