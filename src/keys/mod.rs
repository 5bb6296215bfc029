//! Keys - mnemonic to BIP32 tree. The master key and derived keys only
//! exist inside an unlocked session; nothing here touches disk.
//!
//! ```text
//! Mnemonic ──PBKDF2──→ seed (64 B) ──HMAC-SHA512──→ MasterKey
//!                                                     │
//!                                   m/84'/0'/0'/0/0   ▼
//!                                                 DerivedKey ──→ P2WPKH address
//! ```

mod mnemonic;

pub use mnemonic::{generate_mnemonic, validate_mnemonic, Mnemonic};

use crate::error::{WalletError, WalletResult};
use bitcoin::bip32::{ChainCode, ChildNumber, DerivationPath, Fingerprint, Xpriv, Xpub};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey, Signing};
use bitcoin::{CompressedPublicKey, NetworkKind, ScriptBuf, WPubkeyHash};
use std::fmt;
use std::str::FromStr;

/// BIP84 first external key. One path serves every network so a network
/// switch never re-derives.
pub const ACCOUNT_PATH: &str = "m/84'/0'/0'/0/0";

/// Root of the key tree.
pub struct MasterKey {
    xpriv: Xpriv,
}

impl MasterKey {
    pub fn fingerprint(&self) -> Fingerprint {
        self.xpriv.fingerprint(&Secp256k1::signing_only())
    }

    /// Neutered root. Only non-hardened children are reachable from it.
    pub fn xpub(&self) -> Xpub {
        Xpub::from_priv(&Secp256k1::signing_only(), &self.xpriv)
    }

    pub fn derive(&self, path: &str) -> WalletResult<DerivedKey> {
        derive(self, path)
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.xpriv.private_key.non_secure_erase();
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey({})", self.fingerprint())
    }
}

/// A private/public pair plus chain code at a concrete path.
pub struct DerivedKey {
    path: DerivationPath,
    secret: SecretKey,
    public: PublicKey,
    chain_code: ChainCode,
}

impl DerivedKey {
    fn from_xpriv<C: Signing>(secp: &Secp256k1<C>, path: DerivationPath, xpriv: &Xpriv) -> Self {
        Self {
            path,
            secret: xpriv.private_key,
            public: xpriv.private_key.public_key(secp),
            chain_code: xpriv.chain_code,
        }
    }

    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn chain_code(&self) -> ChainCode {
        self.chain_code
    }

    pub fn compressed_public_key(&self) -> CompressedPublicKey {
        CompressedPublicKey(self.public)
    }

    pub fn wpubkey_hash(&self) -> WPubkeyHash {
        self.compressed_public_key().wpubkey_hash()
    }

    /// The P2WPKH output script paying this key. Identical on every network.
    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_p2wpkh(&self.wpubkey_hash())
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    #[cfg(test)]
    pub(crate) fn secret_bytes(&self) -> zeroize::Zeroizing<[u8; 32]> {
        zeroize::Zeroizing::new(self.secret.secret_bytes())
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("path", &self.path.to_string())
            .field("public", &self.public.to_string())
            .finish_non_exhaustive()
    }
}

/// Seed + root key from a mnemonic. Pure: same inputs, same key.
pub fn derive_master_key(mnemonic: &Mnemonic, passphrase: &str) -> WalletResult<MasterKey> {
    let seed = mnemonic.to_seed(passphrase)?;
    let xpriv = Xpriv::new_master(NetworkKind::Main, &seed[..])
        .map_err(|e| WalletError::Validation(format!("master key: {e}")))?;
    Ok(MasterKey { xpriv })
}

pub fn parse_path(path: &str) -> WalletResult<DerivationPath> {
    let trimmed = path.trim();
    if !trimmed.starts_with('m') {
        return Err(WalletError::InvalidPath(format!("path must start at m: {trimmed}")));
    }
    DerivationPath::from_str(trimmed).map_err(|e| WalletError::InvalidPath(format!("{trimmed}: {e}")))
}

/// Walk `path` from the master private key.
pub fn derive(master: &MasterKey, path: &str) -> WalletResult<DerivedKey> {
    let path = parse_path(path)?;
    let secp = Secp256k1::signing_only();
    let child = master
        .xpriv
        .derive_priv(&secp, &path)
        .map_err(|e| WalletError::InvalidPath(e.to_string()))?;
    let key = DerivedKey::from_xpriv(&secp, path, &child);
    drop_xpriv(child);
    Ok(key)
}

/// Walk a path from an exported public key. Hardened segments are refused:
/// they are only derivable from the private key.
pub fn derive_public(xpub: &Xpub, path: &str) -> WalletResult<PublicKey> {
    let path = parse_path(path)?;
    if let Some(index) = path.as_ref().iter().position(ChildNumber::is_hardened) {
        return Err(WalletError::InvalidPath(format!(
            "segment {index} of {path} is hardened and cannot be derived from a public key"
        )));
    }
    let secp = Secp256k1::verification_only();
    let child = xpub
        .derive_pub(&secp, &path)
        .map_err(|e| WalletError::InvalidPath(e.to_string()))?;
    Ok(child.public_key)
}

fn drop_xpriv(mut xpriv: Xpriv) {
    xpriv.private_key.non_secure_erase();
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn master() -> MasterKey {
        derive_master_key(&Mnemonic::parse(TEST_MNEMONIC).unwrap(), "").unwrap()
    }

    #[test]
    fn test_derivation_deterministic() {
        let a = derive(&master(), ACCOUNT_PATH).unwrap();
        let b = derive(&master(), ACCOUNT_PATH).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.chain_code(), b.chain_code());
        assert_eq!(*a.secret_bytes(), *b.secret_bytes());
    }

    #[test]
    fn test_bip84_vector() {
        // BIP84 test vector, m/84'/0'/0'/0/0
        let key = derive(&master(), ACCOUNT_PATH).unwrap();
        assert_eq!(
            key.public_key().to_string(),
            "0330d54fd0dd420a6e5f8d3624f5f3482cae350f79d5f0753bf5beef9c2d91af3c"
        );
    }

    #[test]
    fn test_passphrase_changes_root() {
        let m = Mnemonic::parse(TEST_MNEMONIC).unwrap();
        let plain = derive_master_key(&m, "").unwrap();
        let salted = derive_master_key(&m, "TREZOR").unwrap();
        assert_ne!(plain.fingerprint(), salted.fingerprint());
    }

    #[test]
    fn test_malformed_paths() {
        let master = master();
        for bad in ["", "84'/0'", "m/84'/x", "m//1", "m/4294967296"] {
            assert!(
                matches!(derive(&master, bad), Err(WalletError::InvalidPath(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_public_derivation_matches_private() {
        let master = master();
        let from_priv = derive(&master, "m/0/7").unwrap();
        let from_pub = derive_public(&master.xpub(), "m/0/7").unwrap();
        assert_eq!(from_priv.public_key(), from_pub);
    }

    #[test]
    fn test_hardened_refused_from_public() {
        let err = derive_public(&master().xpub(), "m/84'/0").unwrap_err();
        assert!(matches!(err, WalletError::InvalidPath(_)));
    }
}
