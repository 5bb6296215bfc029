//! Where sealed records live. One record per slot per device, under a
//! fixed storage key.

use super::EncryptedVaultRecord;
use crate::error::WalletResult;
use crate::storage;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VaultSlot {
    /// Sealed under the user's password. Always present once a wallet exists.
    Password,
    /// Sealed under a device key released by biometrics. Optional.
    Device,
}

impl VaultSlot {
    pub fn storage_key(&self) -> &'static str {
        match self {
            VaultSlot::Password => "swiftpay_encrypted_seed",
            VaultSlot::Device => "swiftpay_device_seed",
        }
    }
}

pub trait VaultStore: Send + Sync {
    fn load(&self, slot: VaultSlot) -> WalletResult<Option<EncryptedVaultRecord>>;
    fn save(&self, slot: VaultSlot, record: &EncryptedVaultRecord) -> WalletResult<()>;
    fn remove(&self, slot: VaultSlot) -> WalletResult<()>;

    fn exists(&self) -> WalletResult<bool> {
        Ok(self.load(VaultSlot::Password)?.is_some())
    }
}

/// JSON files under `<data_root>/vault/`.
#[derive(Debug, Clone)]
pub struct FileVaultStore {
    dir: PathBuf,
}

impl FileVaultStore {
    pub fn new(data_root: &Path) -> Self {
        Self { dir: data_root.join("vault") }
    }

    fn path(&self, slot: VaultSlot) -> PathBuf {
        self.dir.join(format!("{}.json", slot.storage_key()))
    }
}

impl VaultStore for FileVaultStore {
    fn load(&self, slot: VaultSlot) -> WalletResult<Option<EncryptedVaultRecord>> {
        storage::read_json(&self.path(slot))
    }

    fn save(&self, slot: VaultSlot, record: &EncryptedVaultRecord) -> WalletResult<()> {
        storage::write_json(&self.path(slot), record)
    }

    fn remove(&self, slot: VaultSlot) -> WalletResult<()> {
        storage::remove_file(&self.path(slot))
    }
}
