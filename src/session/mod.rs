//! WalletSession - the one object callers hold.
//!
//! Owns the unlocked key, the UTXO ledger and the payment book, and is
//! handed its collaborators (chain source, vault store, state cache,
//! history log, bridge service) at construction. There is no global state.
//!
//! Locking:
//! - `secrets` is the sensitive-operation lock. Unlock, lock, derivation
//!   and signing all run under it, so they never interleave.
//! - The ledger has its own lock; selection and refresh of the same
//!   `(address, network)` serialize there.
//! - No lock is held across an `.await`.

mod send;
mod sync;

use crate::address::{self, address_for, Address, ScriptType};
use crate::bridge::BridgeService;
use crate::chain::{ChainSource, RetryPolicy};
use crate::config::WalletConfig;
use crate::error::{WalletError, WalletResult};
use crate::history::{FileHistoryLog, HistoryLog, TransactionRecord};
use crate::keys::{derive, derive_master_key, DerivedKey, Mnemonic, ACCOUNT_PATH};
use crate::ledger::{Balance, UtxoLedger};
use crate::network::Network;
use crate::state::{self, FileStateStore, StateStore, WalletState};
use crate::tx::OutgoingPayment;
use crate::vault::{self, FileVaultStore, VaultSlot, VaultStore};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Collaborators a session is built from.
pub struct SessionParts {
    pub chain: Arc<dyn ChainSource>,
    pub vault: Arc<dyn VaultStore>,
    pub state: Arc<dyn StateStore>,
    pub history: Arc<dyn HistoryLog>,
    pub bridge: Option<Arc<dyn BridgeService>>,
}

impl SessionParts {
    /// File-backed stores under `data_root`.
    pub fn files(data_root: &Path, chain: Arc<dyn ChainSource>) -> Self {
        Self {
            chain,
            vault: Arc::new(FileVaultStore::new(data_root)),
            state: Arc::new(FileStateStore::new(data_root)),
            history: Arc::new(FileHistoryLog::new(data_root)),
            bridge: None,
        }
    }

    pub fn with_bridge(mut self, bridge: Arc<dyn BridgeService>) -> Self {
        self.bridge = Some(bridge);
        self
    }
}

/// Present only while unlocked. Dropping it erases the key.
struct Secrets {
    key: DerivedKey,
}

pub struct WalletSession {
    config: WalletConfig,
    retry: RetryPolicy,
    chain: Arc<dyn ChainSource>,
    bridge: Option<Arc<dyn BridgeService>>,
    vault: Arc<dyn VaultStore>,
    state_store: Arc<dyn StateStore>,
    history: Arc<dyn HistoryLog>,
    ledger: UtxoLedger,
    secrets: Mutex<Option<Secrets>>,
    state: Mutex<WalletState>,
    payments: Mutex<HashMap<String, OutgoingPayment>>,
    last_activity: Mutex<Instant>,
    sequence: AtomicU64,
}

fn poisoned(what: &str) -> WalletError {
    WalletError::InvalidState(format!("{what} lock poisoned"))
}

impl WalletSession {
    /// Open with file-backed stores under the configured data root.
    pub fn open(config: WalletConfig, chain: Arc<dyn ChainSource>) -> WalletResult<Self> {
        let root = config.data_root();
        std::fs::create_dir_all(&root)
            .map_err(|e| WalletError::Storage(format!("mkdir {}: {e}", root.display())))?;
        Self::from_parts(config, SessionParts::files(&root, chain))
    }

    pub fn from_parts(config: WalletConfig, parts: SessionParts) -> WalletResult<Self> {
        let state = match parts.state.load() {
            Ok(Some(state)) => state,
            Ok(None) => WalletState::new("", config.network),
            Err(e) => {
                warn!(error = %e, "Unreadable state cache, starting fresh");
                WalletState::new("", config.network)
            }
        };
        debug!(network = %state.network, "Session opened");
        Ok(Self {
            retry: config.retry_policy(),
            config,
            chain: parts.chain,
            bridge: parts.bridge,
            vault: parts.vault,
            state_store: parts.state,
            history: parts.history,
            ledger: UtxoLedger::new(),
            secrets: Mutex::new(None),
            state: Mutex::new(state),
            payments: Mutex::new(HashMap::new()),
            last_activity: Mutex::new(Instant::now()),
            sequence: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    // ==================== Lifecycle ====================

    pub fn has_wallet(&self) -> WalletResult<bool> {
        self.vault.exists()
    }

    /// Generate a fresh mnemonic, seal it and unlock. The caller must show
    /// the returned phrase to the user for backup.
    pub fn create_wallet(&self, password: &str, entropy_bits: usize) -> WalletResult<Mnemonic> {
        check_password(password)?;
        if self.has_wallet()? {
            return Err(WalletError::WalletExists);
        }
        let mnemonic = Mnemonic::generate(entropy_bits)?;
        self.install(&mnemonic, password)?;
        info!(words = mnemonic.word_count(), "Wallet created");
        Ok(mnemonic)
    }

    /// Replace whatever wallet is on this device with one from `phrase`.
    pub fn restore_wallet(&self, phrase: &str, password: &str) -> WalletResult<()> {
        check_password(password)?;
        let mnemonic = Mnemonic::parse(phrase)?;
        self.install(&mnemonic, password)?;
        info!(words = mnemonic.word_count(), "Wallet restored");
        Ok(())
    }

    fn install(&self, mnemonic: &Mnemonic, password: &str) -> WalletResult<()> {
        let mut secrets = self.secrets.lock().map_err(|_| poisoned("secrets"))?;
        let key = account_key(mnemonic)?;
        let record = vault::seal_with(mnemonic, password.as_bytes(), &self.config.kdf)?;
        self.vault.save(VaultSlot::Password, &record)?;
        // A device slot sealed for a previous wallet must not unlock this one.
        self.vault.remove(VaultSlot::Device)?;

        let id = state::wallet_id(key.script_pubkey().as_bytes());
        {
            let mut st = self.state.lock().map_err(|_| poisoned("state"))?;
            if st.wallet_id != id {
                let network = st.network;
                *st = WalletState::new(id, network);
                self.state_store.save(&st)?;
                self.history.clear()?;
            }
        }
        *secrets = Some(Secrets { key });
        self.mark_active()?;
        Ok(())
    }

    /// Unseal with the password and derive the account key. A wrong
    /// password is [`WalletError::Authentication`] and changes nothing.
    pub fn unlock_wallet(&self, password: &str) -> WalletResult<()> {
        let mut secrets = self.secrets.lock().map_err(|_| poisoned("secrets"))?;
        let record = self.vault.load(VaultSlot::Password)?.ok_or(WalletError::NoWallet)?;
        let mnemonic = vault::unseal(&record, password).inspect_err(|_| warn!("Unlock failed"))?;
        *secrets = Some(Secrets { key: account_key(&mnemonic)? });
        self.mark_active()?;
        info!("Wallet unlocked");
        Ok(())
    }

    pub fn unlock_with_device_key(&self, device_key: &[u8; 32]) -> WalletResult<()> {
        let mut secrets = self.secrets.lock().map_err(|_| poisoned("secrets"))?;
        let record = self.vault.load(VaultSlot::Device)?.ok_or_else(|| {
            WalletError::InvalidState("device unlock is not enabled".into())
        })?;
        let mnemonic = vault::unseal_with_device_key(&record, device_key)?;
        *secrets = Some(Secrets { key: account_key(&mnemonic)? });
        self.mark_active()?;
        info!("Wallet unlocked with device key");
        Ok(())
    }

    /// Seal a second copy under a platform-held key (biometric unlock).
    pub fn enable_device_unlock(&self, password: &str, device_key: &[u8; 32]) -> WalletResult<()> {
        let _secrets = self.secrets.lock().map_err(|_| poisoned("secrets"))?;
        let mnemonic = self.unseal_password(password)?;
        let record = vault::seal_with_device_key(&mnemonic, device_key)?;
        self.vault.save(VaultSlot::Device, &record)?;
        info!("Device unlock enabled");
        Ok(())
    }

    pub fn disable_device_unlock(&self) -> WalletResult<()> {
        self.vault.remove(VaultSlot::Device)?;
        info!("Device unlock disabled");
        Ok(())
    }

    pub fn device_unlock_enabled(&self) -> WalletResult<bool> {
        Ok(self.vault.load(VaultSlot::Device)?.is_some())
    }

    /// Drop the key. Its memory is erased on drop.
    pub fn lock_wallet(&self) -> WalletResult<()> {
        let mut secrets = self.secrets.lock().map_err(|_| poisoned("secrets"))?;
        if secrets.take().is_some() {
            info!("Wallet locked");
        }
        Ok(())
    }

    pub fn is_unlocked(&self) -> bool {
        self.secrets.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Re-seal under `new_password` with a fresh salt and nonce.
    pub fn change_password(&self, old_password: &str, new_password: &str) -> WalletResult<()> {
        check_password(new_password)?;
        let _secrets = self.secrets.lock().map_err(|_| poisoned("secrets"))?;
        let mnemonic = self.unseal_password(old_password)?;
        let record = vault::seal_with(&mnemonic, new_password.as_bytes(), &self.config.kdf)?;
        self.vault.save(VaultSlot::Password, &record)?;
        info!("Password changed");
        Ok(())
    }

    /// The recovery phrase, re-read from the vault. Always asks for the
    /// password, even when unlocked.
    pub fn reveal_mnemonic(&self, password: &str) -> WalletResult<Mnemonic> {
        let _secrets = self.secrets.lock().map_err(|_| poisoned("secrets"))?;
        self.unseal_password(password)
    }

    fn unseal_password(&self, password: &str) -> WalletResult<Mnemonic> {
        let record = self.vault.load(VaultSlot::Password)?.ok_or(WalletError::NoWallet)?;
        vault::unseal(&record, password)
    }

    fn mark_active(&self) -> WalletResult<()> {
        *self.last_activity.lock().map_err(|_| poisoned("activity"))? = Instant::now();
        Ok(())
    }

    /// Run `f` with the account key under the sensitive-operation lock.
    /// Enforces auto-lock: past the idle limit the key is dropped first.
    fn with_key<T>(&self, f: impl FnOnce(&DerivedKey) -> WalletResult<T>) -> WalletResult<T> {
        let mut secrets = self.secrets.lock().map_err(|_| poisoned("secrets"))?;
        if let Some(idle) = self.config.auto_lock_after {
            let mut last = self.last_activity.lock().map_err(|_| poisoned("activity"))?;
            if secrets.is_some() && last.elapsed() >= idle {
                secrets.take();
                info!(idle_secs = idle.as_secs(), "Wallet auto-locked");
                return Err(WalletError::Locked);
            }
            *last = Instant::now();
        }
        let secrets = secrets.as_ref().ok_or(WalletError::Locked)?;
        f(&secrets.key)
    }

    // ==================== Network ====================

    pub fn network(&self) -> Network {
        self.state.lock().map(|s| s.network).unwrap_or(self.config.network)
    }

    /// Switch the active network. Keys are not re-derived; only the
    /// address encoding and the ledger key change.
    pub fn set_network(&self, network: Network) -> WalletResult<()> {
        let mut st = self.state.lock().map_err(|_| poisoned("state"))?;
        if st.network != network {
            st.network = network;
            self.state_store.save(&st)?;
            info!(%network, "Network switched");
        }
        Ok(())
    }

    // ==================== Receiving ====================

    pub fn receive_address(&self) -> WalletResult<Address> {
        self.receive_address_for(self.network())
    }

    pub fn receive_address_for(&self, network: Network) -> WalletResult<Address> {
        self.with_key(|key| address_for(key, network, ScriptType::P2wpkh))
    }

    /// BIP21 URI for the active network's receive address.
    pub fn receive_uri(&self, amount_sat: Option<u64>, label: Option<&str>, message: Option<&str>) -> WalletResult<String> {
        let address = self.receive_address()?;
        Ok(address::receive_uri(&address, amount_sat, label, message))
    }

    // ==================== Balances (cached) ====================

    /// Last balance written to the state cache, usable while locked.
    pub fn cached_balance(&self, network: Network) -> Option<Balance> {
        self.state.lock().ok().and_then(|s| s.balance(network))
    }

    pub fn history(&self) -> WalletResult<Vec<TransactionRecord>> {
        let mut records = self.history.read_all()?;
        records.reverse();
        Ok(records)
    }

    // ==================== Payment book ====================

    pub fn payment(&self, id: &str) -> Option<OutgoingPayment> {
        self.payments.lock().ok().and_then(|p| p.get(id).cloned())
    }

    /// All payments this session has prepared, oldest first.
    pub fn payments(&self) -> Vec<OutgoingPayment> {
        let mut all: Vec<OutgoingPayment> =
            self.payments.lock().map(|p| p.values().cloned().collect()).unwrap_or_default();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    fn store_payment(&self, payment: &OutgoingPayment) -> WalletResult<()> {
        self.payments
            .lock()
            .map_err(|_| poisoned("payments"))?
            .insert(payment.id.clone(), payment.clone());
        Ok(())
    }

    fn next_payment_id(&self) -> String {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{:016x}{:04x}", nanos & 0xFFFF_FFFF_FFFF_FFFF, seq & 0xFFFF)
    }

    fn save_state(&self, edit: impl FnOnce(&mut WalletState)) -> WalletResult<()> {
        let mut st = self.state.lock().map_err(|_| poisoned("state"))?;
        edit(&mut st);
        self.state_store.save(&st)
    }
}

impl Drop for WalletSession {
    fn drop(&mut self) {
        if let Ok(mut secrets) = self.secrets.lock() {
            secrets.take();
        }
    }
}

fn account_key(mnemonic: &Mnemonic) -> WalletResult<DerivedKey> {
    let master = derive_master_key(mnemonic, "")?;
    derive(&master, ACCOUNT_PATH)
}

fn check_password(password: &str) -> WalletResult<()> {
    if password.is_empty() {
        return Err(WalletError::Validation("password must not be empty".into()));
    }
    Ok(())
}
