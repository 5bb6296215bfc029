//! UTXO ledger - the wallet's view of unspent outputs, per (address, network).
//!
//! Each key holds an immutable [`UtxoSet`] behind an `Arc`. A refresh builds
//! a whole new set and swaps the pointer under the write lock, so readers
//! see either the old set or the new one, never a mix. Coin selection runs
//! under the same lock and reserves what it picked, which serializes it
//! against refreshes of the same key.

use crate::address::Address;
use crate::chain::ChainSource;
use crate::error::{WalletError, WalletResult};
use crate::network::Network;
use bitcoin::{Amount, OutPoint, ScriptBuf, Txid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Txid,
    pub vout: u32,
    pub value_sat: u64,
    pub script_pubkey: ScriptBuf,
    /// 0 while unconfirmed.
    pub confirmations: u32,
    pub address: String,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint { txid: self.txid, vout: self.vout }
    }

    pub fn is_confirmed(&self, min_confirmations: u32) -> bool {
        self.confirmations >= min_confirmations.max(1)
    }
}

/// Confirmed vs unconfirmed totals, in satoshis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub confirmed: u64,
    pub pending: u64,
}

impl Balance {
    pub fn total(&self) -> u64 {
        self.confirmed.saturating_add(self.pending)
    }
}

/// One immutable snapshot of the outputs at a key.
#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    utxos: Vec<Utxo>,
    generation: u64,
    refreshed_at: Option<DateTime<Utc>>,
}

impl UtxoSet {
    pub fn new(utxos: Vec<Utxo>) -> Self {
        Self { utxos, generation: 0, refreshed_at: None }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.utxos.iter()
    }

    pub fn as_slice(&self) -> &[Utxo] {
        &self.utxos
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.utxos.iter().any(|u| u.outpoint() == *outpoint)
    }

    pub fn split_balance(&self, min_confirmations: u32) -> Balance {
        let confirmed = balance(self, min_confirmations);
        let total = self.iter().fold(0u64, |acc, u| acc.saturating_add(u.value_sat));
        Balance { confirmed, pending: total.saturating_sub(confirmed) }
    }
}

/// Sum of outputs with at least `min_confirmations`. A minimum of 0 is
/// treated as 1: unconfirmed value is never spendable.
pub fn balance(set: &UtxoSet, min_confirmations: u32) -> u64 {
    set.iter()
        .filter(|u| u.is_confirmed(min_confirmations))
        .fold(0u64, |acc, u| acc.saturating_add(u.value_sat))
}

/// Total value of `utxos`, or `None` past the 21M BTC supply cap.
pub fn checked_total<'a>(utxos: impl IntoIterator<Item = &'a Utxo>) -> Option<u64> {
    utxos
        .into_iter()
        .try_fold(0u64, |acc, u| acc.checked_add(u.value_sat))
        .filter(|total| *total <= Amount::MAX_MONEY.to_sat())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub address: String,
    pub network: Network,
}

impl LedgerKey {
    pub fn new(address: &Address) -> Self {
        Self { address: address.to_string(), network: address.network() }
    }
}

/// Issued when a refresh starts. Only a ticket newer than the last applied
/// one may replace the set, so a slow, superseded fetch is dropped.
#[derive(Debug, Clone)]
pub struct RefreshTicket {
    key: LedgerKey,
    generation: u64,
}

#[derive(Debug, Default)]
struct Entry {
    snapshot: Arc<UtxoSet>,
    issued: u64,
    applied: u64,
    reserved: HashSet<OutPoint>,
}

/// What a refresh changed, for history bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct RefreshOutcome {
    pub snapshot: Arc<UtxoSet>,
    pub applied: bool,
    pub added: Vec<Utxo>,
    pub removed: Vec<OutPoint>,
}

#[derive(Debug, Default)]
pub struct UtxoLedger {
    entries: RwLock<HashMap<LedgerKey, Entry>>,
}

impl UtxoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> WalletResult<std::sync::RwLockReadGuard<'_, HashMap<LedgerKey, Entry>>> {
        self.entries.read().map_err(|_| WalletError::InvalidState("ledger lock poisoned".into()))
    }

    fn write(&self) -> WalletResult<std::sync::RwLockWriteGuard<'_, HashMap<LedgerKey, Entry>>> {
        self.entries.write().map_err(|_| WalletError::InvalidState("ledger lock poisoned".into()))
    }

    /// Latest applied set, or `None` if this key was never refreshed.
    pub fn snapshot(&self, key: &LedgerKey) -> WalletResult<Option<Arc<UtxoSet>>> {
        let entries = self.read()?;
        Ok(entries.get(key).filter(|e| e.applied > 0).map(|e| e.snapshot.clone()))
    }

    /// `None` means "never fetched", which callers must not read as zero.
    pub fn balance(&self, key: &LedgerKey, min_confirmations: u32) -> WalletResult<Option<Balance>> {
        Ok(self.snapshot(key)?.map(|s| s.split_balance(min_confirmations)))
    }

    pub fn begin_refresh(&self, key: &LedgerKey) -> WalletResult<RefreshTicket> {
        let mut entries = self.write()?;
        let entry = entries.entry(key.clone()).or_default();
        entry.issued += 1;
        Ok(RefreshTicket { key: key.clone(), generation: entry.issued })
    }

    /// Replace the set for the ticket's key if no newer refresh landed first.
    /// A set whose values add up past the supply cap is refused and the
    /// previous set stays in place.
    pub fn apply_refresh(&self, ticket: RefreshTicket, utxos: Vec<Utxo>) -> WalletResult<RefreshOutcome> {
        if checked_total(&utxos).is_none() {
            warn!(
                address = %ticket.key.address,
                network = %ticket.key.network,
                count = utxos.len(),
                "Refusing UTXO set over the supply cap"
            );
            return Err(WalletError::Validation(format!(
                "chain data for {} reports more than {} sat",
                ticket.key.address,
                Amount::MAX_MONEY.to_sat()
            )));
        }
        let mut entries = self.write()?;
        let entry = entries.entry(ticket.key.clone()).or_default();
        if ticket.generation <= entry.applied {
            debug!(
                address = %ticket.key.address,
                network = %ticket.key.network,
                generation = ticket.generation,
                applied = entry.applied,
                "Refresh superseded"
            );
            return Ok(RefreshOutcome { snapshot: entry.snapshot.clone(), ..Default::default() });
        }

        let previous = entry.snapshot.clone();
        let first = entry.applied == 0;
        let incoming: HashSet<OutPoint> = utxos.iter().map(Utxo::outpoint).collect();
        let added: Vec<Utxo> = utxos
            .iter()
            .filter(|u| first || !previous.contains(&u.outpoint()))
            .cloned()
            .collect();
        let removed: Vec<OutPoint> = previous
            .iter()
            .map(Utxo::outpoint)
            .filter(|op| !incoming.contains(op))
            .collect();

        // Reservations on outputs that vanished are moot: spent or orphaned.
        entry.reserved.retain(|op| incoming.contains(op));
        entry.snapshot = Arc::new(UtxoSet {
            utxos,
            generation: ticket.generation,
            refreshed_at: Some(Utc::now()),
        });
        entry.applied = ticket.generation;

        info!(
            address = %ticket.key.address,
            network = %ticket.key.network,
            count = entry.snapshot.len(),
            added = added.len(),
            removed = removed.len(),
            "UTXO set refreshed"
        );
        Ok(RefreshOutcome { snapshot: entry.snapshot.clone(), applied: true, added, removed })
    }

    /// Fetch from `source` and swap the set in. Outputs that do not pay
    /// `address` are discarded, as are duplicate outpoints.
    pub async fn refresh(&self, source: &dyn ChainSource, address: &Address) -> WalletResult<RefreshOutcome> {
        let key = LedgerKey::new(address);
        let ticket = self.begin_refresh(&key)?;
        let fetched = source.get_utxos(address, address.network()).await?;
        let utxos = sanitize(fetched, address);
        self.apply_refresh(ticket, utxos)
    }

    /// Run `select` over the confirmed-or-not, unreserved outputs and reserve
    /// whatever it returns. Holds the write lock for the whole call.
    pub fn reserve_with<T>(
        &self,
        key: &LedgerKey,
        select: impl FnOnce(&[Utxo]) -> WalletResult<(T, Vec<OutPoint>)>,
    ) -> WalletResult<T> {
        let mut entries = self.write()?;
        let entry = entries.entry(key.clone()).or_default();
        let available: Vec<Utxo> = entry
            .snapshot
            .iter()
            .filter(|u| !entry.reserved.contains(&u.outpoint()))
            .cloned()
            .collect();
        let (value, picked) = select(&available)?;
        entry.reserved.extend(picked);
        Ok(value)
    }

    pub fn release(&self, key: &LedgerKey, outpoints: &[OutPoint]) -> WalletResult<()> {
        let mut entries = self.write()?;
        if let Some(entry) = entries.get_mut(key) {
            for op in outpoints {
                entry.reserved.remove(op);
            }
        }
        Ok(())
    }

    pub fn reserved(&self, key: &LedgerKey) -> WalletResult<HashSet<OutPoint>> {
        Ok(self.read()?.get(key).map(|e| e.reserved.clone()).unwrap_or_default())
    }

    /// Remove `spent`, add `created` (skipping outpoints already present),
    /// and run `record`, all under one lock. If `record` fails nothing changes.
    pub fn apply_spend(
        &self,
        key: &LedgerKey,
        spent: &[OutPoint],
        created: Vec<Utxo>,
        record: impl FnOnce() -> WalletResult<()>,
    ) -> WalletResult<Arc<UtxoSet>> {
        let mut entries = self.write()?;
        let entry = entries.entry(key.clone()).or_default();
        record()?;

        let spent: HashSet<&OutPoint> = spent.iter().collect();
        let mut utxos: Vec<Utxo> = entry
            .snapshot
            .iter()
            .filter(|u| !spent.contains(&u.outpoint()))
            .cloned()
            .collect();
        for utxo in created {
            if !utxos.iter().any(|u| u.outpoint() == utxo.outpoint()) {
                utxos.push(utxo);
            }
        }
        entry.reserved.retain(|op| !spent.contains(op));
        entry.snapshot = Arc::new(UtxoSet {
            utxos,
            generation: entry.snapshot.generation,
            refreshed_at: entry.snapshot.refreshed_at,
        });
        Ok(entry.snapshot.clone())
    }
}

fn sanitize(fetched: Vec<Utxo>, address: &Address) -> Vec<Utxo> {
    let expected = address.script_pubkey();
    let mut seen = HashSet::new();
    fetched
        .into_iter()
        .filter(|u| {
            if u.script_pubkey != expected {
                warn!(txid = %u.txid, vout = u.vout, "Dropping output that does not pay this address");
                return false;
            }
            seen.insert(u.outpoint())
        })
        .collect()
}
