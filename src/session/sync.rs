//! Refresh: pull the UTXO set, reconcile the cache, notice incoming
//! payments and follow outgoing ones to a terminal state.

use super::WalletSession;
use crate::address::Address;
use crate::chain::{FeeEstimate, TxStatus};
use crate::error::WalletResult;
use crate::history::{RecordKind, RecordStatus, TransactionRecord};
use crate::ledger::{Balance, LedgerKey, RefreshOutcome, Utxo};
use crate::network::Network;
use crate::tx::PaymentState;
use bitcoin::Txid;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

impl WalletSession {
    /// Refresh the active network.
    pub async fn refresh(&self) -> WalletResult<Balance> {
        self.refresh_network(self.network()).await
    }

    /// Fetch the UTXO set for `network` and swap it in. Failure leaves the
    /// previous set and cached balance untouched.
    pub async fn refresh_network(&self, network: Network) -> WalletResult<Balance> {
        let address = self.receive_address_for(network)?;
        let outcome = self
            .retry
            .run("get_utxos", || self.ledger.refresh(self.chain.as_ref(), &address))
            .await?;
        let balance = outcome.snapshot.split_balance(self.config.min_confirmations);

        if outcome.applied {
            if let Err(e) = self.record_receives(network, &outcome) {
                warn!(%network, error = %e, "Could not record incoming payments");
            }
            self.save_state(|st| st.set_balance(network, balance))?;
            info!(%network, confirmed = balance.confirmed, pending = balance.pending, "Balance refreshed");
        }

        self.track_payments(network, &address).await;
        Ok(balance)
    }

    /// Balance from the last applied refresh. `None` means this network
    /// was never fetched in this session, which is not the same as zero.
    pub fn balance(&self, network: Network) -> WalletResult<Option<Balance>> {
        let address = self.receive_address_for(network)?;
        self.ledger.balance(&LedgerKey::new(&address), self.config.min_confirmations)
    }

    pub fn utxos(&self, network: Network) -> WalletResult<Option<Vec<Utxo>>> {
        let address = self.receive_address_for(network)?;
        Ok(self.ledger.snapshot(&LedgerKey::new(&address))?.map(|s| s.as_slice().to_vec()))
    }

    pub async fn fee_estimates(&self, network: Network) -> WalletResult<FeeEstimate> {
        let fees = self
            .retry
            .run("get_fee_estimates", || self.chain.get_fee_estimates(network))
            .await?;
        Ok(fees.normalized())
    }

    fn own_txids(&self) -> HashSet<Txid> {
        self.payments
            .lock()
            .map(|p| p.values().filter_map(|p| p.txid()).collect())
            .unwrap_or_default()
    }

    /// New outputs not created by our own payments are receives. Pending
    /// receives flip to confirmed once they reach the confirmation minimum.
    fn record_receives(&self, network: Network, outcome: &RefreshOutcome) -> WalletResult<()> {
        let own = self.own_txids();
        let known: HashMap<String, RecordStatus> =
            self.history.read_all()?.into_iter().map(|r| (r.id, r.status)).collect();

        for utxo in outcome.snapshot.iter() {
            if own.contains(&utxo.txid) {
                continue;
            }
            let id = TransactionRecord::receive_id(&utxo.txid, utxo.vout);
            let confirmed = utxo.is_confirmed(self.config.min_confirmations);
            match known.get(&id) {
                None => {
                    let status = if confirmed { RecordStatus::Confirmed } else { RecordStatus::Pending };
                    let record = TransactionRecord::new(id, RecordKind::Receive { sender: None }, utxo.value_sat, network)
                        .with_txid(utxo.txid)
                        .with_status(status);
                    self.history.append(&record)?;
                    debug!(txid = %utxo.txid, vout = utxo.vout, value = utxo.value_sat, "Incoming payment");
                }
                Some(RecordStatus::Pending) if confirmed => {
                    self.history.update_status(&id, RecordStatus::Confirmed)?;
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Ask the data source about every broadcast payment on `network`.
    /// Tracking errors are logged; they never fail the refresh.
    async fn track_payments(&self, network: Network, address: &Address) {
        let in_flight: Vec<(String, Txid)> = match self.payments.lock() {
            Ok(p) => p
                .values()
                .filter(|p| p.network == network && *p.state() == PaymentState::Broadcasting)
                .filter_map(|p| p.txid().map(|t| (p.id.clone(), t)))
                .collect(),
            Err(_) => return,
        };

        for (id, txid) in in_flight {
            let status = self
                .retry
                .run("get_tx_status", || self.chain.get_tx_status(&txid, address, network))
                .await;
            let result = match status {
                Ok(TxStatus::Confirmed(height)) => self.settle_payment(&id, PaymentState::Confirmed { height }),
                Ok(TxStatus::Unknown) if self.is_overdue(&id) => self.settle_payment(&id, PaymentState::Dropped),
                Ok(_) => Ok(()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(payment = %id, %txid, error = %e, "Payment tracking failed");
            }
        }
    }

    fn is_overdue(&self, id: &str) -> bool {
        let Some(sent) = self.payment(id).and_then(|p| p.broadcast_at) else {
            return false;
        };
        let limit = chrono::Duration::from_std(self.config.drop_after).unwrap_or(chrono::Duration::MAX);
        Utc::now() - sent >= limit
    }

    fn settle_payment(&self, id: &str, next: PaymentState) -> WalletResult<()> {
        let status = match next {
            PaymentState::Confirmed { .. } => RecordStatus::Confirmed,
            _ => RecordStatus::Failed,
        };
        {
            let mut payments = self.payments.lock().map_err(|_| super::poisoned("payments"))?;
            let Some(payment) = payments.get_mut(id) else {
                return Ok(());
            };
            info!(payment = %id, state = %next, "Payment settled");
            payment.transition(next)?;
        }
        self.history.update_status(id, status)?;
        Ok(())
    }
}
