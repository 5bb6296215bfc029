//! Sending: prepare (select, build, sign), broadcast, retry, bridge.

use super::{poisoned, WalletSession};
use crate::address::{address_for, Address, ScriptType};
use crate::bridge::{BridgeDirection, BridgeRequest, BridgeStatus, BridgeTransfer};
use crate::error::{WalletError, WalletResult};
use crate::history::{RecordKind, RecordStatus, TransactionRecord};
use crate::ledger::{LedgerKey, Utxo};
use crate::network::Network;
use crate::tx::{
    build, select_inputs, sign, FeeChoice, OutgoingPayment, PaymentKind, PaymentState, Recipient, SelectionPolicy,
    SendRequest,
};
use bitcoin::Txid;
use tracing::{debug, info, warn};

impl WalletSession {
    /// Select, build and sign a payment on the active network without
    /// broadcasting it. The chosen inputs stay reserved until the payment
    /// is broadcast, rejected or cancelled.
    pub async fn prepare_send(&self, request: &SendRequest) -> WalletResult<OutgoingPayment> {
        let network = self.network();
        let recipient = Address::parse(&request.recipient, network)?;
        let fee_rate = self.resolve_fee(request.fee, network).await?;
        self.prepare(PaymentKind::Send, recipient, request.amount_sat, fee_rate)
    }

    /// Prepare and broadcast in one go.
    pub async fn send(&self, request: &SendRequest) -> WalletResult<OutgoingPayment> {
        let payment = self.prepare_send(request).await?;
        self.broadcast_payment(&payment.id).await?;
        self.payment(&payment.id)
            .ok_or_else(|| WalletError::InvalidState(format!("payment {} vanished", payment.id)))
    }

    async fn resolve_fee(&self, fee: FeeChoice, network: Network) -> WalletResult<u64> {
        match fee {
            FeeChoice::Rate(0) => Err(WalletError::Validation("fee rate must be at least 1 sat/vB".into())),
            FeeChoice::Rate(rate) => Ok(rate),
            FeeChoice::Level(level) => Ok(self.fee_estimates(network).await?.rate(level)),
        }
    }

    fn prepare(&self, kind: PaymentKind, recipient: Address, amount_sat: u64, fee_rate: u64) -> WalletResult<OutgoingPayment> {
        let network = recipient.network();
        let id = self.next_payment_id();

        let payment = self.with_key(|key| {
            let own = address_for(key, network, ScriptType::P2wpkh)?;
            let ledger_key = LedgerKey::new(&own);
            if self.ledger.snapshot(&ledger_key)?.is_none() {
                return Err(WalletError::InvalidState(format!("{network} balance not fetched yet; refresh first")));
            }

            let policy = SelectionPolicy {
                min_confirmations: self.config.min_confirmations,
                dust_threshold: self.config.dust_threshold,
                recipient_script_lens: vec![recipient.script_pubkey().len()],
                change_script_len: own.script_pubkey().len(),
            };
            let selection = self.ledger.reserve_with(&ledger_key, |available| {
                // Missing funds outrank a dust amount.
                if amount_sat <= policy.dust_threshold {
                    return match select_inputs(available, amount_sat, fee_rate, &policy) {
                        Err(e @ WalletError::InsufficientFunds { .. }) => Err(e),
                        _ => Err(WalletError::InvalidAmount(format!(
                            "{amount_sat} sat is at or below the dust threshold of {} sat",
                            policy.dust_threshold
                        ))),
                    };
                }
                let selection = select_inputs(available, amount_sat, fee_rate, &policy)?;
                let picked = selection.outpoints();
                Ok((selection, picked))
            })?;

            let mut payment = OutgoingPayment::draft(id.clone(), kind, recipient.clone(), amount_sat, fee_rate);
            let assembled = (|| {
                let mut outputs = vec![Recipient::new(recipient.clone(), amount_sat)];
                if selection.has_change() {
                    outputs.push(Recipient::new(own.clone(), selection.change));
                }
                let unsigned = build(selection.inputs.clone(), outputs)?;
                let signed = sign(&unsigned, key)?;
                payment.select(selection.clone(), unsigned)?;
                payment.attach_signature(signed)
            })();
            if let Err(e) = assembled {
                self.ledger.release(&ledger_key, &selection.outpoints())?;
                return Err(e);
            }
            Ok(payment)
        })?;

        info!(
            payment = %payment.id,
            %network,
            amount = amount_sat,
            fee = payment.fee().unwrap_or_default(),
            change = payment.change().unwrap_or_default(),
            "Payment signed"
        );
        self.store_payment(&payment)?;
        Ok(payment)
    }

    /// Submit a signed payment. A payment left in `Broadcasting` after a
    /// timeout may be submitted again. Never retried automatically: a
    /// broadcast is irrevocable once a node accepts it.
    pub async fn broadcast_payment(&self, id: &str) -> WalletResult<Txid> {
        let (raw, network) = {
            let mut payments = self.payments.lock().map_err(|_| poisoned("payments"))?;
            let payment = payments
                .get_mut(id)
                .ok_or_else(|| WalletError::InvalidState(format!("unknown payment {id}")))?;
            payment.transition(PaymentState::Broadcasting)?;
            let raw = payment
                .raw_tx()
                .ok_or_else(|| WalletError::InvalidState(format!("payment {id} is not signed")))?;
            (raw, payment.network)
        };

        match self.retry.once(self.chain.broadcast(&raw, network)).await {
            Ok(txid) => {
                self.confirm_broadcast(id, txid)?;
                Ok(txid)
            }
            Err(WalletError::BroadcastRejected { reason }) => {
                warn!(payment = %id, %reason, "Broadcast rejected");
                self.reject_payment(id, &reason)?;
                Err(WalletError::BroadcastRejected { reason })
            }
            Err(e) => {
                warn!(payment = %id, error = %e, "Broadcast outcome unknown; payment stays in flight");
                Err(e)
            }
        }
    }

    /// Spend the inputs, add our change as a pending output, and record the
    /// payment, all in one ledger step.
    fn confirm_broadcast(&self, id: &str, txid: Txid) -> WalletResult<()> {
        let payment = self
            .payment(id)
            .ok_or_else(|| WalletError::InvalidState(format!("unknown payment {id}")))?;
        let (Some(signed), Some(unsigned)) = (payment.signed(), payment.unsigned()) else {
            return Err(WalletError::InvalidState(format!("payment {id} is not signed")));
        };
        if signed.txid() != txid {
            warn!(payment = %id, expected = %signed.txid(), reported = %txid, "Data source reported a different txid");
        }
        let txid = signed.txid();
        let own_script = signed.inputs()[0].script_pubkey.clone();
        let own = Address::from_script(&own_script, payment.network)?;

        let created: Vec<Utxo> = unsigned
            .outputs()
            .iter()
            .enumerate()
            .filter(|(_, out)| out.address.script_pubkey() == own_script)
            .map(|(vout, out)| Utxo {
                txid,
                vout: vout as u32,
                value_sat: out.value_sat,
                script_pubkey: own_script.clone(),
                confirmations: 0,
                address: own.to_string(),
            })
            .collect();

        let record = self.record_for(&payment, RecordStatus::Pending);
        self.ledger.apply_spend(&LedgerKey::new(&own), &unsigned.spent_outpoints(), created, || {
            if self.history.contains(&payment.id)? {
                self.history.update_status(&payment.id, RecordStatus::Pending).map(|_| ())
            } else {
                self.history.append(&record)
            }
        })?;

        info!(payment = %id, %txid, network = %payment.network, attempt = payment.attempts, "Payment broadcast");
        Ok(())
    }

    fn reject_payment(&self, id: &str, reason: &str) -> WalletResult<()> {
        let payment = {
            let mut payments = self.payments.lock().map_err(|_| poisoned("payments"))?;
            let payment = payments
                .get_mut(id)
                .ok_or_else(|| WalletError::InvalidState(format!("unknown payment {id}")))?;
            payment.transition(PaymentState::Rejected { reason: reason.to_string() })?;
            payment.clone()
        };
        if let Some(unsigned) = payment.unsigned() {
            let own = Address::from_script(&unsigned.inputs()[0].script_pubkey, payment.network)?;
            self.ledger.release(&LedgerKey::new(&own), &unsigned.spent_outpoints())?;
        }
        if !self.history.update_status(id, RecordStatus::Failed)? {
            self.history.append(&self.record_for(&payment, RecordStatus::Failed))?;
        }
        Ok(())
    }

    fn record_for(&self, payment: &OutgoingPayment, status: RecordStatus) -> TransactionRecord {
        let kind = match &payment.kind {
            PaymentKind::Send => RecordKind::Send { recipient: payment.recipient.to_string() },
            PaymentKind::Bridge { direction, bridge_id } => RecordKind::Bridge {
                from: direction.source(),
                to: direction.destination(),
                bridge_id: bridge_id.clone(),
            },
        };
        let mut record = TransactionRecord::new(payment.id.clone(), kind, payment.amount_sat, payment.network)
            .with_status(status);
        if let Some(txid) = payment.txid() {
            record = record.with_txid(txid);
        }
        if let Some(fee) = payment.fee() {
            record = record.with_fee(fee);
        }
        record
    }

    /// Drop a signed payment that was never broadcast and free its inputs.
    pub fn cancel_payment(&self, id: &str) -> WalletResult<()> {
        let payment = {
            let mut payments = self.payments.lock().map_err(|_| poisoned("payments"))?;
            match payments.get(id).map(|p| p.state().clone()) {
                Some(PaymentState::Signed) => payments.remove(id),
                Some(state) => {
                    return Err(WalletError::InvalidState(format!("payment {id} is {state}; only signed payments can be cancelled")))
                }
                None => return Err(WalletError::InvalidState(format!("unknown payment {id}"))),
            }
        };
        if let Some(unsigned) = payment.as_ref().and_then(|p| p.unsigned()) {
            let own = Address::from_script(&unsigned.inputs()[0].script_pubkey, unsigned.outputs()[0].address.network())?;
            self.ledger.release(&LedgerKey::new(&own), &unsigned.spent_outpoints())?;
        }
        debug!(payment = %id, "Payment cancelled");
        Ok(())
    }

    /// Rebuild a rejected or dropped payment at a new fee, as a new payment.
    pub async fn retry_payment(&self, id: &str, fee: FeeChoice) -> WalletResult<OutgoingPayment> {
        let previous = self
            .payment(id)
            .ok_or_else(|| WalletError::InvalidState(format!("unknown payment {id}")))?;
        if !matches!(previous.state(), PaymentState::Rejected { .. } | PaymentState::Dropped) {
            return Err(WalletError::InvalidState(format!(
                "payment {id} is {}; only rejected or dropped payments can be retried",
                previous.state()
            )));
        }
        let fee_rate = self.resolve_fee(fee, previous.network).await?;
        let kind = match previous.kind {
            PaymentKind::Bridge { direction, .. } => PaymentKind::Bridge { direction, bridge_id: None },
            PaymentKind::Send => PaymentKind::Send,
        };
        let payment = self.prepare(kind, previous.recipient.clone(), previous.amount_sat, fee_rate)?;
        info!(previous = %id, payment = %payment.id, fee_rate, "Payment rebuilt");
        Ok(payment)
    }

    // ==================== Bridge ====================

    /// Lock (or burn) `amount_sat` on the source chain and register the
    /// transfer with the bridge service.
    ///
    /// If registration fails after the broadcast, the transfer is returned
    /// without a bridge id; [`WalletSession::register_bridge`] retries it.
    pub async fn bridge(&self, amount_sat: u64, direction: BridgeDirection, fee: FeeChoice) -> WalletResult<BridgeTransfer> {
        if self.bridge.is_none() {
            return Err(WalletError::InvalidState("no bridge service configured".into()));
        }
        let source = direction.source();
        let target = Address::parse(self.config.bridge.target(direction)?, source)?;
        let fee_rate = self.resolve_fee(fee, source).await?;
        let payment = self.prepare(PaymentKind::Bridge { direction, bridge_id: None }, target, amount_sat, fee_rate)?;
        self.broadcast_payment(&payment.id).await?;
        self.register_bridge(&payment.id).await
    }

    pub async fn register_bridge(&self, payment_id: &str) -> WalletResult<BridgeTransfer> {
        let service = self
            .bridge
            .clone()
            .ok_or_else(|| WalletError::InvalidState("no bridge service configured".into()))?;
        let payment = self
            .payment(payment_id)
            .ok_or_else(|| WalletError::InvalidState(format!("unknown payment {payment_id}")))?;
        let PaymentKind::Bridge { direction, bridge_id } = payment.kind.clone() else {
            return Err(WalletError::InvalidState(format!("payment {payment_id} is not a bridge transfer")));
        };
        let source_txid = match (payment.state(), payment.txid()) {
            (PaymentState::Broadcasting | PaymentState::Confirmed { .. }, Some(txid)) => txid,
            _ => {
                return Err(WalletError::InvalidState(format!(
                    "bridge payment {payment_id} is {}; nothing to register",
                    payment.state()
                )))
            }
        };

        let mut transfer = BridgeTransfer {
            payment_id: payment_id.to_string(),
            direction,
            amount_sat: payment.amount_sat,
            source_txid,
            bridge_id,
        };
        if transfer.bridge_id.is_some() {
            return Ok(transfer);
        }

        let request = BridgeRequest { amount_sat: payment.amount_sat, direction, source_txid };
        match self.retry.run("initiate_bridge", || service.initiate_bridge(&request)).await {
            Ok(bridge_id) => {
                {
                    let mut payments = self.payments.lock().map_err(|_| poisoned("payments"))?;
                    if let Some(p) = payments.get_mut(payment_id) {
                        p.kind = PaymentKind::Bridge { direction, bridge_id: Some(bridge_id.clone()) };
                    }
                }
                let id = bridge_id.clone();
                self.history.update(payment_id, &mut |r| {
                    if let RecordKind::Bridge { bridge_id, .. } = &mut r.kind {
                        *bridge_id = Some(id.clone());
                    }
                })?;
                info!(payment = %payment_id, %bridge_id, %direction, "Bridge transfer registered");
                transfer.bridge_id = Some(bridge_id);
            }
            Err(e) => {
                warn!(payment = %payment_id, %source_txid, error = %e, "Bridge registration failed; lock is already broadcast");
            }
        }
        Ok(transfer)
    }

    /// Ask the bridge service where a transfer stands and mirror final
    /// outcomes into history.
    pub async fn bridge_status(&self, bridge_id: &str) -> WalletResult<BridgeStatus> {
        let service = self
            .bridge
            .clone()
            .ok_or_else(|| WalletError::InvalidState("no bridge service configured".into()))?;
        let status = self
            .retry
            .run("get_bridge_status", || service.get_bridge_status(bridge_id))
            .await?;

        if status.is_final() {
            let record_status = match status {
                BridgeStatus::Confirmed => RecordStatus::Confirmed,
                _ => RecordStatus::Failed,
            };
            let record = self.history.read_all()?.into_iter().find(|r| {
                matches!(&r.kind, RecordKind::Bridge { bridge_id: Some(b), .. } if b == bridge_id)
            });
            if let Some(record) = record {
                self.history.update_status(&record.id, record_status)?;
            }
        }
        Ok(status)
    }
}
