//! Outgoing payment lifecycle.
//!
//! ```text
//! Drafting ─→ InputsSelected ─→ Signed ─→ Broadcasting ─┬─→ Confirmed
//!                                            ↺ resubmit ├─→ Rejected
//!                                                       └─→ Dropped
//! ```

use super::build::UnsignedTransaction;
use super::codec;
use super::select::Selection;
use super::sign::SignedTransaction;
use crate::address::Address;
use crate::bridge::BridgeDirection;
use crate::chain::FeeLevel;
use crate::error::{WalletError, WalletResult};
use crate::network::Network;
use bitcoin::Txid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PaymentState {
    Drafting,
    InputsSelected,
    Signed,
    Broadcasting,
    Confirmed { height: u32 },
    /// The node refused it. The transaction is kept for a fee-adjusted retry.
    Rejected { reason: String },
    /// Never confirmed and no longer seen by the data source.
    Dropped,
}

impl PaymentState {
    pub fn name(&self) -> &'static str {
        match self {
            PaymentState::Drafting => "drafting",
            PaymentState::InputsSelected => "inputs_selected",
            PaymentState::Signed => "signed",
            PaymentState::Broadcasting => "broadcasting",
            PaymentState::Confirmed { .. } => "confirmed",
            PaymentState::Rejected { .. } => "rejected",
            PaymentState::Dropped => "dropped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentState::Confirmed { .. } | PaymentState::Rejected { .. } | PaymentState::Dropped)
    }

    pub fn can_transition_to(&self, next: &PaymentState) -> bool {
        use PaymentState::*;
        matches!(
            (self, next),
            (Drafting, InputsSelected)
                | (InputsSelected, Signed)
                | (Signed, Broadcasting)
                | (Broadcasting, Broadcasting)
                | (Broadcasting, Confirmed { .. })
                | (Broadcasting, Rejected { .. })
                | (Broadcasting, Dropped)
        )
    }
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentState::Confirmed { height } => write!(f, "confirmed at {height}"),
            PaymentState::Rejected { reason } => write!(f, "rejected: {reason}"),
            other => f.write_str(other.name()),
        }
    }
}

/// How the fee rate for a send is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeChoice {
    /// Explicit sat/vB.
    Rate(u64),
    /// Look up the current estimate for this tier.
    Level(FeeLevel),
}

impl Default for FeeChoice {
    fn default() -> Self {
        FeeChoice::Level(FeeLevel::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub recipient: String,
    pub amount_sat: u64,
    pub fee: FeeChoice,
}

impl SendRequest {
    pub fn new(recipient: impl Into<String>, amount_sat: u64, fee: FeeChoice) -> Self {
        Self { recipient: recipient.into(), amount_sat, fee }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentKind {
    Send,
    /// Lock/burn on the source chain of a bridge transfer.
    Bridge { direction: BridgeDirection, bridge_id: Option<String> },
}

#[derive(Debug, Clone)]
pub struct OutgoingPayment {
    pub id: String,
    pub kind: PaymentKind,
    pub network: Network,
    pub recipient: Address,
    pub amount_sat: u64,
    pub fee_rate: u64,
    state: PaymentState,
    selection: Option<Selection>,
    unsigned: Option<UnsignedTransaction>,
    signed: Option<SignedTransaction>,
    pub created_at: DateTime<Utc>,
    pub broadcast_at: Option<DateTime<Utc>>,
    pub attempts: u32,
}

impl OutgoingPayment {
    pub fn draft(id: String, kind: PaymentKind, recipient: Address, amount_sat: u64, fee_rate: u64) -> Self {
        Self {
            id,
            kind,
            network: recipient.network(),
            recipient,
            amount_sat,
            fee_rate,
            state: PaymentState::Drafting,
            selection: None,
            unsigned: None,
            signed: None,
            created_at: Utc::now(),
            broadcast_at: None,
            attempts: 0,
        }
    }

    pub fn state(&self) -> &PaymentState {
        &self.state
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn unsigned(&self) -> Option<&UnsignedTransaction> {
        self.unsigned.as_ref()
    }

    pub fn signed(&self) -> Option<&SignedTransaction> {
        self.signed.as_ref()
    }

    pub fn txid(&self) -> Option<Txid> {
        self.signed.as_ref().map(SignedTransaction::txid)
    }

    pub fn fee(&self) -> Option<u64> {
        self.selection.as_ref().map(|s| s.fee)
    }

    pub fn change(&self) -> Option<u64> {
        self.selection.as_ref().map(|s| s.change)
    }

    pub fn raw_tx(&self) -> Option<Vec<u8>> {
        self.signed.as_ref().map(codec::serialize)
    }

    pub fn is_bridge(&self) -> bool {
        matches!(self.kind, PaymentKind::Bridge { .. })
    }

    /// Move to `next`, refusing edges the lifecycle doesn't have.
    pub fn transition(&mut self, next: PaymentState) -> WalletResult<()> {
        if !self.state.can_transition_to(&next) {
            return Err(WalletError::InvalidState(format!(
                "payment {}: {} -> {} not allowed",
                self.id,
                self.state.name(),
                next.name()
            )));
        }
        if next == PaymentState::Broadcasting {
            self.attempts += 1;
            self.broadcast_at = Some(Utc::now());
        }
        self.state = next;
        Ok(())
    }

    pub fn select(&mut self, selection: Selection, unsigned: UnsignedTransaction) -> WalletResult<()> {
        self.transition(PaymentState::InputsSelected)?;
        self.selection = Some(selection);
        self.unsigned = Some(unsigned);
        Ok(())
    }

    pub fn attach_signature(&mut self, signed: SignedTransaction) -> WalletResult<()> {
        self.transition(PaymentState::Signed)?;
        self.signed = Some(signed);
        Ok(())
    }
}
