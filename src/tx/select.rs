//! Coin selection: largest-first over confirmed outputs.

use super::fee::estimate_fee;
use crate::error::{WalletError, WalletResult};
use crate::ledger::{checked_total, Utxo};
use bitcoin::OutPoint;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPolicy {
    pub min_confirmations: u32,
    /// Change at or below this is folded into the fee.
    pub dust_threshold: u64,
    /// Script lengths of the payment outputs, in order.
    pub recipient_script_lens: Vec<usize>,
    pub change_script_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub inputs: Vec<Utxo>,
    pub fee: u64,
    /// 0 when no change output is created.
    pub change: u64,
}

impl Selection {
    pub fn input_total(&self) -> u64 {
        self.inputs.iter().fold(0u64, |acc, u| acc.saturating_add(u.value_sat))
    }

    pub fn has_change(&self) -> bool {
        self.change > 0
    }

    pub fn outpoints(&self) -> Vec<OutPoint> {
        self.inputs.iter().map(Utxo::outpoint).collect()
    }
}

/// Pick inputs covering `target` plus fee at `fee_rate` sat/vB.
///
/// The fee is re-estimated after every added input. Only outputs with at
/// least `min_confirmations` are considered; ties on value are broken by
/// outpoint so the result is deterministic.
pub fn select_inputs(
    candidates: &[Utxo],
    target: u64,
    fee_rate: u64,
    policy: &SelectionPolicy,
) -> WalletResult<Selection> {
    if target == 0 {
        return Err(WalletError::InvalidAmount("amount must be positive".into()));
    }
    if fee_rate == 0 {
        return Err(WalletError::Validation("fee rate must be at least 1 sat/vB".into()));
    }

    let mut pool: Vec<&Utxo> = candidates.iter().filter(|u| u.is_confirmed(policy.min_confirmations)).collect();
    pool.sort_by(|a, b| {
        b.value_sat
            .cmp(&a.value_sat)
            .then_with(|| a.txid.cmp(&b.txid))
            .then_with(|| a.vout.cmp(&b.vout))
    });
    let available = checked_total(pool.iter().copied())
        .ok_or_else(|| WalletError::Validation("candidate outputs exceed the supply cap".into()))?;

    let without_change = policy.recipient_script_lens.clone();
    let mut with_change = without_change.clone();
    with_change.push(policy.change_script_len);

    let mut inputs = Vec::new();
    let mut total = 0u64;
    for utxo in pool {
        inputs.push(utxo.clone());
        // Cannot overflow: bounded by `available`.
        total = total.saturating_add(utxo.value_sat);

        let fee_with_change = estimate_fee(inputs.len(), &with_change, fee_rate)?;
        if let Some(change) = total.checked_sub(target).and_then(|r| r.checked_sub(fee_with_change)) {
            if change > policy.dust_threshold {
                debug!(inputs = inputs.len(), fee = fee_with_change, change, "Selected inputs");
                return Ok(Selection { inputs, fee: fee_with_change, change });
            }
        }

        let fee_without_change = estimate_fee(inputs.len(), &without_change, fee_rate)?;
        if total >= target.saturating_add(fee_without_change) {
            let fee = total - target;
            debug!(inputs = inputs.len(), fee, "Selected inputs, remainder folded into fee");
            return Ok(Selection { inputs, fee, change: 0 });
        }
    }

    let fee = estimate_fee(inputs.len().max(1), &without_change, fee_rate)?;
    Err(WalletError::InsufficientFunds { required: target.saturating_add(fee), available })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::fee::P2WPKH_SCRIPT_LEN;
    use bitcoin::hashes::Hash;
    use bitcoin::{ScriptBuf, Txid};

    fn utxo(tag: u8, value_sat: u64, confirmations: u32) -> Utxo {
        Utxo {
            txid: Txid::from_byte_array([tag; 32]),
            vout: 0,
            value_sat,
            script_pubkey: ScriptBuf::new(),
            confirmations,
            address: String::new(),
        }
    }

    fn policy() -> SelectionPolicy {
        SelectionPolicy {
            min_confirmations: 1,
            dust_threshold: 546,
            recipient_script_lens: vec![P2WPKH_SCRIPT_LEN],
            change_script_len: P2WPKH_SCRIPT_LEN,
        }
    }

    #[test]
    fn test_single_utxo_with_change() {
        let sel = select_inputs(&[utxo(1, 100_000, 3)], 50_000, 10, &policy()).unwrap();
        assert_eq!(sel.inputs.len(), 1);
        assert_eq!(sel.fee, 1_410);
        assert_eq!(sel.change, 48_590);
        assert_eq!(sel.input_total(), 50_000 + sel.fee + sel.change);
    }

    #[test]
    fn test_largest_first() {
        let set = [utxo(1, 10_000, 1), utxo(2, 80_000, 1), utxo(3, 30_000, 1)];
        let sel = select_inputs(&set, 50_000, 1, &policy()).unwrap();
        assert_eq!(sel.inputs.len(), 1);
        assert_eq!(sel.inputs[0].value_sat, 80_000);
    }

    #[test]
    fn test_adds_inputs_until_covered() {
        let set = [utxo(1, 30_000, 1), utxo(2, 30_000, 1), utxo(3, 30_000, 1)];
        let sel = select_inputs(&set, 55_000, 5, &policy()).unwrap();
        assert_eq!(sel.inputs.len(), 2);
        // ties broken by txid
        assert_eq!(sel.inputs[0].txid, Txid::from_byte_array([1; 32]));
        assert!(sel.input_total() >= 55_000 + sel.fee);
    }

    #[test]
    fn test_dust_change_folded_into_fee() {
        // 1-in/1-out at 1 sat/vB costs 110; leave 300 sat over.
        let sel = select_inputs(&[utxo(1, 50_410, 1)], 50_000, 1, &policy()).unwrap();
        assert_eq!(sel.change, 0);
        assert_eq!(sel.fee, 410);
    }

    #[test]
    fn test_pending_never_spent() {
        let err = select_inputs(&[utxo(1, 100_000, 0)], 50_000, 1, &policy()).unwrap_err();
        match err {
            WalletError::InsufficientFunds { available, .. } => assert_eq!(available, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty_set_reports_shortfall() {
        let err = select_inputs(&[], 10_000, 2, &policy()).unwrap_err();
        assert_eq!(err.shortfall(), Some(10_000 + 220));
    }

    #[test]
    fn test_never_returns_less_than_required() {
        let set: Vec<Utxo> = (1..=20).map(|i| utxo(i, 1_000 * i as u64, 1)).collect();
        for target in [1_000u64, 9_999, 50_000, 150_000, 209_000, 250_000] {
            for rate in [1u64, 7, 40] {
                match select_inputs(&set, target, rate, &policy()) {
                    Ok(sel) => {
                        assert!(sel.input_total() >= target + sel.fee);
                        assert_eq!(sel.input_total(), target + sel.fee + sel.change);
                        assert!(sel.change == 0 || sel.change > 546);
                    }
                    Err(WalletError::InsufficientFunds { .. }) => {}
                    Err(other) => panic!("unexpected {other:?}"),
                }
            }
        }
    }

    #[test]
    fn test_overflowing_candidates_refused() {
        let huge = u64::MAX / 2 + 1;
        let err = select_inputs(&[utxo(1, huge, 1), utxo(2, huge, 1)], 10_000, 1, &policy()).unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
    }

    #[test]
    fn test_rejects_zero_amount_and_rate() {
        assert!(matches!(
            select_inputs(&[utxo(1, 1_000, 1)], 0, 1, &policy()),
            Err(WalletError::InvalidAmount(_))
        ));
        assert!(select_inputs(&[utxo(1, 1_000, 1)], 100, 0, &policy()).is_err());
    }
}
