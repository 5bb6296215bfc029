//! Unsigned transaction assembly from selected inputs and outputs.

use crate::address::Address;
use crate::error::{WalletError, WalletResult};
use crate::ledger::Utxo;
use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use std::collections::HashSet;

/// One payment output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: Address,
    pub value_sat: u64,
}

impl Recipient {
    pub fn new(address: Address, value_sat: u64) -> Self {
        Self { address, value_sat }
    }
}

/// Inputs and outputs in their final order, witnesses empty. The fee is
/// whatever the inputs carry beyond the outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    inputs: Vec<Utxo>,
    outputs: Vec<Recipient>,
    tx: Transaction,
}

impl UnsignedTransaction {
    pub fn inputs(&self) -> &[Utxo] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Recipient] {
        &self.outputs
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// Segwit txids do not commit to witnesses, so this is final already.
    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    pub fn input_total(&self) -> u64 {
        self.inputs.iter().map(|u| u.value_sat).sum()
    }

    pub fn output_total(&self) -> u64 {
        self.outputs.iter().map(|o| o.value_sat).sum()
    }

    pub fn fee(&self) -> u64 {
        self.input_total() - self.output_total()
    }

    pub fn spent_outpoints(&self) -> Vec<OutPoint> {
        self.inputs.iter().map(Utxo::outpoint).collect()
    }
}

/// Assemble a version 2, RBF-signalling transaction. Order is exactly as
/// given: the signature hashes commit to it.
pub fn build(inputs: Vec<Utxo>, outputs: Vec<Recipient>) -> WalletResult<UnsignedTransaction> {
    if inputs.is_empty() {
        return Err(WalletError::Validation("transaction needs at least one input".into()));
    }
    if outputs.is_empty() {
        return Err(WalletError::Validation("transaction needs at least one output".into()));
    }

    let mut seen = HashSet::new();
    let mut input_total = 0u64;
    for utxo in &inputs {
        if !seen.insert(utxo.outpoint()) {
            return Err(WalletError::Validation(format!("input {} listed twice", utxo.outpoint())));
        }
        input_total = input_total
            .checked_add(utxo.value_sat)
            .ok_or_else(|| WalletError::InvalidAmount("input total overflows".into()))?;
    }

    let mut output_total = 0u64;
    for out in &outputs {
        if out.value_sat == 0 {
            return Err(WalletError::InvalidAmount(format!("zero-value output to {}", out.address)));
        }
        output_total = output_total
            .checked_add(out.value_sat)
            .ok_or_else(|| WalletError::InvalidAmount("output total overflows".into()))?;
    }
    if output_total > input_total {
        return Err(WalletError::InsufficientFunds { required: output_total, available: input_total });
    }

    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: inputs
            .iter()
            .map(|u| TxIn {
                previous_output: u.outpoint(),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
            .collect(),
        output: outputs
            .iter()
            .map(|o| TxOut { value: Amount::from_sat(o.value_sat), script_pubkey: o.address.script_pubkey() })
            .collect(),
    };

    Ok(UnsignedTransaction { inputs, outputs, tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use bitcoin::hashes::Hash;

    const RECIPIENT: &str = "tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx";

    fn utxo(tag: u8, value_sat: u64) -> Utxo {
        Utxo {
            txid: Txid::from_byte_array([tag; 32]),
            vout: 1,
            value_sat,
            script_pubkey: ScriptBuf::new(),
            confirmations: 1,
            address: String::new(),
        }
    }

    fn to(value_sat: u64) -> Recipient {
        Recipient::new(Address::parse(RECIPIENT, Network::Testnet).unwrap(), value_sat)
    }

    #[test]
    fn test_fee_is_derived() {
        let tx = build(vec![utxo(1, 100_000)], vec![to(50_000), to(48_590)]).unwrap();
        assert_eq!(tx.fee(), 1_410);
        assert_eq!(tx.input_total(), tx.output_total() + tx.fee());
    }

    #[test]
    fn test_order_is_preserved() {
        let tx = build(vec![utxo(2, 10_000), utxo(1, 20_000)], vec![to(5_000), to(24_000)]).unwrap();
        assert_eq!(tx.tx().input[0].previous_output.txid, Txid::from_byte_array([2; 32]));
        assert_eq!(tx.tx().output[1].value.to_sat(), 24_000);
        assert_eq!(tx.tx().version, Version::TWO);
        assert!(tx.tx().input.iter().all(|i| i.sequence.is_rbf()));
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(build(vec![], vec![to(1)]).is_err());
        assert!(build(vec![utxo(1, 1_000)], vec![]).is_err());
        assert!(build(vec![utxo(1, 1_000), utxo(1, 1_000)], vec![to(500)]).is_err());
        assert!(matches!(build(vec![utxo(1, 1_000)], vec![to(0)]), Err(WalletError::InvalidAmount(_))));
        assert!(matches!(
            build(vec![utxo(1, 1_000)], vec![to(1_001)]),
            Err(WalletError::InsufficientFunds { required: 1_001, available: 1_000 })
        ));
    }
}
