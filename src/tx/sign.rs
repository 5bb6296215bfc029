//! P2WPKH signing. Every input must belong to the signing key.

use super::build::UnsignedTransaction;
use crate::error::{WalletError, WalletResult};
use crate::keys::DerivedKey;
use crate::ledger::Utxo;
use bitcoin::ecdsa;
use bitcoin::hashes::Hash;
use bitcoin::secp256k1::{Message, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{Amount, Transaction, Txid, Witness, Wtxid};

/// A fully witnessed transaction plus the outputs it spends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: Transaction,
    inputs: Vec<Utxo>,
    fee: u64,
}

impl SignedTransaction {
    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn inputs(&self) -> &[Utxo] {
        &self.inputs
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn txid(&self) -> Txid {
        self.tx.compute_txid()
    }

    pub fn wtxid(&self) -> Wtxid {
        self.tx.compute_wtxid()
    }

    pub fn vsize(&self) -> usize {
        self.tx.vsize()
    }

    pub fn into_transaction(self) -> Transaction {
        self.tx
    }
}

/// Sign every input with `key` using BIP143 sighashes (SIGHASH_ALL).
///
/// Each input must pay `key`'s P2WPKH script, otherwise
/// [`WalletError::KeyMismatch`] names the first one that doesn't.
pub fn sign(unsigned: &UnsignedTransaction, key: &DerivedKey) -> WalletResult<SignedTransaction> {
    let script = key.script_pubkey();
    if let Some(input) = unsigned.inputs().iter().position(|u| u.script_pubkey != script) {
        return Err(WalletError::KeyMismatch { input });
    }

    let secp = Secp256k1::new();
    let mut witnesses = Vec::with_capacity(unsigned.inputs().len());
    {
        let mut cache = SighashCache::new(unsigned.tx());
        for (index, utxo) in unsigned.inputs().iter().enumerate() {
            let sighash = cache
                .p2wpkh_signature_hash(index, &script, Amount::from_sat(utxo.value_sat), EcdsaSighashType::All)
                .map_err(|e| WalletError::Encoding(format!("sighash for input {index}: {e}")))?;
            let msg = Message::from_digest(sighash.to_byte_array());
            let signature = secp.sign_ecdsa_low_r(&msg, key.secret_key());
            secp.verify_ecdsa(&msg, &signature, &key.public_key())
                .map_err(|_| WalletError::KeyMismatch { input: index })?;

            let sig = ecdsa::Signature { signature, sighash_type: EcdsaSighashType::All };
            let mut witness = Witness::new();
            witness.push(sig.to_vec());
            witness.push(key.public_key().serialize());
            witnesses.push(witness);
        }
    }

    let mut tx = unsigned.tx().clone();
    for (input, witness) in tx.input.iter_mut().zip(witnesses) {
        input.witness = witness;
    }

    Ok(SignedTransaction { tx, inputs: unsigned.inputs().to_vec(), fee: unsigned.fee() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{address_for, Address, ScriptType};
    use crate::keys::{derive, derive_master_key, Mnemonic, ACCOUNT_PATH};
    use crate::network::Network;
    use crate::tx::build::{build, Recipient};
    use crate::tx::fee::{estimate_vsize, P2WPKH_SCRIPT_LEN};
    use bitcoin::ScriptBuf;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn key() -> DerivedKey {
        let master = derive_master_key(&Mnemonic::parse(TEST_MNEMONIC).unwrap(), "").unwrap();
        derive(&master, ACCOUNT_PATH).unwrap()
    }

    fn owned(key: &DerivedKey, value_sat: u64) -> Utxo {
        Utxo {
            txid: Txid::from_byte_array([9; 32]),
            vout: 0,
            value_sat,
            script_pubkey: key.script_pubkey(),
            confirmations: 6,
            address: String::new(),
        }
    }

    fn unsigned(key: &DerivedKey, input: Utxo) -> UnsignedTransaction {
        let change = address_for(key, Network::Testnet, ScriptType::P2wpkh).unwrap();
        let dest = Address::parse("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx", Network::Testnet).unwrap();
        build(vec![input], vec![Recipient::new(dest, 50_000), Recipient::new(change, 48_590)]).unwrap()
    }

    #[test]
    fn test_sign_p2wpkh() {
        let key = key();
        let signed = sign(&unsigned(&key, owned(&key, 100_000)), &key).unwrap();

        let witness = &signed.tx().input[0].witness;
        assert_eq!(witness.len(), 2);
        assert_eq!(witness.nth(1).unwrap(), key.public_key().serialize());
        assert_eq!(*witness.nth(0).unwrap().last().unwrap(), 0x01);
        assert_eq!(signed.fee(), 1_410);
        assert!(signed.vsize() as u64 <= estimate_vsize(1, &[P2WPKH_SCRIPT_LEN, P2WPKH_SCRIPT_LEN]));
    }

    #[test]
    fn test_txid_stable_across_signing() {
        let key = key();
        let tx = unsigned(&key, owned(&key, 100_000));
        let signed = sign(&tx, &key).unwrap();
        assert_eq!(signed.txid(), tx.txid());
        assert_ne!(signed.wtxid().to_byte_array(), signed.txid().to_byte_array());
    }

    #[test]
    fn test_foreign_input_is_key_mismatch() {
        let key = key();
        let mut foreign = owned(&key, 100_000);
        foreign.script_pubkey = ScriptBuf::from_bytes(vec![0x6a, 0x01, 0x02]);
        assert!(matches!(sign(&unsigned(&key, foreign), &key), Err(WalletError::KeyMismatch { input: 0 })));
    }
}
