//! Transaction Tests - selection, building and signing without a session
//!
//! These tests verify:
//! 1. Selection always balances: inputs = amount + fee + change
//! 2. Change is either absent or above dust
//! 3. Signed transactions survive the wire encoding unchanged
//! 4. Inputs that don't belong to the key are refused

mod common;

use bitcoin::hashes::Hash;
use bitcoin::Txid;
use common::{stranger, TEST_MNEMONIC};
use swiftpay::address::address_for;
use swiftpay::keys::{derive, derive_master_key, DerivedKey, ACCOUNT_PATH};
use swiftpay::tx::{
    build, deserialize, deserialize_hex, estimate_fee, select_inputs, serialize, serialize_hex, sign, Recipient,
    SelectionPolicy, P2WPKH_SCRIPT_LEN,
};
use swiftpay::{Address, Mnemonic, Network, ScriptType, Utxo, WalletError};

fn key() -> DerivedKey {
    let master = derive_master_key(&Mnemonic::parse(TEST_MNEMONIC).expect("mnemonic"), "").expect("master");
    derive(&master, ACCOUNT_PATH).expect("derive")
}

fn own(key: &DerivedKey) -> Address {
    address_for(key, Network::Testnet, ScriptType::P2wpkh).expect("address")
}

fn coins(address: &Address, values: &[u64]) -> Vec<Utxo> {
    values
        .iter()
        .enumerate()
        .map(|(i, &value_sat)| Utxo {
            txid: Txid::from_byte_array([i as u8 + 1; 32]),
            vout: i as u32,
            value_sat,
            script_pubkey: address.script_pubkey(),
            confirmations: 1 + i as u32,
            address: address.to_string(),
        })
        .collect()
}

fn policy() -> SelectionPolicy {
    SelectionPolicy {
        min_confirmations: 1,
        dust_threshold: 546,
        recipient_script_lens: vec![P2WPKH_SCRIPT_LEN],
        change_script_len: P2WPKH_SCRIPT_LEN,
    }
}

/// Test: Every successful selection balances exactly and never leaves dust change
#[test]
fn selection_always_balances() {
    let key = key();
    let pool = coins(&own(&key), &[1_000, 5_000, 12_345, 80_000, 250_000, 600]);
    let available: u64 = pool.iter().map(|u| u.value_sat).sum();

    for rate in [1, 3, 10, 57, 200] {
        for target in [547, 1_000, 4_999, 50_000, 90_000, 300_000, 340_000, available] {
            match select_inputs(&pool, target, rate, &policy()) {
                Ok(selection) => {
                    assert_eq!(
                        selection.input_total(),
                        target + selection.fee + selection.change,
                        "rate {rate}, target {target}"
                    );
                    assert!(selection.change == 0 || selection.change > 546);

                    let mut outputs = vec![P2WPKH_SCRIPT_LEN];
                    if selection.has_change() {
                        outputs.push(P2WPKH_SCRIPT_LEN);
                    }
                    let floor = estimate_fee(selection.inputs.len(), &outputs, rate).unwrap();
                    assert!(selection.fee >= floor, "fee below estimate at rate {rate}, target {target}");
                }
                Err(WalletError::InsufficientFunds { required, available: reported }) => {
                    assert_eq!(reported, available);
                    assert!(required > target);
                }
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
    }
}

/// Test: Largest coins go first, so a big coin alone covers a small payment
#[test]
fn selection_prefers_largest() {
    let key = key();
    let pool = coins(&own(&key), &[20_000, 500_000, 30_000]);
    let selection = select_inputs(&pool, 40_000, 5, &policy()).unwrap();
    assert_eq!(selection.inputs.len(), 1);
    assert_eq!(selection.inputs[0].value_sat, 500_000);
}

/// Test: Unconfirmed coins are not spent
#[test]
fn selection_skips_unconfirmed() {
    let key = key();
    let mut pool = coins(&own(&key), &[100_000]);
    pool[0].confirmations = 0;
    let err = select_inputs(&pool, 10_000, 1, &policy()).unwrap_err();
    assert!(matches!(err, WalletError::InsufficientFunds { available: 0, .. }));
}

/// Test: Build, sign, encode, decode: the transaction comes back identical
#[test]
fn signed_transaction_wire_roundtrip() {
    let key = key();
    let own = own(&key);
    let pool = coins(&own, &[30_000, 45_000]);
    let selection = select_inputs(&pool, 60_000, 4, &policy()).unwrap();
    assert_eq!(selection.inputs.len(), 2);

    let mut outputs = vec![Recipient::new(stranger(Network::Testnet), 60_000)];
    if selection.has_change() {
        outputs.push(Recipient::new(own.clone(), selection.change));
    }
    let unsigned = build(selection.inputs.clone(), outputs).unwrap();
    assert_eq!(unsigned.fee(), selection.fee);

    let signed = sign(&unsigned, &key).unwrap();
    assert_eq!(signed.fee(), selection.fee);
    assert_eq!(signed.txid(), unsigned.txid(), "witnesses do not change the txid");

    let raw = serialize(&signed);
    let decoded = deserialize(&raw).unwrap();
    assert_eq!(&decoded, signed.tx());
    assert_eq!(decoded.compute_txid(), signed.txid());
    assert_eq!(decoded.compute_wtxid(), signed.wtxid());

    let hex = serialize_hex(&signed);
    assert_eq!(hex, ::hex::encode(&raw));
    assert_eq!(&deserialize_hex(&hex).unwrap(), signed.tx());

    for input in &decoded.input {
        assert_eq!(input.witness.len(), 2);
        assert_eq!(input.witness.nth(1).unwrap(), key.public_key().serialize().as_slice());
    }
}

/// Test: Garbage and trailing bytes are refused on decode
#[test]
fn deserialize_rejects_garbage() {
    assert!(deserialize(&[0x02, 0x00, 0x00]).is_err());
    assert!(deserialize_hex("zz").is_err());

    let key = key();
    let own = own(&key);
    let unsigned = build(coins(&own, &[10_000]), vec![Recipient::new(stranger(Network::Testnet), 9_000)]).unwrap();
    let mut raw = serialize(&sign(&unsigned, &key).unwrap());
    raw.push(0);
    assert!(deserialize(&raw).is_err());
}

/// Test: A different key cannot sign our inputs
#[test]
fn wrong_key_is_key_mismatch() {
    let key = key();
    let own = own(&key);
    let unsigned = build(coins(&own, &[10_000, 20_000]), vec![Recipient::new(stranger(Network::Testnet), 25_000)])
        .unwrap();

    let master = derive_master_key(&Mnemonic::parse(TEST_MNEMONIC).unwrap(), "").unwrap();
    let other = derive(&master, "m/84'/0'/0'/0/1").unwrap();
    assert!(matches!(sign(&unsigned, &other), Err(WalletError::KeyMismatch { input: 0 })));
}

/// Test: Outputs exceeding inputs never reach the signer
#[test]
fn build_rejects_overspend() {
    let key = key();
    let own = own(&key);
    let err = build(coins(&own, &[10_000]), vec![Recipient::new(stranger(Network::Testnet), 10_001)]).unwrap_err();
    assert!(matches!(err, WalletError::InsufficientFunds { .. }));
}
