//! Consensus byte encoding. Witness data is included whenever any input
//! carries it (BIP144 marker and flag).

use super::sign::SignedTransaction;
use crate::error::{WalletError, WalletResult};
use bitcoin::consensus::encode;
use bitcoin::Transaction;

pub fn serialize(signed: &SignedTransaction) -> Vec<u8> {
    encode::serialize(signed.tx())
}

pub fn serialize_hex(signed: &SignedTransaction) -> String {
    hex::encode(serialize(signed))
}

/// Decode one transaction. Trailing bytes are an error.
pub fn deserialize(bytes: &[u8]) -> WalletResult<Transaction> {
    encode::deserialize(bytes).map_err(|e| WalletError::Encoding(format!("transaction: {e}")))
}

pub fn deserialize_hex(raw: &str) -> WalletResult<Transaction> {
    let bytes = hex::decode(raw.trim()).map_err(|e| WalletError::Encoding(format!("hex: {e}")))?;
    deserialize(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    // BIP143 native P2WPKH example, signed.
    const SIGNED_HEX: &str = "01000000000102fff7f7881a8099afa6940d42d1e7f6362bec38171ea3edf433541db4e4ad969f00000000494830450221008b9d1dc26ba6a9cb62127b02742fa9d754cd3bebf337f7a55d114c8e5cdd30be022040529b194ba3f9281a99f2b1c0a19c0489bc22ede944ccf4ecbab4cc618ef3ed01eeffffffef51e1b804cc89d182d279655c3aa89e815b1b309fe287d9b2b55d57b90ec68a0100000000ffffffff02202cb206000000001976a9148280b37df378db99f66f85c95a783a76ac7a6d5988ac9093510d000000001976a9143bde42dbee7e4dbe6a21b2d50ce2f0167faa815988ac000247304402203609e17b84f6a7d30c80bfa610b5b4542f32a8a0d5447a12fb1366d7f01cc44a0220573a954c4518331561406f90300e8f3358f51928d43c212a8caed02de67eebee0121025476c2e83188368da1ff3e292e7acafcdb3566bb0ad253f62fc70f07aeee635711000000";

    #[test]
    fn test_decode_reencode_is_byte_exact() {
        let tx = deserialize_hex(SIGNED_HEX).unwrap();
        assert_eq!(tx.input.len(), 2);
        assert_eq!(tx.input[1].witness.len(), 2);
        assert_eq!(hex::encode(encode::serialize(&tx)), SIGNED_HEX);
    }

    #[test]
    fn test_rejects_truncated_and_trailing() {
        let bytes = hex::decode(SIGNED_HEX).unwrap();
        assert!(deserialize(&bytes[..bytes.len() - 1]).is_err());
        let mut extra = bytes.clone();
        extra.push(0);
        assert!(deserialize(&extra).is_err());
        assert!(deserialize_hex("zz").is_err());
    }
}
