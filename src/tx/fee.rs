//! Virtual size and fee arithmetic for P2WPKH spends.
//!
//! Weight is counted per field: non-witness bytes cost 4 weight units,
//! witness bytes cost 1. vsize is weight / 4 rounded up.

use crate::error::{WalletError, WalletResult};

/// Output script length of a P2WPKH output (OP_0 PUSH20 <hash>).
pub const P2WPKH_SCRIPT_LEN: usize = 22;

/// version (4) + locktime (4).
const TX_FIXED_BYTES: u64 = 8;
/// outpoint (36) + empty script_sig length (1) + sequence (4).
const INPUT_BYTES: u64 = 41;
/// amount (8) before the script length prefix.
const OUTPUT_VALUE_BYTES: u64 = 8;
/// segwit marker + flag.
const WITNESS_HEADER_WEIGHT: u64 = 2;
/// item count (1) + sig length (1) + low-R DER sig with sighash byte (72)
/// + pubkey length (1) + compressed pubkey (33).
const P2WPKH_WITNESS_WEIGHT: u64 = 108;

pub(crate) fn varint_len(n: u64) -> u64 {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffff_ffff => 5,
        _ => 9,
    }
}

fn output_bytes(script_len: usize) -> u64 {
    let len = script_len as u64;
    OUTPUT_VALUE_BYTES + varint_len(len) + len
}

/// Weight of a transaction spending `input_count` P2WPKH inputs into
/// outputs with the given script lengths.
pub fn estimate_weight(input_count: usize, output_script_lens: &[usize]) -> u64 {
    let inputs = input_count as u64;
    let base = TX_FIXED_BYTES
        + varint_len(inputs)
        + varint_len(output_script_lens.len() as u64)
        + inputs * INPUT_BYTES
        + output_script_lens.iter().map(|&l| output_bytes(l)).sum::<u64>();
    let witness = if inputs == 0 { 0 } else { WITNESS_HEADER_WEIGHT + inputs * P2WPKH_WITNESS_WEIGHT };
    base * 4 + witness
}

pub fn estimate_vsize(input_count: usize, output_script_lens: &[usize]) -> u64 {
    estimate_weight(input_count, output_script_lens).div_ceil(4)
}

/// Fee in satoshis at `fee_rate` sat/vB.
pub fn estimate_fee(input_count: usize, output_script_lens: &[usize], fee_rate: u64) -> WalletResult<u64> {
    estimate_vsize(input_count, output_script_lens)
        .checked_mul(fee_rate)
        .ok_or_else(|| WalletError::InvalidAmount(format!("fee overflow at {fee_rate} sat/vB")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_in_two_out() {
        let outs = [P2WPKH_SCRIPT_LEN, P2WPKH_SCRIPT_LEN];
        assert_eq!(estimate_weight(1, &outs), 562);
        assert_eq!(estimate_vsize(1, &outs), 141);
        assert_eq!(estimate_fee(1, &outs, 10).unwrap(), 1_410);
    }

    #[test]
    fn test_one_in_one_out() {
        assert_eq!(estimate_vsize(1, &[P2WPKH_SCRIPT_LEN]), 110);
    }

    #[test]
    fn test_each_input_adds_weight() {
        let outs = [P2WPKH_SCRIPT_LEN];
        let one = estimate_weight(1, &outs);
        let two = estimate_weight(2, &outs);
        assert_eq!(two - one, INPUT_BYTES * 4 + P2WPKH_WITNESS_WEIGHT);
    }

    #[test]
    fn test_varint_boundaries() {
        assert_eq!(varint_len(0xfc), 1);
        assert_eq!(varint_len(0xfd), 3);
        assert_eq!(varint_len(0x1_0000), 5);
        assert_eq!(varint_len(u64::MAX), 9);
    }

    #[test]
    fn test_fee_overflow_is_error() {
        assert!(estimate_fee(1, &[P2WPKH_SCRIPT_LEN], u64::MAX).is_err());
    }
}
