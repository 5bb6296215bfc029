//! Addresses - witness programs encoded as bech32/bech32m per network.
//!
//! The wallet itself only ever produces P2WPKH. Recipients may be any
//! segwit program (v0 20/32-byte, v1 taproot) on the active network.

use crate::error::{WalletError, WalletResult};
use crate::keys::DerivedKey;
use crate::network::Network;
use bitcoin::bech32::{segwit, Fe32, Hrp};
use bitcoin::{Script, ScriptBuf, WitnessProgram, WitnessVersion};
use std::fmt;

/// Output script family used for every wallet-owned address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptType {
    #[default]
    P2wpkh,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    network: Network,
    program: WitnessProgram,
    encoded: String,
}

impl Address {
    fn from_program(program: WitnessProgram, network: Network) -> WalletResult<Self> {
        let hrp = Hrp::parse(network.hrp()).map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
        let version = Fe32::try_from(program.version().to_num())
            .map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
        let encoded = segwit::encode(hrp, version, program.program().as_bytes())
            .map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
        Ok(Self { network, program, encoded })
    }

    /// Decode and require the address to belong to `network`.
    pub fn parse(value: &str, network: Network) -> WalletResult<Self> {
        let address = Self::parse_any(value)?;
        if address.network != network {
            return Err(WalletError::InvalidAddress(format!(
                "{value} is a {} address, expected {network}",
                address.network
            )));
        }
        Ok(address)
    }

    /// Decode, inferring the network from the human-readable part.
    pub fn parse_any(value: &str) -> WalletResult<Self> {
        let value = value.trim();
        let (hrp, version, program) =
            segwit::decode(value).map_err(|e| WalletError::InvalidAddress(format!("{value}: {e}")))?;
        let hrp = hrp.to_lowercase();
        let network = Network::ALL
            .into_iter()
            .find(|n| n.hrp() == hrp)
            .ok_or_else(|| WalletError::InvalidAddress(format!("unknown prefix {hrp}")))?;
        let version = WitnessVersion::try_from(version.to_u8())
            .map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
        let program = WitnessProgram::new(version, &program)
            .map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
        Self::from_program(program, network)
    }

    /// Recover the address paying `script` on `network`.
    pub fn from_script(script: &Script, network: Network) -> WalletResult<Self> {
        let version = script
            .witness_version()
            .ok_or_else(|| WalletError::InvalidAddress("not a witness program".into()))?;
        let bytes = script.as_bytes();
        if bytes.len() < 4 || !script.is_witness_program() {
            return Err(WalletError::InvalidAddress("not a witness program".into()));
        }
        let program = WitnessProgram::new(version, &bytes[2..])
            .map_err(|e| WalletError::InvalidAddress(e.to_string()))?;
        Self::from_program(program, network)
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn script_pubkey(&self) -> ScriptBuf {
        ScriptBuf::new_witness_program(&self.program)
    }

    pub fn is_p2wpkh(&self) -> bool {
        self.program.is_p2wpkh()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// Public address for a derived key. Pure: no state, no I/O.
pub fn address_for(key: &DerivedKey, network: Network, script_type: ScriptType) -> WalletResult<Address> {
    match script_type {
        ScriptType::P2wpkh => {
            let program = WitnessProgram::p2wpkh(&key.compressed_public_key());
            Address::from_program(program, network)
        }
    }
}

/// BIP21 payment URI for the receive screen.
pub fn receive_uri(address: &Address, amount_sat: Option<u64>, label: Option<&str>, message: Option<&str>) -> String {
    let mut uri = format!("bitcoin:{}", address);
    let mut query = Vec::new();
    if let Some(amount) = amount_sat {
        query.push(format!("amount={}", format_btc_amount(amount)));
    }
    if let Some(label) = label {
        query.push(format!("label={}", percent_encode(label)));
    }
    if let Some(message) = message {
        query.push(format!("message={}", percent_encode(message)));
    }
    if !query.is_empty() {
        uri.push('?');
        uri.push_str(&query.join("&"));
    }
    uri
}

/// Satoshis as a decimal BTC string, trailing zeros trimmed.
pub fn format_btc_amount(amount_sat: u64) -> String {
    let whole = amount_sat / 100_000_000;
    let frac = amount_sat % 100_000_000;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{:08}", frac);
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for &b in value.as_bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
