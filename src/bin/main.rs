//! swiftpay CLI - drive a wallet session from the shell.
//!
//!   swiftpay create --password <pw>           → {"mnemonic": "...", "address": "bc1q..."}
//!   swiftpay balance --password <pw>          → {"confirmed": 0, "pending": 0, "total": 0}
//!   swiftpay send --to <addr> --amount-sat N  → {"payment": "...", "txid": "..."}
//!
//! Every command prints one JSON document on stdout; errors go to stderr
//! as {"error": "..."} with exit code 1.

use anyhow::{anyhow, bail, Context};
use serde_json::{json, Value};
use std::env;
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;
use swiftpay::chain::ChainSource;
use swiftpay::logging::init_logging;
use swiftpay::{
    install_signal_handlers, FeeChoice, FeeLevel, Network, OutgoingPayment, SendRequest, WalletConfig, WalletError,
    WalletSession,
};
use tracing::{info, warn};

fn main() {
    init_logging();
    #[cfg(feature = "electrum")]
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args: Vec<String> = env::args().collect();
    let opts = ParsedArgs::parse(&args[1..]);

    if opts.help {
        print_usage();
        return;
    }
    if opts.version {
        println!("swiftpay {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    let Some(command) = opts.command.clone() else {
        print_usage();
        return;
    };

    let result = tokio::runtime::Runtime::new()
        .context("Failed to create runtime")
        .and_then(|rt| rt.block_on(run(&command, &opts)));

    let pretty = opts.pretty || (!opts.json && io::stdout().is_terminal());
    match result {
        Ok(output) => println!("{}", render(&output, pretty)),
        Err(e) => {
            eprintln!("{}", render(&error_json(&e), pretty));
            std::process::exit(1);
        }
    }
}

/// A rejected broadcast. Payments live only as long as the process, so the
/// signed transaction travels out with the error.
#[derive(Debug, thiserror::Error)]
#[error("Broadcast rejected: {reason}. Signed transaction returned in payment.raw_tx; send again with a higher --fee-rate to rebuild it")]
struct Rejected {
    reason: String,
    payment: Value,
}

fn error_json(e: &anyhow::Error) -> Value {
    let mut out = json!({"error": format!("{:#}", e)});
    if let Some(rejected) = e.downcast_ref::<Rejected>() {
        out["payment"] = rejected.payment.clone();
    }
    out
}

fn render(value: &Value, pretty: bool) -> String {
    let out = if pretty { serde_json::to_string_pretty(value) } else { serde_json::to_string(value) };
    out.unwrap_or_else(|_| value.to_string())
}

async fn run(command: &str, opts: &ParsedArgs) -> anyhow::Result<Value> {
    let session = open_session(opts)?;
    if let Some(network) = opts.network {
        session.set_network(network)?;
    }

    let result = match command {
        "create" => cmd_create(&session, opts),
        "restore" => cmd_restore(&session, opts),
        "address" => cmd_address(&session, opts),
        "uri" => cmd_uri(&session, opts),
        "balance" => cmd_balance(&session, opts).await,
        "utxos" => cmd_utxos(&session, opts).await,
        "fees" => cmd_fees(&session).await,
        "send" => cmd_send(&session, opts).await,
        "network" => cmd_network(&session),
        "history" => cmd_history(&session),
        "reveal" => cmd_reveal(&session, opts),
        "change-password" => cmd_change_password(&session, opts),
        "watch" => cmd_watch(&session, opts).await,
        other => Err(anyhow!("Unknown command: {}", other)),
    };
    session.lock_wallet()?;
    result
}

#[derive(Default)]
struct ParsedArgs {
    command: Option<String>,
    app: Option<String>,
    data_dir: Option<String>,
    network: Option<Network>,
    electrum_url: Option<String>,
    password: Option<String>,
    new_password: Option<String>,
    mnemonic: Option<String>,
    words: Option<usize>,
    to: Option<String>,
    amount_sat: Option<u64>,
    fee_rate: Option<u64>,
    fee_level: Option<FeeLevel>,
    label: Option<String>,
    message: Option<String>,
    interval: Option<u64>,
    dry_run: bool,
    json: bool,
    pretty: bool,
    help: bool,
    version: bool,
    errors: Vec<String>,
}

impl ParsedArgs {
    fn parse(args: &[String]) -> Self {
        load_dotenv();

        let mut opts = ParsedArgs::default();
        let mut positional = Vec::new();
        let mut i = 0;

        while i < args.len() {
            let arg = args[i].as_str();
            let mut value = || -> Option<String> {
                let v = args.get(i + 1).cloned();
                if v.is_some() {
                    i += 1;
                }
                v
            };
            match arg {
                "--help" | "-h" => opts.help = true,
                "--version" | "-V" => opts.version = true,
                "--json" => opts.json = true,
                "--pretty" => opts.pretty = true,
                "--dry-run" => opts.dry_run = true,
                "--app" | "-a" => opts.app = value(),
                "--data-dir" | "-d" => opts.data_dir = value(),
                "--network" | "-n" => opts.network = opts.parse_value("--network", value()),
                "--electrum" | "-e" => opts.electrum_url = value(),
                "--password" | "-p" => opts.password = value(),
                "--new-password" => opts.new_password = value(),
                "--mnemonic" | "-m" => opts.mnemonic = value(),
                "--words" => opts.words = opts.parse_value("--words", value()),
                "--to" => opts.to = value(),
                "--amount-sat" | "--amount" => opts.amount_sat = opts.parse_value("--amount-sat", value()),
                "--fee-rate" => opts.fee_rate = opts.parse_value("--fee-rate", value()),
                "--fee-level" => opts.fee_level = opts.parse_value("--fee-level", value()),
                "--label" => opts.label = value(),
                "--message" => opts.message = value(),
                "--interval" => opts.interval = opts.parse_value("--interval", value()),
                _ if !arg.starts_with('-') => positional.push(arg.to_string()),
                _ => warn!(flag = arg, "Ignoring unknown flag"),
            }
            i += 1;
        }

        if !positional.is_empty() {
            opts.command = Some(positional.remove(0));
        }
        // `swiftpay network testnet` is shorthand for `--network testnet`.
        if opts.command.as_deref() == Some("network") && opts.network.is_none() {
            if let Some(name) = positional.first().cloned() {
                opts.network = opts.parse_value("network", Some(name));
            }
        }

        // Environment (lower priority than flags)
        if opts.app.is_none() {
            opts.app = env_var("SWIFTPAY_APP");
        }
        if opts.data_dir.is_none() {
            opts.data_dir = env_var("SWIFTPAY_DATA_DIR");
        }
        if opts.network.is_none() {
            opts.network = opts.parse_value("SWIFTPAY_NETWORK", env_var("SWIFTPAY_NETWORK"));
        }
        if opts.electrum_url.is_none() {
            opts.electrum_url = env_var("SWIFTPAY_ELECTRUM");
        }
        if opts.password.is_none() {
            opts.password = env_var("SWIFTPAY_PASSWORD");
        }

        opts
    }

    fn parse_value<T: std::str::FromStr>(&mut self, name: &str, raw: Option<String>) -> Option<T>
    where
        T::Err: std::fmt::Display,
    {
        let raw = raw?;
        match raw.parse() {
            Ok(v) => Some(v),
            Err(e) => {
                self.errors.push(format!("{name}: {e}"));
                None
            }
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// KEY=value lines from ./.env, without overriding the real environment.
fn load_dotenv() {
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() && env::var(key.trim()).is_err() {
                env::set_var(key.trim(), value);
            }
        }
    }
}

fn open_session(opts: &ParsedArgs) -> anyhow::Result<WalletSession> {
    if !opts.errors.is_empty() {
        bail!("{}", opts.errors.join("; "));
    }
    let mut config = WalletConfig::new(opts.app.clone().unwrap_or_else(|| swiftpay::config::DEFAULT_APP.into()));
    if let Some(dir) = opts.data_dir.as_deref() {
        config = config.with_data_dir(dir);
    }
    if let Some(network) = opts.network {
        config = config.with_network(network);
    }
    if let Some(url) = opts.electrum_url.as_deref() {
        let network = config.network;
        config = config.with_electrum(network, url);
    }
    if let Some(url) = env_var("SWIFTPAY_ROLLUP_ELECTRUM") {
        config = config.with_electrum(Network::Rollup, url);
    }

    let chain = chain_source(&config);
    WalletSession::open(config, chain).context("Failed to open wallet")
}

#[cfg(feature = "electrum")]
fn chain_source(config: &WalletConfig) -> Arc<dyn ChainSource> {
    Arc::new(swiftpay::chain::electrum::ElectrumSource::new(config.electrum.clone()))
}

#[cfg(not(feature = "electrum"))]
fn chain_source(_config: &WalletConfig) -> Arc<dyn ChainSource> {
    Arc::new(offline::OfflineSource)
}

#[cfg(not(feature = "electrum"))]
mod offline {
    use async_trait::async_trait;
    use bitcoin::Txid;
    use swiftpay::chain::{ChainSource, FeeEstimate, TxStatus};
    use swiftpay::{Address, Network, Utxo, WalletError, WalletResult};

    /// Built without a chain backend: every call is a network error.
    pub struct OfflineSource;

    fn offline<T>() -> WalletResult<T> {
        Err(WalletError::Network("built without a chain backend (enable the `electrum` feature)".into()))
    }

    #[async_trait]
    impl ChainSource for OfflineSource {
        async fn get_utxos(&self, _: &Address, _: Network) -> WalletResult<Vec<Utxo>> { offline() }
        async fn get_fee_estimates(&self, _: Network) -> WalletResult<FeeEstimate> { offline() }
        async fn broadcast(&self, _: &[u8], _: Network) -> WalletResult<Txid> { offline() }
        async fn get_tx_status(&self, _: &Txid, _: &Address, _: Network) -> WalletResult<TxStatus> { offline() }
    }
}

fn password(opts: &ParsedArgs) -> anyhow::Result<String> {
    match opts.password.clone() {
        Some(pw) => Ok(pw),
        None => prompt("Password: "),
    }
}

fn prompt(label: &str) -> anyhow::Result<String> {
    eprint!("{label}");
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin().read_line(&mut line).context("Password read failed")?;
    let line = line.trim().to_string();
    if line.is_empty() {
        bail!("Password cannot be empty");
    }
    Ok(line)
}

fn unlock(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<()> {
    if !session.has_wallet()? {
        bail!(WalletError::NoWallet);
    }
    session.unlock_wallet(&password(opts)?).context("Unlock failed")
}

fn cmd_create(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    let mnemonic = session.create_wallet(&password(opts)?, opts.words.map(words_to_bits).unwrap_or(128))?;
    let address = session.receive_address()?;
    info!("Wallet created; write down the recovery phrase");
    Ok(json!({
        "mnemonic": mnemonic.phrase(),
        "network": session.network(),
        "address": address.to_string(),
    }))
}

fn words_to_bits(words: usize) -> usize {
    if words == 24 { 256 } else { words * 32 / 3 }
}

fn cmd_restore(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    let phrase = match opts.mnemonic.clone() {
        Some(m) => m,
        None => prompt("Recovery phrase: ")?,
    };
    session.restore_wallet(&phrase, &password(opts)?)?;
    Ok(json!({"restored": true, "network": session.network(), "address": session.receive_address()?.to_string()}))
}

fn cmd_address(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    unlock(session, opts)?;
    Ok(json!({"network": session.network(), "address": session.receive_address()?.to_string()}))
}

fn cmd_uri(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    unlock(session, opts)?;
    let uri = session.receive_uri(opts.amount_sat, opts.label.as_deref(), opts.message.as_deref())?;
    Ok(json!({"uri": uri}))
}

async fn cmd_balance(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    unlock(session, opts)?;
    let network = session.network();
    match session.refresh().await {
        Ok(b) => Ok(json!({
            "network": network,
            "confirmed": b.confirmed,
            "pending": b.pending,
            "total": b.total(),
            "stale": false,
        })),
        Err(e) if e.is_retryable() => {
            // Fall back to the cache but say so; never report zero for "unknown".
            let cached = session.cached_balance(network).ok_or(e)?;
            Ok(json!({
                "network": network,
                "confirmed": cached.confirmed,
                "pending": cached.pending,
                "total": cached.total(),
                "stale": true,
            }))
        }
        Err(e) => Err(e.into()),
    }
}

async fn cmd_utxos(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    unlock(session, opts)?;
    session.refresh().await?;
    let utxos = session.utxos(session.network())?.unwrap_or_default();
    Ok(json!({"utxos": utxos, "count": utxos.len()}))
}

async fn cmd_fees(session: &WalletSession) -> anyhow::Result<Value> {
    let fees = session.fee_estimates(session.network()).await?;
    Ok(serde_json::to_value(fees)?)
}

async fn cmd_send(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    let to = opts.to.clone().ok_or_else(|| anyhow!("--to is required"))?;
    let amount_sat = opts.amount_sat.ok_or_else(|| anyhow!("--amount-sat is required"))?;
    let fee = match (opts.fee_rate, opts.fee_level) {
        (Some(rate), _) => FeeChoice::Rate(rate),
        (None, Some(level)) => FeeChoice::Level(level),
        (None, None) => FeeChoice::default(),
    };

    unlock(session, opts)?;
    session.refresh().await.context("Refresh before send failed")?;
    let request = SendRequest::new(to, amount_sat, fee);
    let payment = session.prepare_send(&request).await?;

    if opts.dry_run {
        let out = payment_json(&payment);
        session.cancel_payment(&payment.id)?;
        return Ok(json!({"dry_run": true, "payment": out}));
    }

    match session.broadcast_payment(&payment.id).await {
        Ok(txid) => Ok(json!({"txid": txid.to_string(), "payment": session.payment(&payment.id).map(|p| payment_json(&p))})),
        Err(WalletError::BroadcastRejected { reason }) => {
            let kept = session.payment(&payment.id).unwrap_or(payment);
            Err(Rejected { reason, payment: payment_json(&kept) }.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn payment_json(payment: &OutgoingPayment) -> Value {
    json!({
        "id": payment.id,
        "state": payment.state(),
        "network": payment.network,
        "recipient": payment.recipient.to_string(),
        "amount_sat": payment.amount_sat,
        "fee_rate": payment.fee_rate,
        "fee": payment.fee(),
        "change": payment.change(),
        "txid": payment.txid().map(|t| t.to_string()),
        "vsize": payment.signed().map(|s| s.vsize()),
        "raw_tx": payment.raw_tx().map(hex::encode),
    })
}

fn cmd_network(session: &WalletSession) -> anyhow::Result<Value> {
    Ok(json!({"network": session.network(), "cached_balance": session.cached_balance(session.network())}))
}

fn cmd_history(session: &WalletSession) -> anyhow::Result<Value> {
    let records = session.history()?;
    Ok(json!({"count": records.len(), "transactions": records}))
}

fn cmd_reveal(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    let mnemonic = session.reveal_mnemonic(&password(opts)?)?;
    Ok(json!({"mnemonic": mnemonic.phrase(), "words": mnemonic.word_count()}))
}

fn cmd_change_password(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    let old = password(opts)?;
    let new = match opts.new_password.clone() {
        Some(pw) => pw,
        None => prompt("New password: ")?,
    };
    session.change_password(&old, &new)?;
    Ok(json!({"changed": true}))
}

/// Refresh on an interval until SIGINT/SIGTERM, then lock.
async fn cmd_watch(session: &WalletSession, opts: &ParsedArgs) -> anyhow::Result<Value> {
    unlock(session, opts)?;
    let shutdown = install_signal_handlers();
    let interval = Duration::from_secs(opts.interval.unwrap_or(60).max(5));
    let mut refreshes = 0u64;

    loop {
        match session.refresh().await {
            Ok(b) => {
                refreshes += 1;
                info!(network = %session.network(), confirmed = b.confirmed, pending = b.pending, "Watching");
            }
            Err(WalletError::Locked) => {
                warn!("Session locked, stopping watch");
                break;
            }
            Err(e) => warn!(error = %e, "Refresh failed"),
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.wait() => {
                info!("Shutdown signal received, locking wallet");
                break;
            }
        }
    }

    session.lock_wallet()?;
    Ok(json!({"status": "stopped", "refreshes": refreshes}))
}

fn print_usage() {
    println!(
        r#"swiftpay - non-custodial Bitcoin wallet

USAGE:
    swiftpay <command> [options]

COMMANDS:
    create                  Create a wallet and print its recovery phrase
    restore                 Restore a wallet from a recovery phrase
    address                 Print the receive address
    uri                     Print a BIP21 payment URI
    balance                 Refresh and print the balance
    utxos                   Refresh and list unspent outputs
    fees                    Print current fee estimates (sat/vB)
    send                    Build, sign and broadcast a payment
    network [name]          Show or switch the active network
    history                 Print transaction history, newest first
    reveal                  Print the recovery phrase (asks for password)
    change-password         Re-seal the vault under a new password
    watch                   Refresh periodically until interrupted

OPTIONS:
    --app, -a <name>        App name (env: SWIFTPAY_APP, default: swiftpay)
    --data-dir, -d <path>   Data directory (env: SWIFTPAY_DATA_DIR, SWIFTPAY_ROOT)
    --network, -n <net>     mainnet|testnet|rollup, persisted (env: SWIFTPAY_NETWORK)
    --electrum, -e <url>    Electrum server for the network (env: SWIFTPAY_ELECTRUM)
    --password, -p <pw>     Wallet password (env: SWIFTPAY_PASSWORD, else prompt)
    --new-password <pw>     New password for change-password
    --mnemonic, -m <words>  Recovery phrase for restore
    --words <12|24>         Phrase length for create (default 12)
    --to <address>          Recipient for send
    --amount-sat <n>        Amount in satoshis (send, uri)
    --fee-rate <n>          Fee rate in sat/vB
    --fee-level <level>     fastest|half_hour|hour|economy|minimum
    --dry-run               Sign but do not broadcast
    --label, --message      BIP21 fields for uri
    --interval <secs>       Refresh interval for watch (default 60)
    --json                  Compact JSON output
    --pretty                Pretty-print JSON
    --version, -V           Print version

ENVIRONMENT:
    SWIFTPAY_ROLLUP_ELECTRUM  Electrum server for the rollup
    SWIFTPAY_LOG_JSON=1       JSON log lines on stderr
    RUST_LOG                  Log filter (default: info)

EXAMPLES:
    swiftpay create --network testnet
    swiftpay balance --json | jq .confirmed
    swiftpay send --to tb1q... --amount-sat 50000 --fee-rate 10 --dry-run
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_error_carries_signed_tx() {
        let payment = json!({"id": "pay-1", "state": "rejected", "raw_tx": "0200000000010100"});
        let err = anyhow::Error::from(Rejected { reason: "min relay fee not met".into(), payment: payment.clone() });

        let out = error_json(&err);
        assert_eq!(out["payment"], payment);
        assert_eq!(out["payment"]["raw_tx"], "0200000000010100");
        let message = out["error"].as_str().unwrap();
        assert!(message.contains("min relay fee not met"));
        assert!(message.contains("payment.raw_tx"));
    }

    #[test]
    fn test_plain_error_has_no_payment() {
        let out = error_json(&anyhow!("--to is required"));
        assert_eq!(out["error"], "--to is required");
        assert!(out.get("payment").is_none());
    }
}
