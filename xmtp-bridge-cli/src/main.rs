//! xmtp-bridge — JSON-lines host for the bridge dispatcher.
//!
//! Reads `{"id", "method", "args"}` requests from stdin, one per line, and
//! writes `{"id", "ok"}` / `{"id", "error"}` responses and
//! `{"event", "payload"}` push events to stdout. Logs go to stderr.
//! The bridge runs against an in-process loopback network.

#![allow(missing_docs, clippy::print_stderr)]

mod config;
mod host;
mod signer;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use xmtp_bridge::loopback::LoopbackNetwork;
use xmtp_bridge::{Bridge, BridgeConfig, ChannelSink};

use crate::config::HostConfig;
use crate::signer::LocalSigner;

/// JSON-lines host for the XMTP bridge.
#[derive(Parser)]
#[command(name = "xmtp-bridge", version, about, long_about = None)]
struct Args {
    /// Log filter directive, e.g. `debug` or `xmtp_bridge=trace,info`.
    #[arg(long)]
    log_level: Option<String>,

    /// Directory for prepared-message files.
    #[arg(long)]
    prepared_dir: Option<PathBuf>,

    /// Seconds to wait for the host to answer a `sign` event.
    #[arg(long)]
    signature_timeout_secs: Option<u64>,

    /// Seconds to wait for the host to complete a pre-action callback.
    #[arg(long)]
    callback_timeout_secs: Option<u64>,

    /// Config file (default: `<config dir>/xmtp-bridge/bridge.conf`).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Answer `sign` events for this key's address locally.
    #[arg(long, value_name = "HEX_KEY")]
    auto_sign: Option<String>,
}

fn main() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    if let Err(e) = rt.block_on(run()) {
        eprintln!("fatal: {e}");
        process::exit(1);
    }
}

async fn run() -> xmtp_bridge::Result<()> {
    let args = Args::parse();
    let file = HostConfig::load(args.config.as_deref())?;

    xmtp_bridge::init_logger(args.log_level.or(file.log_level).as_deref());

    let mut config = BridgeConfig::builder();
    if let Some(dir) = args.prepared_dir.or(file.prepared_dir) {
        config = config.prepared_dir(dir);
    }
    if let Some(secs) = args.signature_timeout_secs.or(file.signature_timeout_secs) {
        config = config.signature_timeout(Duration::from_secs(secs));
    }
    if let Some(secs) = args.callback_timeout_secs.or(file.callback_timeout_secs) {
        config = config.callback_timeout(Duration::from_secs(secs));
    }
    let config = config.build();

    let signer = args
        .auto_sign
        .or(file.auto_sign_key)
        .map(|key| LocalSigner::from_hex(&key))
        .transpose()?;
    if let Some(s) = &signer {
        tracing::info!(address = s.address(), "auto-signing enabled");
    }
    tracing::info!(prepared_dir = %config.prepared_dir().display(), "bridge ready");

    let (sink, events) = ChannelSink::new();
    let bridge = Bridge::new(Arc::new(LoopbackNetwork::new()), Arc::new(sink), config);
    host::serve(Arc::new(bridge), events, signer).await
}
