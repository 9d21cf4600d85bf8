//! chunkfwd CLI - relay one endpoint to another
//!
//! Each endpoint is a TCP address or an HTTP tunnel URL.

use anyhow::{Context, Result};
use chunkfwd_relay::{build_pair, ConnectionError, Relay, RelayConfig, TunnelConfig};
use clap::Parser;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// chunkfwd - forward one TCP or HTTP-tunnel endpoint to another
#[derive(Parser, Debug)]
#[command(name = "chunkfwd")]
#[command(about = "chunkfwd - forward one TCP or HTTP-tunnel endpoint to another")]
#[command(version)]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
#[command(long_about = r#"
Relays exactly one connection between a source and a destination, then exits.

A target starting with "http" is an HTTP tunnel URL; anything else is a
host:port TCP address. A TCP source listens and accepts one client, a TCP
destination dials out. A tunnel endpoint opens a GET and a PUT request
against the URL; the source side fetches <path>/0 and pushes <path>/1, the
destination side the reverse, so two chunkfwd processes that can only make
outbound HTTP requests meet through a server that pipes PUT bodies into
GET responses.

Tunnel payloads are XORed with a keystream derived from the URL. This hides
plaintext from casual inspection only; it is not encryption.

EXAMPLES:
  # Expose a local SSH server through a piping server
  chunkfwd http://pipe.example.com/my-session 127.0.0.1:22

  # On the other machine, accept a client on 2222 and send it through the tunnel
  chunkfwd 127.0.0.1:2222 http://pipe.example.com/my-session

  # Plain TCP port forward
  chunkfwd 0.0.0.0:9001 10.0.0.5:9002
"#)]
struct Cli {
    /// Source target (host:port to listen on, or tunnel URL)
    src: String,

    /// Destination target (host:port to dial, or tunnel URL)
    dst: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CHUNKFWD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Send tunnel payloads without keystream obfuscation (both peers must agree)
    #[arg(long)]
    plain: bool,

    /// Seconds to wait for the second direction after the first one ends
    #[arg(long, default_value = "5")]
    drain_grace: u64,
}

/// Setup logging with the specified log level
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false),
        )
        .with(filter)
        .init();

    Ok(())
}

/// Bad targets and unreachable peers read differently from an endpoint that
/// connected and then broke during the handshake
fn open_failure_context(error: &ConnectionError) -> &'static str {
    if error.is_fatal() {
        "Failed to open relay endpoints"
    } else {
        "Relay endpoint failed during setup"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { cli.log_level.as_str() };
    setup_logging(log_level)?;

    let tunnel = TunnelConfig::default().with_obfuscation(!cli.plain);
    let config = RelayConfig::default()
        .with_drain_grace(Duration::from_secs(cli.drain_grace))
        .with_tunnel(tunnel);

    if cli.plain {
        warn!("Tunnel obfuscation disabled");
    }

    let (source, destination) =
        build_pair(&cli.src, &cli.dst, &config.tunnel).context("Invalid target")?;
    let relay = Relay::new(source, destination, config);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = relay.run() => {
            match result {
                Ok(report) => {
                    info!(
                        "Relay finished ({:?} bytes forwarded, {:?} bytes returned)",
                        report.source_to_destination, report.destination_to_source
                    );
                }
                Err(e) => {
                    error!("Relay error: {}", e);
                    let context = open_failure_context(&e);
                    return Err(e).context(context);
                }
            }
        }
    }

    Ok(())
}
