//! # UDP Ping Client Demo
//!
//! Sends sequenced, timestamped probes to an echo server and prints the
//! classic per-probe transcript followed by the aggregate statistics.
//! Point it at `ping_server` (or any UDP echo) to watch loss and delay
//! injection show up as timeouts.
//!
//! Run with: `cargo run --example ping_client -- 127.0.0.1 9977`

// Allow example-specific patterns
#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::expect_used,
    clippy::unwrap_used
)]

use clap::Parser;
use pingfort::{ClientBuilder, DEFAULT_LISTEN_PORT, DEFAULT_PROBE_COUNT};
use std::time::Duration;

#[derive(Parser)]
struct Opt {
    /// Host name or address of the echo server.
    host: String,
    /// UDP port the echo server listens on.
    #[arg(default_value_t = DEFAULT_LISTEN_PORT)]
    port: u16,
    /// Number of probes to send.
    #[arg(short, long, default_value_t = DEFAULT_PROBE_COUNT)]
    count: usize,
    /// Per-probe echo wait in milliseconds.
    #[arg(short, long, default_value_t = 1000)]
    timeout_millis: u64,
    /// Log engine internals to standard out.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::parse();

    if opt.verbose {
        // configure logging: output engine logs to standard out
        tracing::subscriber::set_global_default(
            tracing_subscriber::FmtSubscriber::builder()
                .with_max_level(tracing::Level::DEBUG)
                .finish(),
        )
        .expect("setting up tracing subscriber failed");
    }

    let mut client = ClientBuilder::new()
        .with_host(opt.host)
        .with_port(opt.port)
        .with_probe_count(opt.count)
        .with_timeout(Duration::from_millis(opt.timeout_millis))
        .build()?;

    let report = client.run();
    println!("{report}");

    Ok(())
}
