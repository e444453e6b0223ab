//! # UDP Ping Server Demo
//!
//! Runs the echo server with an interactive operator console on standard
//! input. Faults and the listen port can be retuned while the server is
//! running; changes apply to the very next packet received.
//!
//! Commands:
//!
//! - `loss <percent>`      enable loss injection at the given percentage
//! - `loss off`            disable loss injection
//! - `delay fixed <ms>`    enable delay injection with a fixed pause
//! - `delay random`        enable delay injection with a random pause
//! - `delay off`           disable delay injection
//! - `port <port>`         move the listener to another UDP port
//! - `stats`               print per-source fault counters
//! - `quit`                stop the server and exit
//!
//! Run with: `cargo run --example ping_server -- --port 9977`

// Allow example-specific patterns
#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::expect_used,
    clippy::unwrap_used
)]

use clap::Parser;
use pingfort::{
    ConfigSnapshot, DelayMode, ServerBuilder, SharedRuntimeConfig, DEFAULT_LISTEN_PORT,
    DEFAULT_WORKER_COUNT,
};
use std::io::BufRead;
use std::time::Duration;

#[derive(Parser)]
struct Opt {
    /// UDP port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_LISTEN_PORT)]
    port: u16,
    /// Number of packet-handling worker threads.
    #[arg(short, long, default_value_t = DEFAULT_WORKER_COUNT)]
    workers: usize,
    /// Log engine internals to standard out.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::parse();

    // configure logging: output engine logs to standard out
    let level = if opt.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
            .finish(),
    )
    .expect("setting up tracing subscriber failed");

    let config = SharedRuntimeConfig::new(ConfigSnapshot::new(opt.port));
    let mut server = ServerBuilder::new()
        .with_config(config.clone())
        .with_workers(opt.workers)
        .build()?;
    server.start()?;

    println!(
        "Listening on UDP port {}. Type `help` for commands.",
        server.bound_port().unwrap_or(opt.port)
    );

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["loss", "off"] => {
                config.set_loss_enabled(false);
                println!("loss injection off");
            }
            ["loss", percent] => match percent.parse::<u8>() {
                Ok(percent) if percent <= 100 => {
                    config.set_loss_percent(percent);
                    config.set_loss_enabled(true);
                    println!("loss injection on at {percent}%");
                }
                _ => println!("loss expects a percentage in 0..=100"),
            },
            ["delay", "off"] => {
                config.set_delay_enabled(false);
                println!("delay injection off");
            }
            ["delay", "random"] => {
                config.set_delay_mode(DelayMode::Random);
                config.set_delay_enabled(true);
                println!("delay injection on, random pause per packet");
            }
            ["delay", "fixed", millis] => match millis.parse::<u64>() {
                Ok(millis) => {
                    config.set_delay_mode(DelayMode::Fixed(Duration::from_millis(millis)));
                    config.set_delay_enabled(true);
                    println!("delay injection on, fixed {millis} ms pause");
                }
                Err(_) => println!("delay fixed expects a pause in milliseconds"),
            },
            ["port", port] => match port.parse::<u16>() {
                Ok(port) => {
                    config.set_listen_port(port);
                    println!("moving listener to port {port}");
                }
                Err(_) => println!("port expects a UDP port number"),
            },
            ["stats"] => {
                let counters = server.stats_snapshot();
                if counters.is_empty() {
                    println!("no traffic seen yet");
                }
                for record in counters {
                    println!(
                        "{}: delayed={} dropped={}",
                        record.source, record.delayed, record.dropped
                    );
                }
            }
            ["quit"] | ["exit"] => break,
            _ => {
                println!("commands:");
                println!("  loss <percent> | loss off");
                println!("  delay fixed <ms> | delay random | delay off");
                println!("  port <port>");
                println!("  stats");
                println!("  quit");
            }
        }
    }

    server.stop();
    Ok(())
}
