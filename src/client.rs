//! Client side: builder, sequential probe loop, and the run report.
//!
//! A [`PingClient`] sends a fixed number of probes, one in flight at a time,
//! each with its own echo window. Every recoverable failure (timeout, payload
//! mismatch, per-probe I/O error) is recorded as loss and the loop moves on;
//! nothing aborts a run once it starts. The product is a [`PingReport`]: the
//! ordered per-probe records plus the aggregate [`PingStatistics`].

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::PingError;
use crate::stats::{PingStatistics, RttAggregator};
use crate::wire::{echo_matches, Probe, PROBE_BUFFER_SIZE};
use crate::SequenceId;

/// Default number of probes per run.
pub const DEFAULT_PROBE_COUNT: usize = 10;
/// Default per-probe echo wait.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// The [`ClientBuilder`] assembles a [`PingClient`].
///
/// Host and port are required; everything else has defaults.
///
/// # Example
///
/// ```no_run
/// use pingfort::ClientBuilder;
///
/// let mut client = ClientBuilder::new()
///     .with_host("127.0.0.1")
///     .with_port(9977)
///     .with_probe_count(5)
///     .build()?;
/// let report = client.run();
/// println!("{report}");
/// # Ok::<(), pingfort::PingError>(())
/// ```
#[derive(Debug, Clone, Default)]
#[must_use = "ClientBuilder must be consumed by calling build"]
pub struct ClientBuilder {
    host: Option<String>,
    port: Option<u16>,
    probe_count: Option<usize>,
    timeout: Option<Duration>,
}

impl ClientBuilder {
    /// Construct a new builder with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target host. Required. Accepts names and literal addresses.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the target UDP port. Required.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Changes how many probes a run sends. Default is 10.
    pub fn with_probe_count(mut self, probe_count: usize) -> Self {
        self.probe_count = Some(probe_count);
        self
    }

    /// Changes the per-probe echo wait. Default is 1000 ms.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Resolves the target, binds a local ephemeral socket, and consumes the
    /// builder.
    ///
    /// # Errors
    ///
    /// - [`PingError::InvalidArgument`] when host or port is missing, the
    ///   probe count is zero, or the timeout is zero.
    /// - [`PingError::UnresolvedHost`] when the host resolves to no address.
    /// - [`PingError::SocketError`] when the local socket cannot be bound or
    ///   configured.
    pub fn build(self) -> Result<PingClient, PingError> {
        let Some(host) = self.host else {
            return Err(PingError::InvalidArgument {
                context: "host is required".to_owned(),
            });
        };
        let Some(port) = self.port else {
            return Err(PingError::InvalidArgument {
                context: "port is required".to_owned(),
            });
        };
        let probe_count = self.probe_count.unwrap_or(DEFAULT_PROBE_COUNT);
        if probe_count == 0 {
            return Err(PingError::InvalidArgument {
                context: "probe count must be at least 1".to_owned(),
            });
        }
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(PingError::InvalidArgument {
                context: "timeout must be non-zero".to_owned(),
            });
        }

        let target = (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|_| PingError::UnresolvedHost { host: host.clone() })?
            .next()
            .ok_or_else(|| PingError::UnresolvedHost { host: host.clone() })?;

        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|error| PingError::SocketError {
            context: format!("failed to bind a local socket: {}", error),
        })?;
        socket
            .set_read_timeout(Some(timeout))
            .map_err(|error| PingError::SocketError {
                context: format!("set_read_timeout failed: {}", error),
            })?;

        Ok(PingClient {
            host,
            target,
            socket,
            probe_count,
            timeout,
        })
    }
}

/// A resolved, bound, ready-to-run probe loop.
#[derive(Debug)]
pub struct PingClient {
    host: String,
    target: SocketAddr,
    socket: UdpSocket,
    probe_count: usize,
    timeout: Duration,
}

impl PingClient {
    /// The resolved target address.
    #[must_use]
    pub const fn target(&self) -> SocketAddr {
        self.target
    }

    /// Probes a run will send.
    #[must_use]
    pub const fn probe_count(&self) -> usize {
        self.probe_count
    }

    /// The per-probe echo wait.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs the probe loop to completion and returns the report.
    ///
    /// Sequence ids are seeded from the loop start time in unix milliseconds
    /// and advance by one per probe, so distinct runs produce non-colliding
    /// ids against the same server. Probes are strictly sequential; every
    /// recoverable failure is recorded as loss and the loop continues.
    pub fn run(&mut self) -> PingReport {
        let seed = unix_millis();
        tracing::info!(
            host = %self.host,
            target = %self.target,
            probes = self.probe_count,
            timeout_millis = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            "starting probe run"
        );

        let mut aggregator = RttAggregator::new();
        let mut records = Vec::with_capacity(self.probe_count);
        for index in 0..self.probe_count {
            let offset = i64::try_from(index).unwrap_or(i64::MAX);
            let sequence = SequenceId::new(seed.wrapping_add(offset));
            let outcome = match self.probe_once(sequence) {
                Ok((rtt_millis, bytes)) => {
                    aggregator.record_reply(rtt_millis);
                    ProbeOutcome::Reply { rtt_millis, bytes }
                },
                Err(error) => {
                    aggregator.record_loss();
                    match error {
                        PingError::Timeout { .. } => ProbeOutcome::TimedOut,
                        PingError::PayloadMismatch { .. } => ProbeOutcome::PayloadMismatch,
                        other => ProbeOutcome::Failed {
                            context: other.to_string(),
                        },
                    }
                },
            };
            records.push(ProbeRecord { sequence, outcome });
        }

        let statistics = aggregator.statistics();
        tracing::info!(
            sent = statistics.sent,
            received = statistics.received,
            lost = statistics.lost,
            loss_percent = statistics.loss_percent,
            "probe run finished"
        );
        PingReport {
            host: self.host.clone(),
            target: self.target,
            records,
            statistics,
        }
    }

    /// One probe cycle: encode, send, wait for the echo, classify.
    fn probe_once(&self, sequence: SequenceId) -> Result<(u128, usize), PingError> {
        let probe = Probe::new(sequence, unix_millis());
        let payload = probe.encode();
        let started = Instant::now();

        self.socket
            .send_to(&payload, self.target)
            .map_err(|error| {
                let send_error = PingError::SendError {
                    destination: self.target,
                    context: error.to_string(),
                };
                tracing::warn!(%sequence, %send_error, "probe send failed");
                send_error
            })?;

        let mut buffer = [0u8; PROBE_BUFFER_SIZE];
        match self.socket.recv_from(&mut buffer) {
            Ok((length, _)) => {
                if echo_matches(&payload, &buffer, length) {
                    let rtt_millis = started.elapsed().as_millis();
                    tracing::debug!(
                        %sequence,
                        rtt_millis = u64::try_from(rtt_millis).unwrap_or(u64::MAX),
                        bytes = length,
                        "echo received"
                    );
                    Ok((rtt_millis, length))
                } else {
                    tracing::debug!(%sequence, bytes = length, "echo did not match the probe");
                    Err(PingError::PayloadMismatch { sequence })
                }
            },
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                tracing::debug!(%sequence, "probe timed out");
                Err(PingError::Timeout { sequence })
            },
            Err(error) => {
                tracing::warn!(%sequence, %error, "probe receive failed");
                Err(PingError::SocketError {
                    context: error.to_string(),
                })
            },
        }
    }
}

/// Wall clock in unix milliseconds; a clock before the epoch degrades to 0.
fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Per-probe terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeOutcome {
    /// The echo came back intact.
    Reply {
        /// Round trip time in whole milliseconds.
        rtt_millis: u128,
        /// Size of the echoed datagram in bytes.
        bytes: usize,
    },
    /// No datagram arrived within the probe window.
    TimedOut,
    /// A datagram arrived but its bytes differed from the probe.
    PayloadMismatch,
    /// The probe cycle was abandoned on a local I/O failure.
    Failed {
        /// A description of the failure.
        context: String,
    },
}

impl ProbeOutcome {
    /// True when the probe got its echo back intact.
    #[must_use]
    pub const fn is_reply(&self) -> bool {
        matches!(self, ProbeOutcome::Reply { .. })
    }
}

/// One entry per probe sent, in send order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProbeRecord {
    /// The sequence id the probe carried.
    pub sequence: SequenceId,
    /// How the probe ended.
    pub outcome: ProbeOutcome,
}

/// The product of a probe run.
///
/// `Display` renders the classic ping transcript: one line per probe, then
/// the statistics block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[must_use = "PingReport should be inspected or rendered after a run"]
pub struct PingReport {
    /// The host as given to the builder.
    pub host: String,
    /// The resolved target address.
    pub target: SocketAddr,
    /// Every probe's record, in send order.
    pub records: Vec<ProbeRecord>,
    /// The aggregate statistics over the run.
    pub statistics: PingStatistics,
}

impl PingReport {
    /// Serializes the report to a JSON string.
    ///
    /// Returns `None` if serialization fails (it should not for this type).
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for PingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Destructure to ensure all fields are included when new fields are added.
        // The compiler will error if a new field is added but not handled here.
        let Self {
            host,
            target,
            records,
            statistics,
        } = self;

        writeln!(
            f,
            "Pinging {}:{} with {} probes:",
            host,
            target.port(),
            records.len()
        )?;
        for record in records {
            match &record.outcome {
                ProbeOutcome::Reply { rtt_millis, bytes } => {
                    writeln!(f, "Reply from {}: bytes={} time={}ms", host, bytes, rtt_millis)?;
                },
                ProbeOutcome::TimedOut => writeln!(f, "Request timed out.")?,
                ProbeOutcome::PayloadMismatch => {
                    writeln!(f, "Reply did not match the probe; counted as lost.")?;
                },
                ProbeOutcome::Failed { context } => writeln!(f, "Probe failed: {}", context)?,
            }
        }

        writeln!(f)?;
        writeln!(f, "Ping statistics for {}:{}:", host, target.port())?;
        write!(f, "    {}", statistics)?;
        if statistics.rtt.is_none() {
            write!(f, "\nAll packets were lost; round trip times are undefined.")?;
        }
        Ok(())
    }
}

// #############################################################################
// # TESTS                                                                     #
// #############################################################################

#[cfg(test)]
#[cfg(not(miri))] // Miri doesn't support socket operations
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::thread::JoinHandle;

    /// Spawns a plain echo responder for `replies` datagrams, then exits.
    fn spawn_echo(replies: usize) -> (u16, JoinHandle<()>) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = socket.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let mut buffer = [0u8; PROBE_BUFFER_SIZE];
            for _ in 0..replies {
                let (length, source) = socket.recv_from(&mut buffer).unwrap();
                socket.send_to(&buffer[..length], source).unwrap();
            }
        });
        (port, handle)
    }

    /// Spawns a responder that answers every probe with the wrong bytes.
    fn spawn_garbler(replies: usize) -> (u16, JoinHandle<()>) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = socket.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let mut buffer = [0u8; PROBE_BUFFER_SIZE];
            for _ in 0..replies {
                let (_, source) = socket.recv_from(&mut buffer).unwrap();
                socket.send_to(b"not the probe you sent", source).unwrap();
            }
        });
        (port, handle)
    }

    fn local_client(port: u16, probes: usize, timeout: Duration) -> PingClient {
        ClientBuilder::new()
            .with_host("127.0.0.1")
            .with_port(port)
            .with_probe_count(probes)
            .with_timeout(timeout)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_host() {
        let result = ClientBuilder::new().with_port(9977).build();
        assert!(matches!(result, Err(PingError::InvalidArgument { .. })));
    }

    #[test]
    fn test_build_requires_port() {
        let result = ClientBuilder::new().with_host("127.0.0.1").build();
        assert!(matches!(result, Err(PingError::InvalidArgument { .. })));
    }

    #[test]
    fn test_build_rejects_zero_probes() {
        let result = ClientBuilder::new()
            .with_host("127.0.0.1")
            .with_port(9977)
            .with_probe_count(0)
            .build();
        assert!(matches!(result, Err(PingError::InvalidArgument { .. })));
    }

    #[test]
    fn test_build_rejects_zero_timeout() {
        let result = ClientBuilder::new()
            .with_host("127.0.0.1")
            .with_port(9977)
            .with_timeout(Duration::ZERO)
            .build();
        assert!(matches!(result, Err(PingError::InvalidArgument { .. })));
    }

    #[test]
    fn test_build_rejects_unresolvable_host() {
        // Reserved TLD, guaranteed not to resolve
        let result = ClientBuilder::new()
            .with_host("no-such-host.invalid")
            .with_port(9977)
            .build();
        assert!(
            matches!(result, Err(PingError::UnresolvedHost { ref host }) if host == "no-such-host.invalid"),
            "expected UnresolvedHost, got {result:?}"
        );
    }

    #[test]
    fn test_build_applies_defaults() {
        let (port, handle) = spawn_echo(0);
        let client = ClientBuilder::new()
            .with_host("127.0.0.1")
            .with_port(port)
            .build()
            .unwrap();
        assert_eq!(client.probe_count(), DEFAULT_PROBE_COUNT);
        assert_eq!(client.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(client.target().port(), port);
        handle.join().unwrap();
    }

    #[test]
    fn test_run_against_clean_echo() {
        let (port, handle) = spawn_echo(3);
        let mut client = local_client(port, 3, Duration::from_millis(1000));

        let report = client.run();
        handle.join().unwrap();

        assert_eq!(report.records.len(), 3);
        assert!(report.records.iter().all(|record| record.outcome.is_reply()));
        assert_eq!(report.statistics.sent, 3);
        assert_eq!(report.statistics.received, 3);
        assert_eq!(report.statistics.lost, 0);
        assert_eq!(report.statistics.loss_percent, 0);
        assert!(report.statistics.rtt.is_some());
    }

    #[test]
    fn test_sequence_ids_advance_by_one() {
        let (port, handle) = spawn_echo(3);
        let mut client = local_client(port, 3, Duration::from_millis(1000));

        let report = client.run();
        handle.join().unwrap();

        let first = report.records[0].sequence.as_i64();
        assert!(first > 0);
        for (index, record) in report.records.iter().enumerate() {
            let offset = i64::try_from(index).unwrap();
            assert_eq!(record.sequence.as_i64(), first + offset);
        }
    }

    #[test]
    fn test_silent_server_times_every_probe_out() {
        // Bound but never replying
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();

        let mut client = local_client(port, 2, Duration::from_millis(100));
        let report = client.run();

        assert_eq!(report.records.len(), 2);
        assert!(report
            .records
            .iter()
            .all(|record| record.outcome == ProbeOutcome::TimedOut));
        assert_eq!(report.statistics.sent, 2);
        assert_eq!(report.statistics.received, 0);
        assert_eq!(report.statistics.lost, 2);
        assert_eq!(report.statistics.loss_percent, 100);
        assert!(report.statistics.rtt.is_none());
    }

    #[test]
    fn test_garbled_echo_is_a_payload_mismatch() {
        let (port, handle) = spawn_garbler(2);
        let mut client = local_client(port, 2, Duration::from_millis(1000));

        let report = client.run();
        handle.join().unwrap();

        assert!(report
            .records
            .iter()
            .all(|record| record.outcome == ProbeOutcome::PayloadMismatch));
        assert_eq!(report.statistics.received, 0);
        assert_eq!(report.statistics.lost, 2);
    }

    #[test]
    fn test_report_renders_the_classic_transcript() {
        let (port, handle) = spawn_echo(2);
        let mut client = local_client(port, 2, Duration::from_millis(1000));

        let report = client.run();
        handle.join().unwrap();

        let rendered = report.to_string();
        assert!(rendered.starts_with("Pinging 127.0.0.1:"));
        assert!(rendered.contains("Reply from 127.0.0.1: bytes="));
        assert!(rendered.contains("Ping statistics for 127.0.0.1:"));
        assert!(rendered.contains("Packets: Sent = 2, Received = 2, Lost = 0 (0% loss)"));
        assert!(rendered.contains("Approximate round trip times in milli-seconds:"));
    }

    #[test]
    fn test_all_lost_report_says_rtt_is_undefined() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = silent.local_addr().unwrap().port();

        let mut client = local_client(port, 1, Duration::from_millis(100));
        let report = client.run();

        let rendered = report.to_string();
        assert!(rendered.contains("Request timed out."));
        assert!(rendered.contains("(100% loss)"));
        assert!(rendered.contains("All packets were lost; round trip times are undefined."));
        assert!(!rendered.contains("Approximate round trip times"));
    }
}
