//! End-to-end fault injection: what the operator dials in on the server is
//! what the client experiences, and the per-source counters agree with both.

mod common;

use pingfort::{
    ClientBuilder, CollectingObserver, ConfigSnapshot, FaultDecision, FaultInjector, PingError,
    ProbeOutcome, ServerBuilder, SharedRuntimeConfig, PROBE_TAG,
};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

fn fault_server(
    snapshot: ConfigSnapshot,
    observer: Arc<CollectingObserver>,
    seed: Option<u64>,
) -> Result<pingfort::PingServer, PingError> {
    let mut builder = ServerBuilder::new()
        .with_config(SharedRuntimeConfig::new(snapshot))
        .with_observer(observer)
        .with_poll_interval(Duration::from_millis(20));
    if let Some(seed) = seed {
        builder = builder.with_fault_seed(seed);
    }
    builder.build()
}

fn loopback_client(
    port: u16,
    probes: usize,
    timeout: Duration,
) -> Result<pingfort::PingClient, PingError> {
    ClientBuilder::new()
        .with_host("127.0.0.1")
        .with_port(port)
        .with_probe_count(probes)
        .with_timeout(timeout)
        .build()
}

#[test]
#[serial]
fn test_full_loss_starves_the_client() -> Result<(), PingError> {
    let observer = Arc::new(CollectingObserver::new());
    let mut server = fault_server(ConfigSnapshot::new(0).with_loss(100), observer.clone(), None)?;
    server.start()?;
    let port = server.bound_port().expect("started server must expose its port");

    let mut client = loopback_client(port, 3, Duration::from_millis(150))?;
    let report = client.run();

    assert_eq!(report.statistics.sent, 3);
    assert_eq!(report.statistics.received, 0);
    assert_eq!(report.statistics.lost, 3);
    assert_eq!(report.statistics.loss_percent, 100);
    assert!(report.statistics.rtt.is_none());
    assert!(report
        .records
        .iter()
        .all(|record| record.outcome == ProbeOutcome::TimedOut));

    // The transcript shows the classic timeout lines and the undefined-rtt note.
    let transcript = report.to_string();
    assert!(transcript.contains("Request timed out."));
    assert!(transcript.contains("(100% loss)"));
    assert!(transcript.contains("round trip times are undefined"));

    // Server side: three drops against the one source, nothing dispatched.
    assert!(common::wait_until(|| {
        server
            .stats_snapshot()
            .first()
            .map(|record| record.dropped)
            == Some(3)
    }));
    assert!(observer.has_log_containing("Simulated loss"));
    assert!(
        observer.has_log_containing(PROBE_TAG),
        "loss events must render the dropped probe text"
    );
    assert!(
        observer.messages().is_empty(),
        "dropped datagrams must never reach the workers"
    );

    server.stop();
    Ok(())
}

#[test]
#[serial]
fn test_delay_beyond_the_timeout_reads_as_loss() -> Result<(), PingError> {
    let observer = Arc::new(CollectingObserver::new());
    let mut server = fault_server(
        ConfigSnapshot::new(0).with_fixed_delay(Duration::from_millis(400)),
        observer.clone(),
        None,
    )?;
    server.start()?;
    let port = server.bound_port().expect("started server must expose its port");

    let mut client = loopback_client(port, 2, Duration::from_millis(50))?;
    let report = client.run();

    assert_eq!(report.statistics.received, 0);
    assert_eq!(report.statistics.lost, 2);

    // The held echoes still go out after the pause; the client has moved on.
    assert!(common::wait_until(|| observer.messages().len() == 2));
    assert!(common::wait_until(|| {
        server
            .stats_snapshot()
            .first()
            .map(|record| record.delayed)
            == Some(2)
    }));
    assert!(observer.has_log_containing("Simulated delay"));

    server.stop();
    Ok(())
}

#[test]
#[serial]
fn test_delay_within_the_timeout_only_slows_replies() -> Result<(), PingError> {
    let observer = Arc::new(CollectingObserver::new());
    let mut server = fault_server(
        ConfigSnapshot::new(0).with_fixed_delay(Duration::from_millis(150)),
        observer.clone(),
        None,
    )?;
    server.start()?;
    let port = server.bound_port().expect("started server must expose its port");

    let mut client = loopback_client(port, 2, Duration::from_secs(2))?;
    let report = client.run();

    assert_eq!(report.statistics.received, 2);
    assert_eq!(report.statistics.lost, 0);
    for record in &report.records {
        match record.outcome {
            ProbeOutcome::Reply { rtt_millis, .. } => assert!(
                rtt_millis >= 150,
                "the pause must show up in the round trip"
            ),
            ref other => panic!("expected a reply, got {:?}", other),
        }
    }
    let rtt = report.statistics.rtt.expect("replies imply an rtt summary");
    assert!(rtt.min_millis >= 150);

    assert!(common::wait_until(|| {
        server
            .stats_snapshot()
            .first()
            .map(|record| record.delayed)
            == Some(2)
    }));

    server.stop();
    Ok(())
}

#[test]
#[serial]
fn test_partial_loss_matches_the_seeded_injector() -> Result<(), PingError> {
    const SEED: u64 = 42;
    const PROBES: usize = 10;
    let snapshot = ConfigSnapshot::new(0).with_loss(40);

    // Mirror the decisions the server will draw for ten packets. Loss is the
    // only enabled gate, so each packet costs exactly one draw.
    let mut mirror = FaultInjector::with_seed(SEED);
    let expected_drops = (0..PROBES)
        .filter(|_| mirror.assess(&snapshot) == FaultDecision::Drop)
        .count() as u64;

    let observer = Arc::new(CollectingObserver::new());
    let mut server = fault_server(snapshot, observer.clone(), Some(SEED))?;
    server.start()?;
    let port = server.bound_port().expect("started server must expose its port");

    let mut client = loopback_client(port, PROBES, Duration::from_millis(150))?;
    let report = client.run();

    assert_eq!(report.statistics.sent, PROBES as u64);
    assert_eq!(report.statistics.lost, expected_drops);
    assert_eq!(report.statistics.received, PROBES as u64 - expected_drops);

    assert!(common::wait_until(|| {
        server
            .stats_snapshot()
            .first()
            .map(|record| record.dropped)
            == Some(expected_drops)
    }));

    server.stop();
    Ok(())
}
