mod common;

use pingfort::{
    ClientBuilder, CollectingObserver, ConfigSnapshot, PingError, ServerBuilder,
    SharedRuntimeConfig, PROBE_BUFFER_SIZE,
};
use serial_test::serial;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

fn echo_server(
    config: SharedRuntimeConfig,
    observer: Arc<CollectingObserver>,
) -> Result<pingfort::PingServer, PingError> {
    ServerBuilder::new()
        .with_config(config)
        .with_observer(observer)
        .with_poll_interval(Duration::from_millis(20))
        .build()
}

fn loopback_client(port: u16, probes: usize) -> Result<pingfort::PingClient, PingError> {
    ClientBuilder::new()
        .with_host("127.0.0.1")
        .with_port(port)
        .with_probe_count(probes)
        .with_timeout(Duration::from_secs(2))
        .build()
}

#[test]
#[serial]
fn test_clean_run_reports_every_reply() -> Result<(), PingError> {
    let observer = Arc::new(CollectingObserver::new());
    let mut server = echo_server(
        SharedRuntimeConfig::new(ConfigSnapshot::new(0)),
        observer.clone(),
    )?;
    server.start()?;
    let port = server.bound_port().expect("started server must expose its port");

    let mut client = loopback_client(port, 5)?;
    let report = client.run();

    assert_eq!(report.statistics.sent, 5);
    assert_eq!(report.statistics.received, 5);
    assert_eq!(report.statistics.lost, 0);
    assert_eq!(report.statistics.loss_percent, 0);
    assert!(report.statistics.rtt.is_some());
    assert!(report.records.iter().all(|record| record.outcome.is_reply()));

    // The server saw the same five probes, numbered from 1 in arrival order.
    assert!(common::wait_until(|| observer.messages().len() == 5));
    for (index, record) in observer.messages().iter().enumerate() {
        assert_eq!(record.header.message_number, index as u64 + 1);
        assert!(
            record.header.probe.is_some(),
            "client payloads should parse as probes"
        );
        assert_eq!(record.header.local_port, port);
    }

    server.stop();
    Ok(())
}

#[test]
#[serial]
fn test_concurrent_clients_share_one_server() -> Result<(), PingError> {
    let observer = Arc::new(CollectingObserver::new());
    let mut server = echo_server(
        SharedRuntimeConfig::new(ConfigSnapshot::new(0)),
        observer.clone(),
    )?;
    server.start()?;
    let port = server.bound_port().expect("started server must expose its port");

    let mut handles = Vec::new();
    for _ in 0..2 {
        handles.push(std::thread::spawn(move || {
            let mut client = loopback_client(port, 4)?;
            Ok::<_, PingError>(client.run())
        }));
    }
    for handle in handles {
        let report = handle.join().expect("client thread panicked")?;
        assert_eq!(report.statistics.received, 4);
        assert_eq!(report.statistics.lost, 0);
    }

    // Eight datagrams total, numbered 1 through 8 with no gaps or repeats.
    assert!(common::wait_until(|| observer.messages().len() == 8));
    let mut numbers: Vec<u64> = observer
        .messages()
        .iter()
        .map(|record| record.header.message_number)
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=8).collect::<Vec<u64>>());

    server.stop();
    Ok(())
}

#[test]
#[serial]
fn test_listen_port_moves_without_restart() -> Result<(), PingError> {
    let config = SharedRuntimeConfig::new(ConfigSnapshot::new(0));
    let observer = Arc::new(CollectingObserver::new());
    let mut server = echo_server(config.clone(), observer.clone())?;
    server.start()?;
    let first_port = server.bound_port().expect("started server must expose its port");

    let mut client = loopback_client(first_port, 3)?;
    assert_eq!(client.run().statistics.lost, 0);

    let second_port = common::free_port();
    config.set_listen_port(second_port);
    assert!(
        common::wait_until(|| server.bound_port() == Some(second_port)),
        "server should move to the requested port"
    );

    let mut client = loopback_client(second_port, 3)?;
    assert_eq!(client.run().statistics.lost, 0);

    assert!(observer.has_log_containing(&format!("Server listening on UDP port {second_port}")));
    // Same source across both ports, and its stats entry survived the move.
    assert_eq!(server.stats_snapshot().len(), 1);

    // The superseded socket is released once its close grace expires; until
    // then the old port stays occupied.
    assert!(
        common::wait_until(|| UdpSocket::bind(("127.0.0.1", first_port)).is_ok()),
        "old port should be free after the close grace"
    );

    server.stop();
    Ok(())
}

#[test]
#[serial]
fn test_oversized_datagram_echoes_truncated() -> Result<(), PingError> {
    let observer = Arc::new(CollectingObserver::new());
    let mut server = echo_server(
        SharedRuntimeConfig::new(ConfigSnapshot::new(0)),
        observer.clone(),
    )?;
    server.start()?;
    let port = server.bound_port().expect("started server must expose its port");

    let sender = UdpSocket::bind("127.0.0.1:0").expect("sender bind failed");
    sender
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("sender timeout");
    let oversized = vec![b'x'; 1500];
    sender
        .send_to(&oversized, ("127.0.0.1", port))
        .expect("send failed");

    // The receive buffer cuts the datagram at PROBE_BUFFER_SIZE and the echo
    // carries only what survived the cut.
    let mut buffer = [0u8; 4096];
    let (echoed, _) = sender.recv_from(&mut buffer).expect("no echo came back");
    assert_eq!(echoed, PROBE_BUFFER_SIZE);
    assert_eq!(buffer[..echoed], oversized[..PROBE_BUFFER_SIZE]);

    assert!(common::wait_until(|| observer.messages().len() == 1));
    let messages = observer.messages();
    let record = &messages[0];
    assert_eq!(record.header.length, PROBE_BUFFER_SIZE);
    assert!(
        record.header.probe.is_none(),
        "an all-x payload should not parse as a probe"
    );

    server.stop();
    Ok(())
}

#[cfg(feature = "json")]
#[test]
#[serial]
fn test_report_serializes_to_json() -> Result<(), PingError> {
    let observer = Arc::new(CollectingObserver::new());
    let mut server = echo_server(
        SharedRuntimeConfig::new(ConfigSnapshot::new(0)),
        observer.clone(),
    )?;
    server.start()?;
    let port = server.bound_port().expect("started server must expose its port");

    let mut client = loopback_client(port, 2)?;
    let report = client.run();
    server.stop();

    let json = report.to_json().expect("report should serialize");
    let value: serde_json::Value = serde_json::from_str(&json).expect("to_json must emit valid JSON");
    assert_eq!(value["host"], "127.0.0.1");
    assert_eq!(value["records"].as_array().map(Vec::len), Some(2));
    assert_eq!(value["statistics"]["sent"], 2);
    assert_eq!(value["statistics"]["received"], 2);

    Ok(())
}
