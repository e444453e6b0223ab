//! Common test infrastructure shared across integration tests.
//!
//! Servers in these tests bind ephemeral ports (port 0) and publish the
//! resolved port through `PingServer::bound_port`, so tests never fight over
//! fixed port numbers. `free_port` exists only for the rebind tests, which
//! need a concrete port to ask for before anything is listening on it.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

/// How long convergence helpers wait before giving up.
#[allow(dead_code)] // Some integration crates only use subsets of these helpers.
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls `predicate` every few milliseconds until it holds or
/// [`CONVERGE_TIMEOUT`] elapses. Returns whether the predicate ever held.
#[allow(dead_code)]
pub fn wait_until(predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + CONVERGE_TIMEOUT;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

/// Reserves a currently-free UDP port by binding an ephemeral socket and
/// dropping it. The port can be taken again between the drop and the caller's
/// own bind; acceptable odds for tests.
#[allow(dead_code)]
pub fn free_port() -> u16 {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("ephemeral bind failed");
    socket
        .local_addr()
        .expect("bound socket must have an address")
        .port()
}
