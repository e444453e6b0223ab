//! Listen socket lifecycle: binding, rebinding, and deferred close.
//!
//! The receive loop compares the port it was asked to bind against the
//! configured port every iteration. When they differ,
//! [`SocketManager::reconcile`] binds the new port FIRST and only then queues
//! the superseded socket for close after a grace period, so a rebind can fail
//! without ever leaving the server deaf and in-flight echoes on the old
//! socket stay valid until its close fires.
//! Superseded sockets sit in an explicit queue that the loop reaps each
//! iteration and the shutdown path cancels wholesale.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::error::PingError;

/// A superseded socket waiting out its close grace.
#[derive(Debug)]
struct PendingClose {
    socket: Arc<UdpSocket>,
    close_at: Instant,
}

/// Owns the live listen socket plus the deferred-close queue.
#[derive(Debug)]
pub struct SocketManager {
    socket: Option<Arc<UdpSocket>>,
    // The port the operator asked for; reconcile compares against this, so an
    // ephemeral bind (port 0) does not rebind every iteration
    requested_port: Option<u16>,
    bound_port: Option<u16>,
    // Rebinds are rare; the queue is almost always empty or length 1
    pending_close: SmallVec<[PendingClose; 2]>,
    close_grace: Duration,
    poll_interval: Duration,
}

impl SocketManager {
    /// Creates a manager with nothing bound yet.
    ///
    /// `poll_interval` becomes the read timeout of every socket this manager
    /// binds; it bounds how long the receive loop can sit blind to the
    /// running flag and to config changes.
    #[must_use]
    pub fn new(close_grace: Duration, poll_interval: Duration) -> Self {
        Self {
            socket: None,
            requested_port: None,
            bound_port: None,
            pending_close: SmallVec::new(),
            close_grace,
            poll_interval,
        }
    }

    /// Binds 0.0.0.0:port and installs it as the live socket.
    ///
    /// This is the startup path; any previously live socket is replaced
    /// without grace (there are no in-flight echoes before startup).
    pub fn bind(&mut self, port: u16) -> Result<(), PingError> {
        let socket = Self::bind_port(port, self.poll_interval)?;
        self.requested_port = Some(port);
        self.bound_port = Some(Self::local_port(&socket, port));
        self.socket = Some(socket);
        Ok(())
    }

    /// Rebinds when `port` differs from the port last asked for.
    ///
    /// Returns `Ok(false)` when the request already matches, `Ok(true)` after
    /// a successful rebind. On failure the live binding is untouched and the
    /// caller decides how loudly to report it.
    pub fn reconcile(&mut self, port: u16) -> Result<bool, PingError> {
        if self.requested_port == Some(port) {
            return Ok(false);
        }

        // Bind the new port before letting go of the old one
        let fresh = Self::bind_port(port, self.poll_interval)?;
        if let Some(old) = self.socket.take() {
            self.pending_close.push(PendingClose {
                socket: old,
                close_at: Instant::now() + self.close_grace,
            });
        }
        self.requested_port = Some(port);
        self.bound_port = Some(Self::local_port(&fresh, port));
        self.socket = Some(fresh);
        Ok(true)
    }

    /// The live socket, if one is bound.
    ///
    /// The returned handle is cloned into packet jobs so echoes can keep
    /// using the socket a datagram arrived on even across a rebind.
    #[must_use]
    pub fn current(&self) -> Option<Arc<UdpSocket>> {
        self.socket.clone()
    }

    /// Port of the live socket, if one is bound.
    #[must_use]
    pub const fn bound_port(&self) -> Option<u16> {
        self.bound_port
    }

    /// Drops every queued socket whose grace expired. Returns how many closed.
    pub fn reap_expired(&mut self, now: Instant) -> usize {
        let before = self.pending_close.len();
        self.pending_close.retain(|pending| {
            if pending.close_at > now {
                return true;
            }
            let port = pending.socket.local_addr().map(|addr| addr.port()).ok();
            tracing::debug!(?port, "closed superseded socket");
            false
        });
        before - self.pending_close.len()
    }

    /// Drops the whole close queue immediately. Returns how many were queued.
    pub fn cancel_pending(&mut self) -> usize {
        let cancelled = self.pending_close.len();
        self.pending_close.clear();
        cancelled
    }

    /// Number of sockets waiting out their grace.
    #[must_use]
    pub fn pending_close_len(&self) -> usize {
        self.pending_close.len()
    }

    /// Releases the live socket and the close queue. Shutdown path.
    pub fn release(&mut self) {
        self.socket = None;
        self.requested_port = None;
        self.bound_port = None;
        self.pending_close.clear();
    }

    fn bind_port(port: u16, poll_interval: Duration) -> Result<Arc<UdpSocket>, PingError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let socket = UdpSocket::bind(addr).map_err(|error| PingError::BindError {
            port,
            context: error.to_string(),
        })?;
        socket
            .set_read_timeout(Some(poll_interval))
            .map_err(|error| PingError::SocketError {
                context: format!("set_read_timeout failed: {}", error),
            })?;
        Ok(Arc::new(socket))
    }

    /// Resolves the real port, which differs from the requested one when the
    /// operator asked for an ephemeral bind (port 0).
    fn local_port(socket: &UdpSocket, requested: u16) -> u16 {
        socket
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(requested)
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

    const GRACE: Duration = Duration::from_millis(200);
    const POLL: Duration = Duration::from_millis(20);

    fn manager() -> SocketManager {
        SocketManager::new(GRACE, POLL)
    }

    /// Discovers a currently free wildcard port by binding one and letting it
    /// go. There is a window where another process could grab it; fine for
    /// tests.
    fn free_port() -> u16 {
        let probe = UdpSocket::bind("0.0.0.0:0").unwrap();
        probe.local_addr().unwrap().port()
    }

    #[test]
    fn test_bind_ephemeral_resolves_real_port() {
        let mut sockets = manager();
        sockets.bind(0).unwrap();

        let port = sockets.bound_port().unwrap();
        assert_ne!(port, 0);
        assert!(sockets.current().is_some());
    }

    #[test]
    fn test_reconcile_matching_request_is_a_no_op() {
        let mut sockets = manager();
        sockets.bind(0).unwrap();
        let resolved = sockets.bound_port().unwrap();

        // The request was port 0, so asking for 0 again must not rebind even
        // though the resolved port differs
        assert_eq!(sockets.reconcile(0), Ok(false));
        assert_eq!(sockets.pending_close_len(), 0);
        assert_eq!(sockets.bound_port(), Some(resolved));
    }

    #[test]
    fn test_reconcile_queues_old_socket() {
        let mut sockets = manager();
        sockets.bind(0).unwrap();
        let old_port = sockets.bound_port().unwrap();

        let target = free_port();
        assert_eq!(sockets.reconcile(target), Ok(true));
        assert_eq!(sockets.bound_port(), Some(target));
        assert_ne!(sockets.bound_port(), Some(old_port));
        assert_eq!(sockets.pending_close_len(), 1);
    }

    #[test]
    fn test_reconcile_failure_keeps_previous_binding() {
        // Occupy a port so the rebind target is guaranteed busy
        let occupant = UdpSocket::bind("127.0.0.1:0").unwrap();
        let busy_port = occupant.local_addr().unwrap().port();

        let mut sockets = manager();
        sockets.bind(0).unwrap();
        let live_port = sockets.bound_port().unwrap();

        let result = sockets.reconcile(busy_port);
        assert!(
            matches!(result, Err(PingError::BindError { port, .. }) if port == busy_port),
            "expected a bind error for port {busy_port}, got {result:?}"
        );
        assert_eq!(sockets.bound_port(), Some(live_port));
        assert!(sockets.current().is_some());
        assert_eq!(sockets.pending_close_len(), 0);
    }

    #[test]
    fn test_reap_respects_grace() {
        let mut sockets = manager();
        sockets.bind(0).unwrap();
        sockets.reconcile(free_port()).unwrap();
        assert_eq!(sockets.pending_close_len(), 1);

        // Grace has not elapsed yet
        assert_eq!(sockets.reap_expired(Instant::now()), 0);
        assert_eq!(sockets.pending_close_len(), 1);

        std::thread::sleep(GRACE + Duration::from_millis(20));
        assert_eq!(sockets.reap_expired(Instant::now()), 1);
        assert_eq!(sockets.pending_close_len(), 0);
    }

    #[test]
    fn test_cancel_pending_clears_queue() {
        let mut sockets = manager();
        sockets.bind(0).unwrap();
        sockets.reconcile(free_port()).unwrap();
        sockets.reconcile(free_port()).unwrap();
        assert_eq!(sockets.pending_close_len(), 2);

        assert_eq!(sockets.cancel_pending(), 2);
        assert_eq!(sockets.pending_close_len(), 0);
    }

    #[test]
    fn test_release_drops_everything() {
        let mut sockets = manager();
        sockets.bind(0).unwrap();
        sockets.reconcile(free_port()).unwrap();

        sockets.release();
        assert!(sockets.current().is_none());
        assert_eq!(sockets.bound_port(), None);
        assert_eq!(sockets.pending_close_len(), 0);
    }

    #[test]
    fn test_rebind_to_freed_port_succeeds_after_release() {
        // The deferred close keeps the old port held for the grace period;
        // after release everything is freed and the port can be taken again
        let mut sockets = manager();
        sockets.bind(0).unwrap();
        let port = sockets.bound_port().unwrap();
        sockets.release();

        let reuse = UdpSocket::bind(SocketAddr::new(
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
        ));
        assert!(reuse.is_ok(), "released port {port} should be bindable");
    }
}
