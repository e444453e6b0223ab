//! Server lifecycle: builder, receive loop, and the worker-side packet path.
//!
//! [`PingServer`] owns one named receive thread and a [`DispatchPool`] of
//! workers. The receive thread re-reads the runtime config every iteration,
//! reconciles the listen socket against it, applies fault injection, and
//! hands surviving datagrams to the pool. Workers decode, notify observers,
//! and echo. Everything recoverable is recovered: the only fatal error in the
//! whole lifecycle is the initial bind.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::{RuntimeConfigProvider, SharedRuntimeConfig};
use crate::error::PingError;
use crate::observer::{CounterRecord, HeaderSummary, ServerObserver, TracingObserver};
use crate::server::counters::StatsTable;
use crate::server::dispatch::{DispatchPool, PacketHandler, PacketJob};
use crate::server::fault::{FaultDecision, FaultInjector};
use crate::server::socket::SocketManager;
use crate::wire::{Probe, PROBE_BUFFER_SIZE};

/// Default number of dispatch workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;
/// Default grace before a superseded listen socket is closed.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_millis(1000);
/// Default receive-timeout tick.
///
/// Bounds how long the receive thread can sit blind to the running flag and
/// to config changes, and therefore how long `stop` can block.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The [`ServerBuilder`] assembles a [`PingServer`].
///
/// All knobs have defaults; a plain `ServerBuilder::new().build()` yields a
/// server that listens on [`DEFAULT_LISTEN_PORT`], echoes everything, and
/// injects no faults until its [`SharedRuntimeConfig`] says otherwise.
///
/// [`DEFAULT_LISTEN_PORT`]: crate::config::DEFAULT_LISTEN_PORT
#[must_use = "ServerBuilder must be consumed by calling build"]
pub struct ServerBuilder {
    config: Arc<dyn RuntimeConfigProvider>,
    observer: Arc<dyn ServerObserver>,
    workers: usize,
    close_grace: Duration,
    poll_interval: Duration,
    fault_seed: Option<u64>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("workers", &self.workers)
            .field("close_grace", &self.close_grace)
            .field("poll_interval", &self.poll_interval)
            .field("fault_seed", &self.fault_seed)
            .finish_non_exhaustive()
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Construct a new builder with all values set to their defaults.
    ///
    /// The default config provider is a fresh [`SharedRuntimeConfig`]; pass a
    /// clone of your own via [`with_config`](Self::with_config) to retune the
    /// server at runtime. The default observer forwards to `tracing`.
    pub fn new() -> Self {
        Self {
            config: Arc::new(SharedRuntimeConfig::default()),
            observer: Arc::new(TracingObserver::new()),
            workers: DEFAULT_WORKER_COUNT,
            close_grace: DEFAULT_CLOSE_GRACE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            fault_seed: None,
        }
    }

    /// Sets the runtime config provider.
    ///
    /// The receive loop snapshots the provider once per iteration, so changes
    /// made through a retained handle apply to the very next packet. A plain
    /// [`ConfigSnapshot`](crate::config::ConfigSnapshot) works as a fixed
    /// configuration.
    pub fn with_config(mut self, provider: impl RuntimeConfigProvider + 'static) -> Self {
        self.config = Arc::new(provider);
        self
    }

    /// Sets the observer notified of traffic, log events, and counter updates.
    pub fn with_observer(mut self, observer: impl ServerObserver + 'static) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Changes the dispatch pool size. Default is 4.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Changes how long a superseded listen socket lingers before closing.
    /// Default is 1000 ms.
    pub fn with_close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Changes the receive-timeout tick. Default is 100 ms.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Seeds the fault injector for reproducible loss and delay draws.
    pub fn with_fault_seed(mut self, seed: u64) -> Self {
        self.fault_seed = Some(seed);
        self
    }

    /// Consumes the builder. Nothing binds until [`PingServer::start`].
    ///
    /// # Errors
    ///
    /// Returns [`PingError::InvalidArgument`] if the worker count is zero or
    /// the poll interval is zero (a zero read timeout would block the receive
    /// thread forever).
    pub fn build(self) -> Result<PingServer, PingError> {
        if self.workers == 0 {
            return Err(PingError::InvalidArgument {
                context: "worker count must be at least 1".to_owned(),
            });
        }
        if self.poll_interval.is_zero() {
            return Err(PingError::InvalidArgument {
                context: "poll interval must be non-zero".to_owned(),
            });
        }

        Ok(PingServer {
            config: self.config,
            observer: self.observer,
            stats: Arc::new(StatsTable::new()),
            workers: self.workers,
            close_grace: self.close_grace,
            poll_interval: self.poll_interval,
            fault_seed: self.fault_seed,
            running: Arc::new(AtomicBool::new(false)),
            live_port: Arc::new(AtomicU16::new(0)),
            message_counter: Arc::new(AtomicU64::new(1)),
            receive_handle: None,
        })
    }
}

/// A fault-injecting UDP echo server.
///
/// Construct one through [`ServerBuilder`], then drive it with
/// [`start`](Self::start) and [`stop`](Self::stop). Both are idempotent.
/// Dropping a running server stops it.
pub struct PingServer {
    config: Arc<dyn RuntimeConfigProvider>,
    observer: Arc<dyn ServerObserver>,
    stats: Arc<StatsTable>,
    workers: usize,
    close_grace: Duration,
    poll_interval: Duration,
    fault_seed: Option<u64>,
    running: Arc<AtomicBool>,
    // 0 means not bound; a resolved bind is never port 0
    live_port: Arc<AtomicU16>,
    message_counter: Arc<AtomicU64>,
    receive_handle: Option<JoinHandle<()>>,
}

impl PingServer {
    /// Binds the configured port and spawns the receive thread and workers.
    ///
    /// Calling `start` on a running server is a no-op. The bind happens
    /// synchronously, so a successful return means the port is live and
    /// datagrams are already being queued by the OS.
    ///
    /// # Errors
    ///
    /// - [`PingError::BindError`] when the configured port cannot be bound.
    ///   Startup is the only place a bind failure is fatal; later rebinds
    ///   report and retry instead.
    /// - [`PingError::InternalError`] when a thread cannot be spawned.
    pub fn start(&mut self) -> Result<(), PingError> {
        if self.receive_handle.is_some() {
            tracing::debug!("server already running; start is a no-op");
            return Ok(());
        }

        let snapshot = self.config.snapshot();
        let mut sockets = SocketManager::new(self.close_grace, self.poll_interval);
        sockets.bind(snapshot.listen_port)?;
        let bound = sockets.bound_port().unwrap_or(snapshot.listen_port);

        let pool = DispatchPool::new(self.workers, self.packet_handler())?;
        let injector = match self.fault_seed {
            Some(seed) => FaultInjector::with_seed(seed),
            None => FaultInjector::new(),
        };

        self.running.store(true, Ordering::Release);
        let engine = EngineContext {
            running: self.running.clone(),
            config: self.config.clone(),
            observer: self.observer.clone(),
            stats: self.stats.clone(),
            live_port: self.live_port.clone(),
            poll_interval: self.poll_interval,
        };
        // Must land before the spawn: the receive thread writes live_port on
        // rebinds and this store must not overwrite one of those
        self.live_port.store(bound, Ordering::Release);
        let spawned = std::thread::Builder::new()
            .name("pingfort-recv".to_owned())
            .spawn(move || receive_loop(&engine, sockets, pool, injector));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(error) => {
                self.running.store(false, Ordering::Release);
                self.live_port.store(0, Ordering::Release);
                return Err(PingError::InternalError {
                    context: format!("failed to spawn receive thread: {}", error),
                });
            },
        };
        self.receive_handle = Some(handle);

        tracing::info!(port = bound, workers = self.workers, "server started");
        self.observer
            .on_log_event(&format!("Server listening on UDP port {}", bound));
        Ok(())
    }

    /// Stops the receive thread and the worker pool, releasing the socket.
    ///
    /// Calling `stop` on a stopped server is a no-op. Bounded: the receive
    /// thread notices within one poll interval plus any in-progress injected
    /// delay, workers within one queue-wait tick; queued-but-unhandled
    /// packets are discarded.
    pub fn stop(&mut self) {
        let Some(handle) = self.receive_handle.take() else {
            tracing::debug!("server not running; stop is a no-op");
            return;
        };

        self.running.store(false, Ordering::Release);
        if handle.join().is_err() {
            tracing::error!("receive thread panicked during shutdown");
        }
        self.live_port.store(0, Ordering::Release);

        tracing::info!("server stopped");
        self.observer.on_log_event("Server stopped");
    }

    /// True while the receive thread is attached.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.receive_handle.is_some()
    }

    /// The resolved listen port, once running.
    ///
    /// Tracks rebinds; asking for port 0 resolves to the real ephemeral port.
    #[must_use]
    pub fn bound_port(&self) -> Option<u16> {
        match self.live_port.load(Ordering::Acquire) {
            0 => None,
            port => Some(port),
        }
    }

    /// Copies every source's fault counters, in ascending address order.
    #[must_use]
    pub fn stats_snapshot(&self) -> Vec<CounterRecord> {
        self.stats.snapshot()
    }

    fn packet_handler(&self) -> PacketHandler {
        let observer = self.observer.clone();
        let stats = self.stats.clone();
        let message_counter = self.message_counter.clone();
        Arc::new(move |job: PacketJob| {
            handle_packet(&job, observer.as_ref(), &stats, &message_counter);
        })
    }
}

impl Drop for PingServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for PingServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PingServer")
            .field("running", &self.is_running())
            .field("bound_port", &self.bound_port())
            .field("workers", &self.workers)
            .field("close_grace", &self.close_grace)
            .field("poll_interval", &self.poll_interval)
            .field("sources_seen", &self.stats.len())
            .finish_non_exhaustive()
    }
}

/// Everything the receive thread shares with the owning server.
struct EngineContext {
    running: Arc<AtomicBool>,
    config: Arc<dyn RuntimeConfigProvider>,
    observer: Arc<dyn ServerObserver>,
    stats: Arc<StatsTable>,
    live_port: Arc<AtomicU16>,
    poll_interval: Duration,
}

fn receive_loop(
    engine: &EngineContext,
    mut sockets: SocketManager,
    mut pool: DispatchPool,
    mut injector: FaultInjector,
) {
    let mut buffer = [0u8; PROBE_BUFFER_SIZE];

    while engine.running.load(Ordering::Acquire) {
        sockets.reap_expired(Instant::now());

        // Fresh snapshot every iteration so operator changes apply to the
        // very next packet
        let snapshot = engine.config.snapshot();
        match sockets.reconcile(snapshot.listen_port) {
            Ok(true) => {
                let port = sockets.bound_port().unwrap_or(snapshot.listen_port);
                engine.live_port.store(port, Ordering::Release);
                tracing::info!(port, "listen port changed");
                engine
                    .observer
                    .on_log_event(&format!("Server listening on UDP port {}", port));
            },
            Ok(false) => {},
            Err(error) => {
                tracing::warn!(%error, "rebind failed; keeping the previous port");
                engine.observer.on_log_event(&error.to_string());
            },
        }

        let Some(socket) = sockets.current() else {
            // Not reachable while running: the startup bind precedes the
            // spawn and a failed rebind keeps the old socket
            std::thread::sleep(engine.poll_interval);
            continue;
        };

        match socket.recv_from(&mut buffer) {
            Ok((length, source)) => {
                // Received bytes only; the rest of the buffer may hold stale
                // data from a previous, longer packet
                let payload = buffer.get(..length).unwrap_or_default();
                match injector.assess(&snapshot) {
                    FaultDecision::Drop => {
                        drop_packet(engine, source, payload);
                        continue;
                    },
                    FaultDecision::Delay(pause) => delay_packet(engine, source, payload, pause),
                    FaultDecision::Pass => {},
                }

                let job = PacketJob {
                    bytes: payload.to_vec(),
                    source,
                    socket: socket.clone(),
                    local_port: sockets.bound_port().unwrap_or(snapshot.listen_port),
                };
                if !pool.submit(job) {
                    tracing::warn!(%source, "dispatch pool is shut down; packet discarded");
                }
            },
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                // Poll tick; loop back to re-check the running flag and config
            },
            Err(error) => {
                tracing::warn!(%error, "receive failed");
            },
        }
    }

    tracing::debug!("receive loop exiting");
    pool.shutdown();
    let cancelled = sockets.cancel_pending();
    if cancelled > 0 {
        tracing::debug!(cancelled, "cancelled pending socket closes");
    }
    sockets.release();
}

fn drop_packet(engine: &EngineContext, source: SocketAddr, payload: &[u8]) {
    let counters = engine.stats.entry(source.ip());
    let dropped = counters.record_dropped();
    tracing::info!(%source, dropped, "loss injection dropped a datagram");
    engine.observer.on_log_event(&format!(
        "Simulated loss: dropped message from {}, content: {}",
        source,
        String::from_utf8_lossy(payload)
    ));
    engine
        .observer
        .on_stats_updated(source.ip(), counters.delayed(), dropped);
}

fn delay_packet(engine: &EngineContext, source: SocketAddr, payload: &[u8], pause: Duration) {
    let pause_millis = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX);
    tracing::info!(%source, pause_millis, "delay injection holding a datagram");

    // The sleep runs on the receive thread, so a delayed packet stalls
    // everything queued behind it for the duration
    std::thread::sleep(pause);

    let counters = engine.stats.entry(source.ip());
    let delayed = counters.record_delayed();
    engine.observer.on_log_event(&format!(
        "Simulated delay: held message from {} for {} ms, content: {}",
        source,
        pause_millis,
        String::from_utf8_lossy(payload)
    ));
    engine
        .observer
        .on_stats_updated(source.ip(), delayed, counters.dropped());
}

fn handle_packet(
    job: &PacketJob,
    observer: &dyn ServerObserver,
    stats: &StatsTable,
    message_counter: &AtomicU64,
) {
    let message_number = message_counter.fetch_add(1, Ordering::Relaxed);
    let probe = Probe::decode(&job.bytes).ok();
    let header = HeaderSummary::new(
        message_number,
        job.source,
        job.local_port,
        job.bytes.len(),
        probe,
    );

    // First contact creates the entry, so the operator sees a source even
    // before any fault touches it
    let _ = stats.entry(job.source.ip());

    let payload = String::from_utf8_lossy(&job.bytes);
    observer.on_message_received(job.source, &header, &payload);
    tracing::debug!(
        message_number,
        source = %job.source,
        length = job.bytes.len(),
        "echoing datagram"
    );

    if let Err(error) = job.socket.send_to(&job.bytes, job.source) {
        let send_error = PingError::SendError {
            destination: job.source,
            context: error.to_string(),
        };
        tracing::warn!(%send_error, "echo failed");
        observer.on_log_event(&send_error.to_string());
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
    use crate::config::ConfigSnapshot;
    use crate::observer::CollectingObserver;
    use std::net::UdpSocket;

    fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }

    /// An ephemeral-port server with a fast poll tick so tests shut down
    /// quickly.
    fn ephemeral_builder() -> ServerBuilder {
        ServerBuilder::new()
            .with_config(ConfigSnapshot::new(0))
            .with_poll_interval(Duration::from_millis(20))
    }

    fn client_socket() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        socket
    }

    #[test]
    fn test_builder_rejects_zero_workers() {
        let result = ServerBuilder::new().with_workers(0).build();
        assert!(matches!(
            result,
            Err(PingError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_builder_rejects_zero_poll_interval() {
        let result = ServerBuilder::new()
            .with_poll_interval(Duration::ZERO)
            .build();
        assert!(matches!(
            result,
            Err(PingError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_built_server_is_idle_until_started() {
        let server = ServerBuilder::new().build().unwrap();
        assert!(!server.is_running());
        assert_eq!(server.bound_port(), None);
        assert!(server.stats_snapshot().is_empty());
    }

    #[test]
    fn test_server_echoes_datagrams() {
        let observer = Arc::new(CollectingObserver::new());
        let mut server = ephemeral_builder()
            .with_observer(observer.clone())
            .build()
            .unwrap();
        server.start().unwrap();
        let port = server.bound_port().unwrap();

        let client = client_socket();
        client.send_to(b"hello operator", ("127.0.0.1", port)).unwrap();

        let mut buffer = [0u8; 64];
        let (length, _) = client.recv_from(&mut buffer).unwrap();
        assert_eq!(&buffer[..length], b"hello operator");

        // The observer hears about it on a worker thread, slightly later
        assert!(
            wait_until(Duration::from_secs(2), || !observer.messages().is_empty()),
            "observer never saw the datagram"
        );
        let messages = observer.messages();
        assert_eq!(messages[0].header.message_number, 1);
        assert_eq!(messages[0].header.length, 14);
        assert_eq!(messages[0].payload, "hello operator");

        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn test_echo_truncates_at_buffer_size() {
        let mut server = ephemeral_builder().build().unwrap();
        server.start().unwrap();
        let port = server.bound_port().unwrap();

        let oversized = vec![0x42u8; PROBE_BUFFER_SIZE + 500];
        let client = client_socket();
        client.send_to(&oversized, ("127.0.0.1", port)).unwrap();

        let mut buffer = [0u8; 4096];
        let (length, _) = client.recv_from(&mut buffer).unwrap();
        assert_eq!(length, PROBE_BUFFER_SIZE);
        assert_eq!(&buffer[..length], &oversized[..PROBE_BUFFER_SIZE]);

        server.stop();
    }

    #[test]
    fn test_start_twice_is_a_no_op() {
        let mut server = ephemeral_builder().build().unwrap();
        server.start().unwrap();
        let port = server.bound_port();

        server.start().unwrap();
        assert_eq!(server.bound_port(), port);

        server.stop();
    }

    #[test]
    fn test_stop_twice_is_a_no_op() {
        let mut server = ephemeral_builder().build().unwrap();
        server.start().unwrap();
        server.stop();
        server.stop();
        assert!(!server.is_running());
        assert_eq!(server.bound_port(), None);
    }

    #[test]
    fn test_startup_bind_failure_is_fatal() {
        let blocker = UdpSocket::bind("0.0.0.0:0").unwrap();
        let busy_port = blocker.local_addr().unwrap().port();

        let mut server = ServerBuilder::new()
            .with_config(ConfigSnapshot::new(busy_port))
            .build()
            .unwrap();
        let result = server.start();
        assert!(
            matches!(result, Err(PingError::BindError { port, .. }) if port == busy_port),
            "expected a bind error for port {busy_port}, got {result:?}"
        );
        assert!(!server.is_running());
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let observer = Arc::new(CollectingObserver::new());
        let mut server = ephemeral_builder()
            .with_config(ConfigSnapshot::new(0).with_loss(100))
            .with_observer(observer.clone())
            .with_fault_seed(7)
            .build()
            .unwrap();
        server.start().unwrap();
        let port = server.bound_port().unwrap();

        let client = client_socket();
        client.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
        for _ in 0..3 {
            client.send_to(b"doomed", ("127.0.0.1", port)).unwrap();
        }

        assert!(
            wait_until(Duration::from_secs(2), || {
                server
                    .stats_snapshot()
                    .first()
                    .is_some_and(|record| record.dropped == 3)
            }),
            "dropped counter never reached 3: {:?}",
            server.stats_snapshot()
        );

        let mut buffer = [0u8; 64];
        assert!(client.recv_from(&mut buffer).is_err(), "no echo expected");
        assert!(observer.has_log_containing("Simulated loss"));
        assert!(observer.messages().is_empty());

        server.stop();
    }

    #[test]
    fn test_loss_log_carries_the_packet_content() {
        let observer = Arc::new(CollectingObserver::new());
        let mut server = ephemeral_builder()
            .with_config(ConfigSnapshot::new(0).with_loss(100))
            .with_observer(observer.clone())
            .with_fault_seed(7)
            .build()
            .unwrap();
        server.start().unwrap();
        let port = server.bound_port().unwrap();

        let client = client_socket();
        client
            .send_to(b"a noticeably longer datagram body", ("127.0.0.1", port))
            .unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || {
                observer.has_log_containing("a noticeably longer datagram body")
            }),
            "loss event never rendered the first payload: {:?}",
            observer.log_events()
        );

        client.send_to(b"stub", ("127.0.0.1", port)).unwrap();
        assert!(
            wait_until(Duration::from_secs(2), || {
                observer.has_log_containing("stub")
            }),
            "loss event never rendered the second payload: {:?}",
            observer.log_events()
        );

        // The shorter packet's event renders only its own bytes, not the
        // tail of the longer one still sitting in the receive buffer
        let events = observer.log_events();
        let stub_event = events.iter().find(|event| event.contains("stub")).unwrap();
        assert!(
            !stub_event.contains("longer datagram"),
            "stale buffer bytes leaked into the event: {stub_event}"
        );

        server.stop();
    }

    #[test]
    fn test_delay_log_carries_the_packet_content() {
        let observer = Arc::new(CollectingObserver::new());
        let mut server = ephemeral_builder()
            .with_config(ConfigSnapshot::new(0).with_fixed_delay(Duration::from_millis(50)))
            .with_observer(observer.clone())
            .build()
            .unwrap();
        server.start().unwrap();
        let port = server.bound_port().unwrap();

        let client = client_socket();
        client
            .send_to(b"held for inspection", ("127.0.0.1", port))
            .unwrap();

        assert!(
            wait_until(Duration::from_secs(2), || {
                observer.has_log_containing("held for inspection")
            }),
            "delay event never rendered the payload: {:?}",
            observer.log_events()
        );
        assert!(observer.has_log_containing("Simulated delay"));

        server.stop();
    }

    #[test]
    fn test_stop_waits_out_an_inline_delay() {
        let mut server = ephemeral_builder()
            .with_config(ConfigSnapshot::new(0).with_fixed_delay(Duration::from_millis(600)))
            .build()
            .unwrap();
        server.start().unwrap();
        let port = server.bound_port().unwrap();

        let client = client_socket();
        client.send_to(b"straggler", ("127.0.0.1", port)).unwrap();

        // Give the receive thread time to pick the packet up and enter the
        // injected sleep before asking it to stop
        std::thread::sleep(Duration::from_millis(120));
        let before = Instant::now();
        server.stop();
        let elapsed = before.elapsed();

        assert!(
            elapsed >= Duration::from_millis(150),
            "stop returned in {elapsed:?}, before the in-progress delay elapsed"
        );
        // The hold completes before the counter moves, so a finished stop
        // implies the delayed count is already visible
        assert_eq!(
            server
                .stats_snapshot()
                .first()
                .map(|record| record.delayed),
            Some(1)
        );
    }

    #[test]
    fn test_dropping_a_running_server_stops_it() {
        let mut server = ephemeral_builder().build().unwrap();
        server.start().unwrap();
        let port = server.bound_port().unwrap();
        drop(server);

        // The port is released once drop returns
        let reuse = UdpSocket::bind(("0.0.0.0", port));
        assert!(reuse.is_ok(), "port {port} still held after drop");
    }
}
