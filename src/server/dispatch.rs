//! Fixed-size worker pool for packet handling.
//!
//! The receive loop stays thin: parse, observe, and echo all happen on pool
//! workers so one slow echo target cannot back up reception. Jobs flow
//! through a mutex-and-condvar queue; workers wait with a bounded tick so a
//! missed wakeup can delay shutdown by at most one tick. Shutting down
//! discards queued jobs, lets in-flight handlers finish their current packet,
//! and joins every worker.

use std::collections::VecDeque;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::PingError;

/// Upper bound on how long an idle worker sleeps between shutdown checks.
const QUEUE_WAIT_TICK: Duration = Duration::from_millis(50);

/// One received datagram, ready for a worker.
#[derive(Debug)]
pub struct PacketJob {
    /// Datagram bytes, already truncated at the receive buffer.
    pub bytes: Vec<u8>,
    /// Where the datagram came from.
    pub source: SocketAddr,
    /// The socket the datagram arrived on; the echo goes back out on it,
    /// even if the server has rebound to a new port since.
    pub socket: Arc<UdpSocket>,
    /// Port the datagram arrived on.
    pub local_port: u16,
}

/// The per-packet work a worker runs for each job.
pub type PacketHandler = Arc<dyn Fn(PacketJob) + Send + Sync>;

struct PoolShared {
    queue: Mutex<VecDeque<PacketJob>>,
    available: Condvar,
    shutdown: AtomicBool,
}

/// Fixed-size pool of named worker threads.
pub struct DispatchPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    /// Spawns `workers` threads that feed every job to `handler`.
    pub fn new(workers: usize, handler: PacketHandler) -> Result<Self, PingError> {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let worker_shared = shared.clone();
            let handler = handler.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("pingfort-worker-{}", index))
                .spawn(move || worker_loop(&worker_shared, &handler));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(error) => {
                    // Workers spawned before the failure must not outlive it
                    let mut partial = Self {
                        shared,
                        workers: handles,
                    };
                    partial.shutdown();
                    return Err(PingError::InternalError {
                        context: format!("failed to spawn worker thread {}: {}", index, error),
                    });
                },
            }
        }

        Ok(Self {
            shared,
            workers: handles,
        })
    }

    /// Enqueues a job and wakes one worker.
    ///
    /// Returns `false` when the pool has shut down; the job is discarded and
    /// the caller decides how loudly to report it.
    pub fn submit(&self, job: PacketJob) -> bool {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return false;
        }
        self.shared.queue.lock().push_back(job);
        self.shared.available.notify_one();
        true
    }

    /// Jobs waiting for a worker right now.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Number of worker threads still attached to the pool.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Discards queued jobs, stops the workers, and joins them. Idempotent.
    ///
    /// In-flight handlers finish the packet they already picked up; nothing
    /// else runs afterwards.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.queue.lock().clear();
        self.shared.available.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("dispatch worker panicked during shutdown");
            }
        }
    }
}

impl Drop for DispatchPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DispatchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchPool")
            .field("workers", &self.workers.len())
            .field("queued", &self.queued_len())
            .field("shutdown", &self.shared.shutdown.load(Ordering::Acquire))
            .finish()
    }
}

fn worker_loop(shared: &PoolShared, handler: &PacketHandler) {
    loop {
        let mut queue = shared.queue.lock();
        loop {
            if shared.shutdown.load(Ordering::Acquire) {
                return;
            }
            if let Some(job) = queue.pop_front() {
                drop(queue);
                handler(job);
                break;
            }
            // Bounded wait: a missed wakeup costs at most one tick
            let _ = shared.available.wait_for(&mut queue, QUEUE_WAIT_TICK);
        }
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
    use std::time::Instant;

    fn test_job(socket: &Arc<UdpSocket>, marker: u8) -> PacketJob {
        PacketJob {
            bytes: vec![marker],
            source: "127.0.0.1:50000".parse().unwrap(),
            socket: socket.clone(),
            local_port: socket.local_addr().unwrap().port(),
        }
    }

    fn loopback_socket() -> Arc<UdpSocket> {
        Arc::new(UdpSocket::bind("127.0.0.1:0").unwrap())
    }

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

    #[test]
    fn test_jobs_reach_the_handler() {
        let socket = loopback_socket();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut pool = DispatchPool::new(
            4,
            Arc::new(move |job: PacketJob| {
                sink.lock().push(job.bytes[0]);
            }),
        )
        .unwrap();
        assert_eq!(pool.worker_count(), 4);

        for marker in 0..20u8 {
            assert!(pool.submit(test_job(&socket, marker)));
        }

        assert!(
            wait_until(Duration::from_secs(5), || seen.lock().len() == 20),
            "only {} of 20 jobs were handled",
            seen.lock().len()
        );

        let mut handled = seen.lock().clone();
        handled.sort_unstable();
        assert_eq!(handled, (0..20u8).collect::<Vec<_>>());

        pool.shutdown();
    }

    #[test]
    fn test_shutdown_discards_queued_jobs() {
        let socket = loopback_socket();
        let handled = Arc::new(Mutex::new(0usize));
        let sink = handled.clone();
        let mut pool = DispatchPool::new(
            1,
            Arc::new(move |_job: PacketJob| {
                std::thread::sleep(Duration::from_millis(100));
                *sink.lock() += 1;
            }),
        )
        .unwrap();

        for marker in 0..10u8 {
            pool.submit(test_job(&socket, marker));
        }
        // Let the single worker pick up the first job
        std::thread::sleep(Duration::from_millis(30));

        let before = Instant::now();
        pool.shutdown();
        let elapsed = before.elapsed();

        // The in-flight job may finish; the other nine were discarded
        assert!(*handled.lock() <= 2, "queued jobs ran after shutdown");
        assert!(
            elapsed < Duration::from_secs(2),
            "shutdown took {elapsed:?}, expected a bounded join"
        );
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let socket = loopback_socket();
        let mut pool = DispatchPool::new(2, Arc::new(|_job: PacketJob| {})).unwrap();

        pool.shutdown();
        assert!(!pool.submit(test_job(&socket, 1)));
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut pool = DispatchPool::new(2, Arc::new(|_job: PacketJob| {})).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert_eq!(pool.worker_count(), 0);
    }

    #[test]
    fn test_idle_pool_shuts_down_within_a_tick() {
        let mut pool = DispatchPool::new(4, Arc::new(|_job: PacketJob| {})).unwrap();

        let before = Instant::now();
        pool.shutdown();
        assert!(
            before.elapsed() < Duration::from_secs(1),
            "idle shutdown exceeded the wait tick by far"
        );
    }
}
