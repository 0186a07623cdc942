//! Message pump / frame dispatcher
//!
//! The cooperative drain loop at the heart of the inbound protocol engine:
//! - Polls listeners for newly accepted sockets and starts their read producers
//! - Drains every ready session's buffer through the handshake and framing
//!   state machine, dispatching complete packets to registered handlers
//! - Contains handler failures so one bad packet never takes the pump down
//! - Defers throttled sessions exactly one cycle, then merges them back
//!
//! The pump never blocks on socket I/O: it only consumes what producers have
//! already buffered, so per-cycle work is bounded by buffered volume, not by
//! network latency. `slice()` is driven once per host loop iteration from a
//! single consumer task; producers interact only through `notify_ready`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, trace, warn};

use crate::config::ServerConfig;
use crate::net::listener::{spawn_read_producer, Listener};
use crate::net::pool::BufferPool;
use crate::net::profile::PacketProfiler;
use crate::net::session::{Session, SessionManager};
use crate::protocol::reader::PacketReader;
use crate::protocol::registry::{HandlerRegistry, PacketLength};

/// Handshake sentinel: a first byte of 0xEF introduces a seed packet rather
/// than a raw 4-byte seed. 0xEF is a multicast IP octet and can never start a
/// legitimate raw seed, so old and new clients coexist.
pub const SEED_SENTINEL: u8 = 0xEF;

/// Opcodes a compatible client may open with. Any other first opcode marks
/// the stream as encrypted or foreign.
pub const FIRST_PACKET_ALLOW: [u8; 8] = [0xF0, 0xF1, 0xCF, 0x80, 0x91, 0xA4, 0xBF, 0xEF];

/// Minimum total length a dynamic packet can declare (opcode + length prefix)
const MIN_DYNAMIC_LENGTH: usize = 3;

/// Result of draining one session for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainOutcome {
    /// Buffer exhausted, partial frame pending, or session no longer running
    Completed,
    /// Admission declined; the session keeps its buffer and waits a cycle
    Throttled,
}

/// Handshake progress for an unseeded session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeedProgress {
    /// Handshake complete; dispatch may proceed
    Seeded,
    /// Not enough bytes yet, or the session was disposed
    Waiting,
}

struct Queues {
    ready: VecDeque<Arc<Session>>,
    throttled: VecDeque<Arc<Session>>,
}

/// FIFO readiness queues shared between producers and the dispatcher.
///
/// One coarse lock guards both queues and is held only for O(1) operations,
/// never while parsing. Duplicate entries are harmless: draining a session
/// with no buffered data is a no-op.
pub struct ReadyScheduler {
    queues: Mutex<Queues>,
    wake: Notify,
}

impl ReadyScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(Queues {
                ready: VecDeque::new(),
                throttled: VecDeque::new(),
            }),
            wake: Notify::new(),
        }
    }

    /// Producer-side: mark a session as having buffered data
    pub fn notify_ready(&self, session: Arc<Session>) {
        self.queues.lock().ready.push_back(session);
        self.wake.notify_one();
    }

    /// Sleep until at least one readiness notification arrives
    pub async fn wait_ready(&self) {
        self.wake.notified().await;
    }

    /// Number of pending ready entries
    pub fn ready_len(&self) -> usize {
        self.queues.lock().ready.len()
    }

    fn pop_ready(&self) -> Option<Arc<Session>> {
        self.queues.lock().ready.pop_front()
    }

    fn push_throttled(&self, session: Arc<Session>) {
        self.queues.lock().throttled.push_back(session);
    }

    /// Move every throttled session back into the ready set; each deferred
    /// session gets exactly one cycle of delay, no priority
    fn merge_throttled(&self) {
        let mut queues = self.queues.lock();
        while let Some(session) = queues.throttled.pop_front() {
            queues.ready.push_back(session);
        }
    }
}

impl Default for ReadyScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// The frame dispatcher: drains ready sessions once per host cycle
pub struct FrameDispatcher {
    registry: Arc<HandlerRegistry>,
    sessions: Arc<SessionManager>,
    scheduler: Arc<ReadyScheduler>,
    listeners: Mutex<Vec<Listener>>,
    pool: Mutex<BufferPool>,
    profiler: PacketProfiler,
    read_chunk_size: usize,
    max_buffered_bytes: usize,
}

impl FrameDispatcher {
    /// Create a dispatcher over an immutable handler registry
    pub fn new(
        registry: Arc<HandlerRegistry>,
        sessions: Arc<SessionManager>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            registry,
            sessions,
            scheduler: Arc::new(ReadyScheduler::new()),
            listeners: Mutex::new(Vec::new()),
            pool: Mutex::new(BufferPool::new(
                config.pool_slot_count,
                config.pool_slot_size,
            )),
            profiler: PacketProfiler::new(config.profiler_enabled),
            read_chunk_size: config.read_chunk_size,
            max_buffered_bytes: config.max_buffered_bytes,
        }
    }

    /// The readiness scheduler, for producers
    pub fn scheduler(&self) -> Arc<ReadyScheduler> {
        self.scheduler.clone()
    }

    /// The packet profiler
    pub fn profiler(&self) -> &PacketProfiler {
        &self.profiler
    }

    /// Attach a bound listener; polled every cycle
    pub fn add_listener(&self, listener: Listener) {
        self.listeners.lock().push(listener);
    }

    /// Producer-side readiness notification
    pub fn notify_ready(&self, session: Arc<Session>) {
        self.scheduler.notify_ready(session);
    }

    /// Sleep until a session becomes ready
    pub async fn wait_ready(&self) {
        self.scheduler.wait_ready().await;
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.sessions.count()
    }

    /// Run one drain cycle: accept new connections, drain every ready
    /// session, then merge throttled sessions back for the next cycle.
    pub fn slice(&self) {
        self.check_listeners();

        while let Some(session) = self.scheduler.pop_ready() {
            // A disposed session may still have stale queue entries
            if !session.is_running() {
                continue;
            }

            match self.drain_session(&session) {
                DrainOutcome::Throttled => self.scheduler.push_throttled(session),
                DrainOutcome::Completed => {
                    if session.is_running() {
                        session.resume_read();
                    }
                }
            }
        }

        self.scheduler.merge_throttled();
    }

    /// Poll every listener for newly accepted sockets and start their
    /// sessions. Listeners are isolated: accept failures are logged inside
    /// the accept task and never abort the cycle for other listeners.
    fn check_listeners(&self) {
        let listeners = self.listeners.lock();
        for listener in listeners.iter() {
            for (stream, address) in listener.poll_accepted() {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(address = %address, error = %e, "Failed to set TCP_NODELAY");
                }

                let session = self.sessions.create(address);
                spawn_read_producer(
                    stream,
                    session.clone(),
                    self.scheduler.clone(),
                    self.sessions.clone(),
                    self.read_chunk_size,
                    self.max_buffered_bytes,
                );

                info!(
                    session_id = session.id,
                    address = %address,
                    online = self.sessions.count(),
                    "Client connected"
                );
            }
        }
    }

    /// Drain one session's buffer under its exclusive lock
    fn drain_session(&self, session: &Arc<Session>) -> DrainOutcome {
        let _guard = session.lock();

        if !session.seeded() {
            match self.handle_seed(session) {
                SeedProgress::Seeded => {}
                SeedProgress::Waiting => return DrainOutcome::Completed,
            }
        }

        self.dispatch_buffered(session)
    }

    /// Negotiate the handshake for an unseeded session.
    ///
    /// Either the sentinel opcode defers to normal dispatch, or exactly 4
    /// bytes are consumed as a big-endian seed. With fewer than 4 bytes
    /// buffered nothing is consumed; the session is not re-examined until its
    /// producer appends more bytes and re-signals readiness.
    fn handle_seed(&self, session: &Session) -> SeedProgress {
        let Some(first) = session.buffer().peek_opcode() else {
            return SeedProgress::Waiting;
        };

        if first == SEED_SENTINEL {
            // Seed packet framing: the sentinel byte doubles as the opcode
            // and is consumed by the dispatch loop below
            session.set_seeded();
            return SeedProgress::Seeded;
        }

        if session.buffer().len() < 4 {
            return SeedProgress::Waiting;
        }

        let raw = session.buffer().dequeue_exact(4);
        let seed = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);

        debug!(
            session_id = session.id,
            seed = %format!("0x{:08X}", seed),
            "Handshake seed received"
        );

        if seed == 0 {
            warn!(
                session_id = session.id,
                address = %session.address,
                "Invalid client detected, disconnecting"
            );
            session.dispose();
            return SeedProgress::Waiting;
        }

        session.set_seed(seed);
        session.set_seeded();
        SeedProgress::Seeded
    }

    /// Frame and dispatch buffered packets until no complete packet remains,
    /// the session stops running, or admission declines.
    fn dispatch_buffered(&self, session: &Arc<Session>) -> DrainOutcome {
        loop {
            if !session.is_running() {
                return DrainOutcome::Completed;
            }

            let buffered = session.buffer().len();
            if buffered == 0 {
                return DrainOutcome::Completed;
            }

            let Some(opcode) = session.buffer().peek_opcode() else {
                return DrainOutcome::Completed;
            };

            if !session.sent_first_packet() && !FIRST_PACKET_ALLOW.contains(&opcode) {
                warn!(
                    session_id = session.id,
                    address = %session.address,
                    opcode = %format!("0x{:02X}", opcode),
                    "Encrypted client detected, disconnecting"
                );
                session.dispose();
                return DrainOutcome::Completed;
            }

            let Some(handler) = self.registry.get(opcode) else {
                // Framing is ambiguous past an unknown opcode: everything
                // buffered after it is unparseable this cycle, so the whole
                // run is dumped for diagnosis. The connection survives.
                let data = session.buffer().drain_all();
                PacketReader::new(&data).trace(session);
                return DrainOutcome::Completed;
            };

            let (packet_length, fixed) = match handler.length {
                PacketLength::Fixed(n) => (n as usize, true),
                PacketLength::Variable => {
                    if buffered < MIN_DYNAMIC_LENGTH {
                        return DrainOutcome::Completed;
                    }
                    let declared = session.buffer().peek_packet_length().unwrap_or(0) as usize;
                    if declared < MIN_DYNAMIC_LENGTH {
                        warn!(
                            session_id = session.id,
                            address = %session.address,
                            opcode = %format!("0x{:02X}", opcode),
                            declared,
                            "Corrupt packet length, disconnecting"
                        );
                        session.dispose();
                        return DrainOutcome::Completed;
                    }
                    (declared, false)
                }
            };

            if buffered < packet_length {
                // Partial packet; wait for the producer to deliver the rest
                return DrainOutcome::Completed;
            }

            if handler.requires_actor {
                match session.actor() {
                    None => {
                        warn!(
                            session_id = session.id,
                            address = %session.address,
                            opcode = %format!("0x{:02X}", opcode),
                            "Sent in-game packet before being attached to an actor, disconnecting"
                        );
                        session.dispose();
                        return DrainOutcome::Completed;
                    }
                    Some(actor) if actor.is_deleted() => {
                        warn!(
                            session_id = session.id,
                            address = %session.address,
                            opcode = %format!("0x{:02X}", opcode),
                            "Actor deleted, disconnecting"
                        );
                        session.dispose();
                        return DrainOutcome::Completed;
                    }
                    Some(_) => {}
                }
            }

            if let Some(throttle) = &handler.throttle {
                if !throttle(session) {
                    trace!(
                        session_id = session.id,
                        handler = handler.name,
                        "Session throttled"
                    );
                    return DrainOutcome::Throttled;
                }
            }

            let started = if self.profiler.is_enabled() {
                Some(Instant::now())
            } else {
                None
            };

            let mut lease = self.pool.lock().acquire(packet_length);
            let copied = session.buffer().dequeue_into(&mut lease, packet_length);
            session.mark_first_packet();

            trace!(
                session_id = session.id,
                handler = handler.name,
                opcode = %format!("0x{:02X}", opcode),
                length = copied,
                "Dispatching packet"
            );

            let result = {
                let mut reader = PacketReader::wrap(&lease[..copied], fixed);
                handler.receive(session, &mut reader)
            };

            match result {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    warn!(
                        session_id = session.id,
                        address = %session.address,
                        handler = handler.name,
                        error = %e,
                        "Fatal handler error, disconnecting"
                    );
                    session.dispose();
                }
                Err(e) => {
                    error!(
                        session_id = session.id,
                        address = %session.address,
                        handler = handler.name,
                        error = %e,
                        "Handler error disarmed"
                    );
                }
            }

            self.pool.lock().release(lease);

            if let Some(started) = started {
                self.profiler.record(opcode, copied, started.elapsed());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session(id: u64) -> Arc<Session> {
        Arc::new(Session::new(id, "127.0.0.1:12345".parse().unwrap()))
    }

    #[test]
    fn test_scheduler_fifo_order() {
        let scheduler = ReadyScheduler::new();
        scheduler.notify_ready(test_session(1));
        scheduler.notify_ready(test_session(2));
        scheduler.notify_ready(test_session(3));

        assert_eq!(scheduler.pop_ready().unwrap().id, 1);
        assert_eq!(scheduler.pop_ready().unwrap().id, 2);
        assert_eq!(scheduler.pop_ready().unwrap().id, 3);
        assert!(scheduler.pop_ready().is_none());
    }

    #[test]
    fn test_scheduler_duplicates_allowed() {
        let scheduler = ReadyScheduler::new();
        let session = test_session(1);

        scheduler.notify_ready(session.clone());
        scheduler.notify_ready(session);
        assert_eq!(scheduler.ready_len(), 2);
    }

    #[test]
    fn test_merge_throttled_appends_in_order() {
        let scheduler = ReadyScheduler::new();
        scheduler.push_throttled(test_session(7));
        scheduler.push_throttled(test_session(8));
        scheduler.notify_ready(test_session(1));

        scheduler.merge_throttled();

        assert_eq!(scheduler.pop_ready().unwrap().id, 1);
        assert_eq!(scheduler.pop_ready().unwrap().id, 7);
        assert_eq!(scheduler.pop_ready().unwrap().id, 8);
    }
}
