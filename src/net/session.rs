//! Session management module
//!
//! Manages client sessions including:
//! - Per-connection handshake and framing state
//! - The session-owned inbound byte queue
//! - The attached-actor seam into game logic
//! - Thread-safe session registry with connection counting
//!
//! A session's framing state is mutated only by the frame dispatcher while it
//! holds the session's exclusive lock; the read producer only appends bytes
//! to the (internally locked) byte queue and signals readiness.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::net::buffer::ByteQueue;

/// Unique session identifier
pub type SessionId = u64;

/// Game-logic entity a session can be attached to after entering the world.
///
/// The engine only ever asks whether the entity is still alive; everything
/// else about it belongs to the host.
pub trait Actor: Send + Sync {
    /// Whether the entity has been removed from the world
    fn is_deleted(&self) -> bool;
}

/// A connected client session
pub struct Session {
    /// Unique session identifier
    pub id: SessionId,
    /// Remote address of the client
    pub address: SocketAddr,
    /// Whether the session is still live
    running: AtomicBool,
    /// Whether the handshake has completed
    seeded: AtomicBool,
    /// Whether a packet has ever been dispatched for this session
    sent_first_packet: AtomicBool,
    /// Handshake seed (valid once seeded via the 4-byte path)
    seed: AtomicU32,
    /// Attached game-logic entity, if any
    actor: RwLock<Option<Arc<dyn Actor>>>,
    /// Inbound byte queue, appended by the read producer
    buffer: ByteQueue,
    /// Exclusive parse lock, held by the dispatcher for one drain pass
    parse_lock: Mutex<()>,
    /// Gate re-arming the read producer after a drain pass
    read_gate: Notify,
    /// Time of session creation
    pub created_at: Instant,
}

impl Session {
    /// Create a new session
    pub fn new(id: SessionId, address: SocketAddr) -> Self {
        Self {
            id,
            address,
            running: AtomicBool::new(true),
            seeded: AtomicBool::new(false),
            sent_first_packet: AtomicBool::new(false),
            seed: AtomicU32::new(0),
            actor: RwLock::new(None),
            buffer: ByteQueue::new(),
            parse_lock: Mutex::new(()),
            read_gate: Notify::new(),
            created_at: Instant::now(),
        }
    }

    /// Whether the session is still live
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Tear down the session. Idempotent; halts further processing
    /// immediately and wakes a gated read producer so it can exit.
    ///
    /// Returns `true` on the first call only.
    pub fn dispose(&self) -> bool {
        let first = self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            debug!(session_id = self.id, address = %self.address, "Session disposed");
            self.read_gate.notify_one();
        }
        first
    }

    /// Whether the handshake has completed
    pub fn seeded(&self) -> bool {
        self.seeded.load(Ordering::SeqCst)
    }

    /// Mark the handshake complete
    pub fn set_seeded(&self) {
        self.seeded.store(true, Ordering::SeqCst);
    }

    /// The handshake seed
    pub fn seed(&self) -> u32 {
        self.seed.load(Ordering::SeqCst)
    }

    /// Store the handshake seed
    pub fn set_seed(&self, seed: u32) {
        self.seed.store(seed, Ordering::SeqCst);
    }

    /// Whether a packet has ever been dispatched for this session
    pub fn sent_first_packet(&self) -> bool {
        self.sent_first_packet.load(Ordering::SeqCst)
    }

    /// Record that a packet has been dispatched
    pub fn mark_first_packet(&self) {
        self.sent_first_packet.store(true, Ordering::SeqCst);
    }

    /// The attached actor, if any
    pub fn actor(&self) -> Option<Arc<dyn Actor>> {
        self.actor.read().clone()
    }

    /// Attach a game-logic entity
    pub fn attach_actor(&self, actor: Arc<dyn Actor>) {
        *self.actor.write() = Some(actor);
    }

    /// Detach the current actor
    pub fn clear_actor(&self) {
        *self.actor.write() = None;
    }

    /// The session's inbound byte queue
    pub fn buffer(&self) -> &ByteQueue {
        &self.buffer
    }

    /// Acquire the exclusive parse lock for one drain pass
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.parse_lock.lock()
    }

    /// Re-arm the read producer after a drain pass
    pub fn resume_read(&self) {
        self.read_gate.notify_one();
    }

    /// Producer-side wait for the next read permit
    pub async fn wait_read_gate(&self) {
        self.read_gate.notified().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("running", &self.is_running())
            .field("seeded", &self.seeded())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

/// Thread-safe session manager
pub struct SessionManager {
    /// Map of session ID to session
    sessions: DashMap<SessionId, Arc<Session>>,
    /// Next session ID to assign
    next_id: AtomicU64,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new session and register it
    pub fn create(&self, address: SocketAddr) -> Arc<Session> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session::new(id, address));
        self.sessions.insert(id, session.clone());

        info!(session_id = id, address = %address, "Session created");
        session
    }

    /// Get a session by ID
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|r| r.clone())
    }

    /// Remove a session from the registry
    pub fn remove(&self, id: SessionId) {
        if self.sessions.remove(&id).is_some() {
            debug!(session_id = id, "Session removed");
        }
    }

    /// Number of live sessions
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// All registered session IDs
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|r| *r.key()).collect()
    }

    /// Dispose every session and clear the registry
    pub fn dispose_all(&self) {
        for session in self.sessions.iter() {
            session.dispose();
        }
        self.sessions.clear();
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_address() -> SocketAddr {
        "127.0.0.1:12345".parse().unwrap()
    }

    struct TestActor {
        deleted: AtomicBool,
    }

    impl Actor for TestActor {
        fn is_deleted(&self) -> bool {
            self.deleted.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn test_session_creation() {
        let session = Session::new(1, test_address());
        assert_eq!(session.id, 1);
        assert!(session.is_running());
        assert!(!session.seeded());
        assert!(!session.sent_first_packet());
        assert!(session.actor().is_none());
        assert!(session.buffer().is_empty());
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let session = Session::new(1, test_address());

        assert!(session.dispose());
        assert!(!session.is_running());
        assert!(!session.dispose());
        assert!(!session.is_running());
    }

    #[test]
    fn test_seed_state() {
        let session = Session::new(1, test_address());

        session.set_seed(42);
        session.set_seeded();

        assert!(session.seeded());
        assert_eq!(session.seed(), 42);
    }

    #[test]
    fn test_actor_attachment() {
        let session = Session::new(1, test_address());
        let actor = Arc::new(TestActor {
            deleted: AtomicBool::new(false),
        });

        session.attach_actor(actor.clone());
        assert!(!session.actor().unwrap().is_deleted());

        actor.deleted.store(true, Ordering::SeqCst);
        assert!(session.actor().unwrap().is_deleted());

        session.clear_actor();
        assert!(session.actor().is_none());
    }

    #[test]
    fn test_manager_create_and_remove() {
        let manager = SessionManager::new();
        let session = manager.create(test_address());

        assert_eq!(session.id, 1);
        assert_eq!(manager.count(), 1);
        assert!(manager.get(1).is_some());

        manager.remove(1);
        assert!(manager.get(1).is_none());
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_manager_dispose_all() {
        let manager = SessionManager::new();
        let a = manager.create(test_address());
        let b = manager.create(test_address());

        manager.dispose_all();

        assert!(!a.is_running());
        assert!(!b.is_running());
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test]
    async fn test_read_gate_permit_persists() {
        let session = Arc::new(Session::new(1, test_address()));

        // Resume before the producer waits must not deadlock
        session.resume_read();
        session.wait_read_gate().await;
    }
}
