//! Listener integration
//!
//! Bridges asynchronous socket acceptance and reads into the synchronous
//! pump cycle. Each `Listener` owns an accept task that parks newly accepted
//! sockets until the pump polls them; each connection gets a read producer
//! task that appends raw bytes to the session's byte queue, signals
//! readiness, and then waits for the pump to re-arm it.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::net::pump::ReadyScheduler;
use crate::net::session::{Session, SessionManager};

/// A bound game listener, polled by the pump once per cycle
pub struct Listener {
    local_addr: SocketAddr,
    accepted: Arc<Mutex<Vec<(TcpStream, SocketAddr)>>>,
    accept_task: JoinHandle<()>,
}

impl Listener {
    /// Bind a listener and start its accept task.
    ///
    /// Accept failures are logged and retried inside the task; they never
    /// surface into the pump cycle, so one misbehaving listener cannot stall
    /// the others.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let accepted: Arc<Mutex<Vec<(TcpStream, SocketAddr)>>> = Arc::new(Mutex::new(Vec::new()));
        let parked = accepted.clone();

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, address)) => {
                        trace!(listener = %local_addr, address = %address, "Connection accepted");
                        parked.lock().push((stream, address));
                    }
                    Err(e) => {
                        error!(listener = %local_addr, error = %e, "Failed to accept connection");
                    }
                }
            }
        });

        info!(listener = %local_addr, "Listener bound");

        Ok(Self {
            local_addr,
            accepted,
            accept_task,
        })
    }

    /// The address this listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Take every socket accepted since the last poll
    pub fn poll_accepted(&self) -> Vec<(TcpStream, SocketAddr)> {
        std::mem::take(&mut *self.accepted.lock())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Start the asynchronous read producer for one session.
///
/// The producer owns the socket: read a chunk, append it to the session's
/// byte queue, signal readiness, then wait for the pump to re-arm the gate.
/// It exits when the session stops running, the peer closes, or the buffered
/// ceiling is exceeded, and unregisters the session on the way out.
pub fn spawn_read_producer(
    stream: TcpStream,
    session: Arc<Session>,
    scheduler: Arc<ReadyScheduler>,
    sessions: Arc<SessionManager>,
    chunk_size: usize,
    max_buffered: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = stream;
        let mut chunk = vec![0u8; chunk_size];

        loop {
            if !session.is_running() {
                break;
            }

            match stream.read(&mut chunk).await {
                Ok(0) => {
                    debug!(session_id = session.id, "Peer closed connection");
                    break;
                }
                Ok(n) => {
                    let buffered = session.buffer().append(&chunk[..n]);
                    if max_buffered > 0 && buffered > max_buffered {
                        warn!(
                            session_id = session.id,
                            address = %session.address,
                            buffered,
                            limit = max_buffered,
                            "Inbound buffer ceiling exceeded, disconnecting"
                        );
                        break;
                    }

                    scheduler.notify_ready(session.clone());
                    session.wait_read_gate().await;
                }
                Err(e) => {
                    debug!(session_id = session.id, error = %e, "Read error");
                    break;
                }
            }
        }

        session.dispose();
        sessions.remove(session.id);
        info!(
            session_id = session.id,
            address = %session.address,
            online = sessions.count(),
            "Client disconnected"
        );
    })
}
