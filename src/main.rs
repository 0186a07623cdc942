//! Ravenmoor Game Server
//!
//! Hosts the inbound network protocol engine: binds the configured game
//! listeners, registers the packet handler table, and drives the message
//! pump once per tick until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use ravenmoor_server::config::ServerConfig;
use ravenmoor_server::net::listener::Listener;
use ravenmoor_server::net::pump::FrameDispatcher;
use ravenmoor_server::net::session::SessionManager;
use ravenmoor_server::protocol::registry::{HandlerDescriptor, HandlerRegistry};
use ravenmoor_server::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("╔══════════════════════════════════════════════╗");
    info!("║        Ravenmoor Game Server v{}          ║", VERSION);
    info!("╚══════════════════════════════════════════════╝");

    // Load configuration
    let config = ServerConfig::load().await?;
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    // Build the immutable handler table
    let registry = Arc::new(build_registry());
    info!("Registered {} packet handlers", registry.len());

    // Wire up the pump
    let sessions = Arc::new(SessionManager::new());
    let pump = Arc::new(FrameDispatcher::new(
        registry,
        sessions.clone(),
        &config,
    ));

    for addr in config.listener_addrs() {
        let listener = Listener::bind(addr).await?;
        info!("Game server listening on: {}", listener.local_addr());
        pump.add_listener(listener);
    }

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_shutdown(signal_tx).await;
    });

    info!("Server startup complete!");

    // Host loop: one pump slice per tick
    let mut ticker = tokio::time::interval(Duration::from_millis(config.tick_rate_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => pump.slice(),
            _ = shutdown_rx.recv() => break,
        }
    }

    info!("Shutting down server...");

    sessions.dispose_all();
    info!("All sessions disconnected");

    if config.profiler_enabled {
        for (opcode, profile) in pump.profiler().snapshot() {
            info!(
                opcode = %format!("0x{:02X}", opcode),
                count = profile.count,
                bytes = profile.bytes,
                elapsed = ?profile.elapsed,
                "Packet profile"
            );
        }
    }

    info!("Server shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ravenmoor_server=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

/// Build the packet handler table.
///
/// Handler bodies live with the game logic; the entries here log receipt and
/// decode the handshake-adjacent packets the engine itself understands.
fn build_registry() -> HandlerRegistry {
    HandlerRegistry::builder()
        .register(
            0xEF,
            HandlerDescriptor::fixed(
                "SeedPacket",
                21,
                Box::new(|session, reader| {
                    let seed = reader.read_uint();
                    let major = reader.read_uint();
                    let minor = reader.read_uint();
                    session.set_seed(seed);
                    debug!(
                        session_id = session.id,
                        seed = %format!("0x{:08X}", seed),
                        version = %format!("{}.{}", major, minor),
                        "Seed packet received"
                    );
                    Ok(())
                }),
            ),
        )
        .register(
            0x80,
            HandlerDescriptor::fixed(
                "AccountLogin",
                62,
                Box::new(|session, reader| {
                    let username = reader.read_string();
                    debug!(session_id = session.id, username = %username, "Account login request");
                    Ok(())
                }),
            ),
        )
        .register(
            0x91,
            HandlerDescriptor::fixed(
                "GameLogin",
                65,
                Box::new(|session, reader| {
                    let auth_id = reader.read_uint();
                    debug!(session_id = session.id, auth_id, "Game login request");
                    Ok(())
                }),
            ),
        )
        .register(
            0xA4,
            HandlerDescriptor::fixed(
                "SystemInfo",
                149,
                Box::new(|session, _reader| {
                    debug!(session_id = session.id, "Client system info received");
                    Ok(())
                }),
            ),
        )
        .register(
            0xBF,
            HandlerDescriptor::variable(
                "ExtendedCommand",
                Box::new(|session, reader| {
                    let command = reader.read_ushort();
                    debug!(session_id = session.id, command, "Extended command");
                    Ok(())
                }),
            ),
        )
        .register(
            0x73,
            HandlerDescriptor::fixed(
                "Ping",
                2,
                Box::new(|session, reader| {
                    let sequence = reader.read_ubyte();
                    debug!(session_id = session.id, sequence, "Ping");
                    Ok(())
                }),
            ),
        )
        .build()
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
