//! spidercam-daemon: background control daemon for a cable-suspended camera
//!
//! The daemon provides:
//! - A 30 Hz control loop that plans bounded-velocity camera motion
//! - Automatic framing (speaker, group, wide) from detector output
//! - IPC server for operator consoles, observers and the detector

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use spidercam_daemon::config::Config;
use spidercam_daemon::engine::Engine;
use spidercam_daemon::ipc::Server;
use spidercam_daemon::lifecycle::ShutdownSignal;
use spidercam_daemon::motion::ActuatorCommand;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "spidercam-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.validate()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, home = %config.home, "configuration loaded");

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    let (engine, handle) = Engine::new(&config);
    let actuator_rx = engine.actuator();

    let engine_task = tokio::spawn(engine.run(shutdown.subscribe()));
    let actuator_task = tokio::spawn(drive_actuator(actuator_rx));

    let server = Server::new(&config.socket_path, handle)?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to install signal handlers"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");
    shutdown.trigger();

    match engine_task.await {
        Ok(state) => info!(
            mode = %state.mode(),
            pose = %state.pose,
            ticks = state.tick,
            "final control state"
        ),
        Err(e) => error!(?e, "control loop task failed"),
    }

    server.shutdown().await;

    // The engine dropped its actuator link, which ends the driver
    if let Err(e) = actuator_task.await {
        warn!(?e, "actuator driver task failed");
    }

    info!("spidercam-daemon stopped");

    Ok(())
}

/// Stand-in winch driver: logs every pose the engine pushes
async fn drive_actuator(mut rx: watch::Receiver<Option<ActuatorCommand>>) {
    while rx.changed().await.is_ok() {
        let command = rx.borrow_and_update().clone();
        if let Some(command) = command {
            debug!(
                sequence = command.sequence,
                pose = %command.pose,
                longest_cable = command.cables.longest(),
                "actuator command"
            );
        }
    }
    debug!("actuator link closed");
}
