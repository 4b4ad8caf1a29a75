//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications
//! (snapshots and engine events) to subscribed clients. Each client
//! gets a writer task behind a bounded queue, and its notifications are
//! forwarded from its own broadcaster subscription.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::broadcast::Snapshot;
use crate::engine::{CommandError, EngineHandle};
use crate::geometry::Rig;
use crate::state::Mode;

use super::protocol::{EngineStatus, Notification, Request, Response, MAX_MESSAGE_LEN};

/// Outbound messages queued per client
const CLIENT_QUEUE: usize = 32;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

/// Shared by every client handler
struct ServerContext {
    engine: EngineHandle,
    rig: Rig,
    start_time: Instant,
}

/// What a request does to the client's notification stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionChange {
    Keep,
    Start,
    Stop,
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, engine: EngineHandle) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            context: Arc::new(ServerContext::new(engine)),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, context: Arc<ServerContext>) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(CLIENT_QUEUE);
        let writer_task = tokio::spawn(Self::write_loop(writer, out_rx));
        let mut forwarder: Option<JoinHandle<()>> = None;

        let result = async {
            while let Some(body) = read_message(&mut reader).await? {
                let response = match serde_json::from_slice::<Request>(&body) {
                    Ok(request) => {
                        debug!(?request, "received request");
                        let (response, change) = Self::process_request(request, &context).await;

                        match change {
                            SubscriptionChange::Start if forwarder.is_none() => {
                                debug!("client subscribed to notifications");
                                forwarder =
                                    Some(Self::spawn_forwarder(&context.engine, out_tx.clone()));
                            }
                            SubscriptionChange::Stop => {
                                if let Some(task) = forwarder.take() {
                                    debug!("client unsubscribed");
                                    task.abort();
                                }
                            }
                            _ => {}
                        }
                        response
                    }
                    Err(e) => {
                        warn!(?e, "failed to parse request");
                        Response::error("bad_request", e)
                    }
                };

                if out_tx.send(encode_message(&response)?).await.is_err() {
                    break;
                }
            }
            debug!("client disconnected");
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if let Some(task) = forwarder {
            task.abort();
        }
        drop(out_tx);
        let _ = writer_task.await;
        result
    }

    /// Drain the client's outbound queue onto the socket
    async fn write_loop(mut writer: OwnedWriteHalf, mut out_rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(message) = out_rx.recv().await {
            if let Err(e) = write_message(&mut writer, &message).await {
                debug!(?e, "client write failed");
                break;
            }
        }
    }

    /// Forward snapshots and engine events to one subscribed client
    fn spawn_forwarder(engine: &EngineHandle, out_tx: mpsc::Sender<Vec<u8>>) -> JoinHandle<()> {
        let mut snapshots = engine.subscribe();
        let mut events = engine.subscribe_events();

        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    snapshot = snapshots.recv() => match snapshot {
                        Some(snapshot) => Notification::Snapshot {
                            snapshot: Snapshot::clone(&snapshot),
                        },
                        None => break,
                    },
                    event = events.recv() => match event {
                        Ok(event) => Notification::Event { event },
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "event forwarder lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };

                let message = match encode_message(&notification) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(?e, "failed to encode notification");
                        continue;
                    }
                };
                if out_tx.send(message).await.is_err() {
                    break;
                }
            }
            debug!(
                subscriber = snapshots.id(),
                dropped = snapshots.dropped(),
                "notification forwarder stopped"
            );
        })
    }

    /// Process a request and return a response
    async fn process_request(
        request: Request,
        context: &ServerContext,
    ) -> (Response, SubscriptionChange) {
        let engine = &context.engine;

        let response = match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => match context.status() {
                Some(status) => Response::Status(status),
                None => Response::error("engine_stopped", "no state published yet"),
            },

            Request::SetMode { mode } => match mode.parse::<Mode>() {
                Ok(mode) => match engine.set_mode(mode).await {
                    Ok(change) => {
                        if change.is_transition() {
                            info!(from = %change.from, to = %change.to, "mode changed via IPC");
                        }
                        Response::ModeChange {
                            mode: change.to,
                            previous: change.from,
                        }
                    }
                    Err(e) => command_error(e),
                },
                Err(e) => {
                    warn!(%e, "mode request rejected");
                    Response::error("rejected", e)
                }
            },

            Request::SetPosition { x, y, z } => match engine.set_position(x, y, z).await {
                Ok(pose) => Response::Position { pose },
                Err(e) => command_error(e),
            },

            Request::ApplyPreset { name } => match engine.apply_preset(&name).await {
                Ok(pose) => Response::PresetApplied { name, pose },
                Err(e) => command_error(e),
            },

            Request::ListPresets => Response::Presets {
                presets: engine.presets(),
            },

            Request::GetLimits => Response::Limits {
                envelope: engine.envelope(),
            },

            Request::SubmitDetections { detections } => Response::DetectionsAccepted {
                accepted: engine.submit_detections(detections),
            },

            Request::Subscribe => return (Response::Subscribed, SubscriptionChange::Start),

            Request::Unsubscribe => return (Response::Unsubscribed, SubscriptionChange::Stop),
        };

        (response, SubscriptionChange::Keep)
    }

    /// Shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

impl ServerContext {
    fn new(engine: EngineHandle) -> Self {
        Self {
            rig: Rig::from_envelope(&engine.envelope()),
            engine,
            start_time: Instant::now(),
        }
    }

    fn status(&self) -> Option<EngineStatus> {
        let snapshot = self.engine.latest()?;
        Some(EngineStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: snapshot.mode,
            pose: snapshot.pose,
            target: snapshot.target,
            tick: snapshot.tick,
            subjects: snapshot.subjects.len(),
            speaking_subject: snapshot.speaking_subject(),
            movements: snapshot.movements,
            cable_lengths: self.rig.cable_lengths(&snapshot.pose),
            tracking: snapshot.tracking,
            faults: snapshot.faults,
            subscribers: self.engine.subscriber_count(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        })
    }
}

fn command_error(e: CommandError) -> Response {
    let code = match e {
        CommandError::UnknownPreset(_) => "unknown_preset",
        CommandError::Busy => "busy",
        CommandError::EngineStopped => "engine_stopped",
        CommandError::Aborted => "aborted",
    };
    warn!(%e, code, "command failed");
    Response::error(code, e)
}

/// Serialize a message with its 4-byte little-endian length prefix
fn encode_message<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let msg_bytes = serde_json::to_vec(msg)?;
    if msg_bytes.len() > MAX_MESSAGE_LEN {
        bail!("message of {} bytes exceeds limit", msg_bytes.len());
    }

    let mut framed = Vec::with_capacity(4 + msg_bytes.len());
    framed.extend_from_slice(&(msg_bytes.len() as u32).to_le_bytes());
    framed.extend_from_slice(&msg_bytes);
    Ok(framed)
}

async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, framed: &[u8]) -> Result<()> {
    writer.write_all(framed).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message body; `None` on a clean disconnect
async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let msg_len = u32::from_le_bytes(len_buf) as usize;
    if msg_len > MAX_MESSAGE_LEN {
        bail!("message of {msg_len} bytes exceeds limit");
    }

    let mut body = vec![0u8; msg_len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}
