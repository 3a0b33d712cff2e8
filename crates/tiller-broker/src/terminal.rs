//! Interactive terminal sessions and their registry
//!
//! Each session owns one SSH connection with one PTY shell channel, driven
//! by a single task: a `select!` loop over channel output and client
//! commands. Sessions are keyed by a client-supplied terminal id; writes and
//! resizes for unknown ids are silent no-ops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;
use tokio::sync::mpsc;

use tiller_core::ipc::{TerminalData, EVENT_TERMINAL_DATA};
use tiller_core::types::TerminalId;
use tiller_core::BrokerError;

use crate::auth::AuthDescriptor;
use crate::broadcast::EventBroadcaster;
use crate::ssh;

/// Commands routed into a session task
enum SessionCommand {
    /// Decoded bytes to write to the shell channel
    Write(Vec<u8>),
    /// Window-change request
    Resize { cols: u16, rows: u16 },
    /// Close the channel and the underlying connection
    Stop,
}

/// Registry entry for one live session
struct TerminalHandle {
    /// Replacement-race guard: a dying session only removes the entry if it
    /// still owns it
    serial: u64,
    cmd_tx: mpsc::Sender<SessionCommand>,
}

/// Registry of live terminal sessions, keyed by terminal id
pub struct TerminalRegistry {
    sessions: DashMap<TerminalId, TerminalHandle>,
    broadcaster: Arc<EventBroadcaster>,
    next_serial: AtomicU64,
    connect_timeout: Duration,
}

impl TerminalRegistry {
    /// Create an empty registry
    pub fn new(broadcaster: Arc<EventBroadcaster>, connect_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            broadcaster,
            next_serial: AtomicU64::new(1),
            connect_timeout,
        }
    }

    /// Open a session for `id`.
    ///
    /// An existing session with the same id is stopped first, so at most one
    /// live channel exists per terminal id. The connect attempt runs in the
    /// session task; a failure is delivered as a single inline message
    /// through the terminal's own data stream.
    pub async fn open(self: &Arc<Self>, id: TerminalId, auth: AuthDescriptor) {
        if let Some((_, old)) = self.sessions.remove(&id) {
            tracing::debug!("Replacing existing terminal session {}", id);
            let _ = old.cmd_tx.send(SessionCommand::Stop).await;
        }

        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        self.sessions
            .insert(id.clone(), TerminalHandle { serial, cmd_tx });

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            run_session(registry, id, serial, auth, cmd_rx).await;
        });
    }

    /// Write base64-encoded bytes to a session's shell.
    ///
    /// No-op for unknown ids or undecodable payloads; never raises.
    pub async fn write(&self, id: &TerminalId, encoded: &str) {
        let Some(tx) = self.sessions.get(id).map(|h| h.cmd_tx.clone()) else {
            return;
        };

        match BASE64.decode(encoded) {
            Ok(bytes) => {
                let _ = tx.send(SessionCommand::Write(bytes)).await;
            }
            Err(e) => {
                tracing::warn!("Dropping undecodable write for terminal {}: {}", id, e);
            }
        }
    }

    /// Forward a window-change request. No-op for unknown ids.
    pub async fn resize(&self, id: &TerminalId, cols: u16, rows: u16) {
        let Some(tx) = self.sessions.get(id).map(|h| h.cmd_tx.clone()) else {
            return;
        };
        let _ = tx.send(SessionCommand::Resize { cols, rows }).await;
    }

    /// Stop a session. Safe to call redundantly; a second stop for the same
    /// id finds no entry and does nothing.
    pub async fn stop(&self, id: &TerminalId) {
        if let Some((_, handle)) = self.sessions.remove(id) {
            let _ = handle.cmd_tx.send(SessionCommand::Stop).await;
            tracing::info!("Stopped terminal session {}", id);
        }
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Stop every session (process shutdown)
    pub async fn drain(&self) {
        let ids: Vec<TerminalId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop(&id).await;
        }
    }

    #[cfg(test)]
    fn insert_for_test(&self, id: TerminalId, cmd_tx: mpsc::Sender<SessionCommand>) {
        let serial = self.next_serial.fetch_add(1, Ordering::SeqCst);
        self.sessions.insert(id, TerminalHandle { serial, cmd_tx });
    }
}

/// Session task: connect, attach the shell channel, then dispatch channel
/// output and client commands until either side closes.
async fn run_session(
    registry: Arc<TerminalRegistry>,
    id: TerminalId,
    serial: u64,
    auth: AuthDescriptor,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
) {
    match open_shell(&auth, registry.connect_timeout).await {
        Ok((session, mut channel)) => {
            tracing::info!("Terminal session {} running on {}", id, auth.host);

            loop {
                tokio::select! {
                    msg = channel.wait() => match msg {
                        Some(russh::ChannelMsg::Data { ref data }) => {
                            publish_data(&registry.broadcaster, &id, data);
                        }
                        Some(russh::ChannelMsg::ExtendedData { ref data, .. }) => {
                            publish_data(&registry.broadcaster, &id, data);
                        }
                        Some(russh::ChannelMsg::Eof)
                        | Some(russh::ChannelMsg::Close)
                        | None => break,
                        Some(_) => {}
                    },
                    cmd = cmd_rx.recv() => match cmd {
                        Some(SessionCommand::Write(bytes)) => {
                            if channel.data(&bytes[..]).await.is_err() {
                                break;
                            }
                        }
                        Some(SessionCommand::Resize { cols, rows }) => {
                            let _ = channel
                                .window_change(u32::from(cols), u32::from(rows), 0, 0)
                                .await;
                        }
                        Some(SessionCommand::Stop) | None => break,
                    },
                }
            }

            // Closing always also closes the underlying connection
            let _ = session
                .disconnect(russh::Disconnect::ByApplication, "terminal closed", "en")
                .await;
            tracing::info!("Terminal session {} closed", id);
        }
        Err(e) => {
            // Deliver the failure once through the terminal's own data
            // stream so the client sees it inside the terminal view
            tracing::warn!("Terminal session {} failed to start: {}", id, e);
            let message = format!("\r\n[tiller] connection failed: {}\r\n", e);
            publish_data(&registry.broadcaster, &id, message.as_bytes());
        }
    }

    // Remove our registry entry unless a replacement already took the id
    registry
        .sessions
        .remove_if(&id, |_, handle| handle.serial == serial);
}

fn publish_data(broadcaster: &EventBroadcaster, id: &TerminalId, bytes: &[u8]) {
    broadcaster.publish(
        EVENT_TERMINAL_DATA,
        &TerminalData {
            id: id.clone(),
            data: BASE64.encode(bytes),
        },
    );
}

/// Connect and allocate an interactive PTY shell channel
async fn open_shell(
    auth: &AuthDescriptor,
    connect_timeout: Duration,
) -> Result<
    (
        russh::client::Handle<ssh::ClientHandler>,
        russh::Channel<russh::client::Msg>,
    ),
    BrokerError,
> {
    let session = ssh::open_session(auth, connect_timeout).await?;

    let mut channel = session
        .channel_open_session()
        .await
        .map_err(|e| BrokerError::Connect(format!("failed to open channel: {}", e)))?;

    channel
        .request_pty(true, "xterm-256color", 80, 24, 0, 0, &[])
        .await
        .map_err(|e| BrokerError::Connect(format!("failed to allocate PTY: {}", e)))?;

    channel
        .request_shell(true)
        .await
        .map_err(|e| BrokerError::Connect(format!("failed to start shell: {}", e)))?;

    Ok((session, channel))
}
