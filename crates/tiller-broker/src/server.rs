//! IPC server implementation
//!
//! Listens on localhost TCP for requests from the desktop app. Each client
//! connection multiplexes the request/response channel and the event stream
//! over one socket: responses answer request lines in order, and event lines
//! are pushed whenever the broadcaster publishes.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tiller_core::ipc::{Request, Response};

use crate::dispatch;
use crate::state::BrokerState;

/// IPC server for desktop/CLI communication
///
/// Listens on localhost (127.0.0.1) only - not accessible from the network.
pub struct IpcServer {
    /// Address to bind (127.0.0.1:port)
    pub address: String,
    /// Broker state
    state: Arc<BrokerState>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(address: String, state: Arc<BrokerState>) -> Self {
        Self { address, state }
    }

    /// Run the server until the shutdown token fires, then release all
    /// broker resources (drain terminals, stop polling).
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", self.address))?;

        tracing::info!("IPC server listening on {}", self.address);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown requested, draining sessions");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        // Only accept connections from localhost
                        if !peer_addr.ip().is_loopback() {
                            tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                            continue;
                        }

                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(stream, state).await {
                                tracing::warn!("IPC client error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept IPC connection: {}", e);
                    }
                }
            }
        }

        self.state.shutdown().await;
        Ok(())
    }
}

async fn handle_client(stream: TcpStream, state: Arc<BrokerState>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Every client receives the event stream for the lifetime of its socket
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<String>();
    let sink_id = state.broadcaster.subscribe(event_tx);

    let result = loop {
        tokio::select! {
            // Handle incoming requests
            read = reader.read_line(&mut line) => {
                match read {
                    Ok(0) => break Ok(()), // EOF
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            line.clear();
                            continue;
                        }

                        let response = match serde_json::from_str::<Request>(trimmed) {
                            Ok(request) => dispatch::dispatch(&state, request).await,
                            Err(e) => Response::err(format!("Invalid request: {}", e)),
                        };

                        let mut response_json = match serde_json::to_string(&response) {
                            Ok(json) => json,
                            Err(e) => break Err(e.into()),
                        };
                        response_json.push('\n');
                        if let Err(e) = writer.write_all(response_json.as_bytes()).await {
                            break Err(e.into());
                        }

                        line.clear();
                    }
                    Err(e) => break Err(e.into()),
                }
            }

            // Forward broadcast events to this client
            event = event_rx.recv() => {
                match event {
                    Some(mut event_json) => {
                        event_json.push('\n');
                        if let Err(e) = writer.write_all(event_json.as_bytes()).await {
                            break Err(e.into());
                        }
                    }
                    None => break Ok(()),
                }
            }
        }
    };

    state.broadcaster.unsubscribe(sink_id);
    result
}
