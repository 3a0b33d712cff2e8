//! SSH transport: one-shot command client and shared connect logic
//!
//! Wraps the russh client. Each logical connection maps to one SSH session;
//! one-shot commands each open a fresh exec channel on that session, so a
//! single client can serve a whole metrics tick concurrently.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Config, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use tokio::time::timeout;

use tiller_core::BrokerError;

use crate::auth::{AuthDescriptor, Credential};

/// Collected output of one remote command
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Seam for executing remote commands, so the metrics poller and one-shot
/// operations can be driven by scripted runners in tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one command to completion on the open connection.
    ///
    /// Fails with [`BrokerError::Command`] when the remote exit code is
    /// non-zero.
    async fn exec(&self, command: &str) -> Result<ExecOutput, BrokerError>;
}

/// russh client handler.
///
/// Host key verification is delegated to the desktop client's known-hosts
/// handling; the broker accepts the presented key.
pub(crate) struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!("Server host key: {}", server_public_key.fingerprint());
        Ok(true)
    }
}

/// Open and authenticate an SSH session for the given descriptor.
///
/// A descriptor without a credential still attempts `none` authentication;
/// the resulting rejection surfaces as a [`BrokerError::Connect`].
pub(crate) async fn open_session(
    auth: &AuthDescriptor,
    connect_timeout: Duration,
) -> Result<Handle<ClientHandler>, BrokerError> {
    let config = Arc::new(Config::default());

    tracing::debug!("Connecting to {}:{}", auth.host, auth.port);
    let mut session = timeout(
        connect_timeout,
        client::connect(config, (auth.host.as_str(), auth.port), ClientHandler),
    )
    .await
    .map_err(|_| BrokerError::Connect(format!("timed out connecting to {}", auth.host)))?
    .map_err(|e| BrokerError::Connect(format!("{}:{}: {}", auth.host, auth.port, e)))?;

    let authenticated = match &auth.credential {
        Some(Credential::Password(password)) => session
            .authenticate_password(&auth.username, password)
            .await
            .map_err(BrokerError::connect)?,
        Some(Credential::PrivateKey(bytes)) => {
            let pem = std::str::from_utf8(bytes)
                .map_err(|_| BrokerError::Connect("private key is not valid UTF-8".to_string()))?;
            let key = russh_keys::decode_secret_key(pem, None)
                .map_err(|e| BrokerError::Connect(format!("invalid private key: {}", e)))?;
            session
                .authenticate_publickey(&auth.username, Arc::new(key))
                .await
                .map_err(BrokerError::connect)?
        }
        None => session
            .authenticate_none(&auth.username)
            .await
            .map_err(BrokerError::connect)?,
    };

    if !authenticated {
        return Err(BrokerError::Connect(format!(
            "authentication failed for {}@{}",
            auth.username, auth.host
        )));
    }

    Ok(session)
}

/// One transport connection used for one-shot remote commands.
///
/// Callers issue one command at a time by convention; the metrics poller is
/// the exception and opens its per-tick channels concurrently.
pub struct RemoteClient {
    session: Handle<ClientHandler>,
}

impl RemoteClient {
    /// Open a connection for the given descriptor
    pub async fn connect(
        auth: &AuthDescriptor,
        connect_timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let session = open_session(auth, connect_timeout).await?;
        Ok(Self { session })
    }

    /// Close the connection. Idempotent: repeated calls are no-ops.
    pub async fn end(&self) {
        let _ = self
            .session
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await;
    }
}

#[async_trait]
impl CommandRunner for RemoteClient {
    async fn exec(&self, command: &str) -> Result<ExecOutput, BrokerError> {
        let mut channel: Channel<Msg> = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| BrokerError::Connect(format!("failed to open channel: {}", e)))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| BrokerError::Connect(format!("failed to start command: {}", e)))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code: Option<u32> = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                _ => {}
            }
        }

        let output = ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        };

        match exit_code {
            Some(code) if code != 0 => Err(BrokerError::Command {
                exit_code: code,
                stderr: output.stderr,
            }),
            _ => Ok(output),
        }
    }
}
