//! Request dispatcher: channel names to operations
//!
//! Every inbound request is validated into its typed argument struct, the
//! required collaborators are resolved (connection lookup, auth resolver),
//! and the result or error is normalized into the uniform response
//! envelope. Errors never cross this boundary as panics, and any client
//! opened for a one-shot operation is closed on every exit path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use tiller_core::ipc::{
    ConnectionArgs, ConnectionTestArgs, CronReadLogArgs, CronSaveArgs, MetricsStartArgs,
    ProcessKillArgs, Request, Response, TerminalCreateArgs, TerminalResizeArgs, TerminalStopArgs,
    TerminalWriteArgs,
};
use tiller_core::types::{ConnectionId, ConnectionRecord, TerminalId};
use tiller_core::BrokerError;

use crate::auth::resolve_auth;
use crate::ops;
use crate::ssh::{CommandRunner, RemoteClient};
use crate::state::BrokerState;

/// Dispatch one request and produce its response envelope
pub async fn dispatch(state: &Arc<BrokerState>, request: Request) -> Response {
    tracing::debug!("Dispatching {}", request.channel);
    match handle(state, &request.channel, request.args).await {
        Ok(result) => Response::ok(result),
        Err(message) => {
            tracing::debug!("Request {} failed: {}", request.channel, message);
            Response::err(message)
        }
    }
}

async fn handle(
    state: &Arc<BrokerState>,
    channel: &str,
    args: Value,
) -> Result<Value, String> {
    match channel {
        "broker:status" => {
            let polling = state
                .poller
                .active_connection()
                .await
                .map(|id| id.to_string());
            Ok(json!({
                "version": env!("CARGO_PKG_VERSION"),
                "uptimeSecs": state.uptime_secs(),
                "activeTerminals": state.terminals.len(),
                "polling": polling,
            }))
        }

        "connection:test" => {
            let args: ConnectionTestArgs = parse_args(args)?;
            let record = ConnectionRecord {
                id: ConnectionId::new("unsaved"),
                name: None,
                host: args.host,
                port: args.port,
                username: args.username,
                auth_method: args.auth_method,
                key_path: args.key_path.map(PathBuf::from),
                services: vec![],
            };
            // The raw secret the user just typed wins over anything stored
            let auth = resolve_auth(&record, args.password.as_deref(), true, state.secrets.as_ref())
                .await
                .map_err(stringify)?;

            let client = RemoteClient::connect(&auth, state.config.connect_timeout)
                .await
                .map_err(stringify)?;
            let result = client.exec("echo ok").await;
            client.end().await;
            result.map_err(stringify)?;

            Ok(json!({ "connected": true }))
        }

        "terminal:create" => {
            let args: TerminalCreateArgs = parse_args(args)?;
            let record = lookup(state, &args.connection_id).await?;
            let auth = resolve_auth(&record, None, false, state.secrets.as_ref())
                .await
                .map_err(stringify)?;

            state.terminals.open(TerminalId::new(args.id.clone()), auth).await;
            Ok(json!({ "id": args.id }))
        }

        "terminal:stop" => {
            let args: TerminalStopArgs = parse_args(args)?;
            state.terminals.stop(&TerminalId::new(args.id)).await;
            Ok(Value::Null)
        }

        "terminal:write" => {
            let args: TerminalWriteArgs = parse_args(args)?;
            state
                .terminals
                .write(&TerminalId::new(args.id), &args.data)
                .await;
            Ok(Value::Null)
        }

        "terminal:resize" => {
            let args: TerminalResizeArgs = parse_args(args)?;
            state
                .terminals
                .resize(&TerminalId::new(args.id), args.cols, args.rows)
                .await;
            Ok(Value::Null)
        }

        "metrics:start" => {
            let args: MetricsStartArgs = parse_args(args)?;
            let record = lookup(state, &args.connection_id).await?;
            let auth = resolve_auth(&record, None, false, state.secrets.as_ref())
                .await
                .map_err(stringify)?;

            let interval = args
                .interval_ms
                .map(Duration::from_millis)
                .filter(|d| !d.is_zero())
                .unwrap_or(state.config.poll_interval);

            state
                .poller
                .start(
                    record.id.clone(),
                    auth,
                    record.services.clone(),
                    interval,
                    state.config.connect_timeout,
                    Arc::clone(&state.broadcaster),
                )
                .await
                .map_err(stringify)?;

            Ok(json!({ "started": true }))
        }

        "metrics:stop" => {
            state.poller.stop().await;
            Ok(Value::Null)
        }

        "process:list" => {
            let args: ConnectionArgs = parse_args(args)?;
            let client = open_client(state, &args.connection_id).await?;
            let result = ops::process_list(&client).await;
            client.end().await;
            Ok(json!({ "processes": result.map_err(stringify)? }))
        }

        "process:kill" => {
            let args: ProcessKillArgs = parse_args(args)?;
            let client = open_client(state, &args.connection_id).await?;
            let result = ops::process_kill(&client, args.pid).await;
            client.end().await;
            result.map_err(stringify)?;
            Ok(json!({ "killed": args.pid }))
        }

        "cron:list" => {
            let args: ConnectionArgs = parse_args(args)?;
            let client = open_client(state, &args.connection_id).await?;
            let result = ops::cron_list(&client).await;
            client.end().await;
            Ok(json!({ "crontab": result.map_err(stringify)? }))
        }

        "cron:save" => {
            let args: CronSaveArgs = parse_args(args)?;
            let client = open_client(state, &args.connection_id).await?;
            let result = ops::cron_save(&client, &args.content).await;
            client.end().await;
            result.map_err(stringify)?;
            Ok(json!({ "saved": true }))
        }

        "cron:readLog" => {
            let args: CronReadLogArgs = parse_args(args)?;
            let client = open_client(state, &args.connection_id).await?;
            let result = ops::cron_read_log(&client, args.path.as_deref()).await;
            client.end().await;
            Ok(json!({ "log": result.map_err(stringify)? }))
        }

        _ => Err(format!("unknown channel: {}", channel)),
    }
}

fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, String> {
    serde_json::from_value(args).map_err(|e| format!("invalid arguments: {}", e))
}

fn stringify(e: BrokerError) -> String {
    e.to_string()
}

async fn lookup(state: &BrokerState, connection_id: &str) -> Result<ConnectionRecord, String> {
    state
        .store
        .get(&ConnectionId::new(connection_id))
        .await
        .map_err(stringify)?
        .ok_or_else(|| stringify(BrokerError::NotFound(connection_id.to_string())))
}

/// Resolve a stored connection into a connected one-shot client
async fn open_client(state: &BrokerState, connection_id: &str) -> Result<RemoteClient, String> {
    let record = lookup(state, connection_id).await?;
    let auth = resolve_auth(&record, None, false, state.secrets.as_ref())
        .await
        .map_err(stringify)?;
    RemoteClient::connect(&auth, state.config.connect_timeout)
        .await
        .map_err(stringify)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiller_core::config::BrokerConfig;

    fn test_state() -> Arc<BrokerState> {
        Arc::new(BrokerState::new(BrokerConfig::default()))
    }

    fn request(channel: &str, args: Value) -> Request {
        Request {
            channel: channel.to_string(),
            args,
        }
    }

    #[tokio::test]
    async fn test_unknown_channel_yields_failure_envelope() {
        let state = test_state();
        let response = dispatch(&state, request("bogus:channel", Value::Null)).await;

        assert!(!response.success);
        let error = response.error.unwrap();
        assert!(error.contains("unknown channel: bogus:channel"));
    }

    #[tokio::test]
    async fn test_terminal_write_unknown_id_is_noop_success() {
        let state = test_state();
        let response = dispatch(
            &state,
            request("terminal:write", json!({"id": "ghost", "data": "aGk="})),
        )
        .await;

        assert!(response.success);
        assert!(state.terminals.is_empty());
    }

    #[tokio::test]
    async fn test_terminal_stop_twice_succeeds() {
        let state = test_state();
        for _ in 0..2 {
            let response =
                dispatch(&state, request("terminal:stop", json!({"id": "t1"}))).await;
            assert!(response.success);
        }
    }

    #[tokio::test]
    async fn test_metrics_stop_when_idle_succeeds() {
        let state = test_state();
        let response = dispatch(&state, request("metrics:stop", Value::Null)).await;
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_metrics_start_unknown_connection_fails() {
        let state = test_state();
        let response = dispatch(
            &state,
            request("metrics:start", json!({"connectionId": "missing"})),
        )
        .await;

        assert!(!response.success);
        assert!(response.error.unwrap().contains("Connection not found"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_fail_cleanly() {
        let state = test_state();
        let response = dispatch(
            &state,
            request("terminal:resize", json!({"id": "t1", "cols": "wide"})),
        )
        .await;

        assert!(!response.success);
        assert!(response.error.unwrap().contains("invalid arguments"));
    }

    #[tokio::test]
    async fn test_broker_status_reports_counts() {
        let state = test_state();
        let response = dispatch(&state, request("broker:status", Value::Null)).await;

        assert!(response.success);
        let result = response.result.unwrap();
        assert_eq!(result["activeTerminals"], 0);
        assert!(result["polling"].is_null());
    }
}
