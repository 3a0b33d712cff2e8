//! IPC schema for desktop-client to broker communication
//!
//! Uses line-delimited JSON over TCP on localhost (127.0.0.1). Each request
//! carries a channel name and an argument bag; the arguments are validated
//! into the typed structs below at the dispatcher boundary before any
//! component logic runs. Responses share a single uniform envelope.
//!
//! A separate event stream (same socket, pushed lines) delivers
//! `terminal:data` and `metrics:update` events out of band.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AuthMethod, TerminalId};

/// Event name for terminal output pushes
pub const EVENT_TERMINAL_DATA: &str = "terminal:data";

/// Event name for metrics snapshot/error pushes
pub const EVENT_METRICS_UPDATE: &str = "metrics:update";

/// A request from the client: channel name plus argument bag
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Channel name, e.g. `terminal:create`
    pub channel: String,

    /// Channel-specific arguments
    #[serde(default)]
    pub args: Value,
}

/// Uniform response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Whether the operation succeeded
    pub success: bool,

    /// Operation result (present on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error message (present on failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Build a success envelope
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Build a failure envelope
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(message.into()),
        }
    }
}

/// An event pushed from the broker to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event name, e.g. `terminal:data`
    pub event: String,

    /// Event payload
    pub payload: Value,
}

// ---------------------------------------------------------------------------
// Per-channel request arguments
// ---------------------------------------------------------------------------

/// Arguments for `terminal:create`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalCreateArgs {
    /// Client-supplied terminal id
    pub id: String,
    /// Stored connection to open the shell on
    pub connection_id: String,
}

/// Arguments for `terminal:stop`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalStopArgs {
    pub id: String,
}

/// Arguments for `terminal:write`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalWriteArgs {
    pub id: String,
    /// Base64-encoded bytes to write to the shell
    pub data: String,
}

/// Arguments for `terminal:resize`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalResizeArgs {
    pub id: String,
    pub cols: u16,
    pub rows: u16,
}

/// Arguments for `metrics:start`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsStartArgs {
    pub connection_id: String,
    /// Polling interval in milliseconds; the broker default applies if absent
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

/// Arguments for one-shot operations that only need a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionArgs {
    pub connection_id: String,
}

/// Arguments for `process:kill`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessKillArgs {
    pub connection_id: String,
    pub pid: u32,
}

/// Arguments for `cron:save`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronSaveArgs {
    pub connection_id: String,
    /// Full crontab content to install
    pub content: String,
}

/// Arguments for `cron:readLog`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronReadLogArgs {
    pub connection_id: String,
    /// Log file to tail; defaults to /var/log/syslog
    #[serde(default)]
    pub path: Option<String>,
}

/// Arguments for `connection:test` (test-before-save flow).
///
/// Carries a full inline connection description; `password` is the raw
/// secret the user just typed, preferred over anything in the secret store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTestArgs {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_ssh_port() -> u16 {
    22
}

// ---------------------------------------------------------------------------
// Event payloads and result types
// ---------------------------------------------------------------------------

/// Payload of a `terminal:data` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalData {
    /// Terminal id the bytes belong to
    pub id: TerminalId,
    /// Base64-encoded output bytes
    pub data: String,
}

/// Payload of a `metrics:update` event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsUpdate {
    /// `"ok"` or `"error"`
    pub status: String,

    /// Snapshot data (present when status is `"ok"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<MetricsSnapshot>,

    /// Error message (present when status is `"error"`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MetricsUpdate {
    /// Build an ok update carrying a snapshot
    pub fn ok(data: MetricsSnapshot) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            message: None,
        }
    }

    /// Build an error update carrying a message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            message: Some(message.into()),
        }
    }
}

/// One full metrics sample.
///
/// All fields are display-oriented strings taken from remote command output;
/// unparseable fields degrade to `"N/A"` and network rates to `"0.0"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub uptime: String,
    pub memory: MemoryStats,
    pub disk: DiskStats,
    pub cpu_percent: String,
    pub system: SystemInfo,
    pub network: NetworkRates,
    pub services: Vec<ServiceStatus>,
}

/// Memory usage in MiB, from `free -m`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total: String,
    pub used: String,
    pub free: String,
}

/// Root filesystem usage, from `df -h /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskStats {
    pub total: String,
    pub used: String,
    pub available: String,
    pub percent: String,
}

/// Static host identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub kernel: String,
    pub arch: String,
    pub os: String,
    pub cpu_model: String,
}

/// Network throughput in KB/s, formatted to one decimal place
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRates {
    #[serde(rename = "inRateKBps")]
    pub in_kbps: String,
    #[serde(rename = "outRateKBps")]
    pub out_kbps: String,
}

impl NetworkRates {
    /// The zero rate reported before a baseline sample exists
    pub fn zero() -> Self {
        Self {
            in_kbps: "0.0".to_string(),
            out_kbps: "0.0".to_string(),
        }
    }
}

/// One monitored service and its `systemctl is-active` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub name: String,
    pub status: String,
}

/// One row of `ps aux` output, from `process:list`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub user: String,
    pub cpu: String,
    pub mem: String,
    pub command: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserialization() {
        let req: Request = serde_json::from_str(
            r#"{"channel":"terminal:create","args":{"id":"t1","connectionId":"c1"}}"#,
        )
        .unwrap();
        assert_eq!(req.channel, "terminal:create");

        let args: TerminalCreateArgs = serde_json::from_value(req.args).unwrap();
        assert_eq!(args.id, "t1");
        assert_eq!(args.connection_id, "c1");
    }

    #[test]
    fn test_request_missing_args_defaults_to_null() {
        let req: Request = serde_json::from_str(r#"{"channel":"metrics:stop"}"#).unwrap();
        assert!(req.args.is_null());
    }

    #[test]
    fn test_response_envelope_shape() {
        let ok = Response::ok(serde_json::json!({"stopped": true}));
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("error"));

        let err = Response::err("unknown channel: bogus");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"success\":false"));
        assert!(json.contains("unknown channel"));
        assert!(!json.contains("result"));
    }

    #[test]
    fn test_network_rates_wire_names() {
        let rates = NetworkRates::zero();
        let json = serde_json::to_string(&rates).unwrap();
        assert!(json.contains("\"inRateKBps\":\"0.0\""));
        assert!(json.contains("\"outRateKBps\":\"0.0\""));
    }

    #[test]
    fn test_metrics_update_variants() {
        let err = MetricsUpdate::error("uptime command failed");
        assert_eq!(err.status, "error");
        assert!(err.data.is_none());

        let json = serde_json::to_string(&err).unwrap();
        assert!(!json.contains("\"data\""));
    }
}
