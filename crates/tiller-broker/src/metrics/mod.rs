//! Metrics polling state machine
//!
//! At most one poller is active per broker process. Starting a new one fully
//! stops any existing one first (transport closed, tick cancelled, rolling
//! state discarded), so no two polling sessions ever share rate state.
//!
//! Ticks are fixed-period: each tick body runs in its own task, so a fetch
//! that outlives the interval overlaps the next tick rather than delaying
//! it. A failure in any fixed system-metric command is terminal for the
//! polling session: the poller emits an error event and stops itself.
//! Individual service-check failures are tolerated.

pub mod parse;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tiller_core::ipc::{
    MetricsSnapshot, MetricsUpdate, NetworkRates, ServiceStatus, EVENT_METRICS_UPDATE,
};
use tiller_core::types::ConnectionId;
use tiller_core::BrokerError;

use crate::auth::AuthDescriptor;
use crate::broadcast::EventBroadcaster;
use crate::ssh::{CommandRunner, RemoteClient};

use self::parse::{
    service_command, MetricsParser, CPU_COMMAND, DISK_COMMAND, MEMORY_COMMAND, NETWORK_COMMAND,
    SYSTEM_COMMAND, UPTIME_COMMAND,
};

/// Rolling network-counter state for rate computation.
///
/// The first sample after construction establishes the baseline and reports
/// a zero rate; every later sample reports the per-second delta in KB/s and
/// overwrites the stored counters, clamp or not.
pub struct RateTracker {
    counters: Option<(u64, u64)>,
    sampled_at: Option<Instant>,
}

impl RateTracker {
    /// Create a tracker with no baseline
    pub fn new() -> Self {
        Self {
            counters: None,
            sampled_at: None,
        }
    }

    /// Fold in one counter sample and return the formatted rates.
    ///
    /// A negative delta (counter reset or wrap) is clamped to `0.0` rather
    /// than reported negative.
    pub fn update(&mut self, rx_bytes: u64, tx_bytes: u64, now: Instant) -> NetworkRates {
        let rates = match (self.counters, self.sampled_at) {
            (Some((prev_rx, prev_tx)), Some(prev_at)) => {
                let elapsed = now.duration_since(prev_at).as_secs_f64();
                if elapsed > 0.0 {
                    let in_kbps = (rx_bytes as f64 - prev_rx as f64) / elapsed / 1024.0;
                    let out_kbps = (tx_bytes as f64 - prev_tx as f64) / elapsed / 1024.0;
                    NetworkRates {
                        in_kbps: format!("{:.1}", in_kbps.max(0.0)),
                        out_kbps: format!("{:.1}", out_kbps.max(0.0)),
                    }
                } else {
                    NetworkRates::zero()
                }
            }
            _ => NetworkRates::zero(),
        };

        self.counters = Some((rx_bytes, tx_bytes));
        self.sampled_at = Some(now);
        rates
    }
}

impl Default for RateTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one full fetch: the six fixed metric commands concurrently, plus one
/// tolerant check per monitored service.
///
/// Fails (aborting the tick) if any fixed command fails; a failed service
/// check is recorded as status `"failed"` instead.
pub(crate) async fn fetch_snapshot<R: CommandRunner + ?Sized>(
    runner: &R,
    services: &[String],
    tracker: &Mutex<RateTracker>,
) -> Result<MetricsSnapshot, BrokerError> {
    let (uptime, memory, disk, cpu, system, net) = tokio::try_join!(
        runner.exec(UPTIME_COMMAND),
        runner.exec(MEMORY_COMMAND),
        runner.exec(DISK_COMMAND),
        runner.exec(CPU_COMMAND),
        runner.exec(SYSTEM_COMMAND),
        runner.exec(NETWORK_COMMAND),
    )?;

    let network = match MetricsParser::parse_network(&net.stdout) {
        Some((rx, tx)) => tracker.lock().await.update(rx, tx, Instant::now()),
        // No matching interface: zero rate, and no fabricated baseline
        None => NetworkRates::zero(),
    };

    let checks = services.iter().map(|name| async move {
        let status = match runner.exec(&service_command(name)).await {
            Ok(output) => {
                let state = output.stdout.trim();
                if state.is_empty() {
                    "failed".to_string()
                } else {
                    state.to_string()
                }
            }
            Err(e) => {
                tracing::debug!("Service check for {} failed: {}", name, e);
                "failed".to_string()
            }
        };
        ServiceStatus {
            name: name.clone(),
            status,
        }
    });
    let services = join_all(checks).await;

    Ok(MetricsSnapshot {
        uptime: MetricsParser::parse_uptime(&uptime.stdout),
        memory: MetricsParser::parse_memory(&memory.stdout),
        disk: MetricsParser::parse_disk(&disk.stdout),
        cpu_percent: MetricsParser::parse_cpu(&cpu.stdout),
        system: MetricsParser::parse_system(&system.stdout),
        network,
        services,
    })
}

/// One running polling session
struct ActivePoller {
    connection_id: ConnectionId,
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    client: Arc<RemoteClient>,
}

/// Owner of the single active polling session
pub struct MetricsPoller {
    slot: Mutex<Option<ActivePoller>>,
    next_generation: AtomicU64,
}

impl MetricsPoller {
    /// Create an idle poller
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Start polling a connection.
    ///
    /// Any active polling session is fully stopped first. Opens the command
    /// client, performs one immediate fetch-and-emit, then keeps fetching at
    /// `interval` until stopped or a fixed-metric command fails.
    pub async fn start(
        self: &Arc<Self>,
        connection_id: ConnectionId,
        auth: AuthDescriptor,
        services: Vec<String>,
        interval: Duration,
        connect_timeout: Duration,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Result<(), BrokerError> {
        self.stop().await;

        let client = Arc::new(RemoteClient::connect(&auth, connect_timeout).await?);
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(poll_loop(
            Arc::clone(self),
            generation,
            Arc::clone(&client),
            services,
            interval,
            cancel.clone(),
            broadcaster,
        ));

        let mut slot = self.slot.lock().await;
        *slot = Some(ActivePoller {
            connection_id: connection_id.clone(),
            generation,
            cancel,
            task,
            client,
        });

        tracing::info!(
            "Metrics polling started for {} every {:?}",
            connection_id,
            interval
        );
        Ok(())
    }

    /// Stop the active polling session: cancel the tick, close the client,
    /// discard rolling state. Safe to call when already idle.
    pub async fn stop(&self) {
        let active = self.slot.lock().await.take();
        let Some(poller) = active else {
            return;
        };

        poller.cancel.cancel();
        let _ = poller.task.await;
        poller.client.end().await;
        tracing::info!("Metrics polling stopped for {}", poller.connection_id);
    }

    /// Connection currently being polled, if any
    pub async fn active_connection(&self) -> Option<ConnectionId> {
        self.slot
            .lock()
            .await
            .as_ref()
            .map(|p| p.connection_id.clone())
    }

    /// Clear the slot after a self-stop, unless a replacement already owns it
    async fn clear_if_current(&self, generation: u64) {
        let mut slot = self.slot.lock().await;
        if slot.as_ref().is_some_and(|p| p.generation == generation) {
            *slot = None;
        }
    }
}

impl Default for MetricsPoller {
    fn default() -> Self {
        Self::new()
    }
}

/// Tick loop for one polling session.
///
/// Fixed-period ticks; each tick body is spawned so a slow fetch may overlap
/// the next tick. Rolling rate state is shared behind a mutex. The first
/// fatal error ends the session.
async fn poll_loop(
    poller: Arc<MetricsPoller>,
    generation: u64,
    client: Arc<RemoteClient>,
    services: Vec<String>,
    interval: Duration,
    cancel: CancellationToken,
    broadcaster: Arc<EventBroadcaster>,
) {
    let tracker = Arc::new(Mutex::new(RateTracker::new()));
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<BrokerError>(1);
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            Some(err) = fatal_rx.recv() => {
                tracing::warn!("Metrics polling stopped on fetch failure: {}", err);
                broadcaster.publish(EVENT_METRICS_UPDATE, &MetricsUpdate::error(err.to_string()));
                client.end().await;
                poller.clear_if_current(generation).await;
                return;
            }

            _ = ticker.tick() => {
                let client = Arc::clone(&client);
                let tracker = Arc::clone(&tracker);
                let services = services.clone();
                let broadcaster = Arc::clone(&broadcaster);
                let cancel = cancel.clone();
                let fatal_tx = fatal_tx.clone();

                tokio::spawn(async move {
                    match fetch_snapshot(client.as_ref(), &services, &tracker).await {
                        Ok(snapshot) => {
                            // A tick settling after stop() must not emit
                            if !cancel.is_cancelled() {
                                broadcaster.publish(
                                    EVENT_METRICS_UPDATE,
                                    &MetricsUpdate::ok(snapshot),
                                );
                            }
                        }
                        Err(err) => {
                            let _ = fatal_tx.try_send(err);
                        }
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::ExecOutput;
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[test]
    fn test_first_sample_reports_zero_rate() {
        let mut tracker = RateTracker::new();
        let rates = tracker.update(1_000_000, 500_000, Instant::now());
        assert_eq!(rates.in_kbps, "0.0");
        assert_eq!(rates.out_kbps, "0.0");
    }

    #[test]
    fn test_rate_computed_from_delta() {
        let mut tracker = RateTracker::new();
        let t0 = Instant::now();
        tracker.update(0, 0, t0);

        // 2048 KiB received over 2 seconds -> 1024.0 KB/s in, half that out
        let rates = tracker.update(2048 * 1024, 1024 * 1024, t0 + Duration::from_secs(2));
        assert_eq!(rates.in_kbps, "1024.0");
        assert_eq!(rates.out_kbps, "512.0");
    }

    #[test]
    fn test_identical_counters_yield_zero_rate() {
        let mut tracker = RateTracker::new();
        let t0 = Instant::now();
        tracker.update(9000, 4000, t0);

        let rates = tracker.update(9000, 4000, t0 + Duration::from_secs(5));
        assert_eq!(rates.in_kbps, "0.0");
        assert_eq!(rates.out_kbps, "0.0");
    }

    #[test]
    fn test_decreasing_counters_clamp_to_zero() {
        let mut tracker = RateTracker::new();
        let t0 = Instant::now();
        tracker.update(1_000_000, 1_000_000, t0);

        // Simulated counter reset
        let rates = tracker.update(100, 100, t0 + Duration::from_secs(1));
        assert_eq!(rates.in_kbps, "0.0");
        assert_eq!(rates.out_kbps, "0.0");
    }

    #[test]
    fn test_counters_overwritten_even_on_clamp() {
        let mut tracker = RateTracker::new();
        let t0 = Instant::now();
        tracker.update(1_000_000, 1_000_000, t0);
        tracker.update(0, 0, t0 + Duration::from_secs(1));

        // The clamped sample became the new baseline
        let rates = tracker.update(2048, 1024, t0 + Duration::from_secs(3));
        assert_eq!(rates.in_kbps, "1.0");
        assert_eq!(rates.out_kbps, "0.5");
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_safe() {
        let poller = Arc::new(MetricsPoller::new());
        poller.stop().await;
        poller.stop().await;
        assert!(poller.active_connection().await.is_none());
    }

    /// Scripted runner: maps command strings to canned outputs; commands
    /// mapped to `None` (and unknown commands) fail.
    struct FakeRunner {
        responses: HashMap<String, Option<ExecOutput>>,
    }

    impl FakeRunner {
        fn ok(mut self, command: impl Into<String>, stdout: &str) -> Self {
            self.responses.insert(
                command.into(),
                Some(ExecOutput {
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                }),
            );
            self
        }

        fn failing(mut self, command: impl Into<String>) -> Self {
            self.responses.insert(command.into(), None);
            self
        }

        fn with_fixed_metrics() -> Self {
            let net = "  eth0: 1000000 10 0 0 0 0 0 0 500000 8 0 0 0 0 0 0\n";
            Self {
                responses: HashMap::new(),
            }
            .ok(UPTIME_COMMAND, "up 1 hour\n")
            .ok(MEMORY_COMMAND, "header\nMem: 16000 8000 4000\n")
            .ok(DISK_COMMAND, "header\n/dev/sda1 98G 41G 52G 45% /\n")
            .ok(CPU_COMMAND, "12.5\n")
            .ok(SYSTEM_COMMAND, "6.8.0\nx86_64\nUbuntu 24.04\nXeon\n")
            .ok(NETWORK_COMMAND, net)
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn exec(&self, command: &str) -> Result<ExecOutput, BrokerError> {
            match self.responses.get(command) {
                Some(Some(output)) => Ok(output.clone()),
                _ => Err(BrokerError::Command {
                    exit_code: 1,
                    stderr: format!("scripted failure for: {}", command),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_first_fetch_has_services_and_zero_network() {
        let runner = FakeRunner::with_fixed_metrics()
            .ok(service_command("nginx"), "active\n")
            .ok(service_command("redis"), "inactive\n");
        let services = vec!["nginx".to_string(), "redis".to_string()];
        let tracker = Mutex::new(RateTracker::new());

        let snapshot = fetch_snapshot(&runner, &services, &tracker).await.unwrap();

        assert_eq!(snapshot.network.in_kbps, "0.0");
        assert_eq!(snapshot.network.out_kbps, "0.0");
        assert_eq!(snapshot.services.len(), 2);
        assert_eq!(snapshot.services[0].name, "nginx");
        assert_eq!(snapshot.services[0].status, "active");
        assert_eq!(snapshot.services[1].name, "redis");
        assert_eq!(snapshot.services[1].status, "inactive");
        assert_eq!(snapshot.memory.total, "16000");
        assert_eq!(snapshot.uptime, "1 hour");
    }

    #[tokio::test]
    async fn test_failed_service_check_is_tolerated() {
        let runner = FakeRunner::with_fixed_metrics()
            .ok(service_command("nginx"), "active\n")
            .failing(service_command("redis"));
        let services = vec!["nginx".to_string(), "redis".to_string()];
        let tracker = Mutex::new(RateTracker::new());

        let snapshot = fetch_snapshot(&runner, &services, &tracker).await.unwrap();

        assert_eq!(snapshot.services[0].status, "active");
        assert_eq!(snapshot.services[1].status, "failed");
    }

    #[tokio::test]
    async fn test_fixed_metric_failure_aborts_fetch() {
        let runner = FakeRunner::with_fixed_metrics().failing(MEMORY_COMMAND);
        let tracker = Mutex::new(RateTracker::new());

        let result = fetch_snapshot(&runner, &[], &tracker).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_replayed_counters_yield_zero_on_second_fetch() {
        let runner = FakeRunner::with_fixed_metrics();
        let tracker = Mutex::new(RateTracker::new());

        let first = fetch_snapshot(&runner, &[], &tracker).await.unwrap();
        assert_eq!(first.network.in_kbps, "0.0");

        // Same counters again: rate stays zero with a real elapsed time
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = fetch_snapshot(&runner, &[], &tracker).await.unwrap();
        assert_eq!(second.network.in_kbps, "0.0");
        assert_eq!(second.network.out_kbps, "0.0");
    }
}
