use crate::config::BridgeConfig;
use crate::export::{self, ExportFormat};
use crate::host::collect_system_info;
use crate::marshal::UiTarget;
use crate::metrics::Metrics;
use crate::model::{AnalyticsReport, NodeInfo};
use crate::poller::{report_degraded, sync_once, SyncContext};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("bridge queue is full ({capacity} pending commands)")]
    Busy { capacity: usize },
    #[error("bridge workers have stopped")]
    Closed,
}

#[derive(Debug, Clone)]
enum Job {
    SystemInfo,
    KillProcess { pid: i32, name: String },
    Refresh,
    Analytics,
    NodeInfo,
    CacheConfig {
        size_kb: u32,
        block_size: u32,
        policy: String,
    },
    Simulation { count: u32 },
    Export {
        format: String,
        destination: Option<PathBuf>,
    },
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Self::SystemInfo => "system-info",
            Self::KillProcess { .. } => "kill",
            Self::Refresh => "refresh",
            Self::Analytics => "analytics",
            Self::NodeInfo => "node-info",
            Self::CacheConfig { .. } => "cache-config",
            Self::Simulation { .. } => "simulate",
            Self::Export { .. } => "export",
        }
    }
}

/// Outcome of a kill command as shown next to the process table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub pid: i32,
    pub name: String,
    pub ok: bool,
    pub text: String,
}

/// Command surface for the presentation layer. Every operation only enqueues
/// a job and returns; the result arrives later through the marshaler.
#[derive(Clone)]
pub struct Bridge {
    queue: mpsc::Sender<Job>,
    capacity: usize,
    metrics: Arc<Metrics>,
}

struct Worker {
    ctx: SyncContext,
    started: Instant,
    analytics_limit: u32,
    export_window_minutes: u32,
    export_dir: PathBuf,
}

impl Bridge {
    /// Spawns `cfg.workers` consumers on a queue of `cfg.queue_capacity`.
    /// Workers exit once every `Bridge` clone is dropped and the queue drains.
    pub fn start(cfg: &BridgeConfig, ctx: SyncContext) -> Self {
        let (queue, rx) = mpsc::channel(cfg.queue_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let metrics = ctx.metrics.clone();
        let worker = Arc::new(Worker {
            ctx,
            started: Instant::now(),
            analytics_limit: cfg.analytics_limit,
            export_window_minutes: cfg.export_window_minutes,
            export_dir: cfg.export_dir.clone(),
        });

        for id in 0..cfg.workers {
            let rx = rx.clone();
            let worker = worker.clone();
            tokio::spawn(async move {
                loop {
                    let job = { rx.lock().await.recv().await };
                    let Some(job) = job else {
                        debug!(worker = id, "bridge worker exiting");
                        break;
                    };
                    worker.run(job).await;
                }
            });
        }

        Self {
            queue,
            capacity: cfg.queue_capacity,
            metrics,
        }
    }

    pub fn load_system_info(&self) -> Result<(), BridgeError> {
        self.submit(Job::SystemInfo)
    }

    /// `name` is only used for logging and the status text.
    pub fn kill_process(&self, pid: i32, name: impl Into<String>) -> Result<(), BridgeError> {
        self.submit(Job::KillProcess {
            pid,
            name: name.into(),
        })
    }

    pub fn refresh(&self) -> Result<(), BridgeError> {
        self.submit(Job::Refresh)
    }

    pub fn load_analytics(&self) -> Result<(), BridgeError> {
        self.submit(Job::Analytics)
    }

    pub fn load_node_info(&self) -> Result<(), BridgeError> {
        self.submit(Job::NodeInfo)
    }

    pub fn update_cache_config(
        &self,
        size_kb: u32,
        block_size: u32,
        policy: impl Into<String>,
    ) -> Result<(), BridgeError> {
        self.submit(Job::CacheConfig {
            size_kb,
            block_size,
            policy: policy.into(),
        })
    }

    pub fn run_cache_simulation(&self, count: u32) -> Result<(), BridgeError> {
        self.submit(Job::Simulation { count })
    }

    pub fn export_stats(
        &self,
        format: impl Into<String>,
        destination: Option<PathBuf>,
    ) -> Result<(), BridgeError> {
        self.submit(Job::Export {
            format: format.into(),
            destination,
        })
    }

    fn submit(&self, job: Job) -> Result<(), BridgeError> {
        let command = job.name();
        match self.queue.try_send(job) {
            Ok(()) => {
                self.metrics.inc_command(command);
                debug!(command, "bridge command queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.inc_rejected(command);
                warn!(command, capacity = self.capacity, "bridge queue full, command rejected");
                Err(BridgeError::Busy {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.inc_rejected(command);
                Err(BridgeError::Closed)
            }
        }
    }
}

impl Worker {
    async fn run(&self, job: Job) {
        match job {
            Job::SystemInfo => self.system_info().await,
            Job::KillProcess { pid, name } => self.kill(pid, name).await,
            Job::Refresh => self.refresh().await,
            Job::Analytics => self.analytics().await,
            Job::NodeInfo => self.node_info().await,
            Job::CacheConfig {
                size_kb,
                block_size,
                policy,
            } => self.cache_config(size_kb, block_size, &policy).await,
            Job::Simulation { count } => self.simulation(count).await,
            Job::Export {
                format,
                destination,
            } => self.export(&format, destination).await,
        }
    }

    async fn system_info(&self) {
        match tokio::task::spawn_blocking(collect_system_info).await {
            Ok(info) => self.ctx.marshaler.push(UiTarget::OnSystemInfo, &info),
            Err(err) => error!(error = %err, "system info task failed"),
        }
    }

    async fn kill(&self, pid: i32, name: String) {
        info!(pid, name = %name, "kill requested");
        match self.ctx.client.kill_process(pid).await {
            Ok(message) => {
                let status = ProcessStatus {
                    pid,
                    name,
                    ok: true,
                    text: format!("KILLED PID {pid}: {message}"),
                };
                self.ctx.marshaler.push(UiTarget::OnProcessStatus, &status);
                self.refresh().await;
            }
            Err(err) => {
                warn!(pid, error = %err, "kill failed");
                let status = ProcessStatus {
                    pid,
                    name,
                    ok: false,
                    text: format!("KILL FAILED: {err}"),
                };
                self.ctx.marshaler.push(UiTarget::OnProcessStatus, &status);
            }
        }
    }

    async fn refresh(&self) {
        if let Err(err) = sync_once(&self.ctx).await {
            warn!(error = %err, "refresh failed");
            report_degraded(&self.ctx.marshaler, &err);
        }
    }

    async fn analytics(&self) {
        let limit = self.analytics_limit;
        let report = self
            .ctx
            .store
            .with_blocking(move |store| AnalyticsReport {
                count: store.count(),
                db_size_kb: store.storage_size_kb(),
                records: store.query_recent(limit),
            })
            .await;
        if let Some(report) = report {
            self.ctx.metrics.set_history_records(report.count);
            self.ctx.marshaler.push(UiTarget::UpdateAnalytics, &report);
        }
    }

    async fn node_info(&self) {
        let latency_ms = self.ctx.client.measure_latency().await;
        let Some((total_snapshots, db_size_kb)) = self
            .ctx
            .store
            .with_blocking(|store| (store.count(), store.storage_size_kb()))
            .await
        else {
            return;
        };
        let info = NodeInfo {
            latency_ms,
            uptime_sec: self.started.elapsed().as_secs(),
            total_snapshots,
            db_size_kb,
            agent_url: self.ctx.client.base_url().to_string(),
            status: NodeInfo::status_for_latency(latency_ms),
        };
        self.ctx.marshaler.push(UiTarget::UpdateNodeInfo, &info);
    }

    async fn cache_config(&self, size_kb: u32, block_size: u32, policy: &str) {
        let size_bytes = u64::from(size_kb) * 1024;
        match self
            .ctx
            .client
            .update_cache_config(size_bytes, u64::from(block_size), policy)
            .await
        {
            Ok(status) => self.ctx.marshaler.push(UiTarget::OnConfigResult, &status),
            Err(err) => {
                warn!(policy, error = %err, "cache config update failed");
                self.ctx
                    .marshaler
                    .push(UiTarget::OnConfigResult, &format!("error: {err}"));
            }
        }
    }

    async fn simulation(&self, count: u32) {
        match self.ctx.client.simulate_cache_accesses(count).await {
            Ok(raw) => self.ctx.marshaler.push_raw(UiTarget::OnSimulationResult, raw),
            Err(err) => {
                warn!(count, error = %err, "cache simulation failed");
                self.ctx.marshaler.push(
                    UiTarget::OnSimulationResult,
                    &json!({ "error": err.to_string() }),
                );
            }
        }
    }

    /// Never pushes a message; outcomes are logged only.
    async fn export(&self, tag: &str, destination: Option<PathBuf>) {
        let format: ExportFormat = match tag.parse() {
            Ok(format) => format,
            Err(err) => {
                warn!(error = %err, "export ignored");
                return;
            }
        };
        if let Some(written_as) = export::substituted_format(tag) {
            warn!(
                requested = tag,
                written_as, "no PDF writer available, exporting a plain-text document"
            );
        }

        let minutes = self.export_window_minutes;
        let Some(records) = self
            .ctx
            .store
            .with_blocking(move |store| store.query_within_last_minutes(minutes))
            .await
        else {
            return;
        };
        if records.is_empty() {
            info!(minutes, "no data in export window, nothing written");
            return;
        }

        let dir = self.export_dir.clone();
        let written = tokio::task::spawn_blocking(move || {
            export::write_report(format, &records, minutes, &dir, destination)
        })
        .await;
        match written {
            Ok(Ok(path)) => info!(path = %path.display(), "stats exported"),
            Ok(Err(err)) => error!(error = %err, "export failed"),
            Err(err) => error!(error = %err, "export task failed"),
        }
    }
}
