use crate::marshal::{Presenter, UiMessage, UiTarget};
use crate::metrics::Metrics;
use crate::model::{AgentStatus, SystemPayload};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

const LIVE_CAPACITY: usize = 256;
const SERIES_LEN: usize = 20;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
const DISK_BARS: usize = 7;

/// Percent change of used memory between two consecutive dashboard updates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryTrend {
    pub delta_percent: f64,
    pub rising: bool,
}

/// Decorative disk and network readings. The agent reports neither, so they
/// are drawn fresh on every dashboard update.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedIndicators {
    pub disk_iops: u32,
    pub disk_bars: Vec<u32>,
    pub net_out_mbps: f64,
    pub net_load_percent: f64,
}

impl SimulatedIndicators {
    pub fn sample(rng: &mut impl Rng) -> Self {
        Self {
            disk_iops: rng.gen_range(80..200),
            disk_bars: (0..DISK_BARS).map(|_| rng.gen_range(10..50)).collect(),
            net_out_mbps: rng.gen_range(5.0..25.0),
            net_load_percent: rng.gen_range(10.0..30.0),
        }
    }
}

/// `"<days>D <hours>H <minutes>M"`.
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let mins = (secs % 3600) / 60;
    format!("{days}D {hours}H {mins}M")
}

/// What a presentation client sees right now.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    pub agent_connected: bool,
    pub agent_status: String,
    pub last_error: Option<String>,
    pub trend: Option<MemoryTrend>,
    pub used_gb: f64,
    pub total_gb: f64,
    pub hit_ratio_percent: f64,
    pub cache_algorithm: String,
    pub process_count: usize,
    pub indicators: SimulatedIndicators,
    /// Time since the view started, refreshed on every dashboard update.
    pub uptime: String,
    /// Last used-memory readings in GB, oldest first.
    pub memory_series: Vec<f64>,
    pub updates: u64,
    pub latest: BTreeMap<String, Value>,
}

/// Read side handed to the HTTP surface.
#[derive(Clone)]
pub struct ViewHandle {
    snapshot: watch::Receiver<ViewSnapshot>,
    live: broadcast::Sender<UiMessage>,
}

impl ViewHandle {
    pub fn snapshot(&self) -> ViewSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiMessage> {
        self.live.subscribe()
    }
}

/// Presenter that owns all presentation-side state. Only the presentation
/// context ever touches it.
pub struct DashboardView {
    metrics: Arc<Metrics>,
    started: Instant,
    previous_used_gb: f64,
    series: VecDeque<f64>,
    state: ViewSnapshot,
    snapshot_tx: watch::Sender<ViewSnapshot>,
    live: broadcast::Sender<UiMessage>,
}

impl DashboardView {
    pub fn new(metrics: Arc<Metrics>) -> (Self, ViewHandle) {
        let state = ViewSnapshot {
            agent_status: "CONNECTING".to_string(),
            uptime: format_uptime(0),
            ..ViewSnapshot::default()
        };
        let (snapshot_tx, snapshot) = watch::channel(state.clone());
        let (live, _) = broadcast::channel(LIVE_CAPACITY);
        let handle = ViewHandle {
            snapshot,
            live: live.clone(),
        };
        (
            Self {
                metrics,
                started: Instant::now(),
                previous_used_gb: 0.0,
                series: VecDeque::with_capacity(SERIES_LEN),
                state,
                snapshot_tx,
                live,
            },
            handle,
        )
    }

    fn apply_dashboard(&mut self, payload: SystemPayload) {
        let used_gb = payload.memory.used_bytes as f64 / BYTES_PER_GB;
        let total_gb = payload.memory.total_bytes as f64 / BYTES_PER_GB;

        if self.previous_used_gb > 0.0 {
            let delta = (used_gb - self.previous_used_gb) / self.previous_used_gb * 100.0;
            self.state.trend = Some(MemoryTrend {
                delta_percent: delta,
                rising: delta >= 0.0,
            });
        }
        self.previous_used_gb = used_gb;

        if self.series.len() == SERIES_LEN {
            self.series.pop_front();
        }
        self.series.push_back(used_gb);

        self.state.used_gb = used_gb;
        self.state.total_gb = total_gb;
        self.state.hit_ratio_percent = payload.cache.hit_ratio * 100.0;
        self.state.cache_algorithm = payload.cache.algorithm;
        self.state.process_count = payload.processes.len();
        self.state.indicators = SimulatedIndicators::sample(&mut rand::thread_rng());
        self.state.uptime = format_uptime(self.started.elapsed().as_secs());
        self.state.memory_series = self.series.iter().copied().collect();
        self.state.agent_connected = true;
        self.state.agent_status = "CONNECTED".to_string();
        self.state.last_error = None;
    }

    fn apply_agent_status(&mut self, status: AgentStatus) {
        self.state.agent_connected = status.connected;
        self.state.agent_status = status.status;
        self.state.last_error = status.reason;
    }
}

impl Presenter for DashboardView {
    fn deliver(&mut self, message: UiMessage) {
        self.metrics.inc_marshaled(message.target.name());

        match message.target {
            UiTarget::UpdateDashboard => match serde_json::from_str(&message.payload) {
                Ok(payload) => self.apply_dashboard(payload),
                Err(err) => warn!(error = %err, "unreadable dashboard payload"),
            },
            UiTarget::OnAgentStatus => match serde_json::from_str(&message.payload) {
                Ok(status) => self.apply_agent_status(status),
                Err(err) => warn!(error = %err, "unreadable agent status payload"),
            },
            _ => {}
        }

        let value = serde_json::from_str(&message.payload)
            .unwrap_or_else(|_| Value::String(message.payload.clone()));
        self.state
            .latest
            .insert(message.target.name().to_string(), value);
        self.state.updates += 1;

        self.snapshot_tx.send_replace(self.state.clone());
        if self.live.send(message).is_err() {
            debug!("no live subscribers");
        }
    }
}
