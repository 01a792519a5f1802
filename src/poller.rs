use crate::client::{ClientError, MetricsClient};
use crate::config::PollerConfig;
use crate::marshal::{Marshaler, UiTarget};
use crate::metrics::Metrics;
use crate::model::{AgentStatus, SystemPayload};
use crate::store::SnapshotStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Everything one fetch/persist/push cycle needs. Shared by pollers and the
/// bridge `refresh` command.
#[derive(Clone)]
pub struct SyncContext {
    pub client: MetricsClient,
    pub store: SnapshotStore,
    pub marshaler: Marshaler,
    pub metrics: Arc<Metrics>,
}

/// Fetches one reading, persists its memory part and pushes the payload as
/// `updateDashboard`. Nothing is written or pushed when the fetch fails.
pub async fn sync_once(ctx: &SyncContext) -> Result<SystemPayload, ClientError> {
    let payload = ctx.client.fetch_stats().await?;

    let memory = payload.memory;
    let count = ctx
        .store
        .with_blocking(move |store| {
            store.save(&memory);
            store.count()
        })
        .await;
    if let Some(count) = count {
        ctx.metrics.set_history_records(count);
    }

    ctx.marshaler.push(UiTarget::UpdateDashboard, &payload);
    Ok(payload)
}

pub fn report_degraded(marshaler: &Marshaler, err: &ClientError) {
    marshaler.push(
        UiTarget::OnAgentStatus,
        &AgentStatus::disconnected(err.to_string()),
    );
}

/// A periodic driver. One tick runs to completion before the next is polled,
/// so a slow agent delays ticks instead of stacking them.
pub struct Poller {
    name: String,
    interval: Duration,
    ctx: SyncContext,
}

impl Poller {
    pub fn new(cfg: &PollerConfig, ctx: SyncContext) -> Self {
        Self {
            name: cfg.name.clone(),
            interval: cfg.interval(),
            ctx,
        }
    }

    /// Returns whether the agent answered.
    pub async fn tick(&self) -> bool {
        match sync_once(&self.ctx).await {
            Ok(payload) => {
                debug!(
                    poller = %self.name,
                    processes = payload.processes.len(),
                    "poll tick done"
                );
                self.ctx.metrics.inc_poll_tick(&self.name, true);
                self.ctx.metrics.set_agent_up(true);
                true
            }
            Err(err) => {
                warn!(poller = %self.name, error = %err, "poll tick failed");
                self.ctx.metrics.inc_poll_tick(&self.name, false);
                self.ctx.metrics.set_agent_up(false);
                report_degraded(&self.ctx.marshaler, &err);
                false
            }
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(poller = %self.name, interval = ?self.interval, "poller started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(poller = %self.name, "poller received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }
}

/// Drops history older than `retention`, once immediately and then every
/// `every`.
pub async fn run_retention(
    store: SnapshotStore,
    retention: Duration,
    every: Duration,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("retention task received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                let outcome = store
                    .with_blocking(move |store| (store.prune_older_than(retention), store.count()))
                    .await;
                if let Some((removed, count)) = outcome {
                    metrics.set_history_records(count);
                    if removed > 0 {
                        info!(removed, retention = %humantime::format_duration(retention), "pruned expired snapshots");
                    }
                }
            }
        }
    }
}
