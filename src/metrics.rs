use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at_unix: i64,
    pub bridge_poll_ticks_total: CounterVec,
    pub bridge_commands_total: CounterVec,
    pub bridge_commands_rejected_total: CounterVec,
    pub bridge_messages_marshaled_total: CounterVec,
    pub bridge_history_records: Gauge,
    pub bridge_agent_up: Gauge,
    pub bridge_uptime_seconds: Gauge,
    pub bridge_scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let bridge_poll_ticks_total = CounterVec::new(
            opts!(
                "bridge_poll_ticks_total",
                "Poller ticks by poller name and outcome"
            ),
            &["poller", "result"],
        )?;
        let bridge_commands_total = CounterVec::new(
            opts!(
                "bridge_commands_total",
                "Bridge commands accepted onto the worker queue"
            ),
            &["command"],
        )?;
        let bridge_commands_rejected_total = CounterVec::new(
            opts!(
                "bridge_commands_rejected_total",
                "Bridge commands rejected because the queue was full or closed"
            ),
            &["command"],
        )?;
        let bridge_messages_marshaled_total = CounterVec::new(
            opts!(
                "bridge_messages_marshaled_total",
                "Messages applied on the presentation context by target"
            ),
            &["target"],
        )?;
        let bridge_history_records = Gauge::with_opts(opts!(
            "bridge_history_records",
            "Snapshot rows currently held by the store"
        ))?;
        let bridge_agent_up = Gauge::with_opts(opts!(
            "bridge_agent_up",
            "1 when the last poll reached the agent, 0 otherwise"
        ))?;
        let bridge_uptime_seconds =
            Gauge::with_opts(opts!("bridge_uptime_seconds", "Bridge uptime in seconds"))?;
        let bridge_scrape_count_total = Counter::with_opts(opts!(
            "bridge_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &bridge_poll_ticks_total)?;
        register(&registry, &bridge_commands_total)?;
        register(&registry, &bridge_commands_rejected_total)?;
        register(&registry, &bridge_messages_marshaled_total)?;
        register(&registry, &bridge_history_records)?;
        register(&registry, &bridge_agent_up)?;
        register(&registry, &bridge_uptime_seconds)?;
        register(&registry, &bridge_scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            started_at_unix: now_unix(),
            bridge_poll_ticks_total,
            bridge_commands_total,
            bridge_commands_rejected_total,
            bridge_messages_marshaled_total,
            bridge_history_records,
            bridge_agent_up,
            bridge_uptime_seconds,
            bridge_scrape_count_total,
        }))
    }

    pub fn inc_poll_tick(&self, poller: &str, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.bridge_poll_ticks_total
            .with_label_values(&[poller, result])
            .inc();
    }

    pub fn inc_command(&self, command: &str) {
        self.bridge_commands_total
            .with_label_values(&[command])
            .inc();
    }

    pub fn inc_rejected(&self, command: &str) {
        self.bridge_commands_rejected_total
            .with_label_values(&[command])
            .inc();
    }

    pub fn inc_marshaled(&self, target: &str) {
        self.bridge_messages_marshaled_total
            .with_label_values(&[target])
            .inc();
    }

    pub fn set_agent_up(&self, up: bool) {
        self.bridge_agent_up.set(if up { 1.0 } else { 0.0 });
    }

    pub fn set_history_records(&self, count: u32) {
        self.bridge_history_records.set(f64::from(count));
    }

    pub fn inc_scrape_count(&self) {
        self.bridge_scrape_count_total.inc();
        let uptime = now_unix().saturating_sub(self.started_at_unix) as f64;
        self.bridge_uptime_seconds.set(uptime);
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_carry_labels() {
        let metrics = Metrics::new().expect("metrics init");
        metrics.inc_poll_tick("dashboard", true);
        metrics.inc_poll_tick("dashboard", false);
        metrics.inc_rejected("export");
        metrics.set_history_records(12);

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains(r#"bridge_poll_ticks_total{poller="dashboard",result="ok"} 1"#));
        assert!(text.contains(r#"bridge_poll_ticks_total{poller="dashboard",result="error"} 1"#));
        assert!(text.contains(r#"bridge_commands_rejected_total{command="export"} 1"#));
        assert!(text.contains("bridge_history_records 12"));
    }
}
