use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Named entry points on the presentation side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum UiTarget {
    UpdateDashboard,
    OnSystemInfo,
    UpdateAnalytics,
    UpdateNodeInfo,
    OnConfigResult,
    OnSimulationResult,
    OnProcessStatus,
    OnAgentStatus,
}

impl UiTarget {
    pub fn name(self) -> &'static str {
        match self {
            Self::UpdateDashboard => "updateDashboard",
            Self::OnSystemInfo => "onSystemInfo",
            Self::UpdateAnalytics => "updateAnalytics",
            Self::UpdateNodeInfo => "updateNodeInfo",
            Self::OnConfigResult => "onConfigResult",
            Self::OnSimulationResult => "onSimulationResult",
            Self::OnProcessStatus => "onProcessStatus",
            Self::OnAgentStatus => "onAgentStatus",
        }
    }
}

/// A serialized value addressed to one presentation entry point.
#[derive(Debug, Clone, Serialize)]
pub struct UiMessage {
    pub target: UiTarget,
    pub payload: String,
}

/// Receives every message, one at a time, on the presentation context.
pub trait Presenter: Send + 'static {
    fn deliver(&mut self, message: UiMessage);
}

/// Producer handle. Cheap to clone; safe to use from any task or thread.
#[derive(Debug, Clone)]
pub struct Marshaler {
    tx: mpsc::UnboundedSender<UiMessage>,
}

/// The single consumer that owns the presenter.
pub struct PresentationContext<P> {
    rx: mpsc::UnboundedReceiver<UiMessage>,
    presenter: P,
}

pub fn channel<P: Presenter>(presenter: P) -> (Marshaler, PresentationContext<P>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Marshaler { tx }, PresentationContext { rx, presenter })
}

impl Marshaler {
    pub fn push<T: Serialize + ?Sized>(&self, target: UiTarget, value: &T) {
        match serde_json::to_string(value) {
            Ok(payload) => self.push_raw(target, payload),
            Err(err) => {
                error!(ui_target = target.name(), error = %err, "failed to serialize ui message")
            }
        }
    }

    /// Sends an already serialized payload as-is.
    pub fn push_raw(&self, target: UiTarget, payload: String) {
        if self.tx.send(UiMessage { target, payload }).is_err() {
            debug!(ui_target = target.name(), "presentation context closed, message dropped");
        }
    }
}

impl<P: Presenter> PresentationContext<P> {
    /// Applies messages in arrival order until every `Marshaler` is dropped,
    /// then hands the presenter back.
    pub async fn run(mut self) -> P {
        while let Some(message) = self.rx.recv().await {
            self.presenter.deliver(message);
        }
        self.presenter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Recorder;

    #[test]
    fn target_names_match_serde() {
        for target in [
            UiTarget::UpdateDashboard,
            UiTarget::OnSystemInfo,
            UiTarget::UpdateAnalytics,
            UiTarget::UpdateNodeInfo,
            UiTarget::OnConfigResult,
            UiTarget::OnSimulationResult,
            UiTarget::OnProcessStatus,
            UiTarget::OnAgentStatus,
        ] {
            let json = serde_json::to_string(&target).unwrap();
            assert_eq!(json, format!("\"{}\"", target.name()));
        }
    }

    #[tokio::test]
    async fn concurrent_producers_are_delivered_sequentially() {
        let (marshaler, ctx) = channel(Recorder::default());
        let consumer = tokio::spawn(ctx.run());

        let producers: Vec<_> = (0..8)
            .map(|producer| {
                let marshaler = marshaler.clone();
                tokio::spawn(async move {
                    for seq in 0..50 {
                        marshaler.push(UiTarget::OnConfigResult, &(producer, seq));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        drop(marshaler);

        let recorder = consumer.await.unwrap();
        assert_eq!(recorder.messages.len(), 400);
        for producer in 0..8 {
            let seqs: Vec<u32> = recorder
                .messages
                .iter()
                .map(|m| serde_json::from_str::<(u32, u32)>(&m.payload).unwrap())
                .filter(|(p, _)| *p == producer)
                .map(|(_, seq)| seq)
                .collect();
            assert_eq!(seqs, (0..50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn raw_payload_is_not_reencoded() {
        let (marshaler, ctx) = channel(Recorder::default());
        let consumer = tokio::spawn(ctx.run());
        marshaler.push_raw(UiTarget::OnSimulationResult, "{\"hits\":1}".to_string());
        marshaler.push(UiTarget::OnConfigResult, "success");
        drop(marshaler);

        let recorder = consumer.await.unwrap();
        assert_eq!(recorder.messages[0].payload, "{\"hits\":1}");
        assert_eq!(recorder.messages[1].payload, "\"success\"");
    }

    #[test]
    fn push_after_close_is_silent() {
        let (marshaler, ctx) = channel(Recorder::default());
        drop(ctx);
        marshaler.push(UiTarget::OnAgentStatus, "gone");
    }
}
