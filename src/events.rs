//! Structured lifecycle events emitted by the registry, training pipeline and
//! prediction engine. Formatting and export belong to the sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Model lifecycle event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LifecycleEvent {
    /// A new version was written and the tenant pointer moved to it
    VersionPublished {
        tenant_id: String,
        version_id: String,
        training_data_size: usize,
        at: DateTime<Utc>,
    },

    /// The tenant pointer was moved back to an existing version
    RolledBack {
        tenant_id: String,
        from_version: Option<String>,
        to_version: String,
        at: DateTime<Utc>,
    },

    /// A training run finished (any status)
    TrainingCompleted {
        tenant_id: String,
        run_id: String,
        status: String,
        version_id: Option<String>,
        duration_ms: u64,
    },

    /// A prediction request failed
    PredictionFailed {
        tenant_id: String,
        error_code: String,
    },
}

impl LifecycleEvent {
    /// Get the tenant from any event
    pub fn tenant_id(&self) -> &str {
        match self {
            LifecycleEvent::VersionPublished { tenant_id, .. }
            | LifecycleEvent::RolledBack { tenant_id, .. }
            | LifecycleEvent::TrainingCompleted { tenant_id, .. }
            | LifecycleEvent::PredictionFailed { tenant_id, .. } => tenant_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::VersionPublished { .. } => "version_published",
            LifecycleEvent::RolledBack { .. } => "rolled_back",
            LifecycleEvent::TrainingCompleted { .. } => "training_completed",
            LifecycleEvent::PredictionFailed { .. } => "prediction_failed",
        }
    }
}

/// Receiver of lifecycle events. Emission must never fail the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LifecycleEvent);
}

/// Default sink: one structured log line per event
#[derive(Debug, Clone, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: LifecycleEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(
                target: "lead_model_manager::events",
                event_type = event.event_type(),
                tenant_id = event.tenant_id(),
                payload = %payload,
                "lifecycle event"
            ),
            Err(e) => tracing::warn!(error = %e, "Failed to encode lifecycle event"),
        }
    }
}

/// Fan-out sink for in-process subscribers
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl ChannelEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: LifecycleEvent) {
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }
}
