use serde_json::Value;
use tracing::debug;

/// Outbound WebSocket-style fan-out (`alert-{stream_id}`, `ptz-autotrack`,
/// `patrol-preview-*`, ...). The engine publishes to this synchronously from
/// whichever thread detects the event and never blocks waiting on a
/// subscriber; the real transport is an external collaborator.
pub trait EventBus: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}

/// Logs published events, for standalone runs and tests.
pub struct NullEventBus;

impl EventBus for NullEventBus {
    fn publish(&self, topic: &str, payload: Value) {
        debug!("(event-bus) {topic}: {payload}");
    }
}

pub fn intrusion_topic(stream_id: &str) -> String {
    format!("alert-{stream_id}")
}

pub fn patrol_preview_topic(stream_id: &str, phase: &str) -> String {
    format!("patrol-preview-{phase}-{stream_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_namespaced_by_stream_id() {
        assert_eq!(intrusion_topic("cam-1"), "alert-cam-1");
        assert_eq!(patrol_preview_topic("cam-1", "start"), "patrol-preview-start-cam-1");
    }
}
