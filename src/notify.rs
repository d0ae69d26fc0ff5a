use crate::types::EventRecord;
use tracing::info;

/// Fire-and-forget notification delivery (email + push). The engine never
/// blocks recording on this; a real implementation (SMTP, APNs/FCM, ...) is
/// an external collaborator outside this crate.
pub trait Notifier: Send + Sync {
    fn send_email(&self, record: &EventRecord);
    fn send_watch_push(&self, record: &EventRecord);
}

/// Logs what would have been sent, for standalone runs and tests.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn send_email(&self, record: &EventRecord) {
        info!("(notify) would email alert for event {} on {}", record.event_id, record.stream_id);
    }

    fn send_watch_push(&self, record: &EventRecord) {
        info!("(notify) would push watch alert for event {} on {}", record.event_id, record.stream_id);
    }
}
