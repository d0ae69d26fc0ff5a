use std::fmt;

/// Classifies a failure by the behavior it should trigger, not by its source.
///
/// Worker loops match on this to decide whether to retry silently, reject a
/// command, log and continue, or tear the stream down. See the error-handling
/// design for the full decision table.
#[derive(Debug)]
pub enum EngineError {
    /// RTSP unreachable, decoder hiccup, broken output pipe. Retried with backoff.
    Transient(anyhow::Error),
    /// Bad command parameters (missing waypoints, unknown stream id, ...). Rejected, no state change.
    Configuration(String),
    /// PTZ/ONVIF call failed. Logged; the operation becomes a no-op.
    Device(anyhow::Error),
    /// Detector or frame-processing step failed for a single frame. That frame is dropped.
    Processing(anyhow::Error),
    /// Unrecoverable. The stream is marked inactive and torn down.
    Fatal(anyhow::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Transient(e) => write!(f, "transient: {e}"),
            EngineError::Configuration(msg) => write!(f, "configuration: {msg}"),
            EngineError::Device(e) => write!(f, "device: {e}"),
            EngineError::Processing(e) => write!(f, "processing: {e}"),
            EngineError::Fatal(e) => write!(f, "fatal: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

/// What a worker loop should do after observing an `EngineError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    RetryWithBackoff,
    RejectCommand,
    LogAndContinue,
    DeactivateStream,
}

impl EngineError {
    pub fn action(&self) -> ErrorAction {
        match self {
            EngineError::Transient(_) => ErrorAction::RetryWithBackoff,
            EngineError::Configuration(_) => ErrorAction::RejectCommand,
            EngineError::Device(_) => ErrorAction::LogAndContinue,
            EngineError::Processing(_) => ErrorAction::LogAndContinue,
            EngineError::Fatal(_) => ErrorAction::DeactivateStream,
        }
    }
}

/// Stable, dedupe-friendly labels for why a frame or clip was flagged unsafe.
///
/// These are string tokens rather than a closed enum because model strategies
/// are allowed to introduce new ones without a central registry change; the
/// set below are the ones the built-in strategies emit.
pub mod reason {
    pub const MISSING_HELMET: &str = "missing_helmet";
    pub const PROXIMITY_VIOLATION: &str = "proximity_violation";
    pub const INTRUSION: &str = "intrusion";
    pub const FIRE_DETECTED: &str = "fire_detected";
    pub const SMOKE_DETECTED: &str = "smoke_detected";
    pub const LADDER_WITHOUT_OUTRIGGER: &str = "ladder_without_outrigger";
    pub const SCAFFOLD_MISSING_GUARDRAIL: &str = "scaffold_missing_guardrail";
    pub const SCAFFOLD_NO_OUTRIGGER: &str = "scaffold_no_outrigger";
    pub const WORKERS_VERTICAL_OVERLAP: &str = "workers_vertical_overlap";
    pub const MISSING_FIRE_EXTINGUISHER: &str = "missing_fire_extinguisher";
    pub const MISSING_FIRE_PREVENTION_NET: &str = "missing_fire_prevention_net";
}

/// Deduplicate a list of reason tokens while preserving first-seen order.
pub fn dedup_reasons(reasons: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    reasons.into_iter().filter(|r| seen.insert(r.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_preserves_first_seen_order() {
        let input = vec!["intrusion".to_string(), "missing_helmet".to_string(), "intrusion".to_string()];
        assert_eq!(dedup_reasons(input), vec!["intrusion".to_string(), "missing_helmet".to_string()]);
    }

    #[test]
    fn error_action_matches_design() {
        assert_eq!(EngineError::Transient(anyhow::anyhow!("x")).action(), ErrorAction::RetryWithBackoff);
        assert_eq!(EngineError::Configuration("bad".into()).action(), ErrorAction::RejectCommand);
        assert_eq!(EngineError::Device(anyhow::anyhow!("x")).action(), ErrorAction::LogAndContinue);
        assert_eq!(EngineError::Fatal(anyhow::anyhow!("x")).action(), ErrorAction::DeactivateStream);
    }
}
