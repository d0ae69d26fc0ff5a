use crate::types::{Frame, RawDetection};
use anyhow::Result;

/// The sole seam into model inference. The engine never loads weights or runs
/// a tensor runtime itself — whatever backs this trait (local ONNX runtime,
/// a remote inference microservice, ...) is an external collaborator.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>>;
}

/// A detector that always returns no detections. Useful as a default when a
/// stream has no model configured, and as a building block in tests.
pub struct NullDetector;

impl Detector for NullDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        Ok(Vec::new())
    }
}

/// A detector driven by a fixed, caller-supplied script of responses, one per
/// call. Used by frame-processor and event-recorder tests to script scenarios
/// like "helmet missing for the next 20 frames".
#[cfg(test)]
pub struct ScriptedDetector {
    script: std::sync::Mutex<std::collections::VecDeque<Vec<RawDetection>>>,
    repeat_last: bool,
}

#[cfg(test)]
impl ScriptedDetector {
    pub fn new(script: Vec<Vec<RawDetection>>) -> Self {
        Self { script: std::sync::Mutex::new(script.into()), repeat_last: true }
    }
}

#[cfg(test)]
impl Detector for ScriptedDetector {
    fn detect(&self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 || !self.repeat_last {
            Ok(script.pop_front().unwrap_or_default())
        } else {
            Ok(script.front().cloned().unwrap_or_default())
        }
    }
}
