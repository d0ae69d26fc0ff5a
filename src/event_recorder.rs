use crate::clip_writer::ClipWriter;
use crate::config::EngineConfig;
use crate::notify::Notifier;
use crate::persistence::EventStore;
use crate::types::{EventRecord, FrameProcessingResult, RecordingState};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

/// Gates clip recording by a sliding unsafe-frame ratio plus a cooldown,
/// exactly following the source's `StreamRecorder`/`EventProcessor` split:
/// every `default_frame_interval` frames, the unsafe ratio against that fixed
/// divisor is checked, and the counter resets regardless of whether a
/// recording started.
pub struct EventRecorder {
    stream_id: String,
    model_name: crate::config::ModelName,
    cfg: Arc<EngineConfig>,
    event_store: Arc<dyn EventStore>,
    notifier: Arc<dyn Notifier>,
    state: RecordingState,
    writer: Option<ClipWriter>,
    last_event_time: Option<chrono::DateTime<Utc>>,
    pending_reasons: Vec<String>,
}

impl EventRecorder {
    pub fn new(
        stream_id: String,
        model_name: crate::config::ModelName,
        cfg: Arc<EngineConfig>,
        event_store: Arc<dyn EventStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            stream_id,
            model_name,
            cfg,
            event_store,
            notifier,
            state: RecordingState::default(),
            writer: None,
            last_event_time: None,
            pending_reasons: Vec::new(),
        }
    }

    /// Called once per processed frame, after `total_frames`/`unsafe_frames`
    /// have already been updated by the caller for this frame.
    pub fn handle_recording(&mut self, frame: &FrameProcessingResult, total_frames: u64, unsafe_frames: u64) {
        self.check_start_recording(frame, total_frames, unsafe_frames);
        self.write_frame_if_recording(frame);
        self.check_stop_recording();
    }

    /// Returns true if, after this call, the caller should reset its
    /// `unsafe_frames` counter — mirrors `_reset_counters_if_needed`, which
    /// resets at interval boundaries unconditionally.
    pub fn should_reset_counter(&self, total_frames: u64) -> bool {
        total_frames % self.cfg.default_frame_interval == 0
    }

    fn check_start_recording(&mut self, frame: &FrameProcessingResult, total_frames: u64, unsafe_frames: u64) {
        if self.state.is_recording || total_frames % self.cfg.default_frame_interval != 0 {
            return;
        }

        let unsafe_ratio = unsafe_frames as f64 / self.cfg.default_frame_interval as f64;
        if self.should_start_recording(unsafe_ratio) {
            self.start_recording(frame);
            self.last_event_time = Some(Utc::now());
        }
    }

    fn should_start_recording(&self, unsafe_ratio: f64) -> bool {
        let cooldown_elapsed = match self.last_event_time {
            Some(t) => Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0
                >= self.cfg.default_event_cooldown_secs as f64,
            None => true,
        };
        cooldown_elapsed && unsafe_ratio >= self.cfg.default_unsafe_ratio_threshold
    }

    fn start_recording(&mut self, frame: &FrameProcessingResult) {
        let video_name = format!(
            "video_{:?}_{}.mp4",
            self.model_name,
            Utc::now().format("%Y%m%d_%H%M%S")
        );

        match ClipWriter::start(frame.annotated.width, frame.annotated.height, &video_name) {
            Ok(writer) => {
                self.writer = Some(writer);
                self.state = RecordingState {
                    is_recording: true,
                    start_time: Some(Utc::now()),
                    video_name: Some(video_name.clone()),
                    duration_secs: self.cfg.default_record_duration_secs,
                };
                self.pending_reasons = frame.reasons.clone();
                info!("started recording {} for {}", video_name, self.stream_id);
                self.persist_event_and_notify(video_name);
            }
            Err(e) => {
                error!("failed to start clip writer: {:#}", e);
            }
        }
    }

    fn persist_event_and_notify(&self, video_name: String) {
        let record = EventRecord {
            event_id: uuid::Uuid::new_v4(),
            stream_id: self.stream_id.clone(),
            model_name: self.model_name,
            timestamp: Utc::now(),
            reasons: self.pending_reasons.clone(),
            video_name,
            is_resolved: false,
        };

        // Fire-and-forget, matching the source spawning independent threads
        // for persistence and notification so recording never blocks on them.
        let event_store = Arc::clone(&self.event_store);
        let record_for_store = record.clone();
        std::thread::spawn(move || {
            if let Err(e) = event_store.save(&record_for_store) {
                error!("failed to persist event record: {:#}", e);
            }
        });

        let notifier = Arc::clone(&self.notifier);
        let record_for_email = record.clone();
        std::thread::spawn(move || notifier.send_email(&record_for_email));

        let notifier = Arc::clone(&self.notifier);
        std::thread::spawn(move || notifier.send_watch_push(&record));
    }

    fn write_frame_if_recording(&mut self, frame: &FrameProcessingResult) {
        if !self.state.is_recording {
            return;
        }
        let Some(writer) = self.writer.as_mut() else { return };
        if let Err(e) = writer.write_frame(&frame.annotated) {
            error!("broken recording pipe, stopping: {:#}", e);
            self.stop_recording();
        }
    }

    fn check_stop_recording(&mut self) {
        if self.state.is_recording && self.should_stop_recording() {
            self.stop_recording();
        }
    }

    fn should_stop_recording(&self) -> bool {
        match self.state.start_time {
            Some(start) => {
                let elapsed = Utc::now().signed_duration_since(start).num_milliseconds() as f64 / 1000.0;
                elapsed >= self.state.duration_secs as f64
            }
            None => true,
        }
    }

    fn stop_recording(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.finish() {
                error!("failed to finalize clip: {:#}", e);
            }
        }
        info!("stopped recording for {}", self.stream_id);
        self.state = RecordingState::default();
    }

    pub fn is_recording(&self) -> bool {
        self.state.is_recording
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelName;
    use crate::notify::NullNotifier;
    use crate::persistence::InMemoryEventStore;
    use crate::types::{Frame, FrameStatus};

    fn recorder() -> EventRecorder {
        EventRecorder::new(
            "cam-1".to_string(),
            ModelName::Ppe,
            Arc::new(EngineConfig { default_frame_interval: 30, default_unsafe_ratio_threshold: 0.7, default_event_cooldown_secs: 30, default_record_duration_secs: 10, ..Default::default() }),
            Arc::new(InMemoryEventStore::default()),
            Arc::new(NullNotifier),
        )
    }

    fn unsafe_result() -> FrameProcessingResult {
        FrameProcessingResult {
            annotated: Frame::new(vec![0; 10 * 10 * 3], 10, 10),
            status: FrameStatus::Unsafe,
            reasons: vec!["missing_helmet".to_string()],
            person_bboxes: vec![],
            fps: 15.0,
        }
    }

    #[test]
    fn ratio_below_threshold_does_not_start_recording() {
        let mut rec = recorder();
        // unsafe_frames = 10 of 30 => ratio 0.33, below 0.7
        rec.handle_recording(&unsafe_result(), 30, 10);
        assert!(!rec.is_recording());
    }

    #[test]
    fn ratio_at_or_above_threshold_starts_recording() {
        let mut rec = recorder();
        // unsafe_frames = 25 of 30 => ratio 0.83 >= 0.7
        rec.handle_recording(&unsafe_result(), 30, 25);
        assert!(rec.is_recording());
    }

    #[test]
    fn non_interval_boundary_never_starts_recording() {
        let mut rec = recorder();
        rec.handle_recording(&unsafe_result(), 31, 31);
        assert!(!rec.is_recording());
    }

    #[test]
    fn cooldown_suppresses_new_recording_immediately_after_one_starts() {
        let mut rec = recorder();
        rec.handle_recording(&unsafe_result(), 30, 25);
        assert!(rec.is_recording());
        rec.stop_recording();
        // Immediately re-triggering within cooldown should not start again.
        rec.handle_recording(&unsafe_result(), 60, 25);
        assert!(!rec.is_recording());
    }
}
