use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Mirrors the source's `ConnectionState` enum for the capture pipeline's
/// externally-visible lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

/// A single decoded frame handed from the Capture Pipeline to the Frame Processor.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self { data, width, height, captured_at: Utc::now() }
    }
}

/// Axis-aligned bounding box in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Bbox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn bottom_center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, self.y2)
    }
}

/// A single raw detection as produced by an external `Detector` implementation.
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub class_label: String,
    pub bbox: Bbox,
    pub confidence: f32,
    pub track_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Safe,
    Unsafe,
}

/// Output of the Frame Processor for a single frame.
#[derive(Debug, Clone)]
pub struct FrameProcessingResult {
    pub annotated: Frame,
    pub status: FrameStatus,
    pub reasons: Vec<String>,
    pub person_bboxes: Vec<Bbox>,
    pub fps: f64,
}

/// Recording lifecycle state owned by the Event Recorder.
#[derive(Debug, Clone, Default)]
pub struct RecordingState {
    pub is_recording: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub video_name: Option<String>,
    pub duration_secs: u64,
}

/// Rolling per-stream counters updated by the Frame Processor and consumed by
/// the Event Recorder's gating check.
#[derive(Debug, Clone)]
pub struct StreamStats {
    pub total_frames: u64,
    pub unsafe_frames: u64,
    pub fps_window: VecDeque<f64>,
    fps_window_cap: usize,
    pub last_event_time: Option<DateTime<Utc>>,
    bitrate_window: VecDeque<(std::time::Instant, usize)>,
    pub bitrate_bps: f64,
    last_capture_frame_time: Option<std::time::Instant>,
    pub frame_latency_ms: f64,
}

impl StreamStats {
    pub fn new(fps_window_cap: usize) -> Self {
        Self {
            total_frames: 0,
            unsafe_frames: 0,
            fps_window: VecDeque::with_capacity(fps_window_cap),
            fps_window_cap,
            last_event_time: None,
            bitrate_window: VecDeque::new(),
            bitrate_bps: 0.0,
            last_capture_frame_time: None,
            frame_latency_ms: 0.0,
        }
    }

    pub fn record_fps_sample(&mut self, fps: f64) {
        if self.fps_window.len() == self.fps_window_cap {
            self.fps_window.pop_front();
        }
        self.fps_window.push_back(fps);
    }

    pub fn average_fps(&self) -> f64 {
        if self.fps_window.is_empty() {
            return 0.0;
        }
        self.fps_window.iter().sum::<f64>() / self.fps_window.len() as f64
    }

    /// Records `bytes` handed to the decoder for one buffer and recomputes
    /// `bitrate_bps` over a trailing 1-second sliding window, per the
    /// Capture Pipeline's observability contract.
    pub fn record_bytes_into_decoder(&mut self, bytes: usize) {
        let now = std::time::Instant::now();
        self.bitrate_window.push_back((now, bytes));
        while let Some(&(t, _)) = self.bitrate_window.front() {
            if now.duration_since(t) > std::time::Duration::from_secs(1) {
                self.bitrate_window.pop_front();
            } else {
                break;
            }
        }
        let total_bytes: usize = self.bitrate_window.iter().map(|&(_, b)| b).sum();
        self.bitrate_bps = total_bytes as f64 * 8.0;
    }

    /// Records the arrival of a decoded frame and updates `frame_latency_ms`
    /// to the interval since the previous one.
    pub fn record_frame_arrival(&mut self) {
        let now = std::time::Instant::now();
        if let Some(prev) = self.last_capture_frame_time {
            self.frame_latency_ms = now.duration_since(prev).as_secs_f64() * 1000.0;
        }
        self.last_capture_frame_time = Some(now);
    }
}

/// Persisted record of a recorded safety event.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EventRecord {
    pub event_id: uuid::Uuid,
    pub stream_id: String,
    pub model_name: crate::config::ModelName,
    pub timestamp: DateTime<Utc>,
    pub reasons: Vec<String>,
    pub video_name: String,
    pub is_resolved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_bottom_center_is_midpoint_of_base_edge() {
        let b = Bbox { x1: 0.0, y1: 0.0, x2: 10.0, y2: 20.0 };
        assert_eq!(b.bottom_center(), (5.0, 20.0));
    }

    #[test]
    fn stream_stats_window_is_bounded() {
        let mut stats = StreamStats::new(3);
        for i in 0..5 {
            stats.record_fps_sample(i as f64);
        }
        assert_eq!(stats.fps_window.len(), 3);
        assert_eq!(stats.fps_window.front().copied(), Some(2.0));
    }

    #[test]
    fn bitrate_reflects_bytes_seen_within_the_last_second() {
        let mut stats = StreamStats::new(3);
        stats.record_bytes_into_decoder(1000);
        stats.record_bytes_into_decoder(2000);
        assert_eq!(stats.bitrate_bps, 3000.0 * 8.0);
    }

    #[test]
    fn frame_latency_is_zero_until_a_second_frame_arrives() {
        let mut stats = StreamStats::new(3);
        stats.record_frame_arrival();
        assert_eq!(stats.frame_latency_ms, 0.0);
        stats.record_frame_arrival();
        assert!(stats.frame_latency_ms >= 0.0);
    }
}
