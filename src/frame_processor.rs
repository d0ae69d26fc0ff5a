use crate::config::StreamConfig;
use crate::detector::Detector;
use crate::error::dedup_reasons;
use crate::hazard_zone::{point_in_polygon, HazardZoneTracker};
use crate::overlay;
use crate::strategies::{strategy_for, HelmetVoteStore, ModelStrategy};
use crate::types::{Bbox, Frame, FrameProcessingResult, FrameStatus};
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Runs inference, per-model rule evaluation, hazard-zone intrusion testing,
/// and overlay drawing for a single frame. One instance per stream; not
/// `Send`-shared, owned by the stream's processing thread.
pub struct FrameProcessor {
    detector: Arc<dyn Detector>,
    strategy: Box<dyn ModelStrategy>,
    votes: HelmetVoteStore,
    hazard_zone: Arc<HazardZoneTracker>,
    last_frame_instant: Option<Instant>,
}

impl FrameProcessor {
    pub fn new(config: &StreamConfig, detector: Arc<dyn Detector>, hazard_zone: Arc<HazardZoneTracker>) -> Self {
        Self {
            detector,
            strategy: strategy_for(config.model_name),
            votes: HelmetVoteStore::default(),
            hazard_zone,
            last_frame_instant: None,
        }
    }

    pub fn process(&mut self, frame: Frame, config: &StreamConfig) -> FrameProcessingResult {
        let fps = self.tick_fps();

        let detections = match self.detector.detect(&frame) {
            Ok(d) => d,
            Err(e) => {
                warn!("detector failed, dropping frame: {:#}", e);
                Vec::new()
            }
        };

        let output = self.strategy.evaluate(&detections, &mut self.votes);
        let mut reasons = output.reasons;

        let person_bboxes: Vec<Bbox> = detections
            .iter()
            .filter(|d| d.class_label == "person")
            .map(|d| d.bbox)
            .collect();

        let mut intrusion = false;
        if config.intrusion_detection && self.hazard_zone.has_zones() {
            let zones = self.hazard_zone.get_transformed_safe_areas(&frame);
            for bbox in &person_bboxes {
                let point = bbox.bottom_center();
                if zones.iter().any(|poly| point_in_polygon(point, poly)) {
                    intrusion = true;
                }
            }
            if intrusion {
                reasons.push(crate::error::reason::INTRUSION.to_string());
            }
        }

        let reasons = dedup_reasons(reasons);
        let status = if reasons.is_empty() { FrameStatus::Safe } else { FrameStatus::Unsafe };

        let annotated = self.render_overlay(&frame, &output.boxes, &zones_for_drawing(config, &self.hazard_zone), status, &reasons, person_bboxes.len(), fps);

        FrameProcessingResult { annotated, status, reasons, person_bboxes, fps }
    }

    fn tick_fps(&mut self) -> f64 {
        let now = Instant::now();
        let fps = match self.last_frame_instant {
            Some(prev) => {
                let dt = now.duration_since(prev).as_secs_f64();
                if dt > 0.0 {
                    1.0 / dt
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last_frame_instant = Some(now);
        fps
    }

    fn render_overlay(
        &self,
        frame: &Frame,
        boxes: &[(Bbox, String, bool)],
        zones: &[Vec<(f32, f32)>],
        status: FrameStatus,
        reasons: &[String],
        worker_count: usize,
        fps: f64,
    ) -> Frame {
        let mut img = match RgbImage::from_raw(frame.width, frame.height, frame.data.clone()) {
            Some(img) => img,
            None => {
                warn!("frame buffer does not match declared dimensions, skipping overlay");
                return frame.clone();
            }
        };

        for zone in zones {
            overlay::draw_polygon(&mut img, zone);
        }
        for (bbox, label, violation) in boxes {
            overlay::draw_box(&mut img, *bbox, label, *violation);
        }
        overlay::draw_status_panel(&mut img, status, reasons, worker_count, fps);

        Frame { data: img.into_raw(), width: frame.width, height: frame.height, captured_at: frame.captured_at }
    }
}

fn zones_for_drawing(config: &StreamConfig, hazard_zone: &HazardZoneTracker) -> Vec<Vec<(f32, f32)>> {
    if config.intrusion_detection {
        hazard_zone.get_safe_area()
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelName;
    use crate::detector::ScriptedDetector;
    use crate::types::{Bbox, RawDetection};

    fn base_config() -> StreamConfig {
        StreamConfig {
            stream_id: "cam-1".to_string(),
            rtsp_link: "rtsp://x".to_string(),
            model_name: ModelName::Ppe,
            location: String::new(),
            description: String::new(),
            is_active: true,
            ptz: None,
            ptz_autotrack: false,
            intrusion_detection: true,
            saving_video: true,
            safe_area: None,
            patrol_area: None,
            patrol_pattern: vec![],
            patrol_home_position: None,
            patrol_enabled: false,
            patrol_mode: crate::config::PatrolMode::Off,
            enable_focus_during_patrol: false,
        }
    }

    fn blank_frame() -> Frame {
        Frame::new(vec![0u8; 64 * 64 * 3], 64, 64)
    }

    #[test]
    fn person_bottom_center_inside_zone_flags_intrusion() {
        let config = base_config();
        let detector = Arc::new(ScriptedDetector::new(vec![vec![RawDetection {
            class_label: "person".to_string(),
            bbox: Bbox { x1: 10.0, y1: 10.0, x2: 20.0, y2: 20.0 },
            confidence: 0.9,
            track_id: Some(1),
        }]]));
        let hazard_zone = Arc::new(HazardZoneTracker::new());
        hazard_zone.set_safe_area(vec![vec![(0.0, 0.0), (64.0, 0.0), (64.0, 64.0), (0.0, 64.0)]], None, true);

        let mut processor = FrameProcessor::new(&config, detector, hazard_zone);
        let result = processor.process(blank_frame(), &config);

        assert_eq!(result.status, FrameStatus::Unsafe);
        assert!(result.reasons.contains(&crate::error::reason::INTRUSION.to_string()));
    }

    #[test]
    fn no_detections_is_safe() {
        let config = base_config();
        let detector = Arc::new(ScriptedDetector::new(vec![vec![]]));
        let hazard_zone = Arc::new(HazardZoneTracker::new());
        let mut processor = FrameProcessor::new(&config, detector, hazard_zone);
        let result = processor.process(blank_frame(), &config);
        assert_eq!(result.status, FrameStatus::Safe);
    }
}
