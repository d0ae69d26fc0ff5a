use crate::config::EngineConfig;
use crate::ptz::device::PtzDevice;
use crate::types::Bbox;
use std::sync::Arc;
use std::time::Instant;

/// Computes pan/tilt/zoom corrections to keep tracked people centered,
/// following the source's `PTZAutoTracker.calculate_movement` exactly:
/// average bbox center drives pan/tilt with a zoom-scaled dead zone, and
/// total bbox area relative to frame area drives zoom, both clamped to the
/// device's configured limits.
pub struct AutoTracker {
    device: Arc<dyn PtzDevice>,
    cfg: Arc<EngineConfig>,
    center_tolerance_x: f32,
    center_tolerance_y: f32,
    zoom_level: f32,
    last_move_time: Option<Instant>,
    last_detection_time: Option<Instant>,
    is_moving: bool,
    at_default_position: bool,
    home_pan: f32,
    home_tilt: f32,
    home_zoom: f32,
}

impl AutoTracker {
    pub fn new(device: Arc<dyn PtzDevice>, cfg: Arc<EngineConfig>) -> Self {
        let zoom_level = cfg.min_zoom;
        let home_zoom = cfg.min_zoom;
        Self {
            device,
            cfg,
            center_tolerance_x: 0.1,
            center_tolerance_y: 0.1,
            zoom_level,
            last_move_time: None,
            last_detection_time: None,
            is_moving: false,
            at_default_position: false,
            home_pan: 0.0,
            home_tilt: 0.0,
            home_zoom,
        }
    }

    /// Builds a tracker whose "return home" target is `home` instead of the
    /// origin, for engaging auto-track at the camera's current position.
    pub fn with_home_position(device: Arc<dyn PtzDevice>, cfg: Arc<EngineConfig>, home: crate::config::PtzPosition) -> Self {
        let mut tracker = Self::new(device, cfg);
        tracker.update_default_position(home.pan, home.tilt, home.zoom);
        tracker
    }

    /// Records `position` as the new return-home target, mirroring the
    /// source's `update_default_position`.
    pub fn update_default_position(&mut self, pan: f32, tilt: f32, zoom: f32) {
        self.home_pan = pan;
        self.home_tilt = tilt;
        self.home_zoom = zoom;
    }

    /// Advances the tracker with this frame's person bboxes. Call once per
    /// processed frame when PTZ auto-track is enabled and the stream is not
    /// in a patrol focus/cooldown/rest state.
    pub fn on_frame(&mut self, frame_width: u32, frame_height: u32, bboxes: &[Bbox]) {
        let now = Instant::now();

        if bboxes.is_empty() {
            let idle_for = self.last_detection_time.map(|t| now.duration_since(t).as_secs_f64()).unwrap_or(f64::MAX);
            if idle_for >= self.cfg.no_object_timeout_secs && !self.at_default_position {
                let _ = self.device.absolute_move(crate::config::PtzPosition { pan: self.home_pan, tilt: self.home_tilt, zoom: self.home_zoom });
                self.zoom_level = self.home_zoom;
                self.at_default_position = true;
            }
            return;
        }
        self.last_detection_time = Some(now);
        self.at_default_position = false;

        if let Some(last_move) = self.last_move_time {
            if now.duration_since(last_move).as_secs_f64() < self.cfg.move_throttle_secs {
                return;
            }
        }

        let (pan, tilt, zoom) = self.calculate_movement(frame_width, frame_height, bboxes);

        if pan == 0.0 && tilt == 0.0 && zoom == 0.0 {
            if self.is_moving {
                let _ = self.device.stop();
                self.is_moving = false;
            }
            return;
        }

        let _ = self.device.continuous_move(pan, tilt, zoom);
        self.is_moving = true;
        self.last_move_time = Some(now);
    }

    fn calculate_movement(&mut self, frame_width: u32, frame_height: u32, bboxes: &[Bbox]) -> (f32, f32, f32) {
        let frame_center_x = frame_width as f32 / 2.0;
        let frame_center_y = frame_height as f32 / 2.0;

        let centers: Vec<(f32, f32)> = bboxes.iter().map(|b| b.center()).collect();
        let areas: Vec<f32> = bboxes.iter().map(|b| b.area()).collect();

        let avg_center_x = centers.iter().map(|c| c.0).sum::<f32>() / centers.len() as f32;
        let avg_center_y = centers.iter().map(|c| c.1).sum::<f32>() / centers.len() as f32;

        let delta_x = (avg_center_x - frame_center_x) / frame_width as f32;
        let delta_y = (avg_center_y - frame_center_y) / frame_height as f32;

        self.center_tolerance_x = (self.center_tolerance_x * (1.0 - self.zoom_level)).max(0.05);
        self.center_tolerance_y = (self.center_tolerance_y * (1.0 - self.zoom_level)).max(0.05);

        let pan = Self::pan_tilt(delta_x, self.center_tolerance_x, self.cfg.pan_velocity, false);
        let tilt = Self::pan_tilt(delta_y, self.center_tolerance_y, self.cfg.tilt_velocity, true);

        let zoom = self.calculate_zoom(frame_width, frame_height, &areas, &centers);

        (pan, tilt, zoom)
    }

    fn pan_tilt(delta: f32, tolerance: f32, velocity: f32, invert: bool) -> f32 {
        if delta.abs() > tolerance {
            let direction = if invert { -velocity * delta } else { velocity * delta };
            direction.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    fn calculate_zoom(&mut self, frame_width: u32, frame_height: u32, areas: &[f32], centers: &[(f32, f32)]) -> f32 {
        let frame_area = (frame_width * frame_height) as f32;
        let min_target_area_ratio = 0.03;
        let max_target_area_ratio = 0.1;

        let total_area: f32 = areas.iter().sum();
        let current_area_ratio = total_area / frame_area;

        let frame_center_x = frame_width as f32 / 2.0;
        let frame_center_y = frame_height as f32 / 2.0;
        let max_distance_from_center = centers
            .iter()
            .map(|&(x, y)| {
                (((x - frame_center_x) / frame_width as f32).powi(2) + ((y - frame_center_y) / frame_height as f32).powi(2)).sqrt()
            })
            .fold(0.0f32, f32::max);

        let zoom_in_threshold = min_target_area_ratio * (1.0 - self.zoom_level);
        let zoom_out_threshold = max_target_area_ratio * (1.0 + self.zoom_level);

        let mut zoom_direction = 0.0;
        if current_area_ratio < zoom_in_threshold && self.zoom_level < self.cfg.max_zoom {
            zoom_direction = self.cfg.zoom_velocity * (1.0 - max_distance_from_center);
        } else if current_area_ratio > zoom_out_threshold && self.zoom_level > self.cfg.min_zoom {
            zoom_direction = -self.cfg.zoom_velocity * (1.0 + max_distance_from_center);
        }

        self.zoom_level = (self.zoom_level + zoom_direction).clamp(self.cfg.min_zoom, self.cfg.max_zoom);
        zoom_direction
    }

    pub fn is_at_default_position(&self) -> bool {
        self.at_default_position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptz::device::RecordingPtzDevice;

    fn tracker() -> (AutoTracker, Arc<RecordingPtzDevice>) {
        let device = Arc::new(RecordingPtzDevice::default());
        let tracker = AutoTracker::new(device.clone(), Arc::new(EngineConfig::default()));
        (tracker, device)
    }

    #[test]
    fn centered_large_bbox_issues_no_movement() {
        let (mut tracker, _device) = tracker();
        // A box exactly centered and sized to hit the target area ratio band
        // should fall within tolerance and not move.
        let bbox = Bbox { x1: 310.0, y1: 310.0, x2: 330.0, y2: 330.0 };
        tracker.on_frame(640, 640, &[bbox]);
    }

    #[test]
    fn off_center_bbox_triggers_pan_command() {
        let (mut tracker, device) = tracker();
        let bbox = Bbox { x1: 0.0, y1: 300.0, x2: 40.0, y2: 340.0 };
        tracker.on_frame(640, 640, &[bbox]);
        let commands = device.commands.lock().unwrap();
        assert!(!commands.is_empty());
    }

    #[test]
    fn pan_tilt_and_zoom_stay_within_bounds() {
        let (mut tracker, device) = tracker();
        let bbox = Bbox { x1: 0.0, y1: 0.0, x2: 640.0, y2: 640.0 };
        tracker.on_frame(640, 640, &[bbox]);
        for cmd in device.commands.lock().unwrap().iter() {
            if let crate::ptz::device::PtzCommand::ContinuousMove { pan, tilt, zoom } = cmd {
                assert!(*pan >= -1.0 && *pan <= 1.0);
                assert!(*tilt >= -1.0 && *tilt <= 1.0);
                assert!(*zoom >= -1.0 && *zoom <= 1.0);
            }
        }
    }

    #[test]
    fn no_bboxes_eventually_returns_to_home() {
        let (mut tracker, device) = tracker();
        tracker.last_detection_time = Some(Instant::now() - std::time::Duration::from_secs(10));
        tracker.on_frame(640, 640, &[]);
        assert!(tracker.is_at_default_position());
        let commands = device.commands.lock().unwrap();
        assert!(matches!(commands.last(), Some(crate::ptz::device::PtzCommand::AbsoluteMove(_))));
    }

    #[test]
    fn returns_to_captured_home_position_not_origin() {
        let device = Arc::new(RecordingPtzDevice::default());
        let home = crate::config::PtzPosition { pan: 0.42, tilt: -0.2, zoom: 0.15 };
        let mut tracker = AutoTracker::with_home_position(device.clone(), Arc::new(EngineConfig::default()), home);
        tracker.last_detection_time = Some(Instant::now() - std::time::Duration::from_secs(10));
        tracker.on_frame(640, 640, &[]);
        let commands = device.commands.lock().unwrap();
        match commands.last() {
            Some(crate::ptz::device::PtzCommand::AbsoluteMove(pos)) => {
                assert_eq!(*pos, home);
            }
            other => panic!("expected absolute move to home, got {other:?}"),
        }
    }
}
