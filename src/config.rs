use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which rule set a stream's detector output is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelName {
    Ppe,
    Ladder,
    Scaffolding,
    MobileScaffolding,
    CuttingWelding,
    Fire,
    HeavyEquipment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatrolMode {
    Off,
    Grid,
    Pattern,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PatrolArea {
    pub x_min: f32,
    pub x_max: f32,
    pub y_min: f32,
    pub y_max: f32,
    pub zoom_level: f32,
}

impl PatrolArea {
    /// Normalizes so `x_min < x_max` and `y_min < y_max`, per the persisted invariant.
    pub fn normalized(mut self) -> Self {
        if self.x_min > self.x_max {
            std::mem::swap(&mut self.x_min, &mut self.x_max);
        }
        if self.y_min > self.y_max {
            std::mem::swap(&mut self.y_min, &mut self.y_max);
        }
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct PtzPosition {
    pub pan: f32,
    pub tilt: f32,
    pub zoom: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PtzCredentials {
    pub cam_ip: String,
    pub ptz_port: u16,
    pub ptz_username: String,
    pub ptz_password: String,
    pub profile_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waypoint {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

/// Persisted per-camera configuration. Mutated in place by toggle/save commands
/// and round-tripped through a `ConfigStore`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stream_id: String,
    pub rtsp_link: String,
    pub model_name: ModelName,
    pub location: String,
    pub description: String,
    pub is_active: bool,
    pub ptz: Option<PtzCredentials>,
    pub ptz_autotrack: bool,
    pub intrusion_detection: bool,
    pub saving_video: bool,
    pub safe_area: Option<SafeAreaConfig>,
    pub patrol_area: Option<PatrolArea>,
    pub patrol_pattern: Vec<Waypoint>,
    pub patrol_home_position: Option<PtzPosition>,
    pub patrol_enabled: bool,
    pub patrol_mode: PatrolMode,
    pub enable_focus_during_patrol: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeAreaConfig {
    pub polygons: Vec<Vec<(f32, f32)>>,
    pub static_mode: bool,
    pub reference_image_path: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), String> {
        match self.patrol_mode {
            PatrolMode::Pattern if self.patrol_pattern.len() < 2 => {
                Err("pattern patrol mode requires at least 2 waypoints".to_string())
            }
            PatrolMode::Grid if self.patrol_area.is_none() => {
                Err("grid patrol mode requires a patrol_area".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Process-wide tunables, shared (`Arc`) across every `StreamEngine`.
///
/// Mirrors the teacher's plain `Config` + `Default` pattern rather than a
/// generic file-backed loader: every field here has a literal default and may
/// be overridden by an identically-named environment variable at startup.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub frame_width: u32,
    pub frame_height: u32,
    pub reconnect_wait_secs: u64,
    pub max_reconnect_wait_secs: u64,
    pub rtmp_server: String,
    pub static_dir: String,
    pub default_frame_timeout_secs: u64,
    pub default_record_duration_secs: u64,
    pub default_frame_interval: u64,
    pub default_unsafe_ratio_threshold: f64,
    pub default_event_cooldown_secs: u64,
    pub max_frame_queue_size: usize,
    pub fps_queue_size: usize,

    // PTZ auto-tracker defaults, see autotrack.rs.
    pub move_throttle_secs: f64,
    pub no_object_timeout_secs: f64,
    pub min_zoom: f32,
    pub max_zoom: f32,
    pub zoom_velocity: f32,
    pub pan_velocity: f32,
    pub tilt_velocity: f32,

    // Patrol engine defaults, see ptz/patrol.rs.
    pub patrol_dwell_time_secs: f64,
    pub object_focus_duration_secs: f64,
    pub min_object_focus_duration_secs: f64,
    pub min_waypoint_dwell_before_focus_secs: f64,
    pub tracking_cooldown_duration_secs: f64,
    pub home_rest_duration_secs: f64,
    pub grid_x_positions: u32,
    pub grid_y_positions: u32,
    pub grid_traverse_horizontal: bool,
    pub pattern_rest_every_n_cycles: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_width: 640,
            frame_height: 640,
            reconnect_wait_secs: 2,
            max_reconnect_wait_secs: 60,
            rtmp_server: "rtmp://localhost/live".to_string(),
            static_dir: "static".to_string(),
            default_frame_timeout_secs: 5,
            default_record_duration_secs: 10,
            default_frame_interval: 30,
            default_unsafe_ratio_threshold: 0.7,
            default_event_cooldown_secs: 30,
            max_frame_queue_size: 10,
            fps_queue_size: 30,

            move_throttle_secs: 0.5,
            no_object_timeout_secs: 5.0,
            min_zoom: 0.1,
            max_zoom: 0.3,
            zoom_velocity: 0.1,
            pan_velocity: 0.8,
            tilt_velocity: 0.8,

            patrol_dwell_time_secs: 5.0,
            object_focus_duration_secs: 10.0,
            min_object_focus_duration_secs: 5.0,
            min_waypoint_dwell_before_focus_secs: 5.0,
            tracking_cooldown_duration_secs: 5.0,
            home_rest_duration_secs: 30.0,
            grid_x_positions: 3,
            grid_y_positions: 3,
            grid_traverse_horizontal: true,
            pattern_rest_every_n_cycles: 1,
        }
    }
}

impl EngineConfig {
    /// Applies `std::env::var` overrides for every field named above, matching
    /// the literal env var names in the spec's environment table.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        macro_rules! env_override {
            ($field:ident, $name:literal) => {
                if let Ok(v) = std::env::var($name) {
                    if let Ok(parsed) = v.parse() {
                        cfg.$field = parsed;
                    }
                }
            };
        }
        env_override!(frame_width, "FRAME_WIDTH");
        env_override!(frame_height, "FRAME_HEIGHT");
        env_override!(reconnect_wait_secs, "RECONNECT_WAIT_SECS");
        env_override!(max_reconnect_wait_secs, "MAX_RECONNECT_WAIT");
        env_override!(default_frame_timeout_secs, "DEFAULT_FRAME_TIMEOUT");
        env_override!(default_record_duration_secs, "DEFAULT_RECORD_DURATION");
        env_override!(default_frame_interval, "DEFAULT_FRAME_INTERVAL");
        env_override!(default_unsafe_ratio_threshold, "DEFAULT_UNSAFE_RATIO_THRESHOLD");
        env_override!(default_event_cooldown_secs, "DEFAULT_EVENT_COOLDOWN");
        env_override!(max_frame_queue_size, "MAX_FRAME_QUEUE_SIZE");
        env_override!(fps_queue_size, "FPS_QUEUE_SIZE");
        env_override!(grid_x_positions, "GRID_X_POSITIONS");
        env_override!(grid_y_positions, "GRID_Y_POSITIONS");
        env_override!(grid_traverse_horizontal, "GRID_TRAVERSE_HORIZONTAL");
        env_override!(pattern_rest_every_n_cycles, "PATTERN_REST_EVERY_N_CYCLES");
        if let Ok(v) = std::env::var("RTMP_SERVER") {
            cfg.rtmp_server = v;
        }
        if let Ok(v) = std::env::var("STATIC_DIR") {
            cfg.static_dir = v;
        }
        cfg
    }

    pub fn default_frame_timeout(&self) -> Duration {
        Duration::from_secs(self.default_frame_timeout_secs)
    }

    pub fn default_record_duration(&self) -> Duration {
        Duration::from_secs(self.default_record_duration_secs)
    }

    pub fn default_event_cooldown(&self) -> Duration {
        Duration::from_secs(self.default_event_cooldown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patrol_area_normalizes_inverted_bounds() {
        let area = PatrolArea { x_min: 10.0, x_max: 2.0, y_min: 5.0, y_max: 1.0, zoom_level: 0.2 }.normalized();
        assert!(area.x_min < area.x_max);
        assert!(area.y_min < area.y_max);
    }

    #[test]
    fn pattern_mode_requires_two_waypoints() {
        let mut cfg = sample_config();
        cfg.patrol_mode = PatrolMode::Pattern;
        cfg.patrol_pattern = vec![Waypoint { x: 0, y: 0, z: 0 }];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn grid_mode_requires_patrol_area() {
        let mut cfg = sample_config();
        cfg.patrol_mode = PatrolMode::Grid;
        cfg.patrol_area = None;
        assert!(cfg.validate().is_err());
    }

    fn sample_config() -> StreamConfig {
        StreamConfig {
            stream_id: "cam-1".to_string(),
            rtsp_link: "rtsp://example/stream".to_string(),
            model_name: ModelName::Ppe,
            location: "dock".to_string(),
            description: String::new(),
            is_active: true,
            ptz: None,
            ptz_autotrack: false,
            intrusion_detection: false,
            saving_video: true,
            safe_area: None,
            patrol_area: None,
            patrol_pattern: vec![],
            patrol_home_position: None,
            patrol_enabled: false,
            patrol_mode: PatrolMode::Off,
            enable_focus_during_patrol: false,
        }
    }
}
