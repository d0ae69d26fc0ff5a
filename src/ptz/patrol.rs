use crate::config::{EngineConfig, PatrolArea, PatrolMode, PtzPosition, Waypoint};
use crate::ptz::device::PtzDevice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Consolidated patrol state, replacing the source's boolean-flag soup
/// (`is_patrolling`, `is_focusing_on_object`, `is_resting_at_home`,
/// `is_in_tracking_cooldown`) with one tagged value so invalid combinations
/// (e.g. focusing while resting) are unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatrolState {
    Off,
    Patrolling,
    Focusing,
    Cooldown,
    RestingAtHome,
}

/// Computes grid waypoint PTZ positions within `area`, traversed row-major
/// (horizontal) or column-major (vertical) in snake order so consecutive
/// waypoints are always adjacent — no long diagonal jump back to the start
/// of the next row/column.
fn grid_waypoint_positions(area: PatrolArea, x_positions: u32, y_positions: u32, horizontal: bool) -> Vec<PtzPosition> {
    let area = area.normalized();
    let xs: Vec<f32> = step_values(area.x_min, area.x_max, x_positions.max(1));
    let ys: Vec<f32> = step_values(area.y_min, area.y_max, y_positions.max(1));

    let mut positions = Vec::new();
    if horizontal {
        for (row, &y) in ys.iter().enumerate() {
            let cols: Box<dyn Iterator<Item = &f32>> =
                if row % 2 == 0 { Box::new(xs.iter()) } else { Box::new(xs.iter().rev()) };
            for &x in cols {
                positions.push(PtzPosition { pan: x, tilt: y, zoom: area.zoom_level });
            }
        }
    } else {
        for (col, &x) in xs.iter().enumerate() {
            let rows: Box<dyn Iterator<Item = &f32>> =
                if col % 2 == 0 { Box::new(ys.iter()) } else { Box::new(ys.iter().rev()) };
            for &y in rows {
                positions.push(PtzPosition { pan: x, tilt: y, zoom: area.zoom_level });
            }
        }
    }
    positions
}

fn step_values(min: f32, max: f32, count: u32) -> Vec<f32> {
    if count <= 1 {
        return vec![(min + max) / 2.0];
    }
    let step = (max - min) / (count - 1) as f32;
    (0..count).map(|i| min + step * i as f32).collect()
}

struct WaypointCursor {
    index: usize,
    arrived_at: Instant,
    focused_this_cycle: std::collections::HashSet<usize>,
}

/// Drives a grid or custom-waypoint patrol for one stream's PTZ device. Owns
/// its own state machine; a dedicated thread ticks it at ~100ms to evaluate
/// dwell timers, matching the source's dwell-loop poll cadence.
pub struct PatrolEngine {
    device: Arc<dyn PtzDevice>,
    cfg: Arc<EngineConfig>,
    state: Mutex<PatrolState>,
    mode: Mutex<PatrolMode>,
    cursor: Mutex<WaypointCursor>,
    home_position: Mutex<PtzPosition>,
    focus_started_at: Mutex<Option<Instant>>,
    object_last_seen_at: Mutex<Option<Instant>>,
    cooldown_end: Mutex<Option<Instant>>,
    rest_until: Mutex<Option<Instant>>,
    enable_focus_during_patrol: Mutex<bool>,
    patrol_dwell_time_secs: Mutex<f64>,
    waypoints: Mutex<Vec<Waypoint>>,
    grid_waypoints: Mutex<Vec<PtzPosition>>,
    patrol_area: Mutex<Option<PatrolArea>>,
    paused: AtomicBool,
    stop: Arc<AtomicBool>,
    cycles_since_rest: Mutex<u32>,
}

impl PatrolEngine {
    pub fn new(device: Arc<dyn PtzDevice>, cfg: Arc<EngineConfig>) -> Self {
        let dwell = cfg.patrol_dwell_time_secs;
        Self {
            device,
            cfg,
            state: Mutex::new(PatrolState::Off),
            mode: Mutex::new(PatrolMode::Off),
            cursor: Mutex::new(WaypointCursor { index: 0, arrived_at: Instant::now(), focused_this_cycle: Default::default() }),
            home_position: Mutex::new(PtzPosition::default()),
            focus_started_at: Mutex::new(None),
            object_last_seen_at: Mutex::new(None),
            cooldown_end: Mutex::new(None),
            rest_until: Mutex::new(None),
            enable_focus_during_patrol: Mutex::new(false),
            patrol_dwell_time_secs: Mutex::new(dwell),
            waypoints: Mutex::new(Vec::new()),
            grid_waypoints: Mutex::new(Vec::new()),
            patrol_area: Mutex::new(None),
            paused: AtomicBool::new(false),
            stop: Arc::new(AtomicBool::new(false)),
            cycles_since_rest: Mutex::new(0),
        }
    }

    pub fn state(&self) -> PatrolState {
        *self.state.lock().unwrap()
    }

    pub fn save_patrol_area(&self, area: PatrolArea) {
        *self.patrol_area.lock().unwrap() = Some(area.normalized());
    }

    pub fn get_patrol_area(&self) -> Option<PatrolArea> {
        *self.patrol_area.lock().unwrap()
    }

    pub fn save_patrol_pattern(&self, waypoints: Vec<Waypoint>) {
        *self.waypoints.lock().unwrap() = waypoints;
    }

    pub fn get_patrol_pattern(&self) -> Vec<Waypoint> {
        self.waypoints.lock().unwrap().clone()
    }

    pub fn set_focus_during_patrol(&self, enabled: bool) {
        *self.enable_focus_during_patrol.lock().unwrap() = enabled;
    }

    pub fn focus_during_patrol_enabled(&self) -> bool {
        *self.enable_focus_during_patrol.lock().unwrap()
    }

    /// Transitions `Off -> Patrolling`, capturing the current PTZ position as
    /// home. Rejects modes that are missing their required configuration
    /// (grid without a patrol_area, pattern with <2 waypoints).
    pub fn toggle_patrol(&self, mode: PatrolMode) -> Result<(), String> {
        if mode == PatrolMode::Off {
            let mut state = self.state.lock().unwrap();
            *state = PatrolState::Off;
            *self.mode.lock().unwrap() = PatrolMode::Off;
            let _ = self.device.stop();
            return Ok(());
        }

        if mode == PatrolMode::Grid && self.patrol_area.lock().unwrap().is_none() {
            return Err("grid patrol mode requires a patrol_area".to_string());
        }
        if mode == PatrolMode::Pattern && self.waypoints.lock().unwrap().len() < 2 {
            return Err("pattern patrol mode requires at least 2 waypoints".to_string());
        }

        // patrol_dwell_time must accommodate the pattern-mode focus-gate dwell,
        // auto-adjusting upward with a warning rather than silently failing to
        // ever satisfy `min_waypoint_dwell_before_focus`.
        let min_dwell = self.cfg.min_waypoint_dwell_before_focus_secs;
        let mut dwell = self.patrol_dwell_time_secs.lock().unwrap();
        if *dwell < min_dwell {
            warn!("patrol_dwell_time ({}s) < min_waypoint_dwell_before_focus ({}s), auto-adjusting", *dwell, min_dwell);
            *dwell = min_dwell;
        }
        drop(dwell);

        if let Ok(status) = self.device.get_status() {
            *self.home_position.lock().unwrap() = status;
        }

        if mode == PatrolMode::Grid {
            let area = self.patrol_area.lock().unwrap().expect("checked above");
            let positions = grid_waypoint_positions(
                area,
                self.cfg.grid_x_positions,
                self.cfg.grid_y_positions,
                self.cfg.grid_traverse_horizontal,
            );
            *self.grid_waypoints.lock().unwrap() = positions;
        }

        *self.mode.lock().unwrap() = mode;
        *self.state.lock().unwrap() = PatrolState::Patrolling;
        let mut cursor = self.cursor.lock().unwrap();
        cursor.index = 0;
        cursor.arrived_at = Instant::now();
        cursor.focused_this_cycle.clear();
        drop(cursor);
        *self.cycles_since_rest.lock().unwrap() = 0;
        info!("patrol started in {:?} mode", mode);
        Ok(())
    }

    /// The waypoint count for whichever traversal is active, used by the
    /// dwell loop to know when `advance_waypoint` completes a cycle.
    fn waypoint_count(&self) -> usize {
        match *self.mode.lock().unwrap() {
            PatrolMode::Grid => self.grid_waypoints.lock().unwrap().len().max(1),
            PatrolMode::Pattern => self.waypoints.lock().unwrap().len().max(1),
            PatrolMode::Off => 1,
        }
    }

    /// The PTZ position the device should be commanded to for the current
    /// waypoint index, under whichever traversal is active.
    fn current_waypoint_position(&self) -> Option<PtzPosition> {
        let index = self.cursor.lock().unwrap().index;
        match *self.mode.lock().unwrap() {
            PatrolMode::Grid => self.grid_waypoints.lock().unwrap().get(index).copied(),
            PatrolMode::Pattern => self.waypoints.lock().unwrap().get(index).map(|w| PtzPosition {
                pan: w.x as f32,
                tilt: w.y as f32,
                zoom: w.z as f32,
            }),
            PatrolMode::Off => None,
        }
    }

    /// Pauses the dwell loop without leaving `Patrolling` state, used by
    /// pattern preview to borrow the PTZ device without losing patrol state.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    /// The positions a preview should visit: the saved custom pattern if one
    /// exists, otherwise a grid computed over the saved patrol area.
    fn preview_positions(&self) -> Vec<PtzPosition> {
        let waypoints = self.waypoints.lock().unwrap();
        if !waypoints.is_empty() {
            return waypoints
                .iter()
                .map(|w| PtzPosition { pan: w.x as f32, tilt: w.y as f32, zoom: w.z as f32 })
                .collect();
        }
        drop(waypoints);
        match *self.patrol_area.lock().unwrap() {
            Some(area) => grid_waypoint_positions(area, self.cfg.grid_x_positions, self.cfg.grid_y_positions, self.cfg.grid_traverse_horizontal),
            None => Vec::new(),
        }
    }

    /// Runs a pattern/grid preview once on the calling thread: pauses the
    /// dwell loop so the preview has exclusive use of the PTZ device, visits
    /// each waypoint with a short settle delay calling `on_arrive(index,
    /// total)`, then resumes the dwell loop after a further settle delay.
    /// Non-blocking from the caller's point of view when run on its own
    /// thread, per spec.
    pub fn preview(&self, on_arrive: impl Fn(usize, usize)) {
        let positions = self.preview_positions();
        if positions.is_empty() {
            return;
        }
        let was_patrolling = self.state() == PatrolState::Patrolling;
        self.pause();
        for (index, position) in positions.iter().enumerate() {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            let _ = self.device.absolute_move(*position);
            std::thread::sleep(Duration::from_millis(800));
            on_arrive(index, positions.len());
        }
        std::thread::sleep(Duration::from_secs(1));
        if was_patrolling {
            self.resume();
        }
    }

    /// Runs the dwell loop on the calling thread until `stop()` is called.
    /// Intended to be the body of a dedicated patrol thread, polling at
    /// ~100ms: moves to the current waypoint, waits out
    /// `patrol_dwell_time_secs`, then advances, wrapping around into a
    /// rest-at-home once every waypoint has been visited.
    pub fn run(&self) {
        let mut commanded_index: Option<usize> = None;

        while !self.stop.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100));
            if self.paused.load(Ordering::Relaxed) || self.state() != PatrolState::Patrolling {
                commanded_index = None;
                continue;
            }

            let index = self.cursor.lock().unwrap().index;
            if commanded_index != Some(index) {
                if let Some(position) = self.current_waypoint_position() {
                    let _ = self.device.absolute_move(position);
                }
                commanded_index = Some(index);
            }

            let dwell = *self.patrol_dwell_time_secs.lock().unwrap();
            let dwell_elapsed = self.cursor.lock().unwrap().arrived_at.elapsed().as_secs_f64() >= dwell;
            if dwell_elapsed {
                let count = self.waypoint_count();
                let cycle_complete = (index + 1) % count == 0;
                self.advance_waypoint(count, cycle_complete);
            }
        }
    }

    /// Whether a focus transition is allowed right now, per the source's
    /// `can_focus_during_patrol`: never while resting, never if the feature
    /// is off, and in pattern mode only once the waypoint's dwell has reached
    /// `min_waypoint_dwell_before_focus` and it hasn't already focused this
    /// cycle.
    pub fn can_focus_during_patrol(&self) -> bool {
        if self.state() != PatrolState::Patrolling {
            return false;
        }
        if !*self.enable_focus_during_patrol.lock().unwrap() {
            return false;
        }
        match *self.mode.lock().unwrap() {
            PatrolMode::Grid => true,
            PatrolMode::Pattern => {
                let cursor = self.cursor.lock().unwrap();
                let dwell_elapsed = cursor.arrived_at.elapsed().as_secs_f64();
                dwell_elapsed >= self.cfg.min_waypoint_dwell_before_focus_secs
                    && !cursor.focused_this_cycle.contains(&cursor.index)
            }
            PatrolMode::Off => false,
        }
    }

    /// Called when an object worth tracking is detected while patrolling.
    pub fn begin_focus(&self) {
        if !self.can_focus_during_patrol() {
            return;
        }
        *self.state.lock().unwrap() = PatrolState::Focusing;
        let now = Instant::now();
        *self.focus_started_at.lock().unwrap() = Some(now);
        *self.object_last_seen_at.lock().unwrap() = Some(now);
        let mut cursor = self.cursor.lock().unwrap();
        let idx = cursor.index;
        cursor.focused_this_cycle.insert(idx);
        info!("patrol: focusing on detected object");
    }

    pub fn note_object_seen(&self) {
        if self.state() == PatrolState::Focusing {
            *self.object_last_seen_at.lock().unwrap() = Some(Instant::now());
        }
    }

    /// Advances the state machine by one tick; call at ~100ms from the patrol
    /// thread. Returns the current state after any transition.
    pub fn tick(&self) -> PatrolState {
        let now = Instant::now();
        let current = self.state();

        match current {
            PatrolState::Focusing => {
                let started = self.focus_started_at.lock().unwrap().unwrap_or(now);
                let last_seen = self.object_last_seen_at.lock().unwrap().unwrap_or(now);
                let lost_for = now.duration_since(last_seen).as_secs_f64();
                let min_elapsed = now.duration_since(started).as_secs_f64() >= self.cfg.min_object_focus_duration_secs;
                let max_elapsed = now.duration_since(started).as_secs_f64() >= self.cfg.object_focus_duration_secs;

                if (lost_for >= 1.0 && min_elapsed) || max_elapsed {
                    let _ = self.device.stop();
                    self.start_return_to_stored_position();
                    *self.cooldown_end.lock().unwrap() = Some(now + Duration::from_secs_f64(self.cfg.tracking_cooldown_duration_secs));
                    *self.state.lock().unwrap() = PatrolState::Cooldown;
                    info!("patrol: focus ended, entering cooldown");
                }
            }
            PatrolState::Cooldown => {
                if let Some(end) = *self.cooldown_end.lock().unwrap() {
                    if now >= end {
                        *self.state.lock().unwrap() = PatrolState::Patrolling;
                        info!("patrol: cooldown elapsed, resuming patrol");
                    }
                }
            }
            PatrolState::RestingAtHome => {
                if let Some(until) = *self.rest_until.lock().unwrap() {
                    if now >= until {
                        *self.state.lock().unwrap() = PatrolState::Patrolling;
                        self.cursor.lock().unwrap().focused_this_cycle.clear();
                        info!("patrol: rest elapsed, resuming patrol");
                    }
                }
            }
            PatrolState::Patrolling | PatrolState::Off => {}
        }

        self.state()
    }

    /// Advances to the next waypoint, called by the dwell loop once the
    /// current waypoint's dwell time elapses. Triggers rest-at-home when a
    /// full cycle completes: every cycle in grid mode, every
    /// `pattern_rest_every_n_cycles` cycles in pattern mode (spec §4.7), since
    /// a short custom pattern resting after every lap would spend most of its
    /// time parked at home instead of patrolling.
    pub fn advance_waypoint(&self, waypoint_count: usize, cycle_complete: bool) {
        if self.state() != PatrolState::Patrolling {
            return;
        }
        let mut cursor = self.cursor.lock().unwrap();
        cursor.index = (cursor.index + 1) % waypoint_count.max(1);
        cursor.arrived_at = Instant::now();
        drop(cursor);

        if !cycle_complete {
            return;
        }

        let should_rest = match *self.mode.lock().unwrap() {
            PatrolMode::Pattern => {
                let mut cycles = self.cycles_since_rest.lock().unwrap();
                *cycles += 1;
                let due = *cycles >= self.cfg.pattern_rest_every_n_cycles.max(1);
                if due {
                    *cycles = 0;
                }
                due
            }
            PatrolMode::Grid | PatrolMode::Off => true,
        };

        if should_rest {
            self.enter_rest_at_home();
        }
    }

    fn enter_rest_at_home(&self) {
        // Aggressively clear any in-flight focus/cooldown before resting.
        *self.focus_started_at.lock().unwrap() = None;
        *self.cooldown_end.lock().unwrap() = None;
        let _ = self.device.stop();
        let home = *self.home_position.lock().unwrap();
        let _ = self.device.absolute_move(home);
        *self.rest_until.lock().unwrap() = Some(Instant::now() + Duration::from_secs_f64(self.cfg.home_rest_duration_secs));
        *self.state.lock().unwrap() = PatrolState::RestingAtHome;
        info!("patrol: resting at home for {}s", self.cfg.home_rest_duration_secs);
    }

    fn start_return_to_stored_position(&self) {
        let device = Arc::clone(&self.device);
        let cursor_index_position = *self.home_position.lock().unwrap();
        std::thread::spawn(move || {
            let _ = device.absolute_move(cursor_index_position);
        });
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptz::device::RecordingPtzDevice;

    fn engine() -> (Arc<PatrolEngine>, Arc<RecordingPtzDevice>) {
        let device = Arc::new(RecordingPtzDevice::default());
        let engine = Arc::new(PatrolEngine::new(device.clone(), Arc::new(EngineConfig::default())));
        (engine, device)
    }

    #[test]
    fn grid_mode_without_patrol_area_is_rejected() {
        let (engine, _device) = engine();
        assert!(engine.toggle_patrol(PatrolMode::Grid).is_err());
    }

    #[test]
    fn pattern_mode_with_two_waypoints_starts() {
        let (engine, _device) = engine();
        engine.save_patrol_pattern(vec![Waypoint { x: 0, y: 0, z: 0 }, Waypoint { x: 1, y: 1, z: 0 }]);
        assert!(engine.toggle_patrol(PatrolMode::Pattern).is_ok());
        assert_eq!(engine.state(), PatrolState::Patrolling);
    }

    #[test]
    fn resting_at_home_blocks_focus() {
        let (engine, _device) = engine();
        engine.save_patrol_area(PatrolArea { x_min: 0.0, x_max: 1.0, y_min: 0.0, y_max: 1.0, zoom_level: 0.1 });
        engine.set_focus_during_patrol(true);
        engine.toggle_patrol(PatrolMode::Grid).unwrap();
        engine.enter_rest_at_home();
        assert!(!engine.can_focus_during_patrol());
    }

    #[test]
    fn waypoint_focuses_only_once_per_cycle_in_pattern_mode() {
        let (engine, _device) = engine();
        engine.save_patrol_pattern(vec![Waypoint { x: 0, y: 0, z: 0 }, Waypoint { x: 1, y: 1, z: 0 }]);
        engine.set_focus_during_patrol(true);
        engine.toggle_patrol(PatrolMode::Pattern).unwrap();
        {
            let mut cursor = engine.cursor.lock().unwrap();
            cursor.arrived_at = Instant::now() - Duration::from_secs(10);
        }
        assert!(engine.can_focus_during_patrol());
        engine.begin_focus();
        assert_eq!(engine.state(), PatrolState::Focusing);
        // Force back to patrolling at the same waypoint and check the gate again.
        *engine.state.lock().unwrap() = PatrolState::Patrolling;
        assert!(!engine.can_focus_during_patrol());
    }

    #[test]
    fn focus_ends_after_max_duration_even_if_object_still_seen() {
        let (engine, _device) = engine();
        engine.save_patrol_area(PatrolArea { x_min: 0.0, x_max: 1.0, y_min: 0.0, y_max: 1.0, zoom_level: 0.1 });
        engine.set_focus_during_patrol(true);
        engine.toggle_patrol(PatrolMode::Grid).unwrap();
        engine.begin_focus();
        *engine.focus_started_at.lock().unwrap() = Some(Instant::now() - Duration::from_secs(11));
        *engine.object_last_seen_at.lock().unwrap() = Some(Instant::now());
        assert_eq!(engine.tick(), PatrolState::Cooldown);
    }

    #[test]
    fn grid_waypoints_snake_in_row_major_order() {
        let area = PatrolArea { x_min: 0.0, x_max: 2.0, y_min: 0.0, y_max: 2.0, zoom_level: 0.2 };
        let positions = grid_waypoint_positions(area, 3, 2, true);
        assert_eq!(positions.len(), 6);
        // First row ascends, second row descends: no long jump back to x_min.
        assert_eq!(positions[0].pan, 0.0);
        assert_eq!(positions[1].pan, 1.0);
        assert_eq!(positions[2].pan, 2.0);
        assert_eq!(positions[3].pan, 2.0);
        assert_eq!(positions[4].pan, 1.0);
        assert_eq!(positions[5].pan, 0.0);
    }

    #[test]
    fn grid_waypoints_snake_in_column_major_order_when_vertical() {
        let area = PatrolArea { x_min: 0.0, x_max: 1.0, y_min: 0.0, y_max: 2.0, zoom_level: 0.2 };
        let positions = grid_waypoint_positions(area, 2, 3, false);
        assert_eq!(positions.len(), 6);
        assert_eq!(positions[0].tilt, 0.0);
        assert_eq!(positions[2].tilt, 2.0);
        assert_eq!(positions[3].tilt, 2.0);
        assert_eq!(positions[5].tilt, 0.0);
    }

    #[test]
    fn toggle_patrol_grid_populates_waypoints_from_configured_density() {
        let (engine, _device) = engine();
        engine.save_patrol_area(PatrolArea { x_min: 0.0, x_max: 1.0, y_min: 0.0, y_max: 1.0, zoom_level: 0.1 });
        engine.toggle_patrol(PatrolMode::Grid).unwrap();
        let count = engine.grid_waypoints.lock().unwrap().len();
        assert_eq!(count as u32, engine.cfg.grid_x_positions * engine.cfg.grid_y_positions);
        assert_eq!(engine.current_waypoint_position(), engine.grid_waypoints.lock().unwrap().first().copied());
    }

    #[test]
    fn pattern_mode_only_rests_every_n_cycles() {
        let device = Arc::new(RecordingPtzDevice::default());
        let mut cfg = EngineConfig::default();
        cfg.pattern_rest_every_n_cycles = 2;
        let engine = Arc::new(PatrolEngine::new(device, Arc::new(cfg)));
        engine.save_patrol_pattern(vec![Waypoint { x: 0, y: 0, z: 0 }, Waypoint { x: 1, y: 1, z: 0 }]);
        engine.toggle_patrol(PatrolMode::Pattern).unwrap();

        // First cycle complete: should keep patrolling, not rest yet.
        engine.advance_waypoint(2, true);
        assert_eq!(engine.state(), PatrolState::Patrolling);

        // Second cycle complete: now it rests at home.
        engine.advance_waypoint(2, true);
        assert_eq!(engine.state(), PatrolState::RestingAtHome);
    }

    #[test]
    fn preview_falls_back_to_grid_when_no_pattern_saved() {
        let (engine, device) = engine();
        engine.save_patrol_area(PatrolArea { x_min: 0.0, x_max: 1.0, y_min: 0.0, y_max: 1.0, zoom_level: 0.1 });
        let mut visited = 0;
        engine.preview(|_, _| visited += 1);
        assert_eq!(visited, 9); // default 3x3 grid
        assert!(!device.commands.lock().unwrap().is_empty());
    }
}
