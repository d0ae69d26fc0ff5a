use crate::capture::{CaptureBackend, CapturePipeline, RtspBackend};
use crate::commands::{CommandOutcome, StreamCommand};
use crate::config::{EngineConfig, PatrolMode, PtzCredentials, StreamConfig};
use crate::detector::{Detector, NullDetector};
use crate::event_bus::{intrusion_topic, EventBus};
use crate::event_recorder::EventRecorder;
use crate::frame_processor::FrameProcessor;
use crate::hazard_zone::HazardZoneTracker;
use crate::notify::Notifier;
use crate::output_sink::OutputSink;
use crate::persistence::{ConfigStore, EventStore, ReferenceImageStore};
use crate::ptz::autotrack::AutoTracker;
use crate::ptz::device::{NullPtzDevice, PtzDevice};
use crate::ptz::patrol::{PatrolEngine, PatrolState};
use crate::types::{Frame, StreamStats};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

/// Everything a `StreamEngine` needs from the outside world, bundled so the
/// registry can construct many engines without repeating wiring.
pub struct Collaborators {
    pub engine_cfg: Arc<EngineConfig>,
    pub detector: Arc<dyn Detector>,
    pub config_store: Arc<dyn ConfigStore>,
    pub event_store: Arc<dyn EventStore>,
    pub reference_image_store: Arc<dyn ReferenceImageStore>,
    pub notifier: Arc<dyn Notifier>,
    pub event_bus: Arc<dyn EventBus>,
    pub ptz_device_factory: Arc<dyn Fn(&PtzCredentials) -> Arc<dyn PtzDevice> + Send + Sync>,
}

impl Collaborators {
    /// A standalone wiring with in-memory/no-op collaborators, suitable for
    /// running the engine without the external HTTP/persistence/notification
    /// surfaces this crate deliberately doesn't implement.
    pub fn standalone(engine_cfg: EngineConfig) -> Self {
        Self {
            engine_cfg: Arc::new(engine_cfg),
            detector: Arc::new(NullDetector),
            config_store: Arc::new(crate::persistence::InMemoryConfigStore::default()),
            event_store: Arc::new(crate::persistence::InMemoryEventStore::default()),
            reference_image_store: Arc::new(crate::persistence::InMemoryReferenceImageStore::default()),
            notifier: Arc::new(crate::notify::NullNotifier),
            event_bus: Arc::new(crate::event_bus::NullEventBus),
            ptz_device_factory: Arc::new(|_: &PtzCredentials| -> Arc<dyn PtzDevice> { Arc::new(NullPtzDevice) }),
        }
    }
}

/// Owns every sub-component for one camera: capture, hazard-zone tracking,
/// frame processing, event recording, output republication, and (when
/// configured) PTZ auto-track + patrol. Exposes start/stop/command handling;
/// the Stream Registry owns a map of these.
pub struct StreamEngine {
    config: RwLock<StreamConfig>,
    collaborators: Arc<Collaborators>,
    hazard_zone: Arc<HazardZoneTracker>,
    patrol: Mutex<Option<Arc<PatrolEngine>>>,
    autotrack: Mutex<Option<Arc<Mutex<AutoTracker>>>>,
    ptz_device: Mutex<Option<Arc<dyn PtzDevice>>>,
    stats: Arc<Mutex<StreamStats>>,
    stop: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    current_frame: Mutex<Option<Frame>>,
    patrol_thread: Mutex<Option<(JoinHandle<()>, std::sync::mpsc::Receiver<()>)>>,
}

impl StreamEngine {
    pub fn new(config: StreamConfig, collaborators: Arc<Collaborators>) -> Self {
        let fps_window = collaborators.engine_cfg.fps_queue_size;
        Self {
            config: RwLock::new(config),
            collaborators,
            hazard_zone: Arc::new(HazardZoneTracker::new()),
            patrol: Mutex::new(None),
            autotrack: Mutex::new(None),
            ptz_device: Mutex::new(None),
            stats: Arc::new(Mutex::new(StreamStats::new(fps_window))),
            stop: Arc::new(AtomicBool::new(false)),
            threads: Mutex::new(Vec::new()),
            current_frame: Mutex::new(None),
            patrol_thread: Mutex::new(None),
        }
    }

    pub fn stream_id(&self) -> String {
        self.config.read().unwrap().stream_id.clone()
    }

    pub fn config_snapshot(&self) -> StreamConfig {
        self.config.read().unwrap().clone()
    }

    /// Spawns the capture and processing worker threads, loads saved hazard
    /// zones, and initializes PTZ asynchronously so the stream is usable
    /// before the camera round trip completes.
    pub fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        self.stop.store(false, Ordering::Relaxed);
        let config = self.config.read().unwrap().clone();

        if let Some(safe_area) = &config.safe_area {
            let reference_frame = safe_area
                .reference_image_path
                .as_ref()
                .and_then(|path| self.collaborators.reference_image_store.load(path).ok().flatten())
                .and_then(|bytes| image::load_from_memory(&bytes).ok())
                .map(|img| {
                    let rgb = img.to_rgb8();
                    Frame::new(rgb.as_raw().clone(), rgb.width(), rgb.height())
                });
            self.hazard_zone.set_safe_area(safe_area.polygons.clone(), reference_frame, safe_area.static_mode);
        }

        if config.ptz.is_some() {
            self.init_ptz(&config);
        }

        let (frame_tx, frame_rx) = sync_channel::<Frame>(self.collaborators.engine_cfg.max_frame_queue_size);

        let backend: Box<dyn CaptureBackend> = Box::new(RtspBackend {
            rtsp_link: config.rtsp_link.clone(),
            width: self.collaborators.engine_cfg.frame_width,
            height: self.collaborators.engine_cfg.frame_height,
            max_buffers: self.collaborators.engine_cfg.max_frame_queue_size,
        });

        let capture_cfg = Arc::clone(&self.collaborators.engine_cfg);
        let capture_stop = Arc::clone(&self.stop);
        let capture_stats = Arc::clone(&self.stats);
        let capture_handle = std::thread::spawn(move || {
            CapturePipeline::run(backend, &capture_cfg, frame_tx, capture_stop, capture_stats);
        });

        let engine = Arc::clone(self);
        let processing_handle = std::thread::spawn(move || engine.process_loop(frame_rx));

        let mut threads = self.threads.lock().unwrap();
        threads.push(capture_handle);
        threads.push(processing_handle);

        if config.patrol_enabled {
            let mode = if !config.patrol_pattern.is_empty() { PatrolMode::Pattern } else { PatrolMode::Grid };
            if let Some(patrol) = self.patrol.lock().unwrap().as_ref() {
                if let Err(e) = patrol.toggle_patrol(mode) {
                    warn!("could not auto-start patrol for {}: {}", config.stream_id, e);
                }
            }
        }

        info!("stream {} started", config.stream_id);
        Ok(())
    }

    fn init_ptz(self: &Arc<Self>, config: &StreamConfig) {
        let Some(creds) = config.ptz.clone() else { return };
        let factory = Arc::clone(&self.collaborators.ptz_device_factory);
        let engine = Arc::clone(self);
        let cfg = Arc::clone(&self.collaborators.engine_cfg);

        std::thread::spawn(move || {
            let device = factory(&creds);
            let home = device.get_status().unwrap_or_default();
            let autotrack = Arc::new(Mutex::new(AutoTracker::with_home_position(Arc::clone(&device), Arc::clone(&cfg), home)));
            let patrol = Arc::new(PatrolEngine::new(Arc::clone(&device), cfg));
            *engine.ptz_device.lock().unwrap() = Some(device);

            let (done_tx, done_rx) = std::sync::mpsc::channel();
            let dwell_loop_patrol = Arc::clone(&patrol);
            let handle = std::thread::spawn(move || {
                dwell_loop_patrol.run();
                let _ = done_tx.send(());
            });

            *engine.autotrack.lock().unwrap() = Some(autotrack);
            *engine.patrol.lock().unwrap() = Some(patrol);
            *engine.patrol_thread.lock().unwrap() = Some((handle, done_rx));
            info!("PTZ ready for {}", engine.stream_id());
        });
    }

    fn process_loop(self: Arc<Self>, frame_rx: std::sync::mpsc::Receiver<Frame>) {
        let config_snapshot = self.config.read().unwrap().clone();
        let mut processor = FrameProcessor::new(&config_snapshot, Arc::clone(&self.collaborators.detector), Arc::clone(&self.hazard_zone));
        let mut recorder = EventRecorder::new(
            config_snapshot.stream_id.clone(),
            config_snapshot.model_name,
            Arc::clone(&self.collaborators.engine_cfg),
            Arc::clone(&self.collaborators.event_store),
            Arc::clone(&self.collaborators.notifier),
        );
        let mut sink = OutputSink::new(
            &self.collaborators.engine_cfg.rtmp_server,
            &config_snapshot.stream_id,
            self.collaborators.engine_cfg.frame_width,
            self.collaborators.engine_cfg.frame_height,
        );

        while !self.stop.load(Ordering::Relaxed) {
            let frame = match frame_rx.recv_timeout(Duration::from_millis(200)) {
                Ok(frame) => frame,
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            };

            let config = self.config.read().unwrap().clone();
            let result = processor.process(frame, &config);

            {
                let mut stats = self.stats.lock().unwrap();
                stats.total_frames += 1;
                if result.status == crate::types::FrameStatus::Unsafe {
                    stats.unsafe_frames += 1;
                }
                stats.record_fps_sample(result.fps);
            }

            if !result.reasons.is_empty() && result.reasons.contains(&crate::error::reason::INTRUSION.to_string()) {
                self.collaborators.event_bus.publish(&intrusion_topic(&config.stream_id), serde_json::json!({ "type": "intrusion" }));
            }

            if config.ptz_autotrack {
                self.drive_ptz(&result);
            }

            if config.saving_video {
                let (total_frames, unsafe_frames) = {
                    let stats = self.stats.lock().unwrap();
                    (stats.total_frames, stats.unsafe_frames)
                };
                recorder.handle_recording(&result, total_frames, unsafe_frames);
                if recorder.should_reset_counter(total_frames) {
                    self.stats.lock().unwrap().unsafe_frames = 0;
                }
            }

            *self.current_frame.lock().unwrap() = Some(result.annotated.clone());
            sink.publish(&result.annotated);
        }

        info!("processing loop for {} exiting", config_snapshot.stream_id);
    }

    fn drive_ptz(&self, result: &crate::types::FrameProcessingResult) {
        let Some(patrol) = self.patrol.lock().unwrap().clone() else { return };
        let Some(autotrack) = self.autotrack.lock().unwrap().clone() else { return };

        if !result.person_bboxes.is_empty() && patrol.state() == PatrolState::Patrolling {
            patrol.begin_focus();
        } else if patrol.state() == PatrolState::Focusing {
            if !result.person_bboxes.is_empty() {
                patrol.note_object_seen();
            }
        }
        patrol.tick();

        if matches!(patrol.state(), PatrolState::Focusing | PatrolState::Off) {
            let cfg = &self.collaborators.engine_cfg;
            autotrack.lock().unwrap().on_frame(cfg.frame_width, cfg.frame_height, &result.person_bboxes);
        }
    }

    /// Sets the stop flag and joins every worker thread with a bounded
    /// timeout, logging (not panicking) if a join doesn't complete in time.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(patrol) = self.patrol.lock().unwrap().as_ref() {
            patrol.stop();
        }
        if let Some((handle, done_rx)) = self.patrol_thread.lock().unwrap().take() {
            if done_rx.recv_timeout(Duration::from_secs(15)).is_err() {
                warn!("patrol thread for {} did not stop within 15s, waiting 5s more", self.stream_id());
                if done_rx.recv_timeout(Duration::from_secs(5)).is_err() {
                    error!("patrol thread for {} still running after grace period", self.stream_id());
                }
            }
            if handle.join().is_err() {
                error!("patrol thread for {} panicked during shutdown", self.stream_id());
            }
        }
        let mut threads = self.threads.lock().unwrap();
        for handle in threads.drain(..) {
            if handle.join().is_err() {
                error!("stream worker thread panicked during shutdown");
            }
        }
        info!("stream {} stopped", self.stream_id());
    }

    pub fn restart(self: &Arc<Self>) -> anyhow::Result<()> {
        self.stop();
        self.start()
    }

    pub fn current_frame_jpeg(&self) -> Option<Vec<u8>> {
        let frame = self.current_frame.lock().unwrap().clone()?;
        let img = image::RgbImage::from_raw(frame.width, frame.height, frame.data)?;
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img).write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Jpeg).ok()?;
        Some(buf)
    }

    pub fn handle_command(self: &Arc<Self>, command: StreamCommand) -> CommandOutcome {
        match command {
            StreamCommand::Start => match self.start() {
                Ok(()) => CommandOutcome::ok("started"),
                Err(e) => CommandOutcome::internal(e.to_string()),
            },
            StreamCommand::Stop => {
                self.stop();
                CommandOutcome::ok("stopped")
            }
            StreamCommand::Restart => match self.restart() {
                Ok(()) => CommandOutcome::ok("restarted"),
                Err(e) => CommandOutcome::internal(e.to_string()),
            },
            StreamCommand::ChangeAutotrack => {
                let (engaging, patrol_enabled) = {
                    let mut config = self.config.write().unwrap();
                    config.ptz_autotrack = !config.ptz_autotrack;
                    let _ = self.collaborators.config_store.save(&config);
                    (config.ptz_autotrack, config.patrol_enabled)
                };

                if engaging {
                    if let Some(device) = self.ptz_device.lock().unwrap().as_ref() {
                        if let Ok(position) = device.get_status() {
                            if let Some(autotrack) = self.autotrack.lock().unwrap().as_ref() {
                                autotrack.lock().unwrap().update_default_position(position.pan, position.tilt, position.zoom);
                            }
                        }
                    }
                    if patrol_enabled {
                        if let Some(patrol) = self.patrol.lock().unwrap().as_ref() {
                            if patrol.state() == PatrolState::Off {
                                let pattern_mode =
                                    if !self.config.read().unwrap().patrol_pattern.is_empty() { PatrolMode::Pattern } else { PatrolMode::Grid };
                                if let Err(e) = patrol.toggle_patrol(pattern_mode) {
                                    warn!("could not auto-start persisted patrol for {}: {}", self.stream_id(), e);
                                }
                            }
                        }
                    }
                }

                let config = self.config.read().unwrap();
                CommandOutcome::ok_with("autotrack toggled", serde_json::json!({ "ptz_autotrack": config.ptz_autotrack }))
            }
            StreamCommand::TogglePatrol(mode) => match self.patrol.lock().unwrap().as_ref() {
                Some(patrol) => match patrol.toggle_patrol(mode) {
                    Ok(()) => CommandOutcome::ok("patrol toggled"),
                    Err(e) => CommandOutcome::bad_request(e),
                },
                None => CommandOutcome::bad_request("PTZ not configured for this stream"),
            },
            StreamCommand::TogglePatrolFocus => match self.patrol.lock().unwrap().as_ref() {
                Some(patrol) => {
                    patrol.set_focus_during_patrol(!patrol.focus_during_patrol_enabled());
                    CommandOutcome::ok("patrol focus toggled")
                }
                None => CommandOutcome::bad_request("PTZ not configured for this stream"),
            },
            StreamCommand::SavePatrolArea(area) => {
                let mut config = self.config.write().unwrap();
                config.patrol_area = Some(area.normalized());
                let _ = self.collaborators.config_store.save(&config);
                if let Some(patrol) = self.patrol.lock().unwrap().as_ref() {
                    patrol.save_patrol_area(area.normalized());
                }
                CommandOutcome::ok("patrol area saved")
            }
            StreamCommand::GetPatrolArea => {
                let config = self.config.read().unwrap();
                match config.patrol_area {
                    Some(area) => CommandOutcome::ok_with("ok", serde_json::to_value(area).unwrap_or_default()),
                    None => CommandOutcome::not_found("no patrol area configured"),
                }
            }
            StreamCommand::SavePatrolPattern(waypoints) => {
                let mut config = self.config.write().unwrap();
                config.patrol_pattern = waypoints.clone();
                let _ = self.collaborators.config_store.save(&config);
                if let Some(patrol) = self.patrol.lock().unwrap().as_ref() {
                    patrol.save_patrol_pattern(waypoints);
                }
                CommandOutcome::ok("patrol pattern saved")
            }
            StreamCommand::GetPatrolPattern => {
                let config = self.config.read().unwrap();
                CommandOutcome::ok_with("ok", serde_json::to_value(&config.patrol_pattern).unwrap_or_default())
            }
            StreamCommand::PreviewPatrolPattern => match self.patrol.lock().unwrap().clone() {
                Some(patrol) => {
                    let event_bus = Arc::clone(&self.collaborators.event_bus);
                    let stream_id = self.stream_id();
                    event_bus.publish(&crate::event_bus::patrol_preview_topic(&stream_id, "start"), serde_json::json!({}));

                    let arrive_bus = Arc::clone(&event_bus);
                    let arrive_stream_id = stream_id.clone();
                    std::thread::spawn(move || {
                        patrol.preview(|index, total| {
                            arrive_bus.publish(
                                &crate::event_bus::patrol_preview_topic(&arrive_stream_id, "waypoint"),
                                serde_json::json!({ "index": index, "total": total }),
                            );
                        });
                        event_bus.publish(&crate::event_bus::patrol_preview_topic(&stream_id, "complete"), serde_json::json!({}));
                    });
                    CommandOutcome::ok("preview started")
                }
                None => CommandOutcome::bad_request("PTZ not configured for this stream"),
            },
            StreamCommand::SetDangerZone { coords, reference_image, static_mode } => {
                let stream_id = self.stream_id();
                let reference_image_path = reference_image
                    .as_ref()
                    .and_then(|bytes| self.collaborators.reference_image_store.save(&stream_id, bytes).ok());
                let reference_frame = reference_image
                    .as_deref()
                    .and_then(|bytes| image::load_from_memory(bytes).ok())
                    .map(|img| {
                        let rgb = img.to_rgb8();
                        Frame::new(rgb.as_raw().clone(), rgb.width(), rgb.height())
                    });

                self.hazard_zone.set_safe_area(coords.clone(), reference_frame, static_mode);
                let mut config = self.config.write().unwrap();
                config.safe_area = Some(crate::config::SafeAreaConfig {
                    polygons: coords,
                    static_mode,
                    reference_image_path,
                    updated_at: chrono::Utc::now(),
                });
                let _ = self.collaborators.config_store.save(&config);
                CommandOutcome::ok("danger zone saved")
            }
            StreamCommand::SetCameraMode { static_mode } => {
                let mut config = self.config.write().unwrap();
                if let Some(safe_area) = config.safe_area.as_mut() {
                    safe_area.static_mode = static_mode;
                }
                CommandOutcome::ok("camera mode set")
            }
            StreamCommand::GetCameraMode => {
                let config = self.config.read().unwrap();
                let static_mode = config.safe_area.as_ref().map(|s| s.static_mode).unwrap_or(true);
                CommandOutcome::ok_with("ok", serde_json::json!({ "static": static_mode }))
            }
            StreamCommand::GetSafeArea => {
                CommandOutcome::ok_with("ok", serde_json::to_value(self.hazard_zone.get_safe_area()).unwrap_or_default())
            }
            StreamCommand::ToggleIntrusionDetection => {
                let mut config = self.config.write().unwrap();
                config.intrusion_detection = !config.intrusion_detection;
                let _ = self.collaborators.config_store.save(&config);
                CommandOutcome::ok_with("toggled", serde_json::json!({ "intrusion_detection": config.intrusion_detection }))
            }
            StreamCommand::ToggleSavingVideo => {
                let mut config = self.config.write().unwrap();
                config.saving_video = !config.saving_video;
                let _ = self.collaborators.config_store.save(&config);
                CommandOutcome::ok_with("toggled", serde_json::json!({ "saving_video": config.saving_video }))
            }
            StreamCommand::GetCurrentFrame => match self.current_frame_jpeg() {
                Some(bytes) => CommandOutcome::ok_with("ok", serde_json::json!({ "bytes": bytes.len() })),
                None => CommandOutcome::not_found("no frame available yet"),
            },
            StreamCommand::GetCurrentPtzValues => {
                let config = self.config.read().unwrap();
                if config.ptz.is_none() {
                    return CommandOutcome::bad_request("PTZ not configured for this stream");
                }
                drop(config);
                match self.ptz_device.lock().unwrap().as_ref() {
                    Some(device) => match device.get_status() {
                        Ok(position) => {
                            CommandOutcome::ok_with("ok", serde_json::json!({ "x": position.pan, "y": position.tilt, "z": position.zoom }))
                        }
                        Err(e) => CommandOutcome::internal(e.to_string()),
                    },
                    None => CommandOutcome::not_found("PTZ not ready"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelName;

    fn sample_config(stream_id: &str) -> StreamConfig {
        StreamConfig {
            stream_id: stream_id.to_string(),
            rtsp_link: "rtsp://example/stream".to_string(),
            model_name: ModelName::Ppe,
            location: String::new(),
            description: String::new(),
            is_active: true,
            ptz: None,
            ptz_autotrack: false,
            intrusion_detection: false,
            saving_video: false,
            safe_area: None,
            patrol_area: None,
            patrol_pattern: vec![],
            patrol_home_position: None,
            patrol_enabled: false,
            patrol_mode: PatrolMode::Off,
            enable_focus_during_patrol: false,
        }
    }

    #[test]
    fn toggle_intrusion_detection_twice_returns_to_original_state() {
        let collaborators = Arc::new(Collaborators::standalone(EngineConfig::default()));
        let engine = Arc::new(StreamEngine::new(sample_config("cam-1"), collaborators));

        let before = engine.config.read().unwrap().intrusion_detection;
        engine.handle_command(StreamCommand::ToggleIntrusionDetection);
        engine.handle_command(StreamCommand::ToggleIntrusionDetection);
        let after = engine.config.read().unwrap().intrusion_detection;
        assert_eq!(before, after);
    }

    #[test]
    fn toggle_patrol_without_ptz_configured_is_rejected() {
        let collaborators = Arc::new(Collaborators::standalone(EngineConfig::default()));
        let engine = Arc::new(StreamEngine::new(sample_config("cam-1"), collaborators));
        let outcome = engine.handle_command(StreamCommand::TogglePatrol(PatrolMode::Grid));
        assert_eq!(outcome.code, crate::commands::CommandStatusCode::BadRequest);
    }
}
