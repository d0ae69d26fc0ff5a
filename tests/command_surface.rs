//! End-to-end exercises of the per-stream command surface against an engine
//! built from in-memory collaborators, without ever starting a capture
//! pipeline (so these don't depend on a reachable RTSP camera or a live
//! GStreamer mainloop).

use sentry_stream_engine::commands::{CommandStatusCode, StreamCommand};
use sentry_stream_engine::config::{EngineConfig, ModelName, PatrolArea, PatrolMode, StreamConfig, Waypoint};
use sentry_stream_engine::registry::StreamRegistry;
use sentry_stream_engine::stream_engine::{Collaborators, StreamEngine};
use std::sync::Arc;

fn config(stream_id: &str) -> StreamConfig {
    StreamConfig {
        stream_id: stream_id.to_string(),
        rtsp_link: "rtsp://example.invalid/stream".to_string(),
        model_name: ModelName::Ppe,
        location: "north-dock".to_string(),
        description: String::new(),
        is_active: false,
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

fn engine(cfg: StreamConfig) -> Arc<StreamEngine> {
    let collaborators = Arc::new(Collaborators::standalone(EngineConfig::default()));
    Arc::new(StreamEngine::new(cfg, collaborators))
}

#[test]
fn saving_video_and_intrusion_detection_toggles_round_trip() {
    let engine = engine(config("cam-toggle"));

    let outcome = engine.handle_command(StreamCommand::ToggleSavingVideo);
    assert_eq!(outcome.code, CommandStatusCode::Ok);
    let outcome = engine.handle_command(StreamCommand::ToggleSavingVideo);
    assert_eq!(outcome.code, CommandStatusCode::Ok);

    let outcome = engine.handle_command(StreamCommand::ToggleIntrusionDetection);
    assert_eq!(outcome.code, CommandStatusCode::Ok);
}

#[test]
fn patrol_area_save_and_get_round_trips_without_ptz_configured() {
    let engine = engine(config("cam-area"));
    let area = PatrolArea { x_min: 0.0, x_max: 10.0, y_min: 0.0, y_max: 5.0, zoom_level: 0.15 };

    let outcome = engine.handle_command(StreamCommand::SavePatrolArea(area));
    assert_eq!(outcome.code, CommandStatusCode::Ok);

    let outcome = engine.handle_command(StreamCommand::GetPatrolArea);
    assert_eq!(outcome.code, CommandStatusCode::Ok);
}

#[test]
fn patrol_pattern_save_and_get_round_trips() {
    let engine = engine(config("cam-pattern"));
    let pattern = vec![Waypoint { x: 0, y: 0, z: 0 }, Waypoint { x: 5, y: 5, z: 1 }];

    let outcome = engine.handle_command(StreamCommand::SavePatrolPattern(pattern.clone()));
    assert_eq!(outcome.code, CommandStatusCode::Ok);

    let outcome = engine.handle_command(StreamCommand::GetPatrolPattern);
    assert_eq!(outcome.code, CommandStatusCode::Ok);
    assert_eq!(outcome.data.unwrap(), serde_json::to_value(&pattern).unwrap());
}

#[test]
fn patrol_commands_are_rejected_before_ptz_is_configured() {
    let engine = engine(config("cam-no-ptz"));

    assert_eq!(engine.handle_command(StreamCommand::TogglePatrol(PatrolMode::Grid)).code, CommandStatusCode::BadRequest);
    assert_eq!(engine.handle_command(StreamCommand::TogglePatrolFocus).code, CommandStatusCode::BadRequest);
    assert_eq!(engine.handle_command(StreamCommand::PreviewPatrolPattern).code, CommandStatusCode::BadRequest);
    assert_eq!(engine.handle_command(StreamCommand::GetCurrentPtzValues).code, CommandStatusCode::BadRequest);
}

#[test]
fn get_current_frame_before_any_frame_arrives_is_not_found() {
    let engine = engine(config("cam-frame"));
    let outcome = engine.handle_command(StreamCommand::GetCurrentFrame);
    assert_eq!(outcome.code, CommandStatusCode::NotFound);
}

#[test]
fn danger_zone_and_camera_mode_round_trip() {
    let engine = engine(config("cam-zone"));
    let coords = vec![vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]];

    let outcome = engine.handle_command(StreamCommand::SetDangerZone { coords, reference_image: None, static_mode: true });
    assert_eq!(outcome.code, CommandStatusCode::Ok);

    let outcome = engine.handle_command(StreamCommand::GetSafeArea);
    assert_eq!(outcome.code, CommandStatusCode::Ok);

    let outcome = engine.handle_command(StreamCommand::SetCameraMode { static_mode: false });
    assert_eq!(outcome.code, CommandStatusCode::Ok);

    let outcome = engine.handle_command(StreamCommand::GetCameraMode);
    assert_eq!(outcome.data.unwrap(), serde_json::json!({ "static": false }));
}

#[test]
fn danger_zone_with_reference_image_persists_its_real_path() {
    let engine = engine(config("cam-zone-ref"));
    let coords = vec![vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)]];

    let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();

    let outcome = engine.handle_command(StreamCommand::SetDangerZone {
        coords,
        reference_image: Some(bytes),
        static_mode: false,
    });
    assert_eq!(outcome.code, CommandStatusCode::Ok);

    let safe_area = engine.config_snapshot().safe_area.expect("safe area saved");
    let path = safe_area.reference_image_path.expect("reference image path stored");
    assert_eq!(path, "frame_refs/cam-zone-ref.jpg");
}

#[test]
fn registry_rejects_grid_patrol_config_with_no_area_before_touching_capture() {
    let registry = StreamRegistry::new(Arc::new(Collaborators::standalone(EngineConfig::default())));
    let mut bad = config("cam-invalid");
    bad.patrol_mode = PatrolMode::Grid;
    bad.patrol_area = None;

    assert!(registry.add_stream(bad).is_err());
    assert!(registry.get("cam-invalid").is_none());
}

#[test]
fn registry_dispatch_routes_by_stream_id() {
    let registry = StreamRegistry::new(Arc::new(Collaborators::standalone(EngineConfig::default())));
    let outcome = registry.dispatch("unknown-cam", StreamCommand::ToggleSavingVideo);
    assert_eq!(outcome.code, CommandStatusCode::NotFound);
}
