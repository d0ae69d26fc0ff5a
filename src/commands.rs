use crate::config::{PatrolArea, PatrolMode, Waypoint};
use serde_json::Value;

/// The inbound command surface a (not built here) HTTP adapter maps requests
/// onto. The engine consumes only these semantic parameters, never raw
/// request bodies.
#[derive(Debug, Clone)]
pub enum StreamCommand {
    Start,
    Stop,
    Restart,
    ChangeAutotrack,
    TogglePatrol(PatrolMode),
    TogglePatrolFocus,
    SavePatrolArea(PatrolArea),
    GetPatrolArea,
    SavePatrolPattern(Vec<Waypoint>),
    PreviewPatrolPattern,
    GetPatrolPattern,
    SetDangerZone { coords: Vec<Vec<(f32, f32)>>, reference_image: Option<Vec<u8>>, static_mode: bool },
    SetCameraMode { static_mode: bool },
    GetCameraMode,
    GetSafeArea,
    ToggleIntrusionDetection,
    ToggleSavingVideo,
    GetCurrentFrame,
    GetCurrentPtzValues,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatusCode {
    Ok,
    BadRequest,
    NotFound,
    Internal,
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub code: CommandStatusCode,
    pub message: String,
    pub data: Option<Value>,
}

impl CommandOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { code: CommandStatusCode::Ok, message: message.into(), data: None }
    }

    pub fn ok_with(message: impl Into<String>, data: Value) -> Self {
        Self { code: CommandStatusCode::Ok, message: message.into(), data: Some(data) }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self { code: CommandStatusCode::BadRequest, message: message.into(), data: None }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { code: CommandStatusCode::NotFound, message: message.into(), data: None }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self { code: CommandStatusCode::Internal, message: message.into(), data: None }
    }
}
