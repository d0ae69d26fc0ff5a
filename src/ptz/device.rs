use crate::config::PtzPosition;
use anyhow::Result;

/// A single command issued to the physical camera. Serialized by the PTZ
/// command consumer thread so the device never receives overlapping calls.
#[derive(Debug, Clone, Copy)]
pub enum PtzCommand {
    ContinuousMove { pan: f32, tilt: f32, zoom: f32 },
    AbsoluteMove(PtzPosition),
    Stop,
}

/// Abstracts the ONVIF PTZ service. No ONVIF wire protocol is implemented in
/// this crate — a real implementation lives outside it; this trait is the
/// seam the PTZ Auto-Tracker and Patrol Engine are built against.
pub trait PtzDevice: Send + Sync {
    fn continuous_move(&self, pan: f32, tilt: f32, zoom: f32) -> Result<()>;
    fn absolute_move(&self, position: PtzPosition) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn get_status(&self) -> Result<PtzPosition>;
}

/// No-op device used when a stream has no PTZ credentials configured, and as
/// a building block in tests that only care about command sequencing.
#[derive(Default)]
pub struct NullPtzDevice;

impl PtzDevice for NullPtzDevice {
    fn continuous_move(&self, _pan: f32, _tilt: f32, _zoom: f32) -> Result<()> {
        Ok(())
    }

    fn absolute_move(&self, _position: PtzPosition) -> Result<()> {
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }

    fn get_status(&self) -> Result<PtzPosition> {
        Ok(PtzPosition { pan: 0.0, tilt: 0.0, zoom: 0.0 })
    }
}

/// Records every command issued to it, for assertions in autotrack/patrol
/// tests without a real ONVIF camera.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingPtzDevice {
    pub commands: std::sync::Mutex<Vec<PtzCommand>>,
    pub status: std::sync::Mutex<PtzPosition>,
}

#[cfg(test)]
impl PtzDevice for RecordingPtzDevice {
    fn continuous_move(&self, pan: f32, tilt: f32, zoom: f32) -> Result<()> {
        self.commands.lock().unwrap().push(PtzCommand::ContinuousMove { pan, tilt, zoom });
        Ok(())
    }

    fn absolute_move(&self, position: PtzPosition) -> Result<()> {
        *self.status.lock().unwrap() = position;
        self.commands.lock().unwrap().push(PtzCommand::AbsoluteMove(position));
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.commands.lock().unwrap().push(PtzCommand::Stop);
        Ok(())
    }

    fn get_status(&self) -> Result<PtzPosition> {
        Ok(*self.status.lock().unwrap())
    }
}
