use crate::commands::{CommandOutcome, StreamCommand};
use crate::config::StreamConfig;
use crate::stream_engine::{Collaborators, StreamEngine};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

/// Process-wide map of `stream_id -> StreamEngine`. Owns the lifetime of every
/// camera's engine: starts active streams on boot, starts/stops them on
/// command, and is the single lock an HTTP adapter (not built here) would
/// take to route an inbound command to the right engine.
pub struct StreamRegistry {
    collaborators: Arc<Collaborators>,
    engines: RwLock<HashMap<String, Arc<StreamEngine>>>,
}

impl StreamRegistry {
    pub fn new(collaborators: Arc<Collaborators>) -> Self {
        Self { collaborators, engines: RwLock::new(HashMap::new()) }
    }

    /// Loads every persisted config with `is_active = true` and starts it.
    /// A single stream failing to start is logged and skipped; it does not
    /// abort startup for the rest of the fleet.
    pub fn start_active_streams(&self) -> anyhow::Result<()> {
        let configs = self.collaborators.config_store.list()?;
        let active: Vec<StreamConfig> = configs.into_iter().filter(|c| c.is_active).collect();
        info!("starting {} active stream(s)", active.len());

        for config in active {
            if let Err(e) = config.validate() {
                warn!("skipping stream {}: invalid config: {}", config.stream_id, e);
                continue;
            }
            if let Err(e) = self.add_stream(config.clone()) {
                error!("failed to start stream {}: {:#}", config.stream_id, e);
            }
        }
        Ok(())
    }

    /// Registers a new stream engine from config and starts it. Replaces any
    /// existing engine for the same `stream_id` (stopping the old one first).
    pub fn add_stream(&self, config: StreamConfig) -> anyhow::Result<()> {
        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        let stream_id = config.stream_id.clone();

        if let Some(existing) = self.engines.write().unwrap().remove(&stream_id) {
            existing.stop();
        }

        let engine = Arc::new(StreamEngine::new(config, Arc::clone(&self.collaborators)));
        engine.start()?;
        self.engines.write().unwrap().insert(stream_id, engine);
        Ok(())
    }

    /// Stops and removes a stream engine. A no-op if the stream isn't running.
    pub fn remove_stream(&self, stream_id: &str) {
        if let Some(engine) = self.engines.write().unwrap().remove(stream_id) {
            engine.stop();
            info!("removed stream {stream_id}");
        }
    }

    pub fn get(&self, stream_id: &str) -> Option<Arc<StreamEngine>> {
        self.engines.read().unwrap().get(stream_id).cloned()
    }

    pub fn stream_ids(&self) -> Vec<String> {
        self.engines.read().unwrap().keys().cloned().collect()
    }

    /// Routes a command to the named stream's engine, translating "stream not
    /// found" into the same `CommandOutcome` vocabulary every other rejection
    /// uses.
    pub fn dispatch(&self, stream_id: &str, command: StreamCommand) -> CommandOutcome {
        match self.get(stream_id) {
            Some(engine) => engine.handle_command(command),
            None => CommandOutcome::not_found(format!("no such stream: {stream_id}")),
        }
    }

    /// Stops every running stream, joining their worker threads. Called on
    /// graceful shutdown.
    pub fn shutdown_all(&self) {
        let engines: Vec<Arc<StreamEngine>> = self.engines.write().unwrap().drain().map(|(_, e)| e).collect();
        for engine in engines {
            engine.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ModelName, PatrolMode};

    fn sample(stream_id: &str) -> StreamConfig {
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
    fn dispatch_to_unknown_stream_returns_not_found() {
        let registry = StreamRegistry::new(Arc::new(Collaborators::standalone(EngineConfig::default())));
        let outcome = registry.dispatch("ghost", StreamCommand::Stop);
        assert_eq!(outcome.code, crate::commands::CommandStatusCode::NotFound);
    }

    #[test]
    fn rejects_invalid_config_without_panicking() {
        let registry = StreamRegistry::new(Arc::new(Collaborators::standalone(EngineConfig::default())));
        let mut config = sample("cam-1");
        config.patrol_mode = PatrolMode::Grid;
        config.patrol_area = None;
        assert!(registry.add_stream(config).is_err());
        assert!(registry.get("cam-1").is_none());
    }
}
