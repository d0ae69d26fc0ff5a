use crate::config::StreamConfig;
use crate::types::EventRecord;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::RwLock;

/// Loads and saves `StreamConfig` documents. The engine calls this on every
/// command that mutates persisted state; no database driver lives in this
/// crate, only the trait and an in-memory stand-in for tests/standalone runs.
pub trait ConfigStore: Send + Sync {
    fn load(&self, stream_id: &str) -> Result<Option<StreamConfig>>;
    fn save(&self, config: &StreamConfig) -> Result<()>;
    fn list(&self) -> Result<Vec<StreamConfig>>;
    fn delete(&self, stream_id: &str) -> Result<()>;
}

/// Persists `EventRecord` documents created by the Event Recorder.
pub trait EventStore: Send + Sync {
    fn save(&self, record: &EventRecord) -> Result<()>;
    fn recent(&self, stream_id: &str, limit: usize) -> Result<Vec<EventRecord>>;
}

/// Persists the reference-image bytes a dynamic hazard zone is anchored to.
/// `save` returns the filename/path the caller should store on
/// `SafeAreaConfig::reference_image_path`, mirroring the source's
/// `static/frame_refs/{file_name}` convention (no HTTP/static-file server
/// lives in this crate, only the storage boundary).
pub trait ReferenceImageStore: Send + Sync {
    fn save(&self, stream_id: &str, bytes: &[u8]) -> Result<String>;
    fn load(&self, path: &str) -> Result<Option<Vec<u8>>>;
}

#[derive(Default)]
pub struct InMemoryReferenceImageStore {
    images: RwLock<HashMap<String, Vec<u8>>>,
}

impl ReferenceImageStore for InMemoryReferenceImageStore {
    fn save(&self, stream_id: &str, bytes: &[u8]) -> Result<String> {
        let path = format!("frame_refs/{stream_id}.jpg");
        self.images.write().unwrap().insert(path.clone(), bytes.to_vec());
        Ok(path)
    }

    fn load(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.images.read().unwrap().get(path).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryConfigStore {
    configs: RwLock<HashMap<String, StreamConfig>>,
}

impl ConfigStore for InMemoryConfigStore {
    fn load(&self, stream_id: &str) -> Result<Option<StreamConfig>> {
        Ok(self.configs.read().unwrap().get(stream_id).cloned())
    }

    fn save(&self, config: &StreamConfig) -> Result<()> {
        self.configs.write().unwrap().insert(config.stream_id.clone(), config.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<StreamConfig>> {
        Ok(self.configs.read().unwrap().values().cloned().collect())
    }

    fn delete(&self, stream_id: &str) -> Result<()> {
        self.configs.write().unwrap().remove(stream_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<EventRecord>>,
}

impl EventStore for InMemoryEventStore {
    fn save(&self, record: &EventRecord) -> Result<()> {
        self.events.write().unwrap().push(record.clone());
        Ok(())
    }

    fn recent(&self, stream_id: &str, limit: usize) -> Result<Vec<EventRecord>> {
        let events = self.events.read().unwrap();
        Ok(events.iter().rev().filter(|e| e.stream_id == stream_id).take(limit).cloned().collect())
    }
}
