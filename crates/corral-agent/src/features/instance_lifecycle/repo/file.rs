use async_trait::async_trait;
use corral_core::{validate_instance_id, InstanceEvent};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

use super::{EventStore, StoreError};

const LOG_EXTENSION: &str = "jsonl";

/// Event store keeping one JSON-lines file per instance.
///
/// Each append writes a single line and syncs it to disk before returning.
/// A torn final line, left by a crash in the middle of a write, is dropped on
/// load; a corrupt line anywhere else fails the load.
pub struct FileEventStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileEventStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(io_error)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self, instance_id: &str) -> Result<PathBuf, StoreError> {
        validate_instance_id(instance_id).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(self.dir.join(format!("{instance_id}.{LOG_EXTENSION}")))
    }
}

fn io_error(err: std::io::Error) -> StoreError {
    StoreError::Io(err.to_string())
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn append(&self, event: &InstanceEvent) -> Result<(), StoreError> {
        let path = self.log_path(&event.instance_id)?;
        let mut line = event.to_json_line().map_err(|e| StoreError::Corrupt {
            instance_id: event.instance_id.clone(),
            message: e.to_string(),
        })?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_error)?;
        file.write_all(line.as_bytes()).await.map_err(io_error)?;
        file.sync_data().await.map_err(io_error)?;
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> Result<Vec<InstanceEvent>, StoreError> {
        let path = self.log_path(instance_id)?;
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(e)),
        };

        let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut events = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            match InstanceEvent::from_json_line(line) {
                Ok(event) => events.push(event),
                Err(e) if index + 1 == lines.len() && !contents.ends_with('\n') => {
                    warn!(%instance_id, error = %e, "dropping torn trailing event log line");
                }
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        instance_id: instance_id.to_string(),
                        message: format!("line {}: {}", index + 1, e),
                    })
                }
            }
        }
        Ok(events)
    }

    async fn list_instances(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = fs::read_dir(&self.dir).await.map_err(io_error)?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(LOG_EXTENSION) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
