use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};

use fleet_core::{config::StorageConfig, FleetError, FleetResult, TaskId, TaskStorage};

/// Filesystem-backed task storage rooted at `data_dir`.
///
/// Each task gets `data_dir/tasks/<task-id>`. Writes are rejected once the
/// total usage under `data_dir` would exceed `max_storage_bytes`.
pub struct LocalTaskStorage {
    data_dir: PathBuf,
    temp_dir: PathBuf,
    max_storage_bytes: u64,
}

impl LocalTaskStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            data_dir: PathBuf::from(&config.data_dir),
            temp_dir: PathBuf::from(&config.temp_dir),
            max_storage_bytes: config.max_storage_bytes,
        }
    }

    pub async fn init(&self) -> FleetResult<()> {
        fs::create_dir_all(self.data_dir.join("tasks")).await?;
        fs::create_dir_all(&self.temp_dir).await?;
        info!(
            data_dir = %self.data_dir.display(),
            temp_dir = %self.temp_dir.display(),
            "Storage initialized"
        );
        Ok(())
    }

    pub fn area_path(&self, task_id: TaskId) -> PathBuf {
        self.data_dir.join("tasks").join(task_id.to_string())
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Removes everything under the temp directory.
    pub async fn cleanup_temp(&self) -> FleetResult<()> {
        match fs::remove_dir_all(&self.temp_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.temp_dir).await?;
        debug!(temp_dir = %self.temp_dir.display(), "Temp directory cleaned");
        Ok(())
    }

    fn file_path(&self, task_id: TaskId, name: &str) -> FleetResult<PathBuf> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !safe {
            return Err(FleetError::validation(format!("invalid file name: {name}")));
        }
        Ok(self.area_path(task_id).join(relative))
    }

    async fn dir_size(root: &Path) -> FleetResult<u64> {
        let mut total = 0u64;
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                } else {
                    total += metadata.len();
                }
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl TaskStorage for LocalTaskStorage {
    async fn create_area(&self, task_id: TaskId) -> FleetResult<PathBuf> {
        let path = self.area_path(task_id);
        fs::create_dir_all(&path)
            .await
            .map_err(|e| FleetError::storage(format!("create {}: {e}", path.display())))?;
        Ok(path)
    }

    async fn write(&self, task_id: TaskId, name: &str, data: &[u8]) -> FleetResult<()> {
        let path = self.file_path(task_id, name)?;
        let usage = self.usage_bytes().await?;
        if usage + data.len() as u64 > self.max_storage_bytes {
            return Err(FleetError::storage(format!(
                "storage quota exceeded: {} + {} > {}",
                usage,
                data.len(),
                self.max_storage_bytes
            )));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        Ok(())
    }

    async fn read(&self, task_id: TaskId, name: &str) -> FleetResult<Vec<u8>> {
        let path = self.file_path(task_id, name)?;
        Ok(fs::read(&path).await?)
    }

    async fn delete_area(&self, task_id: TaskId) -> FleetResult<()> {
        match fs::remove_dir_all(self.area_path(task_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn usage_bytes(&self) -> FleetResult<u64> {
        Self::dir_size(&self.data_dir).await
    }
}
