use super::RegistryRepository;
use crate::shared::error::{RegistryError, RegistryResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use devlink_core::{validate_name, InstanceRecord, RegistrySnapshot};
use devlink_proto::RegistrationFile;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const RECORD_EXTENSION: &str = "json";

/// One JSON file per instance in a shared directory. A file's modification
/// time is its heartbeat.
#[derive(Debug, Clone)]
pub struct FilesystemRegistryRepository {
    dir: PathBuf,
}

impl FilesystemRegistryRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> RegistryResult<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.{RECORD_EXTENSION}")))
    }

    async fn read_record(path: &Path) -> RegistryResult<Option<InstanceRecord>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        match serde_json::from_slice::<RegistrationFile>(&bytes) {
            Ok(file) => Ok(Some(file.record)),
            Err(error) => {
                debug!(path = %path.display(), error = %error, "Skipping unparsable registration");
                Ok(None)
            }
        }
    }

    /// `(name, path)` for every record file currently in the directory.
    async fn entries(&self) -> RegistryResult<Vec<(String, PathBuf)>> {
        let mut reader = match tokio::fs::read_dir(&self.dir).await {
            Ok(reader) => reader,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            entries.push((name.to_string(), path));
        }
        Ok(entries)
    }
}

#[async_trait]
impl RegistryRepository for FilesystemRegistryRepository {
    async fn upsert(&self, name: &str, mut record: InstanceRecord) -> RegistryResult<()> {
        let path = self.record_path(name)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        record.name = name.to_string();
        let bytes = serde_json::to_vec_pretty(&RegistrationFile::new(record))?;

        // One staging file per writer; readers never see a torn record.
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || -> RegistryResult<()> {
            let mut staging = NamedTempFile::new_in(&dir)?;
            staging.write_all(&bytes)?;
            staging.persist(&path).map_err(|error| error.error)?;
            Ok(())
        })
        .await
        .map_err(|error| RegistryError::StorageError(error.to_string()))?
    }

    async fn get(&self, name: &str) -> RegistryResult<Option<InstanceRecord>> {
        let path = self.record_path(name)?;
        let record = Self::read_record(&path).await?;
        Ok(record.map(|mut record| {
            record.name = name.to_string();
            record
        }))
    }

    async fn remove(&self, name: &str) -> RegistryResult<bool> {
        let path = self.record_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    async fn snapshot(&self) -> RegistryResult<RegistrySnapshot> {
        let mut records = Vec::new();
        for (name, path) in self.entries().await? {
            if let Some(mut record) = Self::read_record(&path).await? {
                record.name = name.clone();
                records.push((name, record));
            }
        }
        Ok(records.into_iter().collect())
    }

    async fn clear(&self) -> RegistryResult<()> {
        for (_, path) in self.entries().await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }

    async fn evict_stale(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> RegistryResult<Vec<String>> {
        let mut evicted = Vec::new();
        for (name, path) in self.entries().await? {
            let modified = match tokio::fs::metadata(&path).await {
                Ok(metadata) => metadata.modified()?,
                Err(error) if error.kind() == ErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            };
            let last_seen: DateTime<Utc> = modified.into();
            if now - last_seen > max_age && self.remove(&name).await? {
                evicted.push(name);
            }
        }
        evicted.sort();
        Ok(evicted)
    }

    fn is_persistent(&self) -> bool {
        true
    }
}
