//! Camera drop-folder capture source.
//!
//! Tethering software writes each shot into one folder. The newest file whose name
//! matches the capture pattern is the visitor's current photo.

use std::{path::PathBuf, time::SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, instrument};

use super::{CaptureInfo, CaptureSource};
use crate::{
    error::{BoothError, BoothResult},
    store::assets::{is_plain_file_name, strip_origin},
};

pub struct DirectoryCaptureSource {
    dir: PathBuf,
    pattern: Regex,
    url_prefix: String,
}

impl DirectoryCaptureSource {
    pub fn new(dir: impl Into<PathBuf>, pattern: &str, url_prefix: impl Into<String>) -> BoothResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| BoothError::config("capture_pattern", pattern, e.to_string()))?;
        Ok(Self {
            dir: dir.into(),
            pattern,
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        })
    }

    /// Newest matching file, ties broken by name so the answer is stable.
    async fn scan_latest(&self) -> BoothResult<Option<(String, SystemTime)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %self.dir.display(), "Capture folder does not exist yet");
                return Ok(None);
            }
            Err(e) => return Err(BoothError::io_at("list captures", &self.dir, e)),
        };

        let mut latest: Option<(String, SystemTime)> = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| BoothError::io_at("list captures", &self.dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !self.pattern.is_match(&name) {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_file() => metadata,
                // vanished between listing and stat, or not a file
                _ => continue,
            };
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let newer = match &latest {
                Some((best_name, best_time)) => (modified, &name) > (*best_time, best_name),
                None => true,
            };
            if newer {
                latest = Some((name, modified));
            }
        }
        Ok(latest)
    }

    fn info(&self, name: String, modified: SystemTime) -> CaptureInfo {
        CaptureInfo {
            url_path: format!("{}/{}", self.url_prefix, name),
            name,
            modified: DateTime::<Utc>::from(modified),
        }
    }
}

#[async_trait]
impl CaptureSource for DirectoryCaptureSource {
    async fn latest(&self) -> BoothResult<Option<CaptureInfo>> {
        Ok(self
            .scan_latest()
            .await?
            .map(|(name, modified)| self.info(name, modified)))
    }

    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn discard_latest(&self) -> BoothResult<CaptureInfo> {
        let (name, modified) = self.scan_latest().await?.ok_or_else(|| {
            BoothError::not_found("capture", "no captured photo to delete")
                .with_recovery_suggestion("Take a photo first")
        })?;

        let path = self.dir.join(&name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BoothError::not_found("capture", format!("{name} was already removed")));
            }
            Err(e) => return Err(BoothError::io_at("delete capture", &path, e)),
        }

        info!(capture = %name, "Capture discarded");
        Ok(self.info(name, modified))
    }

    async fn read(&self, name: &str) -> BoothResult<Vec<u8>> {
        if !is_plain_file_name(name) {
            return Err(BoothError::validation("sourceUrl", "does not name a capture", name));
        }
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BoothError::not_found("capture", format!("{name} is not on the server")))
            }
            Err(e) => Err(BoothError::io_at("read capture", &path, e)),
        }
    }

    fn resolve(&self, reference: &str) -> Option<String> {
        let path = strip_origin(reference.trim());
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let name = path.rsplit('/').next().unwrap_or_default();
        is_plain_file_name(name).then(|| name.to_string())
    }

    fn serves(&self, reference: &str) -> bool {
        let path = strip_origin(reference.trim());
        path.strip_prefix(&self.url_prefix)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}
