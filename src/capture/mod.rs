//! # Capture Module
//!
//! Access to the photos the camera produces. The booth never drives the camera; it
//! only reads and discards what the camera software leaves behind.

pub mod directory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use directory::DirectoryCaptureSource;

use crate::error::BoothResult;

/// A capture currently available to the booth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureInfo {
    pub name: String,
    /// Server-relative URL the capture is served under.
    pub url_path: String,
    pub modified: DateTime<Utc>,
}

/// Abstract interface for capture sources.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// The most recent capture, if any.
    async fn latest(&self) -> BoothResult<Option<CaptureInfo>>;

    /// Delete the most recent capture. `NotFound` when there is none.
    async fn discard_latest(&self) -> BoothResult<CaptureInfo>;

    /// Raw bytes of a named capture.
    async fn read(&self, name: &str) -> BoothResult<Vec<u8>>;

    /// Capture name a client-supplied path or URL refers to.
    fn resolve(&self, reference: &str) -> Option<String>;

    /// True when `reference` is a URL or path under this source's served prefix.
    fn serves(&self, reference: &str) -> bool;
}
