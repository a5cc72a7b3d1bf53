//! Composed-image storage.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::error::{BoothError, BoothResult};

/// A stored image and the path it is served under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub name: String,
    /// Server-relative URL, e.g. `/final-images/final_anon_1700000000000.jpg`
    pub url_path: String,
}

/// Binary image storage with stable URLs.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Store `bytes` under `name`. An existing asset is never replaced; a taken
    /// name fails with `Conflict`.
    async fn put(&self, name: &str, bytes: Vec<u8>) -> BoothResult<StoredAsset>;

    async fn get(&self, name: &str) -> BoothResult<Vec<u8>>;

    /// Map a URL or path this store handed out back to an asset name.
    fn resolve(&self, reference: &str) -> Option<String>;
}

/// Files in a local directory, served by the static file layer under `url_prefix`.
#[derive(Debug, Clone)]
pub struct LocalAssetStore {
    dir: PathBuf,
    url_prefix: String,
}

impl LocalAssetStore {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    fn checked_path(&self, name: &str) -> BoothResult<PathBuf> {
        if !is_plain_file_name(name) {
            return Err(BoothError::validation("imageRef", "is not a valid image name", name));
        }
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl AssetStore for LocalAssetStore {
    async fn put(&self, name: &str, bytes: Vec<u8>) -> BoothResult<StoredAsset> {
        let path = self.checked_path(name)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| BoothError::io_at("create asset dir", &self.dir, e))?;

        let partial = self.dir.join(format!(".{name}.{}.partial", Uuid::new_v4().simple()));
        tokio::fs::write(&partial, &bytes)
            .await
            .map_err(|e| BoothError::io_at("write asset", &partial, e))?;
        // Linking fails on an existing target, so a published asset is never overwritten.
        let published = tokio::fs::hard_link(&partial, &path).await;
        if let Err(e) = tokio::fs::remove_file(&partial).await {
            debug!(path = %partial.display(), error = %e, "Partial asset not cleaned up");
        }
        match published {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(BoothError::conflict("image", name));
            }
            Err(e) => return Err(BoothError::io_at("publish asset", &path, e)),
        }

        debug!(asset = name, bytes = bytes.len(), "Asset stored");
        Ok(StoredAsset {
            name: name.to_string(),
            url_path: format!("{}/{}", self.url_prefix, name),
        })
    }

    async fn get(&self, name: &str) -> BoothResult<Vec<u8>> {
        let path = self.checked_path(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BoothError::not_found("image", name))
            }
            Err(e) => Err(BoothError::io_at("read asset", &path, e)),
        }
    }

    fn resolve(&self, reference: &str) -> Option<String> {
        let path = strip_origin(reference.trim());
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let name = path.strip_prefix(&self.url_prefix)?.strip_prefix('/')?;
        is_plain_file_name(name).then(|| name.to_string())
    }
}

/// `http://host:port/a/b` becomes `/a/b`; anything else is returned as is.
pub(crate) fn strip_origin(reference: &str) -> &str {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = reference.strip_prefix(scheme) {
            return rest.find('/').map_or("/", |i| &rest[i..]);
        }
    }
    reference
}

/// A single path component with no traversal or hidden-file tricks.
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && !name.contains("..")
        && name.len() <= 255
}
