//! # Background Removal
//!
//! Turns a capture into a transparent cutout via a third-party API, and fetches
//! source images that live outside the booth.
//!
//! The remove.bg contract: `POST` a multipart form with the image in `image_file`
//! and `size=auto`, authenticated by the `X-Api-Key` header. The response body is
//! the cutout (PNG with alpha).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use tracing::{debug, instrument, warn};

use crate::error::{BoothError, BoothResult};

/// Longest upstream error body echoed into logs and messages.
const ERROR_BODY_LIMIT: usize = 200;

/// An image on its way to background removal.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl SourceImage {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// MIME type inferred from the bytes, falling back to the file extension.
    pub fn mime(&self) -> &'static str {
        match image::guess_format(&self.bytes) {
            Ok(format) => format.to_mime_type(),
            Err(_) if self.file_name.to_ascii_lowercase().ends_with(".png") => "image/png",
            Err(_) => "image/jpeg",
        }
    }
}

/// Produces a subject cutout from a photo.
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    async fn remove_background(&self, image: SourceImage) -> BoothResult<Vec<u8>>;
}

/// Retrieves images addressed by absolute URL.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> BoothResult<SourceImage>;
}

/// remove.bg HTTP client.
pub struct RemoveBgClient {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl RemoveBgClient {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> BoothResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BoothError::external("reqwest", e))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key,
            timeout,
        })
    }
}

#[async_trait]
impl BackgroundRemover for RemoveBgClient {
    #[instrument(skip(self, image), fields(file = %image.file_name, bytes = image.bytes.len()))]
    async fn remove_background(&self, image: SourceImage) -> BoothResult<Vec<u8>> {
        let key = self.api_key.as_deref().ok_or_else(|| {
            BoothError::config("REMOVEBG_KEY", "", "background removal is not configured")
        })?;

        let mime = image.mime();
        let part = Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(mime)
            .map_err(|e| BoothError::external("reqwest", e))?;
        let form = Form::new().part("image_file", part).text("size", "auto");

        let timeout_ms = self.timeout.as_millis() as u64;
        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Api-Key", key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BoothError::from_http("background removal", e, timeout_ms))?;

        let body = read_success_body("background removal", response, timeout_ms).await?;
        debug!(cutout_bytes = body.len(), "Background removed");
        Ok(body)
    }
}

/// Plain HTTP GET for `http(s)` sources.
pub struct HttpSourceFetcher {
    http: Client,
    timeout: Duration,
}

impl HttpSourceFetcher {
    pub fn new(timeout: Duration) -> BoothResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BoothError::external("reqwest", e))?;
        Ok(Self { http, timeout })
    }
}

#[async_trait]
impl SourceFetcher for HttpSourceFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> BoothResult<SourceImage> {
        let timeout_ms = self.timeout.as_millis() as u64;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| BoothError::from_http("source fetch", e, timeout_ms))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BoothError::not_found("source image", url));
        }
        let bytes = read_success_body("source fetch", response, timeout_ms).await?;

        let file_name = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|name| !name.is_empty())
            .unwrap_or("source.jpg")
            .to_string();
        Ok(SourceImage::new(file_name, bytes))
    }
}

/// Body of a 2xx response; anything else becomes a retryable upstream error.
async fn read_success_body(
    service: &str,
    response: reqwest::Response,
    timeout_ms: u64,
) -> BoothResult<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let excerpt: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        warn!(%status, body = %excerpt, "{service} rejected the request");
        return Err(BoothError::upstream(service, format!("HTTP {status}"))
            .with_context(excerpt)
            .retryable());
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| BoothError::from_http(service, e, timeout_ms))?;
    if bytes.is_empty() {
        return Err(BoothError::upstream(service, "empty response body").retryable());
    }
    Ok(bytes.to_vec())
}
