use std::{future::Future, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use tokio::time::timeout;

use crate::error::{BoothError, BoothResult};

/// Bound a collaborator call; an elapsed deadline becomes [`BoothError::Timeout`].
pub async fn with_deadline<T, F>(operation: &str, limit: Duration, fut: F) -> BoothResult<T>
where
    F: Future<Output = BoothResult<T>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(BoothError::timeout(operation, limit.as_millis() as u64)
            .with_recovery_suggestion("Please try that step again")),
    }
}

/// Decode an image payload sent as a `data:` URI or bare base64.
pub fn decode_image_payload(field: &str, payload: &str) -> BoothResult<Vec<u8>> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(BoothError::missing(field));
    }

    let encoded = match payload.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| BoothError::validation(field, "is a malformed data URI", ""))?;
            if !header.ends_with(";base64") {
                return Err(BoothError::validation(field, "must be base64 encoded", header));
            }
            data
        }
        None => payload,
    };

    let cleaned: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(cleaned)
        .map_err(|e| BoothError::decode(field, e.to_string()))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// `data:<mime>;base64,<payload>`
pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", encode_base64(bytes))
}

/// Milliseconds since the Unix epoch.
pub fn unix_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
