//! Request handlers. Each one parses its input, calls into [`Booth`] and shapes the
//! JSON the front end expects. Failures leave as [`BoothError`] responses.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Path, Query, Request, State, rejection::JsonRejection},
    http::{StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use crate::{
    background::SourceImage,
    booth::{Booth, ComposeRequest, RemovalSource},
    error::{BoothError, BoothResult},
    notify::Delivery,
    utils::encode_base64,
};

type AppState = State<Arc<Booth>>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBody {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutBody {
    pub layout_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorRef {
    #[serde(alias = "userId")]
    pub visitor_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBody {
    #[serde(alias = "filepath")]
    pub source_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeBody {
    pub cutout_image: Option<String>,
    pub template_id: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "userId")]
    pub visitor_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFinalBody {
    pub image_base64: Option<String>,
    #[serde(alias = "userId")]
    pub visitor_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailBody {
    pub email: Option<String>,
    pub image_ref: Option<String>,
    #[serde(alias = "userId")]
    pub visitor_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrBody {
    pub image_url: Option<String>,
}

pub async fn health(State(booth): AppState) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "layouts": booth.layouts().len(),
        "emailEnabled": booth.email_enabled(),
    }))
}

pub async fn register_visitor(
    State(booth): AppState,
    payload: Result<Json<RegisterBody>, JsonRejection>,
) -> BoothResult<impl IntoResponse> {
    let body = json_body(payload)?;
    let visitor = booth
        .register_visitor(body.name.as_deref(), body.email.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "visitor": visitor })),
    ))
}

pub async fn list_visitors(State(booth): AppState) -> BoothResult<impl IntoResponse> {
    Ok(Json(booth.list_visitors().await?))
}

pub async fn choose_layout(
    State(booth): AppState,
    Path(visitor_id): Path<String>,
    payload: Result<Json<LayoutBody>, JsonRejection>,
) -> BoothResult<impl IntoResponse> {
    let visitor_id = parse_uuid(&visitor_id)?;
    let body = json_body(payload)?;
    let session = booth
        .choose_layout(visitor_id, body.layout_id.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(json!({ "success": true, "session": session })))
}

pub async fn session(State(booth): AppState, Path(visitor_id): Path<String>) -> BoothResult<impl IntoResponse> {
    let session = booth.session(parse_uuid(&visitor_id)?).await?;
    Ok(Json(json!({ "success": true, "session": session })))
}

pub async fn layouts(State(booth): AppState) -> impl IntoResponse {
    Json(booth.layouts())
}

pub async fn latest_capture(State(booth): AppState, Query(query): Query<VisitorRef>) -> BoothResult<impl IntoResponse> {
    capture_response(&booth, visitor_id(query.visitor_id.as_deref())?).await
}

pub async fn latest_capture_for(State(booth): AppState, Path(visitor_id): Path<String>) -> BoothResult<impl IntoResponse> {
    capture_response(&booth, Some(parse_uuid(&visitor_id)?)).await
}

async fn capture_response(booth: &Booth, visitor_id: Option<Uuid>) -> BoothResult<Json<Value>> {
    let body = match booth.latest_capture(visitor_id).await? {
        Some(capture) => json!({
            "success": true,
            "url": capture.url_path,
            "name": capture.name,
            "modified": capture.modified,
        }),
        None => json!({ "success": true, "url": null, "name": null }),
    };
    Ok(Json(body))
}

/// Empty bodies are accepted: a retake need not name a visitor.
pub async fn discard_capture(State(booth): AppState, body: Bytes) -> BoothResult<impl IntoResponse> {
    let body: VisitorRef = optional_json(&body)?;
    let outcome = booth
        .discard_capture(visitor_id(body.visitor_id.as_deref())?)
        .await?;
    Ok(Json(json!({
        "success": true,
        "message": "Last captured photo deleted",
        "cooldownHint": outcome.cooldown_hint_secs,
        "discarded": outcome.capture.name,
    })))
}

/// Accepts a multipart `image` field, a JSON `{sourceUrl}`, or the raw image as
/// the body.
pub async fn remove_background(State(booth): AppState, request: Request) -> BoothResult<impl IntoResponse> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let source = if content_type.starts_with("multipart/form-data") {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| BoothError::validation("image", "must be a multipart form", e.body_text()))?;
        RemovalSource::Upload(multipart_image(multipart).await?)
    } else if content_type.starts_with("application/json") {
        let body = Bytes::from_request(request, &())
            .await
            .map_err(|e| BoothError::validation("body", "must be readable", e.body_text()))?;
        let body: SourceBody = optional_json(&body)?;
        RemovalSource::Reference(body.source_url.unwrap_or_default())
    } else {
        let bytes = Bytes::from_request(request, &())
            .await
            .map_err(|e| BoothError::validation("image", "must be readable", e.body_text()))?;
        RemovalSource::Upload(SourceImage::new("upload.jpg", bytes.to_vec()))
    };

    let cutout = booth.remove_background(source).await?;
    Ok(Json(json!({
        "success": true,
        "data": { "result_b64": encode_base64(&cutout) },
    })))
}

async fn multipart_image(mut multipart: Multipart) -> BoothResult<SourceImage> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BoothError::validation("image", "must be a readable upload", e.body_text()))?
    {
        if field.name() != Some("image") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload.jpg").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| BoothError::validation("image", "must be a readable upload", e.body_text()))?;
        debug!(file = %file_name, bytes = bytes.len(), "Received upload");
        return Ok(SourceImage::new(file_name, bytes.to_vec()));
    }
    Err(BoothError::missing("image"))
}

pub async fn compose(
    State(booth): AppState,
    payload: Result<Json<ComposeBody>, JsonRejection>,
) -> BoothResult<impl IntoResponse> {
    let body = json_body(payload)?;
    let request = ComposeRequest {
        cutout_image: body.cutout_image.unwrap_or_default(),
        template_id: body.template_id.unwrap_or_default(),
        email: body.email,
        visitor_id: visitor_id(body.visitor_id.as_deref())?,
    };
    let outcome = booth.compose(request).await?;

    let mut response = json!({
        "success": true,
        "finalImageUrl": outcome.final_image_url,
        "finalImagePath": outcome.stored.url_path,
        "width": outcome.width,
        "height": outcome.height,
        "emailSent": outcome.delivery.is_some(),
        "emailSuppressed": matches!(outcome.delivery, Some(Delivery::Suppressed { .. })),
    });
    if let Some(error) = outcome.email_error {
        response["emailError"] = Value::String(error);
    }
    Ok(Json(response))
}

pub async fn save_final_image(
    State(booth): AppState,
    payload: Result<Json<SaveFinalBody>, JsonRejection>,
) -> BoothResult<impl IntoResponse> {
    let body = json_body(payload)?;
    let (stored, url) = booth
        .save_final_image(body.image_base64.as_deref(), visitor_id(body.visitor_id.as_deref())?)
        .await?;
    Ok(Json(json!({
        "success": true,
        "filePath": stored.url_path,
        "url": url,
    })))
}

pub async fn send_email(
    State(booth): AppState,
    payload: Result<Json<SendEmailBody>, JsonRejection>,
) -> BoothResult<impl IntoResponse> {
    let body = json_body(payload)?;
    let delivery = booth
        .send_notification(
            body.email.as_deref(),
            body.image_ref.as_deref(),
            visitor_id(body.visitor_id.as_deref())?,
        )
        .await?;
    let message = match delivery {
        Delivery::Sent => "Email sent",
        Delivery::Suppressed { .. } => "Email already sent recently",
    };
    Ok(Json(json!({
        "success": true,
        "transmitted": delivery.transmitted(),
        "message": message,
    })))
}

pub async fn generate_qr(
    State(booth): AppState,
    payload: Result<Json<QrBody>, JsonRejection>,
) -> BoothResult<impl IntoResponse> {
    let body = json_body(payload)?;
    let qr_code = booth.qr_code(body.image_url.as_deref())?;
    Ok(Json(json!({ "success": true, "qrCode": qr_code })))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> BoothResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| BoothError::validation("body", "must be a JSON object", rejection.body_text()))
}

fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> BoothResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| BoothError::validation("body", "must be a JSON object", e.to_string()))
}

/// Optional visitor id; blank means none.
fn visitor_id(raw: Option<&str>) -> BoothResult<Option<Uuid>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => parse_uuid(raw).map(Some),
    }
}

fn parse_uuid(raw: &str) -> BoothResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| BoothError::validation("visitorId", "must be a UUID", raw))
}
