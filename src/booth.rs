//! # Booth Service
//!
//! The operations the HTTP layer exposes, wired over the collaborator traits.
//!
//! ## Architecture
//!
//! 1. **Collaborators**: [`VisitorStore`], [`CaptureSource`], [`BackgroundRemover`],
//!    [`SourceFetcher`], [`AssetStore`] and [`Mailer`] are trait objects so tests
//!    and deployments can swap them
//! 2. **Booth**: validates input, enforces session order when a visitor id is
//!    given, bounds every collaborator call with a deadline
//! 3. **BoothBuilder**: fills any collaborator not supplied explicitly from
//!    [`BoothConfig`]
//!
//! Handlers never see a collaborator directly; every failure leaves here as a
//! [`BoothError`] the router turns into a response.

use std::{sync::Arc, time::Duration};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    background::{BackgroundRemover, HttpSourceFetcher, RemoveBgClient, SourceFetcher, SourceImage},
    capture::{CaptureInfo, CaptureSource, DirectoryCaptureSource},
    compose::{Compositor, LayoutInfo, TemplateRegistry},
    config::BoothConfig,
    error::{BoothError, BoothResult, classify},
    notify::{Attachment, Delivery, DisabledMailer, Mailer, NotificationGateway, SendGate, SmtpMailer},
    session::{SessionSnapshot, SessionStage, SessionTracker},
    store::{AssetStore, LocalAssetStore, NewVisitor, SqliteVisitorStore, StoredAsset, VisitorRecord, VisitorStore, normalize_email},
    utils::{decode_image_payload, unix_millis, with_deadline},
};

/// URL prefix composed images are served under.
pub const FINAL_IMAGES_PREFIX: &str = "/final-images";
/// URL prefix captures are served under.
pub const CAPTURE_IMAGES_PREFIX: &str = "/user-images";
/// URL prefix layout backgrounds are served under.
pub const LAYOUT_IMAGES_PREFIX: &str = "/layout-images";

/// Where the image for background removal comes from.
#[derive(Debug, Clone)]
pub enum RemovalSource {
    /// Bytes sent in the request.
    Upload(SourceImage),
    /// A served capture path, or an absolute URL elsewhere.
    Reference(String),
}

/// Input to [`Booth::compose`].
#[derive(Debug, Clone, Default)]
pub struct ComposeRequest {
    /// Cutout as a data URI or bare base64.
    pub cutout_image: String,
    pub template_id: String,
    pub email: Option<String>,
    pub visitor_id: Option<Uuid>,
}

/// Result of a compose. The image is kept even when the email fails.
#[derive(Debug, Clone)]
pub struct ComposeOutcome {
    pub stored: StoredAsset,
    /// Absolute link to the final image.
    pub final_image_url: String,
    pub width: u32,
    pub height: u32,
    /// `None` when no email was requested or the send failed.
    pub delivery: Option<Delivery>,
    pub email_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DiscardOutcome {
    pub capture: CaptureInfo,
    pub cooldown_hint_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HousekeepingReport {
    pub gate_entries_swept: usize,
    pub sessions_swept: usize,
}

#[derive(Debug, Clone)]
struct Settings {
    public_base: String,
    retake_hint_secs: u64,
    store_timeout: Duration,
    upstream_timeout: Duration,
}

/// The photobooth request flow.
pub struct Booth {
    visitors: Arc<dyn VisitorStore>,
    captures: Arc<dyn CaptureSource>,
    remover: Arc<dyn BackgroundRemover>,
    fetcher: Arc<dyn SourceFetcher>,
    templates: Arc<TemplateRegistry>,
    compositor: Compositor,
    assets: Arc<dyn AssetStore>,
    notifier: NotificationGateway,
    sessions: SessionTracker,
    settings: Settings,
}

impl Booth {
    /// Create a booth using the builder pattern.
    pub fn builder(config: BoothConfig) -> BoothBuilder {
        BoothBuilder::new(config)
    }

    #[instrument(skip_all)]
    pub async fn register_visitor(&self, name: Option<&str>, email: Option<&str>) -> BoothResult<VisitorRecord> {
        let visitor = NewVisitor::parse(name, email)?;
        let record = with_deadline(
            "visitor store",
            self.settings.store_timeout,
            self.visitors.insert(visitor),
        )
        .await?;
        self.sessions.start(record.id, &record.email);
        Ok(record)
    }

    /// All visitors, newest first.
    pub async fn list_visitors(&self) -> BoothResult<Vec<VisitorRecord>> {
        with_deadline("visitor store", self.settings.store_timeout, self.visitors.list()).await
    }

    pub fn layouts(&self) -> Vec<LayoutInfo> {
        self.templates.list()
    }

    #[instrument(skip(self))]
    pub async fn choose_layout(&self, visitor_id: Uuid, layout_id: &str) -> BoothResult<SessionSnapshot> {
        let layout_id = layout_id.trim();
        if layout_id.is_empty() {
            return Err(BoothError::missing("layoutId"));
        }
        self.templates.get(layout_id)?;
        self.ensure_session(visitor_id).await?;
        self.sessions.choose_layout(visitor_id, layout_id)
    }

    pub async fn session(&self, visitor_id: Uuid) -> BoothResult<SessionSnapshot> {
        self.ensure_session(visitor_id).await?;
        self.sessions.get(visitor_id)
    }

    /// Newest capture, or `None` while the camera has not produced one.
    #[instrument(skip(self))]
    pub async fn latest_capture(&self, visitor_id: Option<Uuid>) -> BoothResult<Option<CaptureInfo>> {
        if let Some(id) = visitor_id {
            self.ensure_session(id).await?;
            self.sessions.require(id, SessionStage::LayoutChosen, "fetch a capture")?;
        }

        let latest = with_deadline(
            "capture lookup",
            self.settings.store_timeout,
            self.captures.latest(),
        )
        .await?;

        if let (Some(id), Some(capture)) = (visitor_id, &latest) {
            self.sessions.record_capture(id, &capture.name)?;
        }
        Ok(latest)
    }

    /// Delete the newest capture so the visitor can retake it.
    #[instrument(skip(self))]
    pub async fn discard_capture(&self, visitor_id: Option<Uuid>) -> BoothResult<DiscardOutcome> {
        if let Some(id) = visitor_id {
            self.ensure_session(id).await?;
            self.sessions.require(id, SessionStage::LayoutChosen, "retake a photo")?;
        }

        let capture = with_deadline(
            "capture discard",
            self.settings.store_timeout,
            self.captures.discard_latest(),
        )
        .await?;

        if let Some(id) = visitor_id {
            self.sessions.discard_capture(id)?;
        }
        Ok(DiscardOutcome {
            capture,
            cooldown_hint_secs: self.settings.retake_hint_secs,
        })
    }

    /// Cut the subject out of an uploaded or referenced photo.
    #[instrument(skip_all)]
    pub async fn remove_background(&self, source: RemovalSource) -> BoothResult<Vec<u8>> {
        let image = match source {
            RemovalSource::Upload(image) if image.bytes.is_empty() => {
                return Err(BoothError::missing("image"));
            }
            RemovalSource::Upload(image) => image,
            RemovalSource::Reference(reference) => self.load_source(&reference).await?,
        };
        debug!(file = %image.file_name, bytes = image.bytes.len(), "Sending image for background removal");

        with_deadline(
            "background removal",
            self.settings.upstream_timeout,
            self.remover.remove_background(image),
        )
        .await
        .map_err(|e| {
            if classify::is_transient(&e) {
                e.with_recovery_suggestion("Press Next again to retry")
            } else {
                e
            }
        })
    }

    async fn load_source(&self, reference: &str) -> BoothResult<SourceImage> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(BoothError::missing("sourceUrl"));
        }

        let local = self
            .local_path(reference)
            .filter(|path| !is_absolute_url(reference) || self.captures.serves(path));
        let Some(path) = local else {
            return with_deadline(
                "source fetch",
                self.settings.upstream_timeout,
                self.fetcher.fetch(reference),
            )
            .await;
        };

        let name = self
            .captures
            .resolve(path)
            .ok_or_else(|| BoothError::validation("sourceUrl", "does not name a capture", reference))?;
        let bytes = with_deadline(
            "capture read",
            self.settings.store_timeout,
            self.captures.read(&name),
        )
        .await?;
        Ok(SourceImage::new(name, bytes))
    }

    /// Composite a cutout onto a layout, store it, and optionally email it.
    ///
    /// An unknown layout fails before any image work. A failed email is reported
    /// in the outcome; the stored image stands.
    #[instrument(skip(self, request), fields(template = %request.template_id, visitor = ?request.visitor_id))]
    pub async fn compose(&self, request: ComposeRequest) -> BoothResult<ComposeOutcome> {
        if request.cutout_image.trim().is_empty() {
            return Err(BoothError::missing("cutoutImage"));
        }
        let template_id = request.template_id.trim();
        if template_id.is_empty() {
            return Err(BoothError::missing("templateId"));
        }
        let template = self.templates.get(template_id)?;

        let email = match request.email.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(normalize_email(Some(raw))?),
            _ => None,
        };
        if let Some(id) = request.visitor_id {
            self.ensure_session(id).await?;
            self.sessions.require(id, SessionStage::Captured, "compose")?;
        }

        let cutout = decode_image_payload("cutoutImage", &request.cutout_image)?;
        let composed = self.compositor.compose_blocking(template, cutout).await?;
        let (width, height) = (composed.width, composed.height);

        let attachment = match &email {
            Some(_) => Some(attachment_for("finalImage", composed.bytes.clone())?),
            None => None,
        };
        let name = final_image_name(request.visitor_id, "jpg");
        let stored = with_deadline(
            "asset upload",
            self.settings.store_timeout,
            self.assets.put(&name, composed.bytes),
        )
        .await?;
        let final_image_url = self.public_url(&stored.url_path);
        info!(image = %stored.name, width, height, "Final image stored");

        if let Some(id) = request.visitor_id {
            self.sessions.record_composed(id, template_id, &final_image_url)?;
        }

        let (delivery, email_error) = match email {
            None => (None, None),
            Some(to) => match self
                .notifier
                .send_final_image(&to, Some(&final_image_url), attachment)
                .await
            {
                Ok(delivery) => {
                    self.mark_notified(request.visitor_id);
                    (Some(delivery), None)
                }
                Err(e) => {
                    warn!(error = %e, "Final image stored but email failed");
                    (None, Some(e.to_string()))
                }
            },
        };

        Ok(ComposeOutcome {
            stored,
            final_image_url,
            width,
            height,
            delivery,
            email_error,
        })
    }

    /// Email a finished image. Repeats inside the cooldown are acknowledged
    /// without transmitting.
    #[instrument(skip(self, image_ref))]
    pub async fn send_notification(
        &self,
        email: Option<&str>,
        image_ref: Option<&str>,
        visitor_id: Option<Uuid>,
    ) -> BoothResult<Delivery> {
        let to = normalize_email(email)?;
        let image_ref = image_ref.map(str::trim).unwrap_or_default();
        if image_ref.is_empty() {
            return Err(BoothError::missing("imageRef"));
        }
        if let Some(id) = visitor_id {
            self.ensure_session(id).await?;
            self.sessions.require(id, SessionStage::Composed, "send the photo")?;
        }

        let (link, attachment) = self.resolve_image_ref(image_ref).await?;
        let delivery = self
            .notifier
            .send_final_image(&to, link.as_deref(), attachment)
            .await?;
        self.mark_notified(visitor_id);
        Ok(delivery)
    }

    /// Link and attachment for an image reference: a final-image URL, another
    /// absolute URL, or an inline data URI.
    async fn resolve_image_ref(&self, image_ref: &str) -> BoothResult<(Option<String>, Option<Attachment>)> {
        if image_ref.starts_with("data:") {
            let bytes = decode_image_payload("imageRef", image_ref)?;
            return Ok((None, Some(attachment_for("imageRef", bytes)?)));
        }

        if let Some(name) = self.local_path(image_ref).and_then(|path| self.assets.resolve(path)) {
            let bytes = with_deadline("asset read", self.settings.store_timeout, self.assets.get(&name)).await?;
            return Ok((Some(self.public_url(image_ref)), Some(attachment_for("imageRef", bytes)?)));
        }

        if is_absolute_url(image_ref) {
            return Ok((Some(image_ref.to_string()), None));
        }

        Err(BoothError::validation(
            "imageRef",
            "must be a final image URL or a data URI",
            image_ref,
        ))
    }

    /// Persist a final image the client rendered itself (PNG or JPEG).
    #[instrument(skip(self, payload))]
    pub async fn save_final_image(&self, payload: Option<&str>, visitor_id: Option<Uuid>) -> BoothResult<(StoredAsset, String)> {
        let bytes = decode_image_payload("imageBase64", payload.unwrap_or_default())?;
        let extension = match image::guess_format(&bytes) {
            Ok(image::ImageFormat::Png) => "png",
            Ok(image::ImageFormat::Jpeg) => "jpg",
            Ok(other) => {
                return Err(BoothError::decode(
                    "imageBase64",
                    format!("{other:?} images are not accepted"),
                ));
            }
            Err(e) => return Err(BoothError::decode("imageBase64", e.to_string())),
        };
        if let Some(id) = visitor_id {
            self.ensure_session(id).await?;
        }

        let name = final_image_name(visitor_id, extension);
        let stored = with_deadline("asset upload", self.settings.store_timeout, self.assets.put(&name, bytes)).await?;
        let url = self.public_url(&stored.url_path);
        Ok((stored, url))
    }

    /// Scannable code for `url`, as a PNG data URI.
    pub fn qr_code(&self, url: Option<&str>) -> BoothResult<String> {
        self.notifier.qr_code(url.unwrap_or_default())
    }

    pub fn email_enabled(&self) -> bool {
        self.notifier.email_enabled()
    }

    /// Drop expired gate entries and idle sessions.
    pub fn housekeeping(&self) -> HousekeepingReport {
        HousekeepingReport {
            gate_entries_swept: self.notifier.gate().sweep(),
            sessions_swept: self.sessions.sweep(),
        }
    }

    async fn ensure_session(&self, visitor_id: Uuid) -> BoothResult<()> {
        if self.sessions.contains(visitor_id) {
            return Ok(());
        }
        let record = with_deadline("visitor store", self.settings.store_timeout, self.visitors.get(visitor_id))
            .await?
            .ok_or_else(|| {
                BoothError::not_found("visitor", visitor_id.to_string())
                    .with_recovery_suggestion("Register the visitor first")
            })?;
        self.sessions.start(record.id, &record.email);
        Ok(())
    }

    fn mark_notified(&self, visitor_id: Option<Uuid>) {
        if let Some(id) = visitor_id {
            if let Err(e) = self.sessions.record_notified(id) {
                debug!(error = %e, "Session not advanced after send");
            }
        }
    }

    /// Server-relative path of a reference to this booth. Absolute URLs count
    /// only when they start with the public base; other origins give `None`.
    fn local_path<'a>(&self, reference: &'a str) -> Option<&'a str> {
        if !is_absolute_url(reference) {
            return Some(reference);
        }
        let base = self.settings.public_base.as_str();
        let origin = reference.get(..base.len())?;
        let rest = &reference[base.len()..];
        (origin.eq_ignore_ascii_case(base) && rest.starts_with('/')).then_some(rest)
    }

    fn public_url(&self, path: &str) -> String {
        if is_absolute_url(path) {
            return path.to_string();
        }
        format!("{}/{}", self.settings.public_base, path.trim_start_matches('/'))
    }
}

fn is_absolute_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}

/// `final_<visitor-or-anon>_<unix-millis>_<nonce>.<ext>`
///
/// The nonce keeps names distinct when two saves land in the same millisecond.
fn final_image_name(visitor_id: Option<Uuid>, extension: &str) -> String {
    let who = visitor_id.map_or_else(|| "anon".to_string(), |id| id.to_string());
    let nonce = Uuid::new_v4().simple().to_string();
    format!("final_{who}_{}_{}.{extension}", unix_millis(), &nonce[..12])
}

/// Mail attachment named and typed after the bytes' actual format.
fn attachment_for(field: &str, bytes: Vec<u8>) -> BoothResult<Attachment> {
    let format = image::guess_format(&bytes).map_err(|e| BoothError::decode(field, e.to_string()))?;
    let extension = format.extensions_str().first().copied().unwrap_or("img");
    Ok(Attachment {
        file_name: format!("photobooth.{extension}"),
        content_type: format.to_mime_type().to_string(),
        bytes,
    })
}

/// Builder for [`Booth`]. Collaborators not supplied are built from the config.
pub struct BoothBuilder {
    config: BoothConfig,
    visitors: Option<Arc<dyn VisitorStore>>,
    captures: Option<Arc<dyn CaptureSource>>,
    remover: Option<Arc<dyn BackgroundRemover>>,
    fetcher: Option<Arc<dyn SourceFetcher>>,
    templates: Option<TemplateRegistry>,
    assets: Option<Arc<dyn AssetStore>>,
    mailer: Option<Arc<dyn Mailer>>,
}

impl BoothBuilder {
    pub fn new(config: BoothConfig) -> Self {
        Self {
            config,
            visitors: None,
            captures: None,
            remover: None,
            fetcher: None,
            templates: None,
            assets: None,
            mailer: None,
        }
    }

    pub fn with_visitor_store<S: VisitorStore + 'static>(mut self, store: S) -> Self {
        self.visitors = Some(Arc::new(store));
        self
    }

    pub fn with_capture_source<S: CaptureSource + 'static>(mut self, source: S) -> Self {
        self.captures = Some(Arc::new(source));
        self
    }

    pub fn with_background_remover<R: BackgroundRemover + 'static>(mut self, remover: R) -> Self {
        self.remover = Some(Arc::new(remover));
        self
    }

    pub fn with_source_fetcher<F: SourceFetcher + 'static>(mut self, fetcher: F) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn with_asset_store<S: AssetStore + 'static>(mut self, store: S) -> Self {
        self.assets = Some(Arc::new(store));
        self
    }

    /// Shared so callers (tests) can keep a handle on the mailer.
    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Validate the configuration and assemble the booth.
    pub async fn build(self) -> BoothResult<Booth> {
        let config = self.config;
        config.validate()?;

        let visitors: Arc<dyn VisitorStore> = match self.visitors {
            Some(store) => store,
            None => Arc::new(SqliteVisitorStore::open(&config.visitor_db_path).await?),
        };
        let captures: Arc<dyn CaptureSource> = match self.captures {
            Some(source) => source,
            None => Arc::new(DirectoryCaptureSource::new(
                &config.capture_dir,
                &config.capture_pattern,
                CAPTURE_IMAGES_PREFIX,
            )?),
        };
        let remover: Arc<dyn BackgroundRemover> = match self.remover {
            Some(remover) => remover,
            None => {
                if config.remove_bg_key.is_none() {
                    warn!("REMOVEBG_KEY not set, background removal will fail");
                }
                Arc::new(RemoveBgClient::new(
                    &config.remove_bg_url,
                    config.remove_bg_key.clone(),
                    config.upstream_timeout,
                )?)
            }
        };
        let fetcher: Arc<dyn SourceFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpSourceFetcher::new(config.upstream_timeout)?),
        };
        let templates = match self.templates {
            Some(templates) => templates,
            None => TemplateRegistry::load_dir(&config.template_dir, &config.template_ids)?,
        };
        if templates.is_empty() {
            return Err(BoothError::config("template_ids", "", "no layouts loaded"));
        }
        let assets: Arc<dyn AssetStore> = match self.assets {
            Some(assets) => assets,
            None => Arc::new(LocalAssetStore::new(&config.final_dir, FINAL_IMAGES_PREFIX)),
        };
        let mailer: Arc<dyn Mailer> = match (self.mailer, &config.smtp) {
            (Some(mailer), _) => mailer,
            (None, Some(smtp)) => {
                let from = config.sender_address().ok_or_else(|| {
                    BoothError::config("mail_from_address", "", "no sender address configured")
                })?;
                Arc::new(SmtpMailer::new(smtp, &config.mail_from_name, from)?)
            }
            (None, None) => {
                warn!("No SMTP relay configured, email delivery disabled");
                Arc::new(DisabledMailer)
            }
        };

        let notifier = NotificationGateway::new(
            mailer,
            Arc::new(SendGate::new(config.send_cooldown)),
            config.mail_from_name.clone(),
            config.mail_timeout,
        );

        info!(
            layouts = templates.len(),
            email = notifier.email_enabled(),
            cooldown_secs = config.send_cooldown.as_secs(),
            "Booth assembled"
        );

        Ok(Booth {
            visitors,
            captures,
            remover,
            fetcher,
            templates: Arc::new(templates),
            compositor: Compositor::from_config(&config),
            assets,
            notifier,
            sessions: SessionTracker::new(config.session_ttl),
            settings: Settings {
                public_base: config.public_base(),
                retake_hint_secs: config.retake_hint_secs,
                store_timeout: config.store_timeout,
                upstream_timeout: config.upstream_timeout,
            },
        })
    }
}
