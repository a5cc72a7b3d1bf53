//! # Configuration Module
//!
//! Typed configuration for the booth server. Every tunable the request flow depends
//! on lives here: directories, layout ids, geometry, encoding, cooldowns and the
//! timeouts that bound each collaborator call.
//!
//! ## Overview
//!
//! - **Defaults**: [`BoothConfig::default`] is a working local setup (port 5000,
//!   `public/*` folders, four layouts, no external services)
//! - **Environment**: [`BoothConfig::from_env`] overlays `PHOTOBOOTH_*` variables and
//!   reads secrets from `/run/secrets/<NAME>` or the environment
//! - **Validated**: [`BoothConfig::validate`] rejects unusable values before the
//!   server binds
//!
//! ## Parameters
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PHOTOBOOTH_HOST` / `PHOTOBOOTH_PORT` | `0.0.0.0` / `5000` | Bind address |
//! | `PHOTOBOOTH_PUBLIC_URL` | `http://localhost:<port>` | Base for absolute links in mail and QR codes |
//! | `PHOTOBOOTH_CAPTURE_DIR` | `public/user-images` | Camera drop folder |
//! | `PHOTOBOOTH_FINAL_DIR` | `public/final-images` | Composed outputs |
//! | `PHOTOBOOTH_TEMPLATE_DIR` | `public/layouts` | Layout backgrounds (`<id>.png`) |
//! | `PHOTOBOOTH_LAYOUTS` | `layout1,layout2,layout3,layout4` | Configured layout ids |
//! | `PHOTOBOOTH_VISITOR_DB` | `data/visitors.db` | Visitor SQLite database |
//! | `PHOTOBOOTH_SEND_COOLDOWN_SECS` | `15` | Duplicate-send suppression window |
//! | `PHOTOBOOTH_JPEG_QUALITY` | `90` | Final image quality |
//! | `PHOTOBOOTH_BACKGROUND` | `#ffffff` | Flatten colour |
//! | `REMOVEBG_KEY` (secret) | unset | Background removal API key |
//! | `SMTP_HOST` / `SMTP_USER` / `SMTP_PASSWORD` (secret) | unset | Mail relay |
//!
//! ## Examples
//!
//! ```rust
//! use photobooth::config::BoothConfig;
//!
//! let config = BoothConfig::default();
//! assert_eq!(config.port, 5000);
//! assert!(config.validate().is_ok());
//! ```

use std::{collections::HashSet, env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr, time::Duration};

use booth_scale::presets::PhotoWindow;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{BoothError, BoothResult};

/// Default pattern for files the camera software drops, e.g. `IMG_042.JPG`.
pub const DEFAULT_CAPTURE_PATTERN: &str = r"(?i)^IMG_\d{3}\.JPG$";

/// Mail relay settings. Present only when a relay host is configured.
#[derive(Debug, Clone, PartialEq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Use STARTTLS on a plain connection instead of implicit TLS.
    pub starttls: bool,
}

/// Configuration for a booth server.
///
/// Geometry, encoding and timing constants are configuration so a venue can tune
/// the print without rebuilding.
#[derive(Debug, Clone)]
pub struct BoothConfig {
    /// Interface the HTTP server binds.
    pub host: String,

    /// Port the HTTP server binds. `0` picks an ephemeral port.
    pub port: u16,

    /// Absolute base URL the front end reaches the server at.
    ///
    /// Used to turn `/final-images/...` paths into links that work from a phone
    /// that scanned the QR code or opened the email.
    pub public_base_url: Option<String>,

    /// Folder the camera software writes captures into.
    pub capture_dir: PathBuf,

    /// Folder composed images are written to and served from.
    pub final_dir: PathBuf,

    /// Folder holding one background image per layout id.
    pub template_dir: PathBuf,

    /// Layout ids the booth offers. Each must have a background in `template_dir`.
    pub template_ids: Vec<String>,

    /// SQLite database the visitor records are persisted in.
    pub visitor_db_path: PathBuf,

    /// Regex a file name must match to count as a capture.
    pub capture_pattern: String,

    /// Seconds the front end should wait after a discard before polling again.
    pub retake_hint_secs: u64,

    /// Window in which repeat sends to the same recipient are suppressed.
    pub send_cooldown: Duration,

    /// Bound on background removal and remote source fetches.
    pub upstream_timeout: Duration,

    /// Bound on a single mail transmission.
    pub mail_timeout: Duration,

    /// Bound on asset and record store operations.
    pub store_timeout: Duration,

    /// Where the cutout sits on the print.
    pub window: PhotoWindow,

    /// JPEG quality of the final image, 1-100.
    pub jpeg_quality: u8,

    /// Opaque colour transparent regions are flattened against.
    pub background: [u8; 3],

    /// Background removal endpoint.
    pub remove_bg_url: String,

    /// Background removal API key.
    pub remove_bg_key: Option<String>,

    /// Mail relay, or `None` to run without email.
    pub smtp: Option<SmtpSettings>,

    /// Display name on outgoing mail.
    pub mail_from_name: String,

    /// Sender address; falls back to the relay username.
    pub mail_from_address: Option<String>,

    /// Largest request body accepted (base64 images are big).
    pub max_body_bytes: usize,

    /// Idle time after which a visitor session is forgotten.
    pub session_ttl: Duration,

    /// How often expired gate entries and idle sessions are swept.
    pub sweep_interval: Duration,
}

impl Default for BoothConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            public_base_url: None,
            capture_dir: PathBuf::from("public/user-images"),
            final_dir: PathBuf::from("public/final-images"),
            template_dir: PathBuf::from("public/layouts"),
            template_ids: (1..=4).map(|n| format!("layout{n}")).collect(),
            visitor_db_path: PathBuf::from("data/visitors.db"),
            capture_pattern: DEFAULT_CAPTURE_PATTERN.to_string(),
            retake_hint_secs: 20,
            send_cooldown: Duration::from_secs(15),
            upstream_timeout: Duration::from_secs(30),
            mail_timeout: Duration::from_secs(20),
            store_timeout: Duration::from_secs(10),
            window: PhotoWindow::default(),
            jpeg_quality: 90,
            background: [255, 255, 255],
            remove_bg_url: "https://api.remove.bg/v1.0/removebg".to_string(),
            remove_bg_key: None,
            smtp: None,
            mail_from_name: "Art Photobooth".to_string(),
            mail_from_address: None,
            max_body_bytes: 50 * 1024 * 1024,
            session_ttl: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl BoothConfig {
    /// Load from the process environment (after `.env`, if present).
    pub fn from_env() -> BoothResult<Self> {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment from {}", path.display()),
            Err(e) if e.not_found() => debug!("No .env file found"),
            Err(e) => warn!("Ignoring unreadable .env file: {e}"),
        }

        Self::from_lookup(|key| env::var(key).ok(), read_secret)
    }

    /// Build a configuration from arbitrary variable and secret sources.
    ///
    /// Unset variables keep their default; set but unparsable ones are errors.
    pub fn from_lookup(
        var: impl Fn(&str) -> Option<String>,
        secret: impl Fn(&str) -> Option<String>,
    ) -> BoothResult<Self> {
        let defaults = Self::default();
        let mut config = Self::default();

        config.host = try_load(&var, "PHOTOBOOTH_HOST", defaults.host)?;
        config.port = try_load(&var, "PHOTOBOOTH_PORT", defaults.port)?;
        if let Some(url) = var("PHOTOBOOTH_PUBLIC_URL") {
            config.set_public_base_url(&url);
        }
        config.capture_dir = try_load(&var, "PHOTOBOOTH_CAPTURE_DIR", defaults.capture_dir)?;
        config.final_dir = try_load(&var, "PHOTOBOOTH_FINAL_DIR", defaults.final_dir)?;
        config.template_dir = try_load(&var, "PHOTOBOOTH_TEMPLATE_DIR", defaults.template_dir)?;
        if let Some(list) = var("PHOTOBOOTH_LAYOUTS") {
            config.template_ids = list
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
        }
        config.visitor_db_path = try_load(&var, "PHOTOBOOTH_VISITOR_DB", defaults.visitor_db_path)?;
        config.capture_pattern =
            try_load(&var, "PHOTOBOOTH_CAPTURE_PATTERN", defaults.capture_pattern)?;
        config.retake_hint_secs =
            try_load(&var, "PHOTOBOOTH_RETAKE_HINT_SECS", defaults.retake_hint_secs)?;
        config.send_cooldown = load_secs(&var, "PHOTOBOOTH_SEND_COOLDOWN_SECS", defaults.send_cooldown)?;
        config.upstream_timeout =
            load_secs(&var, "PHOTOBOOTH_UPSTREAM_TIMEOUT_SECS", defaults.upstream_timeout)?;
        config.mail_timeout = load_secs(&var, "PHOTOBOOTH_MAIL_TIMEOUT_SECS", defaults.mail_timeout)?;
        config.store_timeout =
            load_secs(&var, "PHOTOBOOTH_STORE_TIMEOUT_SECS", defaults.store_timeout)?;
        config.window = PhotoWindow {
            box_w_frac: try_load(&var, "PHOTOBOOTH_BOX_WIDTH_FRAC", defaults.window.box_w_frac)?,
            box_h_frac: try_load(&var, "PHOTOBOOTH_BOX_HEIGHT_FRAC", defaults.window.box_h_frac)?,
            top_frac: try_load(&var, "PHOTOBOOTH_TOP_FRAC", defaults.window.top_frac)?,
        };
        config.jpeg_quality = try_load(&var, "PHOTOBOOTH_JPEG_QUALITY", defaults.jpeg_quality)?;
        if let Some(colour) = var("PHOTOBOOTH_BACKGROUND") {
            config.background = parse_rgb(&colour).ok_or_else(|| {
                BoothError::config("PHOTOBOOTH_BACKGROUND", &colour, "expected #rrggbb or r,g,b")
            })?;
        }
        config.remove_bg_url = try_load(&var, "PHOTOBOOTH_REMOVEBG_URL", defaults.remove_bg_url)?;
        config.remove_bg_key = secret("REMOVEBG_KEY").filter(|key| !key.is_empty());

        config.smtp = match var("SMTP_HOST").filter(|host| !host.is_empty()) {
            Some(host) => {
                let port: u16 = try_load(&var, "SMTP_PORT", 465)?;
                Some(SmtpSettings {
                    host,
                    port,
                    username: var("SMTP_USER").unwrap_or_default(),
                    password: secret("SMTP_PASSWORD").unwrap_or_default(),
                    starttls: try_load(&var, "SMTP_STARTTLS", port == 587)?,
                })
            }
            None => {
                info!("SMTP_HOST not set, email delivery disabled");
                None
            }
        };
        config.mail_from_name = try_load(&var, "PHOTOBOOTH_MAIL_FROM_NAME", defaults.mail_from_name)?;
        config.mail_from_address = var("PHOTOBOOTH_MAIL_FROM").filter(|from| !from.is_empty());

        let max_body_mb: usize = try_load(&var, "PHOTOBOOTH_MAX_BODY_MB", defaults.max_body_bytes >> 20)?;
        config.max_body_bytes = max_body_mb << 20;
        config.session_ttl = load_secs(&var, "PHOTOBOOTH_SESSION_TTL_SECS", defaults.session_ttl)?;
        config.sweep_interval = load_secs(&var, "PHOTOBOOTH_SWEEP_SECS", defaults.sweep_interval)?;

        Ok(config)
    }

    /// Validates the configuration parameters.
    pub fn validate(&self) -> BoothResult<()> {
        if self.template_ids.is_empty() {
            return Err(BoothError::config("template_ids", "", "at least one layout is required"));
        }
        let id_shape = Regex::new(r"^[A-Za-z0-9_-]+$")
            .map_err(|e| BoothError::external("regex", e))?;
        if let Some(bad) = self.template_ids.iter().find(|id| !id_shape.is_match(id)) {
            return Err(BoothError::config(
                "template_ids",
                bad,
                "layout ids may only contain letters, digits, '-' and '_'",
            ));
        }
        let mut seen = HashSet::new();
        for id in &self.template_ids {
            if !seen.insert(id.as_str()) {
                return Err(BoothError::config("template_ids", id, "duplicate layout id"));
            }
        }
        if let Err(e) = Regex::new(&self.capture_pattern) {
            return Err(BoothError::config("capture_pattern", &self.capture_pattern, e.to_string()));
        }
        if let Err(reason) = self.window.validate() {
            return Err(BoothError::config(
                "window",
                format!("{:?}", self.window),
                reason,
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(BoothError::config(
                "jpeg_quality",
                self.jpeg_quality.to_string(),
                "must be between 1 and 100",
            ));
        }
        for (field, value) in [
            ("upstream_timeout", self.upstream_timeout),
            ("mail_timeout", self.mail_timeout),
            ("store_timeout", self.store_timeout),
            ("sweep_interval", self.sweep_interval),
        ] {
            if value.is_zero() {
                return Err(BoothError::config(field, "0", "must be greater than 0"));
            }
        }
        if self.max_body_bytes < 1024 * 1024 {
            return Err(BoothError::config(
                "max_body_bytes",
                self.max_body_bytes.to_string(),
                "must be at least 1 MiB",
            ));
        }
        if let Some(url) = &self.public_base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(BoothError::config("public_base_url", url, "must be an http(s) URL"));
            }
        }
        if let Some(smtp) = &self.smtp {
            if smtp.username.is_empty() && self.mail_from_address.is_none() {
                return Err(BoothError::config(
                    "smtp",
                    &smtp.host,
                    "a sender address or SMTP_USER is required",
                ));
            }
        }
        Ok(())
    }

    /// The address the HTTP server binds.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Set the public origin, dropping trailing slashes. Blank clears it.
    pub fn set_public_base_url(&mut self, url: &str) {
        let url = url.trim().trim_end_matches('/');
        self.public_base_url = (!url.is_empty()).then(|| url.to_string());
    }

    /// Base for absolute links handed to visitors.
    pub fn public_base(&self) -> String {
        self.public_base_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }

    /// Sender address for outgoing mail, if any is known.
    pub fn sender_address(&self) -> Option<&str> {
        self.mail_from_address
            .as_deref()
            .or_else(|| self.smtp.as_ref().map(|smtp| smtp.username.as_str()))
            .filter(|address| !address.is_empty())
    }
}

fn try_load<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> BoothResult<T>
where
    T::Err: Display,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| BoothError::config(key, &raw, e.to_string())),
        None => {
            debug!("{key} not set, using default");
            Ok(default)
        }
    }
}

fn load_secs(var: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> BoothResult<Duration> {
    try_load(var, key, default.as_secs()).map(Duration::from_secs)
}

/// Read a secret from `/run/secrets/<name>`, falling back to the environment.
fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    match read_to_string(&path) {
        Ok(s) => Some(s.trim().to_string()),
        Err(_) => env::var(secret_name).ok().map(|s| s.trim().to_string()).or_else(|| {
            debug!("Secret {secret_name} not provided");
            None
        }),
    }
}

/// Parse `#rrggbb` or `r,g,b`.
fn parse_rgb(raw: &str) -> Option<[u8; 3]> {
    let raw = raw.trim();
    if let Some(hex) = raw.strip_prefix('#') {
        if hex.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        return Some([channel(0)?, channel(2)?, channel(4)?]);
    }
    let parts: Vec<u8> = raw
        .split(',')
        .map(|part| part.trim().parse().ok())
        .collect::<Option<_>>()?;
    parts.try_into().ok()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = BoothConfig::default();
        assert_eq!(config.port, 5000);
        assert_eq!(config.template_ids, vec!["layout1", "layout2", "layout3", "layout4"]);
        assert_eq!(config.send_cooldown, Duration::from_secs(15));
        assert_eq!(config.jpeg_quality, 90);
        assert_eq!(config.max_body_bytes, 50 * 1024 * 1024);
        assert!(config.smtp.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lookup_overrides_defaults() {
        let config = BoothConfig::from_lookup(
            lookup(&[
                ("PHOTOBOOTH_PORT", "8080"),
                ("PHOTOBOOTH_LAYOUTS", "gala, wedding"),
                ("PHOTOBOOTH_SEND_COOLDOWN_SECS", "5"),
                ("PHOTOBOOTH_BACKGROUND", "#102030"),
                ("PHOTOBOOTH_PUBLIC_URL", "https://booth.example/"),
                ("SMTP_HOST", "smtp.example"),
                ("SMTP_PORT", "587"),
                ("SMTP_USER", "booth@example"),
            ]),
            lookup(&[("SMTP_PASSWORD", "hunter2"), ("REMOVEBG_KEY", "k")]),
        )
        .expect("config");

        assert_eq!(config.port, 8080);
        assert_eq!(config.template_ids, vec!["gala", "wedding"]);
        assert_eq!(config.send_cooldown, Duration::from_secs(5));
        assert_eq!(config.background, [0x10, 0x20, 0x30]);
        assert_eq!(config.public_base(), "https://booth.example");
        assert_eq!(config.remove_bg_key.as_deref(), Some("k"));
        let smtp = config.smtp.as_ref().expect("smtp");
        assert!(smtp.starttls);
        assert_eq!(smtp.password, "hunter2");
        assert_eq!(config.sender_address(), Some("booth@example"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_public_base_url_loses_trailing_slashes() {
        let mut config = BoothConfig::default();
        config.set_public_base_url("https://booth.example//");
        assert_eq!(config.public_base(), "https://booth.example");

        config.set_public_base_url(" / ");
        assert_eq!(config.public_base_url, None);
        assert_eq!(config.public_base(), "http://localhost:5000");
    }

    #[test]
    fn test_unparsable_value_is_a_config_error() {
        let err = BoothConfig::from_lookup(lookup(&[("PHOTOBOOTH_PORT", "eighty")]), lookup(&[]))
            .unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_config_validation() {
        let mut config = BoothConfig::default();
        assert!(config.validate().is_ok());

        config.jpeg_quality = 0;
        assert!(config.validate().is_err());
        config.jpeg_quality = 90;

        config.template_ids = vec!["../etc".into()];
        assert!(config.validate().is_err());
        config.template_ids = vec!["a".into(), "a".into()];
        assert!(config.validate().is_err());
        config.template_ids = vec!["layout1".into()];

        config.capture_pattern = "(".into();
        assert!(config.validate().is_err());
        config.capture_pattern = DEFAULT_CAPTURE_PATTERN.into();

        config.mail_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
        config.mail_timeout = Duration::from_secs(1);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_rgb_forms() {
        assert_eq!(parse_rgb("#ffffff"), Some([255, 255, 255]));
        assert_eq!(parse_rgb("0, 128,255"), Some([0, 128, 255]));
        assert_eq!(parse_rgb("#fff"), None);
        assert_eq!(parse_rgb("1,2"), None);
    }
}
