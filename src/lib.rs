//! # Photobooth Backend
//!
//! Server side of an event photobooth: visitors register, pick a print layout,
//! take a photo, have the background removed, and receive the composited result
//! by email or as a scannable code.
//!
//! ## Architecture
//!
//! - `store`: visitor registry (JSON file) and final-image storage
//! - `capture`: reads the photos the camera software drops into a folder
//! - `background`: remove.bg client and remote source fetches
//! - `compose`: layout templates and the cutout compositor (geometry in `booth-scale`)
//! - `notify`: email delivery behind a duplicate-send gate, and QR codes
//! - `session`: per-visitor step ordering
//! - `booth`: the operations above wired together
//! - `server`: axum router, static files, housekeeping, shutdown
//! - `config` and `error`: environment configuration and the error taxonomy
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use photobooth::{Booth, BoothConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BoothConfig::from_env()?;
//! let booth = Arc::new(Booth::builder(config.clone()).build().await?);
//! let listener = tokio::net::TcpListener::bind(config.bind_address()).await?;
//! photobooth::server::serve(listener, booth, &config, photobooth::server::shutdown_signal()).await?;
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod booth;
pub mod capture;
pub mod compose;
pub mod config;
pub mod error;
pub mod notify;
pub mod server;
pub mod session;
pub mod store;
pub mod utils;

pub use booth::{Booth, BoothBuilder, ComposeOutcome, ComposeRequest, RemovalSource};
pub use config::BoothConfig;
pub use error::{BoothError, BoothResult, HasRecoverySuggestion, Retryable};
