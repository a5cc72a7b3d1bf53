use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use photobooth::{Booth, BoothConfig, server};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Event photobooth backend: registration, capture pickup, background removal,
/// compositing and delivery.
#[derive(Parser, Debug)]
#[command(name = "photobooth")]
#[command(about = "📸 Serve the photobooth API")]
#[command(long_about = "Serve the photobooth API. Settings come from PHOTOBOOTH_* environment variables \
(and a .env file); the flags below override them.")]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", help = "Port to listen on (default 5000)")]
    port: Option<u16>,

    /// Interface to bind
    #[arg(long, help = "Interface to bind (default 0.0.0.0)")]
    host: Option<String>,

    /// Folder the camera software writes into
    #[arg(long, help = "Folder the camera drops IMG_###.JPG files into")]
    capture_dir: Option<PathBuf>,

    /// Folder composed images are written to
    #[arg(long, help = "Folder final images are stored in")]
    final_dir: Option<PathBuf>,

    /// Folder holding layout backgrounds
    #[arg(long, help = "Folder holding layout1.png .. layoutN.png")]
    template_dir: Option<PathBuf>,

    /// Public origin used in emailed links
    #[arg(long, help = "Public base URL, e.g. https://booth.example.com")]
    public_url: Option<String>,

    /// Visitor registry file
    #[arg(long, help = "Path of the visitor SQLite database")]
    visitor_db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = apply_overrides(BoothConfig::from_env()?, args);
    config.validate()?;

    info!("Initializing booth...");
    let booth = Arc::new(
        Booth::builder(config.clone())
            .build()
            .await
            .context("failed to assemble the booth")?,
    );

    let address = config.bind_address();
    info!("Binding to {address}");
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    server::serve(listener, booth, &config, server::shutdown_signal()).await?;
    Ok(())
}

/// Command-line flags win over the environment.
fn apply_overrides(mut config: BoothConfig, args: Args) -> BoothConfig {
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(dir) = args.capture_dir {
        config.capture_dir = dir;
    }
    if let Some(dir) = args.final_dir {
        config.final_dir = dir;
    }
    if let Some(dir) = args.template_dir {
        config.template_dir = dir;
    }
    if let Some(url) = args.public_url {
        config.set_public_base_url(&url);
    }
    if let Some(path) = args.visitor_db {
        config.visitor_db_path = path;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_flag_is_stored_without_trailing_slash() {
        let args = Args::parse_from(["photobooth", "--public-url", "https://booth.example/"]);
        let config = apply_overrides(BoothConfig::default(), args);
        assert_eq!(config.public_base(), "https://booth.example");
        assert_eq!(config.public_base_url.as_deref(), Some("https://booth.example"));
    }

    #[test]
    fn flags_override_the_environment() {
        let args = Args::parse_from(["photobooth", "--port", "8081", "--visitor-db", "/tmp/v.db"]);
        let config = apply_overrides(BoothConfig::default(), args);
        assert_eq!(config.port, 8081);
        assert_eq!(config.visitor_db_path, PathBuf::from("/tmp/v.db"));
    }
}
