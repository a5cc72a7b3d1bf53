//! Shared fixtures for the booth integration tests: in-process fakes for the mail
//! relay and the background-removal service, image builders, and a booth wired
//! over scratch directories.

#![allow(dead_code)]

use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use photobooth::{
    Booth, BoothBuilder, BoothConfig, BoothError, BoothResult,
    background::{BackgroundRemover, SourceFetcher, SourceImage},
    notify::{Mailer, OutgoingMail},
    store::{NewVisitor, VisitorRecord, VisitorStore},
    utils::data_uri,
};
use uuid::Uuid;
use tempfile::TempDir;

pub const TEMPLATE_W: u32 = 400;
pub const TEMPLATE_H: u32 = 600;
pub const CUTOUT_W: u32 = 100;
pub const CUTOUT_H: u32 = 200;

pub const TEMPLATE_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);
pub const CUTOUT_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Mail relay stand-in that records every message it accepts.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingMail>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent sends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: OutgoingMail) -> BoothResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BoothError::upstream("smtp", "relay refused the message").retryable());
        }
        self.sent.lock().unwrap().push(mail);
        Ok(())
    }
}

/// Background removal stand-in: always returns the same opaque red cutout.
#[derive(Clone, Default)]
pub struct FakeRemover {
    calls: Arc<AtomicUsize>,
    last_file: Arc<Mutex<Option<String>>>,
}

impl FakeRemover {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_file(&self) -> Option<String> {
        self.last_file.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackgroundRemover for FakeRemover {
    async fn remove_background(&self, image: SourceImage) -> BoothResult<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_file.lock().unwrap() = Some(image.file_name);
        Ok(cutout_png())
    }
}

/// A collaborator that never answers, for exercising the call deadlines.
#[derive(Clone, Copy, Default)]
pub struct Stalled;

impl Stalled {
    async fn hang<T>(self) -> BoothResult<T> {
        std::future::pending().await
    }
}

#[async_trait]
impl BackgroundRemover for Stalled {
    async fn remove_background(&self, _image: SourceImage) -> BoothResult<Vec<u8>> {
        self.hang().await
    }
}

#[async_trait]
impl SourceFetcher for Stalled {
    async fn fetch(&self, _url: &str) -> BoothResult<SourceImage> {
        self.hang().await
    }
}

#[async_trait]
impl VisitorStore for Stalled {
    async fn insert(&self, _visitor: NewVisitor) -> BoothResult<VisitorRecord> {
        self.hang().await
    }

    async fn list(&self) -> BoothResult<Vec<VisitorRecord>> {
        self.hang().await
    }

    async fn get(&self, _id: Uuid) -> BoothResult<Option<VisitorRecord>> {
        self.hang().await
    }
}

pub fn encode(image: &RgbaImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => image::DynamicImage::ImageRgba8(image.clone())
            .into_rgb8()
            .write_to(&mut out, format)
            .unwrap(),
        _ => image.write_to(&mut out, format).unwrap(),
    }
    out.into_inner()
}

pub fn cutout_png() -> Vec<u8> {
    encode(&RgbaImage::from_pixel(CUTOUT_W, CUTOUT_H, CUTOUT_COLOR), ImageFormat::Png)
}

pub fn cutout_data_uri() -> String {
    data_uri("image/png", &cutout_png())
}

/// A booth over temporary folders with fakes for the external services.
pub struct TestBooth {
    pub booth: Arc<Booth>,
    pub config: BoothConfig,
    pub mailer: Arc<RecordingMailer>,
    pub remover: FakeRemover,
    dir: TempDir,
}

impl TestBooth {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut BoothConfig)) -> Self {
        Self::with_builder(tweak, |builder| builder).await
    }

    /// Like [`TestBooth::with_config`], with a last chance to swap collaborators
    /// on the builder.
    pub async fn with_builder(
        tweak: impl FnOnce(&mut BoothConfig),
        customize: impl FnOnce(BoothBuilder) -> BoothBuilder,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let template_dir = root.join("layouts");
        std::fs::create_dir_all(&template_dir).unwrap();
        RgbaImage::from_pixel(TEMPLATE_W, TEMPLATE_H, TEMPLATE_COLOR)
            .save(template_dir.join("layout1.png"))
            .unwrap();
        RgbaImage::from_pixel(TEMPLATE_H, TEMPLATE_W, Rgba([0, 255, 0, 255]))
            .save(template_dir.join("layout2.png"))
            .unwrap();
        std::fs::create_dir_all(root.join("captures")).unwrap();

        let mut config = BoothConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            capture_dir: root.join("captures"),
            final_dir: root.join("final"),
            template_dir,
            template_ids: vec!["layout1".to_string(), "layout2".to_string()],
            visitor_db_path: root.join("data").join("visitors.db"),
            public_base_url: Some("http://booth.test".to_string()),
            ..BoothConfig::default()
        };
        tweak(&mut config);

        let mailer = RecordingMailer::new();
        let remover = FakeRemover::default();
        let builder = Booth::builder(config.clone())
            .with_background_remover(remover.clone())
            .with_mailer(mailer.clone());
        let booth = customize(builder).build().await.unwrap();

        Self {
            booth: Arc::new(booth),
            config,
            mailer,
            remover,
            dir,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Drop a capture into the camera folder, `age` older than now.
    pub fn write_capture(&self, name: &str, age: Duration) -> PathBuf {
        let path = self.config.capture_dir.join(name);
        let photo = RgbaImage::from_pixel(64, 48, Rgba([200, 180, 160, 255]));
        std::fs::write(&path, encode(&photo, ImageFormat::Jpeg)).unwrap();
        File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() - age)
            .unwrap();
        path
    }

    /// Names of the files in the final-image folder.
    pub fn final_images(&self) -> Vec<String> {
        match std::fs::read_dir(&self.config.final_dir) {
            Ok(entries) => entries
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|name| !name.starts_with('.'))
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
