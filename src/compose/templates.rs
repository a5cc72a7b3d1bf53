//! Preconfigured print layouts.
//!
//! Templates are decoded once at startup and shared read-only between requests.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use image::RgbaImage;
use serde::Serialize;
use tracing::info;

use crate::{
    booth::LAYOUT_IMAGES_PREFIX,
    error::{BoothError, BoothResult},
};

/// Accepted extensions in order of preference, matched case-insensitively.
const TEMPLATE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// A layout background and the id clients select it by.
#[derive(Debug)]
pub struct LayoutTemplate {
    pub id: String,
    /// File name under the layouts folder, if loaded from disk.
    pub file_name: Option<String>,
    pub background: RgbaImage,
}

impl LayoutTemplate {
    pub fn new(id: impl Into<String>, background: RgbaImage) -> Self {
        Self {
            id: id.into(),
            file_name: None,
            background,
        }
    }

    pub fn width(&self) -> u32 {
        self.background.width()
    }

    pub fn height(&self) -> u32 {
        self.background.height()
    }
}

/// Public description of a layout for `GET /layouts`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LayoutInfo {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub url: Option<String>,
}

/// Lookup from layout id to its decoded template.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    order: Vec<String>,
    templates: HashMap<String, Arc<LayoutTemplate>>,
}

impl TemplateRegistry {
    /// Decode `<dir>/<id>.{png,jpg,jpeg}` for each id. Missing files are fatal.
    pub fn load_dir(dir: &Path, ids: &[String]) -> BoothResult<Self> {
        let mut registry = Self::default();
        for id in ids {
            let path = find_template_file(dir, id).ok_or_else(|| {
                BoothError::config(
                    "template_dir",
                    dir.display().to_string(),
                    format!("no background image for layout '{id}'"),
                )
            })?;
            let background = image::open(&path)
                .map_err(|e| BoothError::from(e).with_context(path.display().to_string()))?
                .into_rgba8();
            info!(
                layout = %id,
                width = background.width(),
                height = background.height(),
                "Loaded layout template"
            );
            let mut template = LayoutTemplate::new(id.clone(), background);
            template.file_name = path.file_name().map(|name| name.to_string_lossy().into_owned());
            registry.insert(template);
        }
        Ok(registry)
    }

    /// Build a registry from already-decoded images.
    pub fn from_images(images: impl IntoIterator<Item = (String, RgbaImage)>) -> Self {
        let mut registry = Self::default();
        for (id, background) in images {
            registry.insert(LayoutTemplate::new(id, background));
        }
        registry
    }

    fn insert(&mut self, template: LayoutTemplate) {
        if !self.templates.contains_key(&template.id) {
            self.order.push(template.id.clone());
        }
        self.templates.insert(template.id.clone(), Arc::new(template));
    }

    /// Resolve a layout id.
    pub fn get(&self, id: &str) -> BoothResult<Arc<LayoutTemplate>> {
        self.templates
            .get(id)
            .cloned()
            .ok_or_else(|| {
                BoothError::unknown_template(id)
                    .with_recovery_suggestion("Choose one of the layouts listed by GET /layouts")
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Layouts in configuration order.
    pub fn list(&self) -> Vec<LayoutInfo> {
        self.order
            .iter()
            .filter_map(|id| self.templates.get(id))
            .map(|t| LayoutInfo {
                id: t.id.clone(),
                width: t.width(),
                height: t.height(),
                url: t.file_name.as_ref().map(|name| format!("{LAYOUT_IMAGES_PREFIX}/{name}")),
            })
            .collect()
    }
}

fn find_template_file(dir: &Path, id: &str) -> Option<PathBuf> {
    let candidates: Vec<(usize, PathBuf)> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.file_stem().is_some_and(|stem| stem == id))
        .filter_map(|path| {
            let ext = path.extension()?.to_str()?.to_ascii_lowercase();
            let rank = TEMPLATE_EXTENSIONS.iter().position(|known| *known == ext)?;
            Some((rank, path))
        })
        .collect();
    candidates.into_iter().min_by_key(|(rank, _)| *rank).map(|(_, path)| path)
}
