//! # Composition Module
//!
//! Layout templates and the compositor that places cutouts onto them.

pub mod compositor;
pub mod templates;

pub use compositor::{ComposedImage, Compositor};
pub use templates::{LayoutInfo, LayoutTemplate, TemplateRegistry};
