//! # Storage Module
//!
//! Visitor records and composed-image assets.

pub mod assets;
pub mod visitors;

pub use assets::{AssetStore, LocalAssetStore, StoredAsset};
pub use visitors::{SqliteVisitorStore, NewVisitor, VisitorRecord, VisitorStore, normalize_email};
