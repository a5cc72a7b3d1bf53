// SPDX-License-Identifier: MIT
//! # booth-scale: Photo-Window Geometry for Print Layouts
//!
//! This crate decides where a subject cutout sits on a photobooth print layout and
//! performs the resize that gets it there. It knows nothing about HTTP, storage or
//! encoding; the main crate feeds it decoded RGBA pixels and receives RGBA pixels back.
//!
//! ## Key Components
//!
//! - [`presets`]: Fit-inside scaling plans and the [`presets::PhotoWindow`] placement preset
//! - [`cpu`]: CPU-based RGBA scaling using fast_image_resize (SIMD accelerated)
//!
//! ## Usage Example
//!
//! ```rust
//! use booth_scale::presets::{PhotoWindow, Size};
//!
//! let template = Size { w: 1200, h: 1800 };
//! let cutout = Size { w: 3000, h: 2000 };
//!
//! let layout = PhotoWindow::default().layout(template, cutout);
//! assert!(layout.plan.out.w <= 840 && layout.plan.out.h <= 1260);
//! assert_eq!(layout.placement.top, 576);
//! ```

pub mod cpu;
pub mod presets;
