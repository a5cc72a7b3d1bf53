//! # Configuration Module
//!
//! Server configuration: defaults, environment loading and validation.

pub mod config;

pub use config::{BoothConfig, SmtpSettings};
