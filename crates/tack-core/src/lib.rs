//! # tack-core
//!
//! Core types, traits, and settings for tack.
//!
//! This crate provides the pieces shared by attachments and their owners:
//! - Record traits (Identifiable, AttachmentOwner)
//! - Naming helpers used to build storage paths
//! - Attachment settings and environment loading

pub mod config;
pub mod naming;
pub mod traits;

pub use config::{AttachmentSettings, ConfigError};
pub use traits::*;
