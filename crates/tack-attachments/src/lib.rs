//! # tack-attachments
//!
//! File attachments for records, with styled renditions and queued storage.
//!
//! ## Features
//!
//! - Path and URL patterns built from tags (`:class_name/:id/:style/:filename`)
//! - Staged assign/clear with removal and storage committed on save
//! - Thumbnail renditions per style (`100x100`, `50x50#`, `25%`)
//! - Filesystem and in-memory storage backends
//! - Process-wide defaults with per-attachment overrides
//!
//! ## Example
//!
//! ```rust,ignore
//! use tack_attachments::{filename_field, AttachmentOptions, Attachments};
//!
//! let mut attachments = Attachments::new();
//! attachments.define(
//!     "avatar",
//!     filename_field!(User, avatar_filename),
//!     AttachmentOptions::new()
//!         .style("normal", "100x100")
//!         .style("small", "50x50#"),
//! );
//!
//! attachments.assign(&mut user, "avatar", PathBuf::from("/tmp/me.png"))?;
//! attachments.save_all(&user)?;
//!
//! let url = attachments.get("avatar")?.url(&user, Some("small"));
//! ```

pub mod attachment;
pub mod config;
pub mod pattern;
pub mod processor;
pub mod record;
pub mod source;
pub mod storage;
pub mod style;

pub use attachment::{
    sanitize_filename, Attachment, AttachmentError, AttachmentResult, FilenameField,
};
pub use config::{
    apply_settings, configure, defaults, reset_defaults, AttachmentConfig, AttachmentDefaults,
    AttachmentOptions, ProcessorFactory, StorageFactory, ORIGINAL_STYLE,
};
pub use pattern::{
    clear_root_path, root_path, set_root_path, Pattern, Tag, TagContext, TagRegistry, TagSource,
};
pub use processor::{Processor, ProcessorError, ProcessorResult, Renditions, ThumbnailProcessor};
pub use record::Attachments;
pub use source::{FileRepresentation, FileToAttach, SourceError};
pub use storage::{
    FilesystemBackend, MemoryBackend, StorageBackend, StorageError, StorageQueue, StorageResult,
    StoredFile,
};
pub use style::{Geometry, GeometryFlag, StyleDefinition, StyleError, Styles};
