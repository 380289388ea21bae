//! Attachment lifecycle
//!
//! An [`Attachment`] is one named file slot on an owning record. It never
//! owns the record: every operation borrows it. The owner's filename field is
//! the only thing deciding whether the attachment is empty.
//!
//! Changes are staged. `assign` and `clear` queue the removal of the current
//! files (computed from the old filename) and `save` generates renditions,
//! queues them under the new filename and flushes the storage queue.

use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;

use regex::Regex;
use tack_core::AttachmentOwner;
use tack_core::Id;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::{AttachmentConfig, AttachmentOptions, ORIGINAL_STYLE};
use crate::pattern::{Pattern, TagContext, TagSource};
use crate::processor::{Processor, ProcessorError};
use crate::source::{FileToAttach, SourceError};
use crate::storage::{StorageError, StorageQueue};
use crate::style::StyleError;

/// Characters kept as-is in stored filenames
static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9.]").unwrap());

/// Attachment errors
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Processor error: {0}")]
    Processor(#[from] ProcessorError),
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Style error: {0}")]
    Style(#[from] StyleError),
    #[error("Attachment {0} has a pending file but no filename")]
    MissingFilename(String),
    #[error("No attachment named {0}")]
    Undefined(String),
}

pub type AttachmentResult<T> = Result<T, AttachmentError>;

/// Accessor pair for the owner's `<name>_filename` field
pub struct FilenameField<O> {
    get: fn(&O) -> Option<&str>,
    set: fn(&mut O, Option<String>),
}

impl<O> FilenameField<O> {
    pub const fn new(get: fn(&O) -> Option<&str>, set: fn(&mut O, Option<String>)) -> Self {
        Self { get, set }
    }

    pub fn get<'a>(&self, owner: &'a O) -> Option<&'a str> {
        (self.get)(owner)
    }

    pub fn set(&self, owner: &mut O, value: Option<String>) {
        (self.set)(owner, value)
    }
}

impl<O> Clone for FilenameField<O> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<O> Copy for FilenameField<O> {}

impl<O> fmt::Debug for FilenameField<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FilenameField")
    }
}

/// Builds a [`FilenameField`] over an `Option<String>` field of the owner.
///
/// ```ignore
/// let field = filename_field!(User, avatar_filename);
/// ```
#[macro_export]
macro_rules! filename_field {
    ($owner:ty, $field:ident) => {
        $crate::FilenameField::<$owner>::new(
            |owner| owner.$field.as_deref(),
            |owner, value| owner.$field = value,
        )
    };
}

/// Replaces everything outside `[A-Za-z0-9.]` with `_`.
pub fn sanitize_filename(filename: &str) -> String {
    UNSAFE_FILENAME_CHARS.replace_all(filename, "_").into_owned()
}

/// A named file slot on a record of type `O`
pub struct Attachment<O> {
    name: String,
    field: FilenameField<O>,
    config: AttachmentConfig,
    storage: StorageQueue,
    processor: Box<dyn Processor>,
    pending: Option<FileToAttach>,
}

impl<O: AttachmentOwner> Attachment<O> {
    /// Builds an attachment with its own storage queue and processor.
    pub fn new(name: impl Into<String>, field: FilenameField<O>, config: AttachmentConfig) -> Self {
        let storage = StorageQueue::new(config.build_storage());
        let processor = config.build_processor();
        Self {
            name: name.into(),
            field,
            config,
            storage,
            processor,
            pending: None,
        }
    }

    /// Resolves `options` over the process-wide defaults, then builds.
    pub fn with_options(
        name: impl Into<String>,
        field: FilenameField<O>,
        options: &AttachmentOptions,
    ) -> AttachmentResult<Self> {
        Ok(Self::new(name, field, AttachmentConfig::resolve(options)?))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &AttachmentConfig {
        &self.config
    }

    /// Queue of staged store/remove operations and last flush results
    pub fn storage(&self) -> &StorageQueue {
        &self.storage
    }

    pub fn processor(&self) -> &dyn Processor {
        self.processor.as_ref()
    }

    /// File assigned but not saved yet
    pub fn pending(&self) -> Option<&FileToAttach> {
        self.pending.as_ref()
    }

    /// Filename stored on the owner
    pub fn filename<'a>(&self, owner: &'a O) -> Option<&'a str> {
        self.field.get(owner)
    }

    pub fn is_empty(&self, owner: &O) -> bool {
        self.filename(owner).is_none()
    }

    /// Whether there is something to process, store or remove
    pub fn is_dirty(&self) -> bool {
        self.pending.is_some() || self.storage.is_dirty()
    }

    /// Url for `style` (the default style when `None`).
    pub fn url(&self, owner: &O, style: Option<&str>) -> String {
        let pattern = if self.is_empty(owner) {
            self.config.default_url()
        } else {
            self.config.url()
        };
        self.specialize(pattern, owner, style)
    }

    /// Storage path for `style` (the default style when `None`), `None` when empty.
    pub fn path(&self, owner: &O, style: Option<&str>) -> Option<String> {
        if self.is_empty(owner) {
            return None;
        }
        Some(self.specialize(self.config.path(), owner, style))
    }

    /// Makes `file` the new attached file. Nothing is processed or stored
    /// until `save`.
    #[instrument(skip_all, fields(attachment = %self.name))]
    pub fn assign(&mut self, owner: &mut O, file: FileToAttach) {
        self.enqueue_files_for_removal(owner);
        let filename = sanitize_filename(file.original_filename());
        debug!(filename = %filename, source = ?file.path(), "File assigned");
        self.field.set(owner, Some(filename));
        self.pending = Some(file);
    }

    /// Throws the current file away. It is removed on the next `save`.
    #[instrument(skip_all, fields(attachment = %self.name))]
    pub fn clear(&mut self, owner: &mut O) {
        self.enqueue_files_for_removal(owner);
        self.pending = None;
        self.field.set(owner, None);
    }

    /// Processes and stores the pending file, then flushes the queue.
    ///
    /// The pending file survives a failed save so it can be retried.
    #[instrument(skip_all, fields(attachment = %self.name, pending = self.pending.is_some()))]
    pub fn save(&mut self, owner: &O) -> AttachmentResult<()> {
        if let Some(file) = &self.pending {
            let source = file.path().to_path_buf();
            self.processor.process(&source, self.config.styles())?;
            for (destination, file) in self.files_for_storage(owner, source)? {
                self.storage.store(file, destination);
            }
        }

        self.storage.flush()?;
        if self.pending.take().is_some() {
            info!(
                stored = self.storage.stored().len(),
                removed = self.storage.removed().len(),
                "Attachment saved"
            );
        }
        Ok(())
    }

    /// Removes the current file and empties the owner's filename field.
    #[instrument(skip_all, fields(attachment = %self.name))]
    pub fn destroy(&mut self, owner: &mut O) -> AttachmentResult<()> {
        self.clear(owner);
        self.save(owner)
    }

    fn specialize(&self, pattern: &Pattern, owner: &O, style: Option<&str>) -> String {
        let view = Resolver {
            attachment: self,
            owner,
        };
        let style = style.unwrap_or_else(|| self.config.default_style());
        pattern.specialize(&TagContext::new(&view, Some(style)))
    }

    /// Queues every current style path, unless empty or already queued.
    fn enqueue_files_for_removal(&mut self, owner: &O) {
        if self.is_empty(owner) || self.is_dirty() {
            return;
        }
        let paths: Vec<String> = self
            .config
            .style_names()
            .into_iter()
            .filter_map(|style| self.path(owner, Some(style)))
            .collect();
        debug!(count = paths.len(), "Files queued for removal");
        for path in paths {
            self.storage.remove(path);
        }
    }

    /// (destination, local file) pairs: every rendition, plus the raw
    /// source as `original` unless a rendition already took that name.
    fn files_for_storage(&self, owner: &O, source: PathBuf) -> AttachmentResult<Vec<(String, PathBuf)>> {
        let mut files = self.processor.processed_files().clone();
        files.entry(ORIGINAL_STYLE.to_string()).or_insert(source);

        files
            .into_iter()
            .map(|(style, file)| {
                let destination = self
                    .path(owner, Some(&style))
                    .ok_or_else(|| AttachmentError::MissingFilename(self.name.clone()))?;
                Ok((destination, file))
            })
            .collect()
    }
}

impl<O> fmt::Debug for Attachment<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

/// What the path tags see: an attachment together with its owner
struct Resolver<'a, O> {
    attachment: &'a Attachment<O>,
    owner: &'a O,
}

impl<O: AttachmentOwner> TagSource for Resolver<'_, O> {
    fn name(&self) -> String {
        self.attachment.name.clone()
    }

    fn owner_class(&self) -> String {
        self.owner.class_name()
    }

    fn owner_id(&self) -> Option<Id> {
        self.owner.id()
    }

    fn filename(&self) -> Option<String> {
        self.attachment.filename(self.owner).map(str::to_string)
    }

    fn url(&self, style: Option<&str>) -> String {
        self.attachment.url(self.owner, style)
    }
}
