//! Record integration
//!
//! [`Attachments`] is what a record keeps next to its fields: the attachment
//! definitions of its type and, once touched, one [`Attachment`] per name.
//! A record framework calls [`Attachments::save_all`] after saving the record
//! and [`Attachments::destroy_all`] after destroying it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use tack_core::AttachmentOwner;
use tracing::debug;

use crate::attachment::{Attachment, AttachmentError, AttachmentResult, FilenameField};
use crate::config::AttachmentOptions;
use crate::source::{FileRepresentation, FileToAttach};

struct Definition<O> {
    name: String,
    field: FilenameField<O>,
    options: AttachmentOptions,
}

/// Attachment definitions of a record plus the attachments built so far
pub struct Attachments<O> {
    definitions: Vec<Definition<O>>,
    loaded: HashMap<String, Attachment<O>>,
}

impl<O> Default for Attachments<O> {
    fn default() -> Self {
        Self {
            definitions: Vec::new(),
            loaded: HashMap::new(),
        }
    }
}

impl<O: AttachmentOwner> Attachments<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an attachment. Redefining a name replaces the definition.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        field: FilenameField<O>,
        options: AttachmentOptions,
    ) -> &mut Self {
        let name = name.into();
        self.loaded.remove(&name);
        self.definitions.retain(|definition| definition.name != name);
        self.definitions.push(Definition {
            name,
            field,
            options,
        });
        self
    }

    /// Defined names, in definition order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|definition| definition.name.as_str())
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.definitions.iter().any(|definition| definition.name == name)
    }

    /// Whether the attachment called `name` has been built yet
    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    /// The attachment called `name`, built on first access.
    pub fn get(&mut self, name: &str) -> AttachmentResult<&mut Attachment<O>> {
        match self.loaded.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let definition = self
                    .definitions
                    .iter()
                    .find(|definition| definition.name == name)
                    .ok_or_else(|| AttachmentError::Undefined(name.to_string()))?;
                let attachment =
                    Attachment::with_options(name, definition.field, &definition.options)?;
                debug!(attachment = %name, "Attachment built");
                Ok(entry.insert(attachment))
            }
        }
    }

    /// Adapts `representation` and assigns it to the attachment `name`.
    ///
    /// Nothing changes when the representation is not recognized.
    pub fn assign(
        &mut self,
        owner: &mut O,
        name: &str,
        representation: impl Into<FileRepresentation>,
    ) -> AttachmentResult<()> {
        let file = FileToAttach::new(representation)?;
        self.get(name)?.assign(owner, file);
        Ok(())
    }

    /// Any attachment with unsaved changes
    pub fn is_dirty(&self) -> bool {
        self.loaded.values().any(Attachment::is_dirty)
    }

    /// Saves every defined attachment, in definition order.
    pub fn save_all(&mut self, owner: &O) -> AttachmentResult<()> {
        for name in self.defined_names() {
            self.get(&name)?.save(owner)?;
        }
        Ok(())
    }

    /// Destroys every defined attachment, in definition order.
    pub fn destroy_all(&mut self, owner: &mut O) -> AttachmentResult<()> {
        for name in self.defined_names() {
            self.get(&name)?.destroy(owner)?;
        }
        Ok(())
    }

    fn defined_names(&self) -> Vec<String> {
        self.names().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filename_field;
    use crate::source::SourceError;
    use crate::storage::MemoryBackend;
    use serial_test::serial;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tack_core::{Id, Identifiable};
    use tempfile::TempDir;

    #[derive(Debug, Default)]
    struct Document {
        id: Option<Id>,
        avatar_filename: Option<String>,
        resume_filename: Option<String>,
    }

    impl Identifiable for Document {
        fn id(&self) -> Option<Id> {
            self.id
        }
    }

    impl AttachmentOwner for Document {
        fn class_name(&self) -> String {
            "Library::Document".to_string()
        }
    }

    fn memory_options(backend: &Arc<MemoryBackend>) -> AttachmentOptions {
        let backend = backend.clone();
        AttachmentOptions::new()
            .path("/:class/:id/:attachment/:style/:filename")
            .storage(move || Box::new(backend.clone()))
    }

    fn attachments(backend: &Arc<MemoryBackend>) -> Attachments<Document> {
        let mut attachments = Attachments::new();
        attachments
            .define(
                "avatar",
                filename_field!(Document, avatar_filename),
                memory_options(backend),
            )
            .define(
                "resume",
                filename_field!(Document, resume_filename),
                memory_options(backend),
            );
        attachments
    }

    #[test]
    fn test_define_keeps_order_and_replaces() {
        let backend = Arc::new(MemoryBackend::new());
        let mut attachments = attachments(&backend);
        assert_eq!(attachments.names().collect::<Vec<_>>(), vec!["avatar", "resume"]);

        attachments.define(
            "avatar",
            filename_field!(Document, avatar_filename),
            AttachmentOptions::new(),
        );
        assert_eq!(attachments.names().collect::<Vec<_>>(), vec!["resume", "avatar"]);
        assert!(attachments.is_defined("avatar"));
        assert!(!attachments.is_defined("logo"));
    }

    #[test]
    #[serial]
    fn test_get_builds_once() {
        let backend = Arc::new(MemoryBackend::new());
        let mut attachments = attachments(&backend);
        let mut document = Document::default();

        assert!(!attachments.is_loaded("avatar"));
        attachments
            .get("avatar")
            .unwrap()
            .assign(&mut document, FileToAttach::from_parts("me.png", "/tmp/me.png"));
        assert!(attachments.is_loaded("avatar"));
        assert!(!attachments.is_loaded("resume"));

        assert!(attachments.get("avatar").unwrap().pending().is_some());
        assert!(attachments.is_dirty());
    }

    #[test]
    fn test_get_undefined() {
        let backend = Arc::new(MemoryBackend::new());
        let mut attachments = attachments(&backend);
        let result = attachments.get("logo");
        assert!(matches!(result, Err(AttachmentError::Undefined(name)) if name == "logo"));
    }

    #[test]
    #[serial]
    fn test_assign_adapts_representation() {
        let backend = Arc::new(MemoryBackend::new());
        let mut attachments = attachments(&backend);
        let mut document = Document::default();

        attachments
            .assign(&mut document, "resume", PathBuf::from("/tmp/uploads/my cv.pdf"))
            .unwrap();

        assert_eq!(document.resume_filename.as_deref(), Some("my_cv.pdf"));
        assert_eq!(document.avatar_filename, None);
    }

    #[test]
    fn test_assign_unknown_representation_changes_nothing() {
        let backend = Arc::new(MemoryBackend::new());
        let mut attachments = attachments(&backend);
        let mut document = Document::default();

        let result = attachments.assign(
            &mut document,
            "avatar",
            FileRepresentation::Upload {
                original_filename: None,
                tempfile: None,
            },
        );

        assert!(matches!(
            result,
            Err(AttachmentError::Source(SourceError::UnknownRepresentation(_)))
        ));
        assert_eq!(document.avatar_filename, None);
        assert!(!attachments.is_loaded("avatar"));
    }

    #[test]
    #[serial]
    fn test_save_all_and_destroy_all() {
        let uploads = TempDir::new().unwrap();
        let source = uploads.path().join("me.png");
        std::fs::write(&source, b"png bytes").unwrap();

        let backend = Arc::new(MemoryBackend::new());
        let mut attachments = attachments(&backend);
        let mut document = Document {
            id: Some(3),
            ..Document::default()
        };

        attachments.assign(&mut document, "avatar", source.clone()).unwrap();
        attachments.save_all(&document).unwrap();

        let stored = "/library/documents/3/avatars/original/me.png";
        assert_eq!(backend.get(stored).as_deref(), Some(&b"png bytes"[..]));
        assert!(attachments.is_loaded("resume"));
        assert!(!attachments.is_dirty());

        attachments.destroy_all(&mut document).unwrap();
        assert!(backend.is_empty());
        assert_eq!(document.avatar_filename, None);
        assert_eq!(document.resume_filename, None);
    }
}
