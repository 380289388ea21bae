//! Path and URL patterns
//!
//! A [`Pattern`] is a string made of literal text and tag labels such as
//! `:class_name/:id/:style/:filename`. Specializing it for an attachment and
//! a style replaces every known label with the value its [`Tag`] resolves to.
//!
//! Tags are applied longest label first, so `:class_name` is never read as
//! `:class` followed by `_name`. When two tags share the exact same label the
//! most recently registered one wins. Each tag scans the text that is still
//! literal exactly once: values produced by a tag are never scanned again.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tack_core::naming;
use tack_core::traits::Id;

/// Application root substituted for `:root`, `.` when unset
static ROOT_PATH: RwLock<Option<String>> = parking_lot::const_rwlock(None);

const DEFAULT_ROOT: &str = ".";

/// Sets the application root used by `:root`.
pub fn set_root_path(path: impl Into<String>) {
    *ROOT_PATH.write() = Some(path.into());
}

/// Unsets the application root, going back to `.`.
pub fn clear_root_path() {
    *ROOT_PATH.write() = None;
}

/// Current application root.
pub fn root_path() -> String {
    ROOT_PATH
        .read()
        .clone()
        .unwrap_or_else(|| DEFAULT_ROOT.to_string())
}

/// What tags may ask about the attachment being specialized.
pub trait TagSource {
    /// Attachment name, e.g. `avatar`
    fn name(&self) -> String;
    /// Owner's namespaced type name, e.g. `App::Models::User`
    fn owner_class(&self) -> String;
    /// Owner's identifier
    fn owner_id(&self) -> Option<Id>;
    /// Filename stored on the owner
    fn filename(&self) -> Option<String>;
    /// The attachment's own url for `style`
    fn url(&self, style: Option<&str>) -> String;
}

/// Everything a tag gets to resolve itself
#[derive(Clone, Copy)]
pub struct TagContext<'a> {
    pub attachment: &'a dyn TagSource,
    pub style: Option<&'a str>,
}

impl<'a> TagContext<'a> {
    pub fn new(attachment: &'a dyn TagSource, style: Option<&'a str>) -> Self {
        Self { attachment, style }
    }
}

/// A placeholder label and the rule resolving it
pub trait Tag: Send + Sync {
    /// Text replaced in the pattern, e.g. `:id`
    fn label(&self) -> &str;

    /// Value replacing the label
    fn specialize(&self, context: &TagContext<'_>) -> String;
}

/// `:attachment` → pluralized, underscored attachment name
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachmentTag;

impl Tag for AttachmentTag {
    fn label(&self) -> &str {
        ":attachment"
    }

    fn specialize(&self, context: &TagContext<'_>) -> String {
        naming::table_name(&context.attachment.name())
    }
}

/// `:style` → requested style, empty when none
#[derive(Debug, Clone, Copy, Default)]
pub struct StyleTag;

impl Tag for StyleTag {
    fn label(&self) -> &str {
        ":style"
    }

    fn specialize(&self, context: &TagContext<'_>) -> String {
        context.style.unwrap_or_default().to_string()
    }
}

/// `:url` → the attachment's url for the requested style
#[derive(Debug, Clone, Copy, Default)]
pub struct UrlTag;

impl Tag for UrlTag {
    fn label(&self) -> &str {
        ":url"
    }

    fn specialize(&self, context: &TagContext<'_>) -> String {
        context.attachment.url(context.style)
    }
}

/// `:class` → pluralized owner type name, namespaces as directories
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassTag;

impl Tag for ClassTag {
    fn label(&self) -> &str {
        ":class"
    }

    fn specialize(&self, context: &TagContext<'_>) -> String {
        naming::table_name(&context.attachment.owner_class())
    }
}

/// `:class_name` → pluralized owner type name without namespace
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassNameTag;

impl Tag for ClassNameTag {
    fn label(&self) -> &str {
        ":class_name"
    }

    fn specialize(&self, context: &TagContext<'_>) -> String {
        naming::short_table_name(&context.attachment.owner_class())
    }
}

/// `:id` → owner's identifier
#[derive(Debug, Clone, Copy, Default)]
pub struct IdTag;

impl Tag for IdTag {
    fn label(&self) -> &str {
        ":id"
    }

    fn specialize(&self, context: &TagContext<'_>) -> String {
        context
            .attachment
            .owner_id()
            .map(|id| id.to_string())
            .unwrap_or_default()
    }
}

/// `:root` → application root
#[derive(Debug, Clone, Copy, Default)]
pub struct RootTag;

impl Tag for RootTag {
    fn label(&self) -> &str {
        ":root"
    }

    fn specialize(&self, _context: &TagContext<'_>) -> String {
        root_path()
    }
}

/// `:filename` → stored filename
#[derive(Debug, Clone, Copy, Default)]
pub struct FilenameTag;

impl Tag for FilenameTag {
    fn label(&self) -> &str {
        ":filename"
    }

    fn specialize(&self, context: &TagContext<'_>) -> String {
        context.attachment.filename().unwrap_or_default()
    }
}

/// `:basename` → stored filename without extension
#[derive(Debug, Clone, Copy, Default)]
pub struct BasenameTag;

impl Tag for BasenameTag {
    fn label(&self) -> &str {
        ":basename"
    }

    fn specialize(&self, context: &TagContext<'_>) -> String {
        let filename = context.attachment.filename().unwrap_or_default();
        split_extension(&filename).0.to_string()
    }
}

/// `:extension` → stored filename's extension, without the dot
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtensionTag;

impl Tag for ExtensionTag {
    fn label(&self) -> &str {
        ":extension"
    }

    fn specialize(&self, context: &TagContext<'_>) -> String {
        let filename = context.attachment.filename().unwrap_or_default();
        split_extension(&filename).1.to_string()
    }
}

/// Splits `me.png` into `("me", "png")`. A leading dot does not start an
/// extension and neither does a trailing one.
pub fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(dot) if dot > 0 && dot + 1 < filename.len() => {
            (&filename[..dot], &filename[dot + 1..])
        }
        _ => (filename, ""),
    }
}

/// Tags a pattern can recognize, in registration order
#[derive(Clone)]
pub struct TagRegistry {
    tags: Vec<Arc<dyn Tag>>,
}

impl TagRegistry {
    /// A registry without any tag
    pub fn empty() -> Self {
        Self { tags: Vec::new() }
    }

    /// Registers `tag`; it wins over earlier tags with the same label.
    pub fn register(&mut self, tag: impl Tag + 'static) -> &mut Self {
        self.tags.push(Arc::new(tag));
        self
    }

    pub fn with(mut self, tag: impl Tag + 'static) -> Self {
        self.register(tag);
        self
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.tags.iter().map(|tag| tag.label()).collect()
    }

    /// Longest label first; among equal lengths, latest registration first.
    fn resolution_order(&self) -> Vec<&dyn Tag> {
        let mut ordered: Vec<&dyn Tag> = self.tags.iter().rev().map(|tag| tag.as_ref()).collect();
        ordered.sort_by(|a, b| b.label().len().cmp(&a.label().len()));
        ordered
    }
}

impl Default for TagRegistry {
    /// The built-in tags
    fn default() -> Self {
        Self::empty()
            .with(AttachmentTag)
            .with(StyleTag)
            .with(UrlTag)
            .with(ClassTag)
            .with(ClassNameTag)
            .with(IdTag)
            .with(RootTag)
            .with(FilenameTag)
            .with(BasenameTag)
            .with(ExtensionTag)
    }
}

impl fmt::Debug for TagRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagRegistry")
            .field("labels", &self.labels())
            .finish()
    }
}

enum Segment {
    Literal(String),
    Resolved(String),
}

impl Segment {
    fn contains(&self, label: &str) -> bool {
        matches!(self, Segment::Literal(text) if text.contains(label))
    }

    fn substitute(self, label: &str, value: &str, out: &mut Vec<Segment>) {
        let text = match self {
            Segment::Literal(text) if text.contains(label) => text,
            other => {
                out.push(other);
                return;
            }
        };

        let mut parts = text.split(label);
        if let Some(first) = parts.next().filter(|part| !part.is_empty()) {
            out.push(Segment::Literal(first.to_string()));
        }
        for part in parts {
            out.push(Segment::Resolved(value.to_string()));
            if !part.is_empty() {
                out.push(Segment::Literal(part.to_string()));
            }
        }
    }

    fn into_string(self) -> String {
        match self {
            Segment::Literal(text) | Segment::Resolved(text) => text,
        }
    }
}

/// A string pattern bound to the tags it understands
#[derive(Debug, Clone)]
pub struct Pattern {
    string: String,
    tags: Arc<TagRegistry>,
}

impl Pattern {
    pub fn new(string: impl Into<String>, tags: Arc<TagRegistry>) -> Self {
        Self {
            string: string.into(),
            tags,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.string
    }

    /// Replaces every known tag label with its value for `context`.
    ///
    /// Only tags whose label appears in the pattern are asked to resolve,
    /// and each of them at most once.
    pub fn specialize(&self, context: &TagContext<'_>) -> String {
        let mut segments = vec![Segment::Literal(self.string.clone())];

        for tag in self.tags.resolution_order() {
            let label = tag.label();
            if label.is_empty() || !segments.iter().any(|segment| segment.contains(label)) {
                continue;
            }

            let value = tag.specialize(context);
            let mut next = Vec::with_capacity(segments.len() + 2);
            for segment in segments {
                segment.substitute(label, &value, &mut next);
            }
            segments = next;
        }

        segments.into_iter().map(Segment::into_string).collect()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string)
    }
}
