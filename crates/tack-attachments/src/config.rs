//! Attachment configuration
//!
//! Three layers, merged once when an attachment is built:
//!
//! 1. factory defaults (see [`AttachmentSettings::default`]),
//! 2. process-wide [`AttachmentDefaults`], changed through [`configure`],
//! 3. per-attachment [`AttachmentOptions`].
//!
//! The result is an immutable [`AttachmentConfig`]; later changes to the
//! process-wide defaults do not reach attachments that already exist.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tack_core::AttachmentSettings;
use tracing::debug;

use crate::pattern::{set_root_path, Pattern, TagRegistry};
use crate::processor::{Processor, ThumbnailProcessor};
use crate::storage::{FilesystemBackend, StorageBackend};
use crate::style::{StyleDefinition, StyleError, Styles};

/// Style that always exists, holding the stored source
pub const ORIGINAL_STYLE: &str = "original";

/// Builds a fresh storage backend for each attachment
pub type StorageFactory = Arc<dyn Fn() -> Box<dyn StorageBackend> + Send + Sync>;

/// Builds a fresh processor for each attachment
pub type ProcessorFactory = Arc<dyn Fn() -> Box<dyn Processor> + Send + Sync>;

static DEFAULTS: RwLock<Option<AttachmentDefaults>> = parking_lot::const_rwlock(None);

/// Process-wide attachment defaults
#[derive(Clone)]
pub struct AttachmentDefaults {
    pub default_style: String,
    pub styles: BTreeMap<String, String>,
    pub default_url: String,
    pub url: String,
    pub path: String,
    pub storage: StorageFactory,
    pub processor: ProcessorFactory,
    pub tags: Arc<TagRegistry>,
}

impl Default for AttachmentDefaults {
    fn default() -> Self {
        Self::from_settings(&AttachmentSettings::default())
    }
}

impl AttachmentDefaults {
    /// Defaults described by `settings`, with filesystem storage and thumbnails.
    pub fn from_settings(settings: &AttachmentSettings) -> Self {
        Self {
            default_style: settings.default_style.clone(),
            styles: settings.styles.clone(),
            default_url: settings.default_url.clone(),
            url: settings.url.clone(),
            path: settings.path.clone(),
            storage: Arc::new(|| Box::new(FilesystemBackend::new()) as Box<dyn StorageBackend>),
            processor: Arc::new(|| Box::new(ThumbnailProcessor::new()) as Box<dyn Processor>),
            tags: Arc::new(TagRegistry::default()),
        }
    }
}

impl fmt::Debug for AttachmentDefaults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentDefaults")
            .field("default_style", &self.default_style)
            .field("styles", &self.styles)
            .field("default_url", &self.default_url)
            .field("url", &self.url)
            .field("path", &self.path)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Current process-wide defaults
pub fn defaults() -> AttachmentDefaults {
    DEFAULTS.read().clone().unwrap_or_default()
}

/// Changes the process-wide defaults for attachments built from now on.
pub fn configure<F>(f: F)
where
    F: FnOnce(&mut AttachmentDefaults),
{
    let mut guard = DEFAULTS.write();
    let defaults = guard.get_or_insert_with(AttachmentDefaults::default);
    f(defaults);
}

/// Goes back to the factory defaults.
pub fn reset_defaults() {
    *DEFAULTS.write() = None;
}

/// Installs `settings` as the process-wide defaults, root path included.
pub fn apply_settings(settings: &AttachmentSettings) {
    if let Some(root) = &settings.root {
        set_root_path(root.clone());
    }
    configure(|defaults| {
        let storage = defaults.storage.clone();
        let processor = defaults.processor.clone();
        let tags = defaults.tags.clone();
        *defaults = AttachmentDefaults {
            storage,
            processor,
            tags,
            ..AttachmentDefaults::from_settings(settings)
        };
    });
    debug!(styles = settings.styles.len(), "Attachment defaults applied");
}

/// Per-attachment overrides; anything left unset comes from the defaults
#[derive(Clone, Default)]
pub struct AttachmentOptions {
    default_style: Option<String>,
    styles: Option<BTreeMap<String, String>>,
    default_url: Option<String>,
    url: Option<String>,
    path: Option<String>,
    storage: Option<StorageFactory>,
    processor: Option<ProcessorFactory>,
    tags: Option<Arc<TagRegistry>>,
}

impl AttachmentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_style(mut self, style: impl Into<String>) -> Self {
        self.default_style = Some(style.into());
        self
    }

    /// Adds one style; any styles given here replace the default set.
    pub fn style(mut self, name: impl Into<String>, definition: impl Into<String>) -> Self {
        self.styles
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), definition.into());
        self
    }

    pub fn styles<I, K, V>(mut self, styles: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.styles = Some(
            styles
                .into_iter()
                .map(|(name, definition)| (name.into(), definition.into()))
                .collect(),
        );
        self
    }

    pub fn default_url(mut self, template: impl Into<String>) -> Self {
        self.default_url = Some(template.into());
        self
    }

    pub fn url(mut self, template: impl Into<String>) -> Self {
        self.url = Some(template.into());
        self
    }

    pub fn path(mut self, template: impl Into<String>) -> Self {
        self.path = Some(template.into());
        self
    }

    pub fn storage<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn StorageBackend> + Send + Sync + 'static,
    {
        self.storage = Some(Arc::new(factory));
        self
    }

    pub fn processor<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Processor> + Send + Sync + 'static,
    {
        self.processor = Some(Arc::new(factory));
        self
    }

    pub fn tags(mut self, tags: TagRegistry) -> Self {
        self.tags = Some(Arc::new(tags));
        self
    }
}

impl fmt::Debug for AttachmentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentOptions")
            .field("default_style", &self.default_style)
            .field("styles", &self.styles)
            .field("default_url", &self.default_url)
            .field("url", &self.url)
            .field("path", &self.path)
            .field("storage", &self.storage.is_some())
            .field("processor", &self.processor.is_some())
            .finish_non_exhaustive()
    }
}

/// Resolved, immutable configuration of one attachment
#[derive(Clone)]
pub struct AttachmentConfig {
    default_style: String,
    styles: Styles,
    default_url: Pattern,
    url: Pattern,
    path: Pattern,
    storage: StorageFactory,
    processor: ProcessorFactory,
}

impl AttachmentConfig {
    /// Merges `options` over the current process-wide defaults.
    pub fn resolve(options: &AttachmentOptions) -> Result<Self, StyleError> {
        Self::resolve_with(&defaults(), options)
    }

    /// Merges `options` over `defaults`, parsing every style definition.
    pub fn resolve_with(
        defaults: &AttachmentDefaults,
        options: &AttachmentOptions,
    ) -> Result<Self, StyleError> {
        let default_style = options
            .default_style
            .clone()
            .unwrap_or_else(|| defaults.default_style.clone());
        if default_style.trim().is_empty() {
            return Err(StyleError::BlankName);
        }

        let styles = StyleDefinition::parse_all(options.styles.as_ref().unwrap_or(&defaults.styles))?;
        let tags = options.tags.clone().unwrap_or_else(|| defaults.tags.clone());
        let pattern = |given: &Option<String>, fallback: &String| {
            Pattern::new(given.as_ref().unwrap_or(fallback).clone(), tags.clone())
        };

        Ok(Self {
            default_url: pattern(&options.default_url, &defaults.default_url),
            url: pattern(&options.url, &defaults.url),
            path: pattern(&options.path, &defaults.path),
            default_style,
            styles,
            storage: options.storage.clone().unwrap_or_else(|| defaults.storage.clone()),
            processor: options
                .processor
                .clone()
                .unwrap_or_else(|| defaults.processor.clone()),
        })
    }

    pub fn default_style(&self) -> &str {
        &self.default_style
    }

    pub fn styles(&self) -> &Styles {
        &self.styles
    }

    pub fn default_url(&self) -> &Pattern {
        &self.default_url
    }

    pub fn url(&self) -> &Pattern {
        &self.url
    }

    pub fn path(&self) -> &Pattern {
        &self.path
    }

    /// `original` followed by every configured style, without repeats
    pub fn style_names(&self) -> Vec<&str> {
        let mut names = vec![ORIGINAL_STYLE];
        names.extend(
            self.styles
                .keys()
                .map(String::as_str)
                .filter(|name| *name != ORIGINAL_STYLE),
        );
        names
    }

    pub fn build_storage(&self) -> Box<dyn StorageBackend> {
        (self.storage)()
    }

    pub fn build_processor(&self) -> Box<dyn Processor> {
        (self.processor)()
    }
}

impl fmt::Debug for AttachmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachmentConfig")
            .field("default_style", &self.default_style)
            .field("styles", &self.styles)
            .field("default_url", &self.default_url)
            .field("url", &self.url)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{clear_root_path, root_path};
    use crate::storage::MemoryBackend;
    use serial_test::serial;

    #[test]
    fn test_factory_defaults() {
        let config = AttachmentConfig::resolve_with(
            &AttachmentDefaults::default(),
            &AttachmentOptions::new(),
        )
        .unwrap();
        assert_eq!(config.default_style(), "original");
        assert!(config.styles().is_empty());
        assert_eq!(config.default_url().as_str(), "/images/missing.png");
        assert_eq!(
            config.url().as_str(),
            "/system/attachments/:class_name/:id/:attachment/:filename"
        );
        assert_eq!(config.path().as_str(), ":root/public:url");
        assert_eq!(config.build_storage().name(), "filesystem");
        assert!(config.build_processor().processed_files().is_empty());
    }

    #[test]
    fn test_options_override_defaults() {
        let options = AttachmentOptions::new()
            .default_style("normal")
            .style("normal", "100x100")
            .style("small", "50x50#")
            .path("/:class_name/:id/:style/:filename")
            .storage(|| Box::new(MemoryBackend::new()));
        let config =
            AttachmentConfig::resolve_with(&AttachmentDefaults::default(), &options).unwrap();

        assert_eq!(config.default_style(), "normal");
        assert_eq!(config.styles().len(), 2);
        assert!(config.styles()["small"].is_crop());
        assert_eq!(config.path().as_str(), "/:class_name/:id/:style/:filename");
        assert_eq!(
            config.url().as_str(),
            "/system/attachments/:class_name/:id/:attachment/:filename"
        );
        assert_eq!(config.build_storage().name(), "memory");
    }

    #[test]
    fn test_option_styles_replace_default_styles() {
        let mut defaults = AttachmentDefaults::default();
        defaults.styles.insert("thumb".to_string(), "64x64#".to_string());

        let inherited = AttachmentConfig::resolve_with(&defaults, &AttachmentOptions::new()).unwrap();
        assert_eq!(inherited.style_names(), vec!["original", "thumb"]);

        let replaced = AttachmentConfig::resolve_with(
            &defaults,
            &AttachmentOptions::new().styles([("normal", "100x100")]),
        )
        .unwrap();
        assert_eq!(replaced.style_names(), vec!["original", "normal"]);
    }

    #[test]
    fn test_style_names_deduplicate_original() {
        let options = AttachmentOptions::new()
            .style("original", "500x500>")
            .style("small", "10x10");
        let config =
            AttachmentConfig::resolve_with(&AttachmentDefaults::default(), &options).unwrap();
        assert_eq!(config.style_names(), vec!["original", "small"]);
    }

    #[test]
    fn test_malformed_style_fails_at_resolve() {
        let options = AttachmentOptions::new().style("broken", "big#");
        let result = AttachmentConfig::resolve_with(&AttachmentDefaults::default(), &options);
        assert!(matches!(result, Err(StyleError::InvalidDefinition { .. })));

        let options = AttachmentOptions::new().default_style("");
        let result = AttachmentConfig::resolve_with(&AttachmentDefaults::default(), &options);
        assert_eq!(result.err(), Some(StyleError::BlankName));
    }

    #[test]
    #[serial]
    fn test_configure_and_reset_defaults() {
        reset_defaults();
        configure(|defaults| defaults.default_url = "/missing/:style.png".to_string());

        let config = AttachmentConfig::resolve(&AttachmentOptions::new()).unwrap();
        assert_eq!(config.default_url().as_str(), "/missing/:style.png");

        reset_defaults();
        let config = AttachmentConfig::resolve(&AttachmentOptions::new()).unwrap();
        assert_eq!(config.default_url().as_str(), "/images/missing.png");
    }

    #[test]
    #[serial]
    fn test_resolved_config_ignores_later_changes() {
        reset_defaults();
        let config = AttachmentConfig::resolve(&AttachmentOptions::new()).unwrap();
        configure(|defaults| defaults.path = "/elsewhere/:filename".to_string());

        assert_eq!(config.path().as_str(), ":root/public:url");
        assert_eq!(defaults().path, "/elsewhere/:filename");
        reset_defaults();
    }

    #[test]
    #[serial]
    fn test_apply_settings() {
        reset_defaults();
        clear_root_path();

        let mut settings = AttachmentSettings::default();
        settings.styles.insert("small".to_string(), "50x50#".to_string());
        settings.root = Some("/srv/app".to_string());
        apply_settings(&settings);

        assert_eq!(root_path(), "/srv/app");
        let config = AttachmentConfig::resolve(&AttachmentOptions::new()).unwrap();
        assert_eq!(config.style_names(), vec!["original", "small"]);

        reset_defaults();
        clear_root_path();
    }
}
