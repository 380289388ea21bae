//! Attachment settings and loading
//!
//! Plain data describing how attachments behave when nothing else is said.
//! The attachments crate turns these into its process-wide defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

pub const DEFAULT_STYLE: &str = "original";
pub const DEFAULT_URL: &str = "/images/missing.png";
pub const URL: &str = "/system/attachments/:class_name/:id/:attachment/:filename";
pub const PATH: &str = ":root/public:url";

/// Attachment settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AttachmentSettings {
    /// Style assumed by `url` and `path` when none is given
    pub default_style: String,
    /// Style name -> rendition definition (e.g. `100x100#`)
    pub styles: BTreeMap<String, String>,
    /// Template for the url of an empty attachment
    pub default_url: String,
    /// Template for the url of a populated attachment
    pub url: String,
    /// Template for the storage path
    pub path: String,
    /// Application root substituted for `:root`
    pub root: Option<String>,
}

impl Default for AttachmentSettings {
    fn default() -> Self {
        Self {
            default_style: DEFAULT_STYLE.to_string(),
            styles: BTreeMap::new(),
            default_url: DEFAULT_URL.to_string(),
            url: URL.to_string(),
            path: PATH.to_string(),
            root: None,
        }
    }
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl AttachmentSettings {
    /// Load settings from environment variables over the factory defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings from any key lookup over the factory defaults.
    ///
    /// Styles are given as `name=definition` pairs separated by `,`,
    /// e.g. `TACK_STYLES="small=50x50#,normal=100x100"`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(style) = lookup("TACK_DEFAULT_STYLE") {
            if style.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "TACK_DEFAULT_STYLE".to_string(),
                    message: "must not be blank".to_string(),
                });
            }
            settings.default_style = style;
        }
        if let Some(styles) = lookup("TACK_STYLES") {
            settings.styles = parse_styles(&styles)?;
        }
        if let Some(default_url) = lookup("TACK_DEFAULT_URL") {
            settings.default_url = default_url;
        }
        if let Some(url) = lookup("TACK_URL") {
            settings.url = url;
        }
        if let Some(path) = lookup("TACK_PATH") {
            settings.path = path;
        }
        if let Some(root) = lookup("TACK_ROOT") {
            settings.root = Some(root);
        }

        debug!(styles = settings.styles.len(), "Attachment settings loaded");
        Ok(settings)
    }
}

fn parse_styles(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((name, definition)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), definition.trim().to_string()))
            }
            _ => Err(ConfigError::InvalidValue {
                key: "TACK_STYLES".to_string(),
                message: format!("expected name=definition, got {:?}", pair),
            }),
        })
        .collect()
}
