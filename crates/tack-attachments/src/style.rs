//! Style definitions
//!
//! A style definition is parsed once, when an attachment is configured, into
//! one of two rendition strategies: a plain resize following a geometry, or
//! a crop to exact dimensions (definitions ending in `#`).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// `W`, `xH`, `WxH`, each optionally followed by one flag
static BOX_GEOMETRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)?(?:x(\d+))?([!<>^])?$").unwrap());

/// `N%`
static SCALE_GEOMETRY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)%$").unwrap());

/// `WxH#`
static CROP_GEOMETRY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)x(\d+)#$").unwrap());

/// Marker closing a crop definition
pub const CROP_MARKER: char = '#';

/// Style name -> parsed definition
pub type Styles = BTreeMap<String, StyleDefinition>;

/// Style errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StyleError {
    #[error("Invalid style definition for {style}: {definition:?}")]
    InvalidDefinition { style: String, definition: String },
    #[error("Style name must not be blank")]
    BlankName,
}

/// Modifier closing a box geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryFlag {
    /// `!` ignore the aspect ratio
    Exact,
    /// `>` only shrink larger images
    ShrinkOnly,
    /// `<` only enlarge smaller images
    EnlargeOnly,
    /// `^` cover the box instead of fitting in it
    Cover,
}

impl GeometryFlag {
    fn from_char(c: char) -> Option<Self> {
        match c {
            '!' => Some(Self::Exact),
            '>' => Some(Self::ShrinkOnly),
            '<' => Some(Self::EnlargeOnly),
            '^' => Some(Self::Cover),
            _ => None,
        }
    }

    pub fn as_char(&self) -> char {
        match self {
            Self::Exact => '!',
            Self::ShrinkOnly => '>',
            Self::EnlargeOnly => '<',
            Self::Cover => '^',
        }
    }
}

/// Resize geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    /// Scale both sides by a percentage
    Scale(u32),
    /// Fit (or cover) a box; a missing side follows the aspect ratio
    Box {
        width: Option<u32>,
        height: Option<u32>,
        flag: Option<GeometryFlag>,
    },
}

impl Geometry {
    /// Target dimensions for an image of `width` x `height`.
    pub fn apply_to(&self, width: u32, height: u32) -> (u32, u32) {
        if width == 0 || height == 0 {
            return (width, height);
        }

        let (w, h) = (f64::from(width), f64::from(height));
        let ratio = match *self {
            Geometry::Scale(percent) => f64::from(percent) / 100.0,
            Geometry::Box {
                width: target_w,
                height: target_h,
                flag: Some(GeometryFlag::Exact),
            } => {
                return (target_w.unwrap_or(width), target_h.unwrap_or(height));
            }
            Geometry::Box {
                width: target_w,
                height: target_h,
                flag,
            } => {
                let ratio = match (target_w, target_h) {
                    (Some(tw), Some(th)) => {
                        let (rw, rh) = (f64::from(tw) / w, f64::from(th) / h);
                        if flag == Some(GeometryFlag::Cover) {
                            rw.max(rh)
                        } else {
                            rw.min(rh)
                        }
                    }
                    (Some(tw), None) => f64::from(tw) / w,
                    (None, Some(th)) => f64::from(th) / h,
                    (None, None) => 1.0,
                };
                match flag {
                    Some(GeometryFlag::ShrinkOnly) if ratio >= 1.0 => 1.0,
                    Some(GeometryFlag::EnlargeOnly) if ratio <= 1.0 => 1.0,
                    _ => ratio,
                }
            }
        };

        (scaled(w, ratio), scaled(h, ratio))
    }
}

fn scaled(side: f64, ratio: f64) -> u32 {
    ((side * ratio).round() as u32).max(1)
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Geometry::Scale(percent) => write!(f, "{}%", percent),
            Geometry::Box {
                width,
                height,
                flag,
            } => {
                if let Some(width) = width {
                    write!(f, "{}", width)?;
                }
                if let Some(height) = height {
                    write!(f, "x{}", height)?;
                }
                if let Some(flag) = flag {
                    write!(f, "{}", flag.as_char())?;
                }
                Ok(())
            }
        }
    }
}

/// How one style is generated from the source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleDefinition {
    /// Plain resize following the geometry
    Resize(Geometry),
    /// Resize to cover, then crop the centre to exactly `width` x `height`
    /// on a transparent background
    Crop { width: u32, height: u32 },
}

impl StyleDefinition {
    /// Parses `definition` for the style called `style`.
    pub fn parse(style: &str, definition: &str) -> Result<Self, StyleError> {
        if style.trim().is_empty() {
            return Err(StyleError::BlankName);
        }
        let invalid = || StyleError::InvalidDefinition {
            style: style.to_string(),
            definition: definition.to_string(),
        };
        let definition = definition.trim();

        if definition.ends_with(CROP_MARKER) {
            let caps = CROP_GEOMETRY.captures(definition).ok_or_else(invalid)?;
            let width = positive(&caps[1]).ok_or_else(invalid)?;
            let height = positive(&caps[2]).ok_or_else(invalid)?;
            return Ok(Self::Crop { width, height });
        }

        if let Some(caps) = SCALE_GEOMETRY.captures(definition) {
            let percent = positive(&caps[1]).ok_or_else(invalid)?;
            return Ok(Self::Resize(Geometry::Scale(percent)));
        }

        let caps = BOX_GEOMETRY.captures(definition).ok_or_else(invalid)?;
        let width = caps.get(1).map(|m| positive(m.as_str()).ok_or_else(invalid)).transpose()?;
        let height = caps.get(2).map(|m| positive(m.as_str()).ok_or_else(invalid)).transpose()?;
        if width.is_none() && height.is_none() {
            return Err(invalid());
        }
        let flag = caps
            .get(3)
            .and_then(|m| m.as_str().chars().next())
            .and_then(GeometryFlag::from_char);

        Ok(Self::Resize(Geometry::Box {
            width,
            height,
            flag,
        }))
    }

    /// Parses every `(name, definition)` pair.
    pub fn parse_all<'a, I>(definitions: I) -> Result<Styles, StyleError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        definitions
            .into_iter()
            .map(|(name, definition)| Ok((name.clone(), Self::parse(name, definition)?)))
            .collect()
    }

    pub fn is_crop(&self) -> bool {
        matches!(self, Self::Crop { .. })
    }
}

impl FromStr for StyleDefinition {
    type Err = StyleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse("style", s)
    }
}

impl fmt::Display for StyleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resize(geometry) => write!(f, "{}", geometry),
            Self::Crop { width, height } => write!(f, "{}x{}{}", width, height, CROP_MARKER),
        }
    }
}

fn positive(digits: &str) -> Option<u32> {
    digits.parse().ok().filter(|n| *n > 0)
}
