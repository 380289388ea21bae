//! Rendition generation
//!
//! A [`Processor`] turns one source file into one derived file per style.
//! Every call replaces the previous rendition set.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::style::{StyleDefinition, Styles};

/// Processor errors
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unrecognized image format: {0}")]
    UnknownFormat(PathBuf),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Invalid source path: {0}")]
    InvalidSource(PathBuf),
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Style name -> generated file
pub type Renditions = BTreeMap<String, PathBuf>;

/// Produces named renditions of a source file
pub trait Processor: Send {
    /// Generate one file per style from `source`, replacing any previous set.
    fn process(&mut self, source: &Path, styles: &Styles) -> ProcessorResult<()>;

    /// Files produced by the last successful `process` call
    fn processed_files(&self) -> &Renditions;
}

/// Image thumbnailer backed by the `image` crate
///
/// Renditions are written as `<style>-<file name>` into a scratch directory
/// owned by the processor, in the format detected from the source's contents.
/// The directory lives until the next `process` call or until the processor
/// is dropped.
#[derive(Debug)]
pub struct ThumbnailProcessor {
    filter: FilterType,
    workdir: Option<TempDir>,
    processed_files: Renditions,
}

impl Default for ThumbnailProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ThumbnailProcessor {
    pub fn new() -> Self {
        Self::with_filter(FilterType::Lanczos3)
    }

    pub fn with_filter(filter: FilterType) -> Self {
        Self {
            filter,
            workdir: None,
            processed_files: Renditions::new(),
        }
    }

    /// Scratch directory holding the current renditions
    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_ref().map(TempDir::path)
    }

    fn scratch_dir() -> ProcessorResult<TempDir> {
        tempfile::Builder::new()
            .prefix("tack-")
            .tempdir()
            .map_err(|e| ProcessorError::Io {
                path: std::env::temp_dir(),
                source: e,
            })
    }

    fn load(source: &Path) -> ProcessorResult<(DynamicImage, ImageFormat)> {
        let io_error = |e| ProcessorError::Io {
            path: source.to_path_buf(),
            source: e,
        };
        let reader = ImageReader::open(source)
            .map_err(io_error)?
            .with_guessed_format()
            .map_err(io_error)?;
        let format = reader
            .format()
            .ok_or_else(|| ProcessorError::UnknownFormat(source.to_path_buf()))?;
        Ok((reader.decode()?, format))
    }

    fn render(&self, image: &DynamicImage, definition: &StyleDefinition) -> DynamicImage {
        match *definition {
            StyleDefinition::Resize(geometry) => {
                let (width, height) = geometry.apply_to(image.width(), image.height());
                if (width, height) == (image.width(), image.height()) {
                    image.clone()
                } else {
                    image.resize_exact(width, height, self.filter)
                }
            }
            StyleDefinition::Crop { width, height } => image.resize_to_fill(width, height, self.filter),
        }
    }
}

/// `<dir>/<style>-<file name of source>`
pub fn rendition_path(dir: &Path, source: &Path, style: &str) -> Option<PathBuf> {
    let file_name = source.file_name()?.to_str()?;
    Some(dir.join(format!("{}-{}", style, file_name)))
}

impl Processor for ThumbnailProcessor {
    #[instrument(skip(self, styles), fields(source = ?source, styles = styles.len()))]
    fn process(&mut self, source: &Path, styles: &Styles) -> ProcessorResult<()> {
        self.processed_files.clear();
        self.workdir = None;
        if styles.is_empty() {
            return Ok(());
        }

        let (image, format) = Self::load(source)?;
        let workdir = Self::scratch_dir()?;
        let mut renditions = Renditions::new();
        for (style, definition) in styles {
            let destination = rendition_path(workdir.path(), source, style)
                .ok_or_else(|| ProcessorError::InvalidSource(source.to_path_buf()))?;
            self.render(&image, definition)
                .save_with_format(&destination, format)?;
            debug!(style = %style, destination = ?destination, "Rendition generated");
            renditions.insert(style.clone(), destination);
        }

        self.workdir = Some(workdir);
        self.processed_files = renditions;
        Ok(())
    }

    fn processed_files(&self) -> &Renditions {
        &self.processed_files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn styles(definitions: &[(&str, &str)]) -> Styles {
        definitions
            .iter()
            .map(|(name, definition)| {
                (
                    name.to_string(),
                    StyleDefinition::parse(name, definition).unwrap(),
                )
            })
            .collect()
    }

    fn png(dir: &TempDir, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join(name);
        RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    fn dimensions(path: &Path) -> (u32, u32) {
        image::open(path).unwrap().dimensions()
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_rendition_path() {
        let scratch = Path::new("/tmp/tack-scratch");
        assert_eq!(
            rendition_path(scratch, Path::new("/tmp/upload/me.png"), "small"),
            Some(PathBuf::from("/tmp/tack-scratch/small-me.png"))
        );
        assert_eq!(rendition_path(scratch, Path::new("/"), "small"), None);
    }

    #[test]
    fn test_process_generates_each_style() {
        let dir = TempDir::new().unwrap();
        let source = png(&dir, "me.png", 200, 100);

        let mut processor = ThumbnailProcessor::new();
        processor
            .process(&source, &styles(&[("normal", "100x100"), ("small", "50x50#")]))
            .unwrap();

        let workdir = processor.workdir().unwrap();
        let files = processor.processed_files();
        assert_eq!(files.len(), 2);
        assert_eq!(files["normal"], workdir.join("normal-me.png"));
        assert_eq!(dimensions(&files["normal"]), (100, 50));
        assert_eq!(dimensions(&files["small"]), (50, 50));
    }

    #[test]
    fn test_process_detects_format_from_contents() {
        let dir = TempDir::new().unwrap();
        let source = png(&dir, "upload.tmp", 20, 20);

        let mut processor = ThumbnailProcessor::with_filter(FilterType::Nearest);
        processor.process(&source, &styles(&[("half", "50%")])).unwrap();

        let generated = &processor.processed_files()["half"];
        assert_eq!(generated.file_name().unwrap(), "half-upload.tmp");
        assert_eq!(dimensions(generated), (10, 10));
    }

    #[test]
    fn test_process_replaces_previous_set() {
        let dir = TempDir::new().unwrap();
        let first = png(&dir, "first.png", 40, 40);
        let second = png(&dir, "second.png", 40, 40);

        let mut processor = ThumbnailProcessor::new();
        processor
            .process(&first, &styles(&[("normal", "20x20"), ("small", "10x10")]))
            .unwrap();
        let previous = processor.processed_files().clone();
        let previous_dir = processor.workdir().unwrap().to_path_buf();
        processor.process(&second, &styles(&[("tiny", "5x5")])).unwrap();

        let files = processor.processed_files();
        assert_eq!(files.len(), 1);
        assert_eq!(files["tiny"].file_name().unwrap(), "tiny-second.png");
        assert!(files["tiny"].exists());
        assert!(previous.values().all(|path| !path.exists()));
        assert!(!previous_dir.exists());
    }

    #[test]
    fn test_process_leaves_source_directory_untouched() {
        let dir = TempDir::new().unwrap();
        let source = png(&dir, "me.png", 40, 40);

        let mut processor = ThumbnailProcessor::new();
        processor
            .process(&source, &styles(&[("normal", "20x20"), ("small", "10x10#")]))
            .unwrap();

        assert_eq!(entries(dir.path()), vec!["me.png".to_string()]);
        let workdir = processor.workdir().unwrap().to_path_buf();
        assert!(!workdir.starts_with(dir.path()));
        assert_eq!(
            entries(&workdir),
            vec!["normal-me.png".to_string(), "small-me.png".to_string()]
        );

        drop(processor);
        assert!(!workdir.exists());
    }

    #[test]
    fn test_process_without_styles_reads_nothing() {
        let mut processor = ThumbnailProcessor::new();
        processor
            .process(Path::new("/does/not/exist.png"), &Styles::new())
            .unwrap();
        assert!(processor.processed_files().is_empty());
        assert!(processor.workdir().is_none());
    }

    #[test]
    fn test_process_rejects_non_image() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("notes.txt");
        std::fs::write(&source, b"plain text").unwrap();

        let mut processor = ThumbnailProcessor::new();
        let result = processor.process(&source, &styles(&[("small", "10x10")]));
        assert!(result.is_err());
        assert!(processor.processed_files().is_empty());
    }

    #[test]
    fn test_process_missing_source() {
        let dir = TempDir::new().unwrap();
        let mut processor = ThumbnailProcessor::new();
        let result = processor.process(&dir.path().join("gone.png"), &styles(&[("small", "10x10")]));
        assert!(matches!(result, Err(ProcessorError::Io { .. })));
    }
}
