//! Source files handed to `assign`
//!
//! Whatever the caller has (a local path, a decoded multipart body, an upload
//! object) is adapted into a [`FileToAttach`]: a display name plus a readable
//! local path.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;

/// Source adaptation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("Don't know how to attach a {0}")]
    UnknownRepresentation(String),
}

/// Everything `FileToAttach::new` knows how to adapt
#[derive(Debug, Clone, PartialEq)]
pub enum FileRepresentation {
    /// A file already on local disk
    LocalFile(PathBuf),
    /// A multipart form value carrying `filename` and `tempfile` keys
    Multipart(Map<String, Value>),
    /// An upload object exposing the original name and its spooled tempfile
    Upload {
        original_filename: Option<String>,
        tempfile: Option<PathBuf>,
    },
}

impl FileRepresentation {
    fn kind(&self) -> &'static str {
        match self {
            Self::LocalFile(_) => "local file",
            Self::Multipart(_) => "multipart value",
            Self::Upload { .. } => "upload",
        }
    }
}

impl From<PathBuf> for FileRepresentation {
    fn from(path: PathBuf) -> Self {
        Self::LocalFile(path)
    }
}

impl From<&Path> for FileRepresentation {
    fn from(path: &Path) -> Self {
        Self::LocalFile(path.to_path_buf())
    }
}

type Adapter = fn(&FileRepresentation) -> Option<FileToAttach>;

/// Tried in order; the first one that recognizes the value wins.
const ADAPTERS: [Adapter; 3] = [from_multipart, from_upload, from_local_file];

/// A source file ready to be attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileToAttach {
    original_filename: String,
    path: PathBuf,
}

impl FileToAttach {
    /// Adapt `representation`, failing before any attachment state changes.
    pub fn new(representation: impl Into<FileRepresentation>) -> Result<Self, SourceError> {
        let representation = representation.into();
        ADAPTERS
            .iter()
            .find_map(|adapter| adapter(&representation))
            .ok_or_else(|| SourceError::UnknownRepresentation(representation.kind().to_string()))
    }

    /// Build directly from a display name and a path
    pub fn from_parts(original_filename: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            original_filename: original_filename.into(),
            path: path.into(),
        }
    }

    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn from_multipart(representation: &FileRepresentation) -> Option<FileToAttach> {
    let FileRepresentation::Multipart(fields) = representation else {
        return None;
    };
    let filename = fields.get("filename")?.as_str()?;
    let tempfile = fields.get("tempfile")?.as_str()?;
    Some(FileToAttach::from_parts(filename, tempfile))
}

fn from_upload(representation: &FileRepresentation) -> Option<FileToAttach> {
    match representation {
        FileRepresentation::Upload {
            original_filename: Some(name),
            tempfile: Some(path),
        } => Some(FileToAttach::from_parts(name.as_str(), path.as_path())),
        _ => None,
    }
}

fn from_local_file(representation: &FileRepresentation) -> Option<FileToAttach> {
    let FileRepresentation::LocalFile(path) = representation else {
        return None;
    };
    let name = path.file_name()?.to_string_lossy().into_owned();
    Some(FileToAttach::from_parts(name, path.as_path()))
}
