//! Document loading.
//!
//! Parsing rich formats (PDF, HTML) is left to external tools; the pipeline
//! only needs a [`DocumentLoader`] that turns a file into page-level
//! [`Document`]s. [`TextLoader`] handles plain-text exports, treating form
//! feeds (as written by `pdftotext`) as page breaks.

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::document::{Document, SOURCE_PATH_KEY};
use crate::error::{RagError, Result};

/// Turns a file into one [`Document`] per page.
pub trait DocumentLoader: Send + Sync {
    /// Whether this loader handles `path`, judged by its extension.
    fn supports(&self, path: &Path) -> bool;

    /// Load a single file.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::NotFound`] if the file does not exist and
    /// [`RagError::LoaderError`] if it cannot be read.
    fn load(&self, path: &Path) -> Result<Vec<Document>>;
}

/// Loads UTF-8 text files, splitting pages on form feed characters.
///
/// Each page becomes a [`Document`] with `source` set to the file name,
/// `page` to its 1-based number and `source_path` to the full path. Blank
/// pages are kept so that page numbers stay aligned with the original.
#[derive(Debug, Clone)]
pub struct TextLoader {
    extensions: Vec<String>,
}

impl Default for TextLoader {
    fn default() -> Self {
        Self { extensions: vec!["txt".to_string(), "md".to_string()] }
    }
}

impl TextLoader {
    /// Create a loader for `.txt` and `.md` files.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the accepted file extensions (without the leading dot).
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(|e| e.into().to_lowercase()).collect();
        self
    }
}

impl DocumentLoader for TextLoader {
    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    fn load(&self, path: &Path) -> Result<Vec<Document>> {
        if !path.exists() {
            return Err(RagError::NotFound(path.to_path_buf()));
        }

        let text = fs::read_to_string(path).map_err(|e| RagError::LoaderError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let source = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let source_path = path.display().to_string();

        Ok(text
            .split('\u{c}')
            .enumerate()
            .map(|(i, page)| {
                Document::new(page, source.clone(), i as u32 + 1)
                    .with_metadata(SOURCE_PATH_KEY, source_path.clone())
            })
            .collect())
    }
}

/// List the files under `root` that `loader` supports, sorted by path.
///
/// # Errors
///
/// Returns [`RagError::NotFound`] if `root` does not exist and
/// [`RagError::LoaderError`] if it is not a directory.
pub fn discover_files(root: &Path, loader: &dyn DocumentLoader) -> Result<Vec<PathBuf>> {
    if !root.exists() {
        return Err(RagError::NotFound(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(RagError::LoaderError {
            path: root.to_path_buf(),
            message: "not a directory".to_string(),
        });
    }

    let mut files = WalkDir::new(root)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| loader.supports(entry.path()))
        .map(|entry| entry.into_path())
        .collect::<Vec<_>>();

    files.sort();
    Ok(files)
}

/// Load every supported file under `root`, in path order.
pub fn load_directory(root: &Path, loader: &dyn DocumentLoader) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for path in discover_files(root, loader)? {
        documents.extend(loader.load(&path)?);
    }
    Ok(documents)
}
