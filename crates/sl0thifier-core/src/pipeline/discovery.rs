//! Input enumeration: turn a file or directory argument into source images.

use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use crate::config::ProcessingConfig;

/// A source image found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Size in bytes at discovery time
    pub size: u64,
}

/// Finds supported images under an input path.
///
/// Directories are listed one level deep unless `processing.recursive` is
/// set. Hidden entries (dot-files such as macOS `._` resource forks) and
/// unsupported extensions are left out without a diagnostic. Results are
/// sorted by path so batches are reproducible.
pub struct FileDiscovery {
    config: ProcessingConfig,
}

impl FileDiscovery {
    pub fn new(config: ProcessingConfig) -> Self {
        Self { config }
    }

    pub fn discover(&self, input: &Path) -> Vec<DiscoveredFile> {
        if input.is_file() {
            return self.describe(input).into_iter().collect();
        }

        let depth = if self.config.recursive { usize::MAX } else { 1 };
        let mut files: Vec<DiscoveredFile> = WalkDir::new(input)
            .follow_links(true)
            .max_depth(depth)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| self.describe(entry.path()))
            .collect();

        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::debug!("Discovered {} image(s) under {:?}", files.len(), input);
        files
    }

    fn describe(&self, path: &Path) -> Option<DiscoveredFile> {
        if !self.accepts(path) {
            return None;
        }
        let size = std::fs::metadata(path).ok()?.len();
        Some(DiscoveredFile {
            path: path.to_path_buf(),
            size,
        })
    }

    /// Extension check against `processing.supported_formats`, ignoring case.
    fn accepts(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.config
            .supported_formats
            .iter()
            .any(|format| format.eq_ignore_ascii_case(ext))
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}
