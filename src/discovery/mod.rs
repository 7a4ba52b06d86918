//! Ligand file discovery and batching

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors that can occur while scanning for ligand files
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("IO error while scanning {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Check whether `path` has one of `extensions` (case-insensitive, without dot)
pub fn has_extension<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => extensions
            .iter()
            .any(|wanted| ext.eq_ignore_ascii_case(wanted.as_ref())),
        None => false,
    }
}

/// Recursively collect regular files under `root` with a matching extension.
///
/// The result is sorted by path so repeated scans of an unchanged tree agree.
/// Symlinked directories are not followed.
pub fn discover<P: AsRef<Path>, S: AsRef<str>>(
    root: P,
    extensions: &[S],
) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut found = Vec::new();
    let mut pending = vec![root.as_ref().to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|source| DiscoveryError::Io {
            path: dir.clone(),
            source,
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| DiscoveryError::Io {
                path: dir.clone(),
                source,
            })?;
            let file_type = entry.file_type().map_err(|source| DiscoveryError::Io {
                path: entry.path(),
                source,
            })?;
            let path = entry.path();

            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && has_extension(&path, extensions) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// An ordered group of ligand files submitted together to the sanitizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Zero-based position of the batch in the run
    pub index: usize,

    /// Ligand files in discovery order
    pub files: Vec<PathBuf>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Write the batch as a one-path-per-line listing inside `dir`.
    ///
    /// The listing is deleted when the returned handle is dropped.
    pub fn write_listing<P: AsRef<Path>>(&self, dir: P) -> std::io::Result<NamedTempFile> {
        let mut listing = tempfile::Builder::new()
            .prefix(&format!("batch_{:04}_", self.index))
            .suffix(".txt")
            .tempfile_in(dir)?;
        for file in &self.files {
            writeln!(listing, "{}", file.display())?;
        }
        listing.flush()?;
        Ok(listing)
    }
}

/// Split `files` into consecutive batches of at most `size` entries.
///
/// A `size` of zero is treated as one; the configuration layer rejects zero
/// before any batching happens.
pub fn make_batches(files: &[PathBuf], size: usize) -> Vec<Batch> {
    files
        .chunks(size.max(1))
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            files: chunk.to_vec(),
        })
        .collect()
}
