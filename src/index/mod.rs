//! Ligand manifest (index file) handed to the docking engine

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::discovery::{discover, DiscoveryError};
use crate::ledger::Ledger;

/// Errors that can occur while writing or reading a manifest
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write manifest {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

/// Write one path per line, in the given order.
///
/// The file is staged next to `manifest` and renamed into place, so the engine
/// never reads a half-written index.
pub fn write_manifest<P: AsRef<Path>>(paths: &[PathBuf], manifest: P) -> Result<(), IndexError> {
    let manifest = manifest.as_ref();
    let parent = match manifest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let staged = tempfile::NamedTempFile::new_in(&parent)?;
    {
        let mut writer = BufWriter::new(staged.as_file());
        for path in paths {
            writeln!(writer, "{}", path.display())?;
        }
        writer.flush()?;
    }
    staged.persist(manifest).map_err(|e| IndexError::Persist {
        path: manifest.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Accepted ligands in discovery order
pub fn manifest_from_ledger(ledger: &Ledger) -> Vec<PathBuf> {
    ledger.accepted_paths()
}

/// Every matching file under `dir`, in stable path order
pub fn scan_directory<P: AsRef<Path>, S: AsRef<str>>(
    dir: P,
    extensions: &[S],
) -> Result<Vec<PathBuf>, IndexError> {
    Ok(discover(dir, extensions)?)
}

/// Read a manifest back, skipping blank lines
pub fn read_manifest<P: AsRef<Path>>(manifest: P) -> Result<Vec<PathBuf>, IndexError> {
    let text = fs::read_to_string(manifest)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect())
}
