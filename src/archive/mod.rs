//! Unpacking of ligand bundles

use flate2::read::GzDecoder;
use log::info;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while unpacking a ligand bundle
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ligand bundle not found: {0}")]
    NotFound(PathBuf),

    #[error("Unsupported bundle format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Supported ligand bundle layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    Directory,
    Tar,
    TarGz,
    Zip,
}

impl BundleKind {
    /// Classify a bundle by file type and extension
    pub fn detect<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ArchiveError::NotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            return Ok(Self::Directory);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else if name.ends_with(".tar") {
            Ok(Self::Tar)
        } else if name.ends_with(".zip") {
            Ok(Self::Zip)
        } else {
            Err(ArchiveError::UnsupportedFormat(path.to_path_buf()))
        }
    }
}

/// Make the bundle's contents available on disk and return the directory to scan.
///
/// A directory bundle is used in place; archives are unpacked into `dest`.
pub fn unpack<P: AsRef<Path>, Q: AsRef<Path>>(bundle: P, dest: Q) -> Result<PathBuf, ArchiveError> {
    let bundle = bundle.as_ref();
    let dest = dest.as_ref();

    let kind = BundleKind::detect(bundle)?;
    if kind == BundleKind::Directory {
        info!("Using ligand directory {} in place", bundle.display());
        return Ok(bundle.to_path_buf());
    }

    std::fs::create_dir_all(dest)?;
    info!("Unpacking {} into {}", bundle.display(), dest.display());

    let file = BufReader::new(File::open(bundle)?);
    match kind {
        BundleKind::Tar => tar::Archive::new(file).unpack(dest)?,
        BundleKind::TarGz => tar::Archive::new(GzDecoder::new(file)).unpack(dest)?,
        BundleKind::Zip => zip::ZipArchive::new(file)?.extract(dest)?,
        BundleKind::Directory => {}
    }

    Ok(dest.to_path_buf())
}
