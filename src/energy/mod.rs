//! Energy extraction from docking result files
//!
//! Uni-Dock writes one SDF file per ligand, with poses separated by `$$$$` and
//! the score of each pose on a line such as
//! `ENERGY=  -7.412  LOWER_BOUND=  0.000  UPPER_BOUND=  0.000`.
//! Poses are sorted best-first, so only the first record of a file is read.

use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::discovery::has_extension;

/// Separator between molecule records in an SDF file
pub const RECORD_DELIMITER: &str = "$$$$";

/// Prefix of the line carrying a pose's energy
pub const ENERGY_TAG: &str = "ENERGY=";

/// Energy of the first record in `text`, or `f64::INFINITY` when it has none
pub fn first_record_energy(text: &str) -> f64 {
    for line in text.lines() {
        if line.trim_end() == RECORD_DELIMITER {
            break;
        }
        if line.starts_with(ENERGY_TAG) {
            return parse_energy_line(line).unwrap_or(f64::INFINITY);
        }
    }
    f64::INFINITY
}

/// First whitespace-delimited token after the first `=`
fn parse_energy_line(line: &str) -> Option<f64> {
    let (_, rest) = line.split_once('=')?;
    let value: f64 = rest.split_whitespace().next()?.parse().ok()?;
    (!value.is_nan()).then_some(value)
}

/// Energy of the first pose in a result file; unreadable files score `INFINITY`
pub fn file_energy<P: AsRef<Path>>(path: P) -> f64 {
    fs::read(path.as_ref())
        .map(|bytes| first_record_energy(&String::from_utf8_lossy(&bytes)))
        .unwrap_or(f64::INFINITY)
}

/// A result file together with its best pose energy
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnergyRecord {
    pub path: PathBuf,
    pub energy: f64,
}

impl EnergyRecord {
    /// File name without directories, for status lines
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Outcome of one pass over a results directory
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultScan {
    /// Number of result files seen, parseable or not
    pub file_count: usize,

    /// Lowest finite energy found, if any file had one
    pub best: Option<EnergyRecord>,
}

/// Pick the lowest finite energy; equal energies resolve to the smaller path
pub fn best_record<I>(records: I) -> Option<EnergyRecord>
where
    I: IntoIterator<Item = EnergyRecord>,
{
    records
        .into_iter()
        .filter(|r| r.energy.is_finite())
        .min_by(|a, b| {
            a.energy
                .total_cmp(&b.energy)
                .then_with(|| a.path.cmp(&b.path))
        })
}

/// List result files directly inside `dir`, sorted by path.
///
/// A missing directory yields an empty list.
pub fn result_files<P: AsRef<Path>>(dir: P, extension: &str) -> std::io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir.as_ref()) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && has_extension(&path, &[extension]) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Scan every result file in `dir` and find the lowest-energy one.
///
/// Files are parsed in parallel; this blocks, so async callers should run it
/// on a blocking thread.
pub fn scan_results<P: AsRef<Path>>(dir: P, extension: &str) -> std::io::Result<ResultScan> {
    let files = result_files(dir, extension)?;
    let records: Vec<EnergyRecord> = files
        .par_iter()
        .map(|path| EnergyRecord {
            energy: file_energy(path),
            path: path.clone(),
        })
        .collect();

    Ok(ResultScan {
        file_count: files.len(),
        best: best_record(records),
    })
}
