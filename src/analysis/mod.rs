//! One-shot analysis of a finished docking run

use serde::Serialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::energy::{scan_results, EnergyRecord};

/// Errors that can occur while analyzing results
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("IO error while reading results: {0}")]
    Io(#[from] std::io::Error),
}

/// Best result of a run, or an explicit statement that there is none
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AnalysisReport {
    /// No result file carried a usable energy (including the no-files case)
    NoResults { file_count: usize },

    Best {
        file_count: usize,
        record: EnergyRecord,
    },
}

impl AnalysisReport {
    pub fn best(&self) -> Option<&EnergyRecord> {
        match self {
            AnalysisReport::Best { record, .. } => Some(record),
            AnalysisReport::NoResults { .. } => None,
        }
    }

    pub fn file_count(&self) -> usize {
        match self {
            AnalysisReport::NoResults { file_count } | AnalysisReport::Best { file_count, .. } => {
                *file_count
            }
        }
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisReport::NoResults { file_count: 0 } => write!(f, "No results: no result files found"),
            AnalysisReport::NoResults { file_count } => write!(
                f,
                "No results: none of {} result files contained a valid energy",
                file_count
            ),
            AnalysisReport::Best { file_count, record } => write!(
                f,
                "Lowest energy conformation: {} ENERGY={:.3} kcal/mol ({} result files)",
                record.path.display(),
                record.energy,
                file_count
            ),
        }
    }
}

/// Scan `dir` once and report the lowest-energy result file
pub fn analyze<P: AsRef<Path>>(dir: P, extension: &str) -> Result<AnalysisReport, AnalysisError> {
    let scan = scan_results(dir, extension)?;
    Ok(match scan.best {
        Some(record) => AnalysisReport::Best {
            file_count: scan.file_count,
            record,
        },
        None => AnalysisReport::NoResults {
            file_count: scan.file_count,
        },
    })
}
