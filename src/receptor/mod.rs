//! Receptor preparation with `unidocktools proteinprep`

use log::info;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::ReceptorSource;
use crate::process::{Capture, ProcessError, ToolCommand, ToolOutcome};

/// Errors that can occur while preparing the receptor
#[derive(Error, Debug)]
pub enum ReceptorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Protein preparation failed (exit {code:?}): {output}")]
    Failed { code: Option<i32>, output: String },

    #[error("Protein preparation timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Protein preparation produced no output at {0}")]
    MissingOutput(PathBuf),
}

/// Produce the PDBQT receptor the engine will use.
///
/// A prepared receptor is used as is; a raw structure is converted into
/// `output_dir/<stem>.pdbqt`.
pub async fn prepare_receptor(
    unidocktools: &Path,
    source: &ReceptorSource,
    output_dir: &Path,
    timeout: Duration,
) -> Result<PathBuf, ReceptorError> {
    let input = match source {
        ReceptorSource::Prepared(path) => {
            info!("Using prepared receptor {}", path.display());
            return Ok(path.clone());
        }
        ReceptorSource::Structure(path) => path,
    };

    std::fs::create_dir_all(output_dir)?;
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "receptor".to_string());
    let output = output_dir.join(format!("{}.pdbqt", stem));

    info!("Preparing receptor {} -> {}", input.display(), output.display());
    let outcome = ToolCommand::new(unidocktools)
        .arg("proteinprep")
        .arg("-r")
        .arg(input)
        .arg("-o")
        .arg(&output)
        .run(Some(timeout), Capture::All)
        .await?;

    match outcome {
        ToolOutcome::Exited { status, .. } if status.success() => {
            if output.is_file() {
                Ok(output)
            } else {
                Err(ReceptorError::MissingOutput(output))
            }
        }
        ToolOutcome::Exited { status, output } => Err(ReceptorError::Failed {
            code: status.code(),
            output,
        }),
        ToolOutcome::TimedOut { .. } => Err(ReceptorError::TimedOut(timeout)),
    }
}
