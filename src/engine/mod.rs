//! Uni-Dock invocation

use log::{error, info};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::{DockingBox, SearchSettings};
use crate::process::{Capture, ProcessError, ToolCommand, ToolOutcome};

/// Lines of engine output kept per stream for the failure log
pub const OUTPUT_TAIL_LINES: usize = 20;

/// How the docking engine finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineOutcome {
    /// Exit code, `None` when the engine was killed by a signal
    pub code: Option<i32>,
    pub success: bool,
}

/// A fully specified `unidock` run over a ligand manifest
#[derive(Debug, Clone)]
pub struct DockingEngine {
    pub unidock: PathBuf,
    pub receptor: PathBuf,
    pub manifest: PathBuf,
    pub docking_box: DockingBox,
    pub output_dir: PathBuf,
    pub search: SearchSettings,
}

impl DockingEngine {
    /// Command line for the engine
    pub fn command(&self) -> ToolCommand {
        let b = &self.docking_box;
        let mut cmd = ToolCommand::new(&self.unidock)
            .arg("--receptor")
            .arg(&self.receptor)
            .arg("--ligand_index")
            .arg(&self.manifest);

        let numeric = [
            ("--center_x", b.center.x),
            ("--center_y", b.center.y),
            ("--center_z", b.center.z),
            ("--size_x", b.size.x),
            ("--size_y", b.size.y),
            ("--size_z", b.size.z),
        ];
        for (flag, value) in numeric {
            cmd = cmd.arg(flag).arg(value.to_string());
        }

        cmd = cmd
            .arg("--dir")
            .arg(&self.output_dir)
            .arg("--search_mode")
            .arg(&self.search.search_mode)
            .arg("--num_modes")
            .arg(self.search.num_modes.to_string())
            .arg("--energy_range")
            .arg(self.search.energy_range.to_string());

        if let Some(mem) = self.search.max_gpu_memory {
            cmd = cmd.arg("--max_gpu_memory").arg(mem.to_string());
        }
        cmd
    }

    /// Run the engine to completion.
    ///
    /// There is no time limit. A failed engine run is returned, not raised, so
    /// the caller decides what it means for the rest of the run.
    pub async fn run(&self) -> Result<EngineOutcome, ProcessError> {
        std::fs::create_dir_all(&self.output_dir)?;

        let cmd = self.command();
        info!("Starting docking engine: {}", cmd.display());

        // Only the tail of each stream is kept, however long the run
        let outcome = match cmd.run(None, Capture::Tail(OUTPUT_TAIL_LINES)).await? {
            ToolOutcome::Exited { status, output } => {
                let outcome = EngineOutcome {
                    code: status.code(),
                    success: status.success(),
                };
                if !outcome.success {
                    error!("Docking engine exited with {:?}", outcome.code);
                    for line in output.lines() {
                        error!("  unidock: {}", line);
                    }
                }
                outcome
            }
            // Unreachable without a time limit; treated as a failure
            ToolOutcome::TimedOut { .. } => EngineOutcome {
                code: None,
                success: false,
            },
        };

        info!("Docking engine finished: {:?}", outcome);
        Ok(outcome)
    }
}

/// Manifest line count, for logging before the engine starts
pub fn manifest_len(manifest: &Path) -> usize {
    std::fs::read_to_string(manifest)
        .map(|t| t.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0)
}
