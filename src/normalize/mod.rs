//! 3D embedding of ligands with Open Babel

use log::{debug, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::ledger::{Ledger, LigandState, SkipReason};
use crate::process::{Capture, ToolCommand, ToolOutcome};
use crate::LIGAND_EXTENSION;

/// Tally of one normalization pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeStats {
    pub converted: usize,
    pub skipped: usize,
    /// Subset of `skipped` that ran out of time
    pub timed_out: usize,
}

/// Result of converting a single ligand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion {
    Converted(PathBuf),
    Skipped(SkipReason),
}

/// Runs `obabel --gen3d` over every discovered ligand
#[derive(Debug, Clone)]
pub struct Normalizer {
    obabel: PathBuf,
    output_dir: PathBuf,
    timeout: Duration,
    workers: usize,
}

impl Normalizer {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        obabel: P,
        output_dir: Q,
        timeout: Duration,
        workers: usize,
    ) -> Self {
        Self {
            obabel: obabel.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            timeout,
            workers: workers.max(1),
        }
    }

    /// Output location for the ligand at `index`.
    ///
    /// The discovery index prefix keeps ligands with the same file name in
    /// different sub-directories apart.
    pub fn target_path(&self, index: usize, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ligand".to_string());
        self.output_dir
            .join(format!("{:05}_{}.{}", index, stem, LIGAND_EXTENSION))
    }

    /// Convert one ligand; never fails, a problem just skips the ligand
    pub async fn normalize_one(&self, source: &Path, target: &Path) -> Conversion {
        let cmd = ToolCommand::new(&self.obabel)
            .arg(source)
            .arg("-O")
            .arg(target)
            .arg("--gen3d");

        let conversion = match cmd.run(Some(self.timeout), Capture::Discard).await {
            Ok(ToolOutcome::Exited { status, .. }) if status.success() => {
                if target.is_file() {
                    Conversion::Converted(target.to_path_buf())
                } else {
                    // obabel exits 0 when it reads zero molecules
                    Conversion::Skipped(SkipReason::ExitStatus(Some(0)))
                }
            }
            Ok(ToolOutcome::Exited { status, .. }) => {
                Conversion::Skipped(SkipReason::ExitStatus(status.code()))
            }
            Ok(ToolOutcome::TimedOut { .. }) => Conversion::Skipped(SkipReason::Timeout),
            Err(e) => Conversion::Skipped(SkipReason::Spawn(e.to_string())),
        };

        if let Conversion::Skipped(reason) = &conversion {
            discard_partial(target);
            warn!("{} skipped ({})", source.display(), reason);
        } else {
            debug!("{} converted to {}", source.display(), target.display());
        }
        conversion
    }

    /// Convert every `Discovered` ligand with at most `workers` conversions in flight.
    ///
    /// Each conversion has its own deadline, so a stuck one only costs its own slot.
    pub async fn normalize_all(&self, ledger: &mut Ledger) -> std::io::Result<NormalizeStats> {
        std::fs::create_dir_all(&self.output_dir)?;

        let pending = ledger.indices_in(&LigandState::Discovered);
        info!(
            "Generating 3D coordinates for {} ligands ({} workers, {:?} per file)",
            pending.len(),
            self.workers,
            self.timeout
        );

        let slots = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for idx in pending {
            let Some(ligand) = ledger.get(idx) else {
                continue;
            };
            let source = ligand.path.clone();
            let target = self.target_path(idx, &source);
            let normalizer = self.clone();
            let slots = Arc::clone(&slots);

            tasks.spawn(async move {
                // The semaphore is never closed, so acquisition only fails on shutdown
                let _permit = slots.acquire_owned().await.ok();
                (idx, normalizer.normalize_one(&source, &target).await)
            });
        }

        let mut stats = NormalizeStats::default();
        while let Some(joined) = tasks.join_next().await {
            let (idx, conversion) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!("Conversion task failed: {}", e);
                    continue;
                }
            };
            let Some(ligand) = ledger.get_mut(idx) else {
                continue;
            };
            match conversion {
                Conversion::Converted(path) => {
                    stats.converted += 1;
                    ligand.path = path;
                    ligand.state = LigandState::Normalized;
                }
                Conversion::Skipped(reason) => {
                    stats.skipped += 1;
                    if reason == SkipReason::Timeout {
                        stats.timed_out += 1;
                    }
                    ligand.state = LigandState::Skipped(reason);
                }
            }
        }

        info!(
            "3D generation finished: {} converted, {} skipped ({} timed out)",
            stats.converted, stats.skipped, stats.timed_out
        );
        Ok(stats)
    }
}

fn discard_partial(target: &Path) {
    match std::fs::remove_file(target) {
        Ok(()) => debug!("Removed partial output {}", target.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial output {}: {}", target.display(), e),
    }
}


#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    /// Fake obabel: copies input to output, sleeps forever on "slow" inputs,
    /// writes a partial file then fails on "bad" inputs.
    fn fake_obabel(dir: &Path) -> PathBuf {
        let script = dir.join("obabel");
        std::fs::write(
            &script,
            "#!/bin/sh\ncase \"$(basename \"$1\")\" in\n  *slow*) echo partial > \"$3\"; exec sleep 30 ;;\n  *bad*) echo partial > \"$3\"; exit 1 ;;\nesac\ncp \"$1\" \"$3\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_output() {
        let dir = tempdir().unwrap();
        let obabel = fake_obabel(dir.path());
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let src = dir.path().join("slow.sdf");
        std::fs::write(&src, "mol\n$$$$\n").unwrap();

        let n = Normalizer::new(&obabel, &out, Duration::from_millis(300), 2);
        let target = n.target_path(0, &src);
        let result = n.normalize_one(&src, &target).await;

        assert_eq!(result, Conversion::Skipped(SkipReason::Timeout));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_normalize_all_tallies() {
        let dir = tempdir().unwrap();
        let obabel = fake_obabel(dir.path());
        let inputs = dir.path().join("in");
        std::fs::create_dir_all(&inputs).unwrap();
        let mut paths = Vec::new();
        for name in ["a.sdf", "bad.sdf", "c.sdf", "slow.sdf"] {
            let p = inputs.join(name);
            std::fs::write(&p, "mol\n$$$$\n").unwrap();
            paths.push(p);
        }

        let mut ledger = Ledger::from_discovered(paths);
        let n = Normalizer::new(&obabel, dir.path().join("out"), Duration::from_millis(500), 4);
        let stats = n.normalize_all(&mut ledger).await.unwrap();

        assert_eq!(
            stats,
            NormalizeStats {
                converted: 2,
                skipped: 2,
                timed_out: 1
            }
        );
        assert_eq!(
            ledger.get(1).unwrap().state,
            LigandState::Skipped(SkipReason::ExitStatus(Some(1)))
        );
        assert_eq!(ledger.get(3).unwrap().state, LigandState::Skipped(SkipReason::Timeout));
        assert_eq!(
            ledger.get(2).unwrap().path,
            dir.path().join("out").join("00002_c.sdf")
        );

        let produced = crate::discovery::discover(dir.path().join("out"), &["sdf"]).unwrap();
        assert_eq!(produced.len(), 2);
    }
}
