//! Batch ligand preparation with `unidocktools ligandprep`

use log::{error, info, warn};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::discovery::{make_batches, Batch};
use crate::ledger::{Ledger, LigandState};
use crate::process::{Capture, ToolCommand, ToolOutcome};

/// Errors that stop sanitization as a whole (per-batch trouble never does)
#[derive(Error, Debug)]
pub enum SanitizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn invalid_ligand_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)ligand\s+(?P<path>\S+?)[,:]?\s+(?:at\s+)?(?:index|idx)\s+(?P<idx>\d+)[,:]?\s+is\s+(?:an\s+)?invalid\s+mol",
        )
        .expect("invalid-ligand pattern is a valid regex")
    })
}

/// Paths named in "ligand <path> at index <i> is an invalid molecule"
/// diagnostics, de-duplicated in first-seen order
pub fn parse_invalid_ligands(output: &str) -> Vec<PathBuf> {
    let pattern = invalid_ligand_pattern();
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for line in output.lines() {
        if let Some(caps) = pattern.captures(line) {
            let path = caps["path"].trim_matches(|c| c == '\'' || c == '"');
            if seen.insert(path.to_string()) {
                paths.push(PathBuf::from(path));
            }
        }
    }
    paths
}

/// How a batch invocation ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BatchOutcome {
    /// The preparer exited cleanly
    Completed,

    /// The preparer failed but named the offending ligands
    CompletedWithErrors { code: Option<i32> },

    /// The preparer failed without naming anything actionable
    Crashed { code: Option<i32> },

    TimedOut,

    /// The preparer could not be started
    SpawnFailed(String),
}

impl BatchOutcome {
    /// Whether per-ligand results of the batch can be trusted
    pub fn usable(&self) -> bool {
        matches!(
            self,
            BatchOutcome::Completed | BatchOutcome::CompletedWithErrors { .. }
        )
    }
}

/// What one batch did to the files on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub index: usize,
    pub outcome: BatchOutcome,

    /// Files deleted because the preparer flagged them as invalid
    pub removed: Vec<PathBuf>,

    /// Map from batch input to prepared output, for accepted ligands
    pub accepted: Vec<(PathBuf, PathBuf)>,
}

/// Tally of one sanitization pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SanitizeStats {
    pub batches: usize,
    pub failed_batches: usize,
    pub rejected: usize,
    pub accepted: usize,
}

/// Runs the ligand preparer over fixed-size batches, one batch at a time
#[derive(Debug, Clone)]
pub struct Sanitizer {
    unidocktools: PathBuf,
    output_dir: PathBuf,
    listing_dir: PathBuf,
    timeout: Duration,
    batch_size: usize,
}

impl Sanitizer {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        unidocktools: P,
        output_dir: Q,
        timeout: Duration,
        batch_size: usize,
    ) -> Self {
        let output_dir = output_dir.as_ref().to_path_buf();
        Self {
            unidocktools: unidocktools.as_ref().to_path_buf(),
            listing_dir: std::env::temp_dir(),
            output_dir,
            timeout,
            batch_size,
        }
    }

    /// Put batch listings in `dir` instead of the system temp directory
    pub fn with_listing_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.listing_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Where the preparer writes its version of `input`
    pub fn prepared_path(&self, input: &Path) -> PathBuf {
        match input.file_name() {
            Some(name) => self.output_dir.join(name),
            None => self.output_dir.join(input),
        }
    }

    /// Prepare one batch and delete the ligands the preparer reports as invalid
    pub async fn sanitize_batch(&self, batch: &Batch) -> Result<BatchReport, SanitizeError> {
        std::fs::create_dir_all(&self.output_dir)?;
        let listing = batch.write_listing(&self.listing_dir)?;

        let cmd = ToolCommand::new(&self.unidocktools)
            .arg("ligandprep")
            .arg("-i")
            .arg(listing.path())
            .arg("-sd")
            .arg(&self.output_dir);

        let result = cmd.run(Some(self.timeout), Capture::All).await;
        drop(listing);

        let (status, output) = match result {
            Ok(ToolOutcome::Exited { status, output }) => (Ok(status), output),
            Ok(ToolOutcome::TimedOut { output }) => (Err(BatchOutcome::TimedOut), output),
            Err(e) => (Err(BatchOutcome::SpawnFailed(e.to_string())), String::new()),
        };

        let flagged = parse_invalid_ligands(&output);
        let outcome = match status {
            Ok(status) if status.success() => BatchOutcome::Completed,
            Ok(status) if flagged.is_empty() => BatchOutcome::Crashed {
                code: status.code(),
            },
            Ok(status) => BatchOutcome::CompletedWithErrors {
                code: status.code(),
            },
            Err(outcome) => outcome,
        };
        let removed = remove_flagged(&flagged);

        if !outcome.usable() {
            error!(
                "Batch {} ({} ligands) failed: {:?}; preparer output follows",
                batch.index,
                batch.len(),
                outcome
            );
            for line in output.lines() {
                error!("  batch {}: {}", batch.index, line);
            }
            return Ok(BatchReport {
                index: batch.index,
                outcome,
                removed,
                accepted: Vec::new(),
            });
        }

        let flagged: HashSet<&Path> = removed.iter().map(PathBuf::as_path).collect();
        let accepted = batch
            .files
            .iter()
            .filter(|input| !flagged.contains(input.as_path()))
            .filter_map(|input| {
                let prepared = self.prepared_path(input);
                prepared.is_file().then(|| (input.clone(), prepared))
            })
            .collect();

        Ok(BatchReport {
            index: batch.index,
            outcome,
            removed,
            accepted,
        })
    }

    /// Sanitize every `Normalized` ligand, batch by batch.
    ///
    /// A failed batch is logged and its ligands marked `SanitizeFailed`; the
    /// remaining batches still run.
    pub async fn sanitize_all(&self, ledger: &mut Ledger) -> Result<SanitizeStats, SanitizeError> {
        let pending = ledger.indices_in(&LigandState::Normalized);
        let paths: Vec<PathBuf> = pending
            .iter()
            .filter_map(|&i| ledger.get(i).map(|l| l.path.clone()))
            .collect();
        let batches = make_batches(&paths, self.batch_size);

        info!(
            "Preparing {} ligands in {} batches of up to {}",
            paths.len(),
            batches.len(),
            self.batch_size
        );

        let mut stats = SanitizeStats {
            batches: batches.len(),
            ..SanitizeStats::default()
        };

        for batch in &batches {
            let report = self.sanitize_batch(batch).await?;
            let offset = batch.index * self.batch_size.max(1);
            if !report.outcome.usable() {
                stats.failed_batches += 1;
            }

            let removed: HashSet<&PathBuf> = report.removed.iter().collect();
            let accepted: std::collections::HashMap<&PathBuf, &PathBuf> =
                report.accepted.iter().map(|(i, p)| (i, p)).collect();

            for (pos, input) in batch.files.iter().enumerate() {
                let Some(ligand) = pending.get(offset + pos).and_then(|&i| ledger.get_mut(i)) else {
                    continue;
                };
                if removed.contains(input) {
                    ligand.state = LigandState::Rejected;
                    stats.rejected += 1;
                } else if let Some(prepared) = accepted.get(input) {
                    ligand.path = (*prepared).clone();
                    ligand.state = LigandState::Accepted;
                    stats.accepted += 1;
                } else {
                    ligand.state = LigandState::SanitizeFailed;
                }
            }

            info!(
                "Batch {}/{}: {:?}, {} accepted, {} removed",
                batch.index + 1,
                batches.len(),
                report.outcome,
                report.accepted.len(),
                report.removed.len()
            );
        }

        if stats.failed_batches > 0 {
            warn!(
                "{} of {} preparation batches failed",
                stats.failed_batches, stats.batches
            );
        }
        Ok(stats)
    }
}

/// Delete each flagged path that exists; returns the paths actually removed
fn remove_flagged(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for path in paths {
        if !path.is_file() {
            warn!("Preparer flagged {} but it is not on disk", path.display());
            continue;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {
                warn!("Removed invalid ligand {}", path.display());
                removed.push(path.clone());
            }
            Err(e) => warn!("Could not remove invalid ligand {}: {}", path.display(), e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_warning_variants() {
        let output = "\
INFO: preparing 4 ligands
WARNING: ligand /work/processed/00001_a.sdf at index 1 is an invalid molecule
2024-01-01 WARNING ligand /work/processed/00003_c.sdf idx 3 is invalid mol, skipped
ligand '/work/processed/00004_d.sdf', index 4: is invalid molecule
WARNING: ligand /work/processed/00001_a.sdf at index 1 is an invalid molecule
Traceback (most recent call last):
";
        assert_eq!(
            parse_invalid_ligands(output),
            vec![
                PathBuf::from("/work/processed/00001_a.sdf"),
                PathBuf::from("/work/processed/00003_c.sdf"),
                PathBuf::from("/work/processed/00004_d.sdf"),
            ]
        );
    }

    #[test]
    fn test_parse_nothing_actionable() {
        assert!(parse_invalid_ligands("Segmentation fault (core dumped)\n").is_empty());
        assert!(parse_invalid_ligands("").is_empty());
    }

    #[test]
    fn test_remove_exactly_flagged_existing_files() {
        let dir = tempdir().unwrap();
        let files: Vec<PathBuf> = (0..5)
            .map(|i| {
                let p = dir.path().join(format!("{}.sdf", i));
                std::fs::write(&p, "mol\n").unwrap();
                p
            })
            .collect();

        let output = format!(
            "ligand {} at index 1 is an invalid molecule\nligand {} at index 3 is an invalid molecule\nligand {} at index 9 is an invalid molecule\n",
            files[1].display(),
            files[3].display(),
            dir.path().join("ghost.sdf").display()
        );

        let removed = remove_flagged(&parse_invalid_ligands(&output));
        assert_eq!(removed, vec![files[1].clone(), files[3].clone()]);
        for (i, f) in files.iter().enumerate() {
            assert_eq!(f.exists(), i != 1 && i != 3, "{}", f.display());
        }
    }

    #[test]
    fn test_outcome_usable() {
        assert!(BatchOutcome::Completed.usable());
        assert!(BatchOutcome::CompletedWithErrors { code: Some(1) }.usable());
        assert!(!BatchOutcome::Crashed { code: Some(139) }.usable());
        assert!(!BatchOutcome::TimedOut.usable());
    }
}

#[cfg(all(test, unix))]
mod process_tests {
    use super::*;
    use crate::ledger::Ledger;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    /// Fake unidocktools: copies every listed file into the output directory,
    /// warns about files whose content contains INVALID, crashes when any
    /// listed file contains CRASH.
    fn fake_unidocktools(dir: &Path) -> PathBuf {
        let script = dir.join("unidocktools");
        std::fs::write(
            &script,
            r#"#!/bin/sh
listing="$3"; out="$5"; i=0; status=0
while read -r f; do
  if grep -q CRASH "$f"; then echo "Segmentation fault" 1>&2; exit 139; fi
  if grep -q HANG "$f"; then exec sleep 30; fi
  if grep -q INVALID "$f"; then
    echo "WARNING: ligand $f at index $i is an invalid molecule" 1>&2; status=1
  else
    cp "$f" "$out/"
  fi
  i=$((i+1))
done < "$listing"
exit $status
"#,
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn ligand_files(dir: &Path, contents: &[&str]) -> Vec<PathBuf> {
        std::fs::create_dir_all(dir).unwrap();
        contents
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let p = dir.join(format!("{:05}_lig.sdf", i));
                std::fs::write(&p, c).unwrap();
                p
            })
            .collect()
    }

    fn normalized_ledger(paths: Vec<PathBuf>) -> Ledger {
        let mut ledger = Ledger::from_discovered(paths);
        for i in 0..ledger.len() {
            ledger.get_mut(i).unwrap().state = LigandState::Normalized;
        }
        ledger
    }

    #[tokio::test]
    async fn test_invalid_ligands_removed_and_rest_accepted() {
        let dir = tempdir().unwrap();
        let tool = fake_unidocktools(dir.path());
        let inputs = ligand_files(&dir.path().join("processed"), &["ok", "INVALID", "ok"]);
        let prepared = dir.path().join("prepared");

        let sanitizer = Sanitizer::new(&tool, &prepared, Duration::from_secs(20), 100)
            .with_listing_dir(dir.path());
        let mut ledger = normalized_ledger(inputs.clone());
        let stats = sanitizer.sanitize_all(&mut ledger).await.unwrap();

        assert_eq!(
            stats,
            SanitizeStats {
                batches: 1,
                failed_batches: 0,
                rejected: 1,
                accepted: 2
            }
        );
        assert!(!inputs[1].exists());
        assert_eq!(ledger.get(1).unwrap().state, LigandState::Rejected);
        assert_eq!(
            ledger.accepted_paths(),
            vec![prepared.join("00000_lig.sdf"), prepared.join("00002_lig.sdf")]
        );
    }

    #[tokio::test]
    async fn test_crashed_batch_does_not_stop_the_run() {
        let dir = tempdir().unwrap();
        let tool = fake_unidocktools(dir.path());
        let inputs = ligand_files(
            &dir.path().join("processed"),
            &["ok", "CRASH", "ok", "ok"],
        );
        let prepared = dir.path().join("prepared");

        let sanitizer = Sanitizer::new(&tool, &prepared, Duration::from_secs(20), 2)
            .with_listing_dir(dir.path());
        let mut ledger = normalized_ledger(inputs);
        let stats = sanitizer.sanitize_all(&mut ledger).await.unwrap();

        assert_eq!(stats.batches, 2);
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.accepted, 2);
        assert_eq!(ledger.get(0).unwrap().state, LigandState::SanitizeFailed);
        assert_eq!(ledger.get(1).unwrap().state, LigandState::SanitizeFailed);
        assert_eq!(ledger.get(3).unwrap().state, LigandState::Accepted);

        // Listings are cleaned up
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("batch_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_batch_is_killed_and_run_continues() {
        let dir = tempdir().unwrap();
        let tool = fake_unidocktools(dir.path());
        let inputs = ligand_files(&dir.path().join("processed"), &["HANG", "ok", "ok", "ok"]);
        let prepared = dir.path().join("prepared");

        let sanitizer = Sanitizer::new(&tool, &prepared, Duration::from_millis(300), 2)
            .with_listing_dir(dir.path());
        let mut ledger = normalized_ledger(inputs);

        let start = std::time::Instant::now();
        let stats = sanitizer.sanitize_all(&mut ledger).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));

        assert_eq!(
            stats,
            SanitizeStats {
                batches: 2,
                failed_batches: 1,
                rejected: 0,
                accepted: 2
            }
        );
        assert_eq!(ledger.get(0).unwrap().state, LigandState::SanitizeFailed);
        assert_eq!(ledger.get(1).unwrap().state, LigandState::SanitizeFailed);
        assert_eq!(ledger.get(2).unwrap().state, LigandState::Accepted);
        assert_eq!(ledger.get(3).unwrap().state, LigandState::Accepted);
    }

    #[tokio::test]
    async fn test_missing_preparer_fails_every_batch() {
        let dir = tempdir().unwrap();
        let inputs = ligand_files(&dir.path().join("processed"), &["ok", "ok", "ok"]);
        let sanitizer = Sanitizer::new(
            dir.path().join("no-such-unidocktools"),
            dir.path().join("prepared"),
            Duration::from_secs(5),
            2,
        )
        .with_listing_dir(dir.path());
        let mut ledger = normalized_ledger(inputs);

        let batch = Batch {
            index: 0,
            files: vec![ledger.get(0).unwrap().path.clone()],
        };
        let report = sanitizer.sanitize_batch(&batch).await.unwrap();
        assert!(matches!(report.outcome, BatchOutcome::SpawnFailed(_)));
        assert!(report.accepted.is_empty());

        let stats = sanitizer.sanitize_all(&mut ledger).await.unwrap();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.failed_batches, 2);
        assert_eq!(ledger.count(|s| *s == LigandState::SanitizeFailed), 3);
    }
}
