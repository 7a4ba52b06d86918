//! Per-ligand bookkeeping threaded through the preparation stages

use serde::Serialize;
use std::path::PathBuf;

/// Why a ligand was dropped during 3D embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// The conversion ran past its time budget and was killed
    Timeout,

    /// The converter exited unsuccessfully (`None` when killed by a signal)
    ExitStatus(Option<i32>),

    /// The converter could not be started
    Spawn(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Timeout => write!(f, "timeout"),
            SkipReason::ExitStatus(Some(code)) => write!(f, "exit {}", code),
            SkipReason::ExitStatus(None) => write!(f, "killed by signal"),
            SkipReason::Spawn(msg) => write!(f, "spawn failed: {}", msg),
        }
    }
}

/// Processing state of a ligand
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum LigandState {
    Discovered,
    Normalized,
    Skipped(SkipReason),
    /// Its batch crashed or timed out, or the preparer produced no output for it
    SanitizeFailed,
    /// Reported as an invalid molecule by the preparer and deleted
    Rejected,
    Accepted,
}

/// A ligand tracked from discovery through acceptance
#[derive(Debug, Clone, Serialize)]
pub struct LigandFile {
    /// Path the ligand was discovered at
    pub source: PathBuf,

    /// Current location of the ligand (moves as stages produce new copies)
    pub path: PathBuf,

    pub state: LigandState,
}

impl LigandFile {
    pub fn discovered(source: PathBuf) -> Self {
        Self {
            path: source.clone(),
            source,
            state: LigandState::Discovered,
        }
    }
}

/// Ordered record of every ligand in the run
#[derive(Debug, Clone, Default, Serialize)]
pub struct Ledger {
    ligands: Vec<LigandFile>,
}

impl Ledger {
    /// Start a ledger from discovered paths, keeping their order
    pub fn from_discovered(paths: Vec<PathBuf>) -> Self {
        Self {
            ligands: paths.into_iter().map(LigandFile::discovered).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.ligands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ligands.is_empty()
    }

    pub fn ligands(&self) -> &[LigandFile] {
        &self.ligands
    }

    pub fn get(&self, idx: usize) -> Option<&LigandFile> {
        self.ligands.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut LigandFile> {
        self.ligands.get_mut(idx)
    }

    /// Indices of ligands currently in `state`, in discovery order
    pub fn indices_in(&self, state: &LigandState) -> Vec<usize> {
        self.ligands
            .iter()
            .enumerate()
            .filter(|(_, l)| &l.state == state)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&LigandState) -> bool) -> usize {
        self.ligands.iter().filter(|l| pred(&l.state)).count()
    }

    /// Paths of accepted ligands, in discovery order
    pub fn accepted_paths(&self) -> Vec<PathBuf> {
        self.ligands
            .iter()
            .filter(|l| l.state == LigandState::Accepted)
            .map(|l| l.path.clone())
            .collect()
    }
}
