//! End-to-end screening run

use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::analysis::{analyze, AnalysisError, AnalysisReport};
use crate::archive::{unpack, ArchiveError};
use crate::config::{ConfigError, PipelineConfig};
use crate::discovery::{discover, DiscoveryError};
use crate::engine::{manifest_len, DockingEngine, EngineOutcome};
use crate::index::{manifest_from_ledger, write_manifest, IndexError};
use crate::ledger::{Ledger, LigandState};
use crate::monitor::{LogSink, ProgressMonitor, StatusSink};
use crate::normalize::{NormalizeStats, Normalizer};
use crate::process::{require_tools, ProcessError};
use crate::receptor::{prepare_receptor, ReceptorError};
use crate::sanitize::{SanitizeError, SanitizeStats, Sanitizer};
use crate::LIGAND_EXTENSION;

/// Errors that abort a run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Sanitize(#[from] SanitizeError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Receptor(#[from] ReceptorError),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error("Failed to write run summary: {0}")]
    Summary(#[from] serde_json::Error),
}

impl PipelineError {
    /// Whether the run never started because of bad input or a missing tool
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PipelineError::Config(_)
                | PipelineError::Archive(ArchiveError::NotFound(_))
                | PipelineError::Archive(ArchiveError::UnsupportedFormat(_))
                | PipelineError::Process(ProcessError::MissingCommands(_))
        )
    }
}

/// Everything a finished run reports, also written to `summary.json`
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub discovered: usize,
    pub normalize: NormalizeStats,
    pub sanitize: SanitizeStats,
    pub accepted: usize,
    pub manifest: PathBuf,
    pub receptor: Option<PathBuf>,

    /// `None` when the engine was not started because nothing was accepted
    pub engine: Option<EngineOutcome>,

    pub monitor_cycles: usize,
    pub analysis: AnalysisReport,
    pub ligands: Ledger,
}

impl PipelineReport {
    /// True when the engine ran and exited successfully
    pub fn engine_succeeded(&self) -> bool {
        self.engine.map(|e| e.success).unwrap_or(false)
    }
}

/// Screening run over one ligand bundle and one receptor
pub struct Pipeline {
    config: PipelineConfig,
    sink: Arc<dyn StatusSink>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            sink: Arc::new(LogSink),
        }
    }

    /// Send progress snapshots somewhere other than the run log
    pub fn with_status_sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate inputs and check that every external program is available
    pub fn preflight(&self) -> Result<(), PipelineError> {
        self.config.validate()?;
        let tools = &self.config.tools;
        require_tools([
            tools.obabel.as_path(),
            tools.unidocktools.as_path(),
            tools.unidock.as_path(),
        ])?;
        Ok(())
    }

    /// Run every stage in order.
    ///
    /// Ligand-level and batch-level failures are recorded in the report; only
    /// configuration problems and I/O on the work directory abort the run.
    pub async fn run(&self) -> Result<PipelineReport, PipelineError> {
        let cfg = &self.config;
        self.preflight()?;
        std::fs::create_dir_all(&cfg.work_dir)?;
        reset_stage_dirs(cfg)?;

        // Inputs
        let root = unpack(&cfg.ligands, cfg.raw_dir())?;
        let discovered = discover(&root, &cfg.ligand_extensions)?;
        info!("Discovered {} ligand files under {}", discovered.len(), root.display());
        let mut ledger = Ledger::from_discovered(discovered);

        let normalize = Normalizer::new(
            &cfg.tools.obabel,
            cfg.processed_dir(),
            cfg.convert_timeout,
            cfg.workers,
        )
        .normalize_all(&mut ledger)
        .await?;

        let sanitize = Sanitizer::new(
            &cfg.tools.unidocktools,
            cfg.prepared_dir(),
            cfg.batch_timeout,
            cfg.batch_size,
        )
        .with_listing_dir(&cfg.work_dir)
        .sanitize_all(&mut ledger)
        .await?;

        let accepted = manifest_from_ledger(&ledger);
        let manifest = cfg.manifest_path();
        write_manifest(&accepted, &manifest)?;
        info!("Wrote {} ligands to {}", accepted.len(), manifest.display());

        // Docking
        let results_dir = cfg.results_dir();
        let (receptor, engine, monitor_cycles) = if accepted.is_empty() {
            warn!("No ligands survived preparation; skipping docking");
            (None, None, 0)
        } else {
            let receptor = prepare_receptor(
                &cfg.tools.unidocktools,
                &cfg.receptor,
                &cfg.receptor_dir(),
                cfg.batch_timeout,
            )
            .await?;

            let engine = DockingEngine {
                unidock: cfg.tools.unidock.clone(),
                receptor: receptor.clone(),
                manifest: manifest.clone(),
                docking_box: cfg.docking_box,
                output_dir: results_dir.clone(),
                search: cfg.search.clone(),
            };
            info!("Docking {} ligands", manifest_len(&manifest));

            let monitor = ProgressMonitor::new(
                &results_dir,
                LIGAND_EXTENSION,
                cfg.monitor_interval,
                Arc::clone(&self.sink),
            )
            .spawn();
            let outcome = engine.run().await;
            let cycles = monitor.stop().await;

            let outcome = outcome?;
            if !outcome.success {
                error!(
                    "Docking engine failed (exit {:?}); reporting whatever results exist",
                    outcome.code
                );
            }
            (Some(receptor), Some(outcome), cycles)
        };

        let analysis = analyze(&results_dir, LIGAND_EXTENSION)?;
        info!("{}", analysis);

        let report = PipelineReport {
            discovered: ledger.len(),
            normalize,
            sanitize,
            accepted: ledger.count(|s| *s == LigandState::Accepted),
            manifest,
            receptor,
            engine,
            monitor_cycles,
            analysis,
            ligands: ledger,
        };

        let summary = cfg.summary_path();
        std::fs::write(&summary, serde_json::to_string_pretty(&report)?)?;
        info!("Run summary written to {}", summary.display());

        Ok(report)
    }
}

/// Start every stage directory empty, so nothing left by an earlier run in
/// the same work directory is discovered, accepted or analyzed
fn reset_stage_dirs(cfg: &PipelineConfig) -> std::io::Result<()> {
    for dir in cfg.stage_dirs() {
        if dir.exists() {
            debug!("Clearing {}", dir.display());
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}
