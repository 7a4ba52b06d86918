//! Periodic progress reporting while the docking engine runs

use chrono::{DateTime, Local};
use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::energy::{scan_results, EnergyRecord, ResultScan};
use crate::logging::STATUS_TARGET;

/// State of the results directory at one moment
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub timestamp: DateTime<Local>,
    pub file_count: usize,
    pub best: Option<EnergyRecord>,
}

impl ProgressSnapshot {
    pub fn from_scan(scan: ResultScan) -> Self {
        Self {
            timestamp: Local::now(),
            file_count: scan.file_count,
            best: scan.best,
        }
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} result files", self.file_count)?;
        match &self.best {
            Some(best) => write!(f, ", best {} ENERGY={:.3}", best.name(), best.energy),
            None => write!(f, ", no valid result yet"),
        }
    }
}

/// Receiver of progress snapshots
pub trait StatusSink: Send + Sync {
    fn record(&self, snapshot: &ProgressSnapshot);
}

/// Writes snapshots to the run log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn record(&self, snapshot: &ProgressSnapshot) {
        info!(target: STATUS_TARGET, "[monitor] {}", snapshot);
    }
}

/// Rescans a results directory on a fixed interval
#[derive(Clone)]
pub struct ProgressMonitor {
    results_dir: PathBuf,
    extension: String,
    interval: Duration,
    sink: Arc<dyn StatusSink>,
}

impl ProgressMonitor {
    pub fn new<P: Into<PathBuf>>(
        results_dir: P,
        extension: &str,
        interval: Duration,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        Self {
            results_dir: results_dir.into(),
            extension: extension.to_string(),
            interval,
            sink,
        }
    }

    /// Take one snapshot of the results directory.
    ///
    /// The scan only reads; an unreadable directory counts as empty.
    pub async fn snapshot(&self) -> ProgressSnapshot {
        let dir = self.results_dir.clone();
        let ext = self.extension.clone();
        let scan = tokio::task::spawn_blocking(move || scan_results(&dir, &ext)).await;

        let scan = match scan {
            Ok(Ok(scan)) => scan,
            Ok(Err(e)) => {
                warn!("Progress scan of {} failed: {}", self.results_dir.display(), e);
                ResultScan::default()
            }
            Err(e) => {
                warn!("Progress scan task failed: {}", e);
                ResultScan::default()
            }
        };
        ProgressSnapshot::from_scan(scan)
    }

    /// Start polling in the background; runs until the handle is stopped
    pub fn spawn(self) -> MonitorHandle {
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut cycles = 0usize;
            loop {
                let snapshot = self.snapshot().await;
                self.sink.record(&snapshot);
                cycles += 1;

                if *cancel_rx.borrow() {
                    break;
                }
                let sender_gone = tokio::select! {
                    _ = tokio::time::sleep(self.interval) => false,
                    changed = cancel_rx.changed() => changed.is_err(),
                };
                // A dropped handle also means stop
                if sender_gone || *cancel_rx.borrow() {
                    break;
                }
            }
            cycles
        });

        MonitorHandle { cancel_tx, task }
    }
}

/// Handle to a running [`ProgressMonitor`]
pub struct MonitorHandle {
    cancel_tx: watch::Sender<bool>,
    task: JoinHandle<usize>,
}

impl MonitorHandle {
    /// Ask the monitor to stop and wait for it; returns the number of
    /// snapshots it recorded
    pub async fn stop(self) -> usize {
        // Fails only when the task already exited
        let _ = self.cancel_tx.send(true);
        match self.task.await {
            Ok(cycles) => cycles,
            Err(e) => {
                warn!("Progress monitor ended abnormally: {}", e);
                0
            }
        }
    }
}
