//! RustDock-Screen: a virtual-screening pipeline driver for GPU molecular docking
//!
//! This library prepares a ligand library for Uni-Dock (unpacking, 3D embedding with
//! Open Babel, batch sanitization with unidocktools), runs the docking engine, and
//! tracks the lowest-energy pose found while the engine is running.

pub mod analysis;
pub mod archive;
pub mod config;
pub mod discovery;
pub mod energy;
pub mod engine;
pub mod index;
pub mod ledger;
pub mod logging;
pub mod monitor;
pub mod normalize;
pub mod pipeline;
pub mod process;
pub mod receptor;
pub mod sanitize;

// Re-export commonly used types and functions
pub use analysis::{analyze, AnalysisReport};
pub use config::{DockingBox, PipelineConfig, ToolPaths};
pub use energy::{EnergyRecord, ResultScan};
pub use ledger::{Ledger, LigandFile, LigandState};
pub use pipeline::{Pipeline, PipelineReport};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// File extension of the structure files the pipeline produces and docks
pub const LIGAND_EXTENSION: &str = "sdf";
