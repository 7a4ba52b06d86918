//! Main executable for rustdock-screen

use anyhow::{anyhow, Context, Result};
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use rustdock_screen::analysis::analyze;
use rustdock_screen::config::{
    default_workers, DockingBox, PipelineConfig, ReceptorSource, SearchSettings, ToolPaths,
    DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT_SECS, DEFAULT_CONVERT_TIMEOUT_SECS,
    DEFAULT_MONITOR_INTERVAL_SECS,
};
use rustdock_screen::index::{scan_directory, write_manifest};
use rustdock_screen::{logging, Pipeline, LIGAND_EXTENSION};

/// Command-line arguments for the application
#[derive(Parser, Debug)]
#[clap(
    name = "vscreen",
    version = rustdock_screen::VERSION,
    about = "Virtual screening with Open Babel, unidocktools and Uni-Dock"
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prepare a ligand library, dock it, and report the best pose
    Run(RunArgs),

    /// Report the lowest-energy result in a results directory
    Analyze {
        /// Directory holding docking result files
        #[clap(value_parser)]
        dir: PathBuf,

        /// Extension of result files
        #[clap(long, default_value = LIGAND_EXTENSION)]
        extension: String,
    },

    /// Write a ligand index from the files currently in a directory
    Index {
        /// Directory of prepared ligands
        #[clap(value_parser)]
        dir: PathBuf,

        /// Manifest to write
        #[clap(long, short, value_parser)]
        out: PathBuf,

        /// Extensions treated as ligand files
        #[clap(long, value_delimiter = ',', default_value = LIGAND_EXTENSION)]
        extensions: Vec<String>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Ligand bundle: directory, .tar, .tar.gz/.tgz or .zip
    #[clap(long, short, value_parser)]
    ligands: PathBuf,

    /// Receptor structure (PDB) to prepare with unidocktools
    #[clap(long, short, value_parser)]
    receptor: Option<PathBuf>,

    /// Already prepared receptor (PDBQT); overrides --receptor
    #[clap(long, value_parser)]
    receptor_prepared: Option<PathBuf>,

    /// Center of the search box (x,y,z)
    #[clap(long, value_parser, value_delimiter = ',', allow_hyphen_values = true)]
    center: Option<Vec<f64>>,

    /// Size of the search box (x,y,z)
    #[clap(long, value_parser, value_delimiter = ',')]
    size: Option<Vec<f64>>,

    /// Vina-style box file (center_x ... size_z), used when --center/--size are absent
    #[clap(long, short, value_parser)]
    config: Option<PathBuf>,

    /// GPU memory budget for Uni-Dock, in MB
    #[clap(long)]
    max_gpu_memory: Option<u64>,

    /// Directory for intermediate files, results and the run log
    #[clap(long, default_value = "screen_work")]
    work_dir: PathBuf,

    /// Log file (default: <work-dir>/screen.log)
    #[clap(long, value_parser)]
    log_file: Option<PathBuf>,

    /// Ligand file extensions to pick up from the bundle
    #[clap(long, value_delimiter = ',', default_value = "sdf")]
    extensions: Vec<String>,

    /// Ligands per unidocktools ligandprep call
    #[clap(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Concurrent 3D-embedding processes (default: available cores)
    #[clap(long)]
    workers: Option<usize>,

    /// Seconds allowed per 3D-embedding call
    #[clap(long, default_value_t = DEFAULT_CONVERT_TIMEOUT_SECS)]
    convert_timeout: u64,

    /// Seconds allowed per preparation batch
    #[clap(long, default_value_t = DEFAULT_BATCH_TIMEOUT_SECS)]
    batch_timeout: u64,

    /// Seconds between progress reports while docking
    #[clap(long, default_value_t = DEFAULT_MONITOR_INTERVAL_SECS)]
    monitor_interval: u64,

    /// Uni-Dock search mode (fast, balance, detail)
    #[clap(long, default_value = "balance")]
    search_mode: String,

    /// Number of binding modes to generate
    #[clap(long, default_value_t = 9)]
    num_modes: usize,

    /// Energy range for output poses (kcal/mol)
    #[clap(long, default_value_t = 3.0)]
    energy_range: f64,

    /// Open Babel executable
    #[clap(long, default_value = "obabel")]
    obabel: PathBuf,

    /// unidocktools executable
    #[clap(long, default_value = "unidocktools")]
    unidocktools: PathBuf,

    /// Uni-Dock executable
    #[clap(long, default_value = "unidock")]
    unidock: PathBuf,

    /// Exit with status 1 when the docking engine fails
    #[clap(long)]
    strict: bool,
}

impl RunArgs {
    /// Resolve the search box from flags or a box file
    fn docking_box(&self) -> Result<DockingBox> {
        match (&self.center, &self.size, &self.config) {
            (Some(c), Some(s), _) => Ok(DockingBox::from_slices(c, s)?),
            (_, _, Some(config_path)) => DockingBox::from_file(config_path)
                .with_context(|| format!("Failed to read box file: {}", config_path.display())),
            _ => Err(anyhow!(
                "Either center and size or a config file must be provided"
            )),
        }
    }

    fn into_config(self) -> Result<PipelineConfig> {
        let docking_box = self.docking_box()?;
        let receptor = ReceptorSource::choose(self.receptor, self.receptor_prepared)?;

        let mut config = PipelineConfig::new(self.ligands, receptor, docking_box);
        config.work_dir = self.work_dir;
        config.ligand_extensions = self.extensions;
        config.batch_size = self.batch_size;
        config.workers = self.workers.unwrap_or_else(default_workers);
        config.convert_timeout = Duration::from_secs(self.convert_timeout);
        config.batch_timeout = Duration::from_secs(self.batch_timeout);
        config.monitor_interval = Duration::from_secs(self.monitor_interval);
        config.search = SearchSettings {
            search_mode: self.search_mode,
            num_modes: self.num_modes,
            energy_range: self.energy_range,
            max_gpu_memory: self.max_gpu_memory,
        };
        config.tools = ToolPaths {
            obabel: self.obabel,
            unidocktools: self.unidocktools,
            unidock: self.unidock,
        };
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Usage errors exit with 1, help and version with 0
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    let result = match cli.command {
        Commands::Run(args) => return run(args).await,
        Commands::Analyze { dir, extension } => {
            init_console_logging();
            analyze_command(&dir, &extension)
        }
        Commands::Index {
            dir,
            out,
            extensions,
        } => {
            init_console_logging();
            index_command(&dir, &out, &extensions)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Stderr-only logging for the one-shot subcommands
fn init_console_logging() {
    if let Err(e) = logging::init(None) {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

async fn run(args: RunArgs) -> ExitCode {
    let log_file = args
        .log_file
        .clone()
        .unwrap_or_else(|| args.work_dir.join("screen.log"));
    if let Err(e) = logging::init(Some(&log_file)) {
        eprintln!("Failed to open log file {}: {}", log_file.display(), e);
        return ExitCode::from(1);
    }

    let strict = args.strict;
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(1);
        }
    };

    info!("rustdock-screen {}", rustdock_screen::VERSION);
    let pipeline = Pipeline::new(config);
    match pipeline.run().await {
        Ok(report) => {
            println!("{}", report.analysis);
            if strict && report.engine.is_some() && !report.engine_succeeded() {
                error!("Docking engine failed and --strict is set");
                return ExitCode::from(1);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            if e.is_configuration() {
                error!("{}", e);
            } else {
                error!("Run aborted: {}", e);
            }
            ExitCode::from(1)
        }
    }
}

fn analyze_command(dir: &Path, extension: &str) -> Result<()> {
    let report = analyze(dir, extension)
        .with_context(|| format!("Failed to analyze {}", dir.display()))?;
    println!("{}", report);
    Ok(())
}

fn index_command(dir: &Path, out: &Path, extensions: &[String]) -> Result<()> {
    let paths = scan_directory(dir, extensions)
        .with_context(|| format!("Failed to scan {}", dir.display()))?;
    write_manifest(&paths, out)
        .with_context(|| format!("Failed to write manifest {}", out.display()))?;
    println!("Wrote {} ligands to {}", paths.len(), out.display());
    Ok(())
}
