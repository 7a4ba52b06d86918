//! Run configuration: docking box, tool locations, and pipeline tunables

use nalgebra::Vector3;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default number of ligands handed to one `unidocktools ligandprep` call
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default wall-clock budget for one 3D-embedding call, in seconds
pub const DEFAULT_CONVERT_TIMEOUT_SECS: u64 = 10;

/// Default wall-clock budget for one sanitization batch, in seconds
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 600;

/// Default interval between progress snapshots, in seconds
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 3600;

/// Errors in user-supplied configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Missing configuration values for center or box size")]
    MissingBox,

    #[error("Expected 3 values for {name}, got {count}")]
    WrongArity { name: &'static str, count: usize },

    #[error("Box size must be positive in every dimension, got ({0}, {1}, {2})")]
    InvalidBoxSize(f64, f64, f64),

    #[error("Batch size must be at least 1")]
    InvalidBatchSize,

    #[error("Worker count must be at least 1")]
    InvalidWorkers,

    #[error("Either a receptor structure or a prepared receptor must be provided")]
    MissingReceptor,

    #[error("Required input not found: {0}")]
    MissingInput(PathBuf),

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("Input {0} lies inside a directory the run clears; move it out of the work directory")]
    InputInsideWorkDir(PathBuf),
}

/// Search box handed to the docking engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DockingBox {
    /// Center of the box in Angstroms
    pub center: Vector3<f64>,

    /// Edge lengths of the box in Angstroms
    pub size: Vector3<f64>,
}

impl DockingBox {
    /// Create a box, rejecting non-positive edge lengths
    pub fn new(center: Vector3<f64>, size: Vector3<f64>) -> Result<Self, ConfigError> {
        if size.iter().any(|v| !(*v > 0.0)) {
            return Err(ConfigError::InvalidBoxSize(size.x, size.y, size.z));
        }
        Ok(Self { center, size })
    }

    /// Build a box from the comma-separated `--center` / `--size` values
    pub fn from_slices(center: &[f64], size: &[f64]) -> Result<Self, ConfigError> {
        let center = to_vector(center, "center")?;
        let size = to_vector(size, "size")?;
        Self::new(center, size)
    }

    /// Read a Vina-style box file (`center_x = 1.0` ... `size_z = 20`)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::MissingInput(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        parse_box_config(&text)
    }
}

fn to_vector(values: &[f64], name: &'static str) -> Result<Vector3<f64>, ConfigError> {
    match values {
        [x, y, z] => Ok(Vector3::new(*x, *y, *z)),
        _ => Err(ConfigError::WrongArity {
            name,
            count: values.len(),
        }),
    }
}

/// Parse center and box size from a Vina-style configuration file
pub fn parse_box_config(config_str: &str) -> Result<DockingBox, ConfigError> {
    let mut center_x = None;
    let mut center_y = None;
    let mut center_z = None;
    let mut size_x = None;
    let mut size_y = None;
    let mut size_z = None;

    for (idx, line) in config_str.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();

        let slot = match key {
            "center_x" => &mut center_x,
            "center_y" => &mut center_y,
            "center_z" => &mut center_z,
            "size_x" => &mut size_x,
            "size_y" => &mut size_y,
            "size_z" => &mut size_z,
            _ => continue, // Ignore other keys
        };

        let parsed = value.parse::<f64>().map_err(|_| ConfigError::Parse {
            line: idx + 1,
            message: format!("Invalid value for {}: {}", key, value),
        })?;
        *slot = Some(parsed);
    }

    match (center_x, center_y, center_z, size_x, size_y, size_z) {
        (Some(cx), Some(cy), Some(cz), Some(sx), Some(sy), Some(sz)) => {
            DockingBox::new(Vector3::new(cx, cy, cz), Vector3::new(sx, sy, sz))
        }
        _ => Err(ConfigError::MissingBox),
    }
}

/// Locations of the external programs the pipeline drives
#[derive(Debug, Clone, Serialize)]
pub struct ToolPaths {
    /// Open Babel, used for 3D embedding
    pub obabel: PathBuf,

    /// Uni-Dock tools, used for ligand and protein preparation
    pub unidocktools: PathBuf,

    /// The Uni-Dock engine
    pub unidock: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            obabel: PathBuf::from("obabel"),
            unidocktools: PathBuf::from("unidocktools"),
            unidock: PathBuf::from("unidock"),
        }
    }
}

/// How the receptor enters the run
#[derive(Debug, Clone, Serialize)]
pub enum ReceptorSource {
    /// A raw structure that still has to go through `unidocktools proteinprep`
    Structure(PathBuf),

    /// A receptor that is already in PDBQT form
    Prepared(PathBuf),
}

impl ReceptorSource {
    /// Pick the receptor source; a prepared receptor overrides a raw structure
    pub fn choose(
        structure: Option<PathBuf>,
        prepared: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        match (prepared, structure) {
            (Some(p), _) => Ok(Self::Prepared(p)),
            (None, Some(s)) => Ok(Self::Structure(s)),
            (None, None) => Err(ConfigError::MissingReceptor),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Structure(p) | Self::Prepared(p) => p,
        }
    }
}

/// Engine search settings passed straight through to `unidock`
#[derive(Debug, Clone, Serialize)]
pub struct SearchSettings {
    pub search_mode: String,
    pub num_modes: usize,
    pub energy_range: f64,
    pub max_gpu_memory: Option<u64>,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            search_mode: "balance".to_string(),
            num_modes: 9,
            energy_range: 3.0,
            max_gpu_memory: None,
        }
    }
}

/// Everything a pipeline run needs
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Ligand bundle: a directory, `.tar`, `.tar.gz`/`.tgz` or `.zip`
    pub ligands: PathBuf,

    pub receptor: ReceptorSource,

    pub docking_box: DockingBox,

    pub search: SearchSettings,

    /// Root of all intermediate and output directories
    pub work_dir: PathBuf,

    /// Extensions (without dot) treated as ligand structure files
    pub ligand_extensions: Vec<String>,

    pub batch_size: usize,

    /// Maximum number of concurrent 3D-embedding processes
    pub workers: usize,

    #[serde(with = "secs")]
    pub convert_timeout: Duration,

    #[serde(with = "secs")]
    pub batch_timeout: Duration,

    #[serde(with = "secs")]
    pub monitor_interval: Duration,

    pub tools: ToolPaths,
}

impl PipelineConfig {
    /// Create a configuration with default tunables
    pub fn new(ligands: PathBuf, receptor: ReceptorSource, docking_box: DockingBox) -> Self {
        Self {
            ligands,
            receptor,
            docking_box,
            search: SearchSettings::default(),
            work_dir: PathBuf::from("screen_work"),
            ligand_extensions: vec!["sdf".to_string()],
            batch_size: DEFAULT_BATCH_SIZE,
            workers: default_workers(),
            convert_timeout: Duration::from_secs(DEFAULT_CONVERT_TIMEOUT_SECS),
            batch_timeout: Duration::from_secs(DEFAULT_BATCH_TIMEOUT_SECS),
            monitor_interval: Duration::from_secs(DEFAULT_MONITOR_INTERVAL_SECS),
            tools: ToolPaths::default(),
        }
    }

    /// Check the settings that do not depend on external programs
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }
        if self.workers == 0 {
            return Err(ConfigError::InvalidWorkers);
        }
        let durations = [
            ("convert timeout", self.convert_timeout),
            ("batch timeout", self.batch_timeout),
            ("monitor interval", self.monitor_interval),
        ];
        if let Some(&(name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroDuration(name));
        }
        if !self.ligands.exists() {
            return Err(ConfigError::MissingInput(self.ligands.clone()));
        }
        if !self.receptor.path().is_file() {
            return Err(ConfigError::MissingInput(self.receptor.path().to_path_buf()));
        }

        let stage_dirs: Vec<PathBuf> = self.stage_dirs().iter().map(|d| canonical(d)).collect();
        for input in [self.ligands.as_path(), self.receptor.path()] {
            let input = canonical(input);
            if stage_dirs.iter().any(|dir| input.starts_with(dir)) {
                return Err(ConfigError::InputInsideWorkDir(input));
            }
        }
        Ok(())
    }

    /// Directories owned by a single run; each is emptied before the run starts
    pub fn stage_dirs(&self) -> [PathBuf; 5] {
        [
            self.raw_dir(),
            self.processed_dir(),
            self.prepared_dir(),
            self.receptor_dir(),
            self.results_dir(),
        ]
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.work_dir.join("raw")
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.work_dir.join("processed")
    }

    pub fn prepared_dir(&self) -> PathBuf {
        self.work_dir.join("prepared")
    }

    pub fn receptor_dir(&self) -> PathBuf {
        self.work_dir.join("receptor")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.work_dir.join("results")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.work_dir.join("ligands.txt")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.work_dir.join("summary.json")
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Number of worker slots for file-level conversion
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_box_config() {
        let text = "# box\ncenter_x = 1.5\ncenter_y=-2\ncenter_z = 0\n\nsize_x = 20\nsize_y = 22\nsize_z = 24\nexhaustiveness = 8\n";
        let b = parse_box_config(text).unwrap();
        assert_eq!(b.center, Vector3::new(1.5, -2.0, 0.0));
        assert_eq!(b.size, Vector3::new(20.0, 22.0, 24.0));
    }

    #[test]
    fn test_parse_box_config_missing_value() {
        let text = "center_x = 1\ncenter_y = 2\nsize_x = 20\nsize_y = 20\nsize_z = 20\n";
        assert!(matches!(parse_box_config(text), Err(ConfigError::MissingBox)));
    }

    #[test]
    fn test_parse_box_config_bad_number() {
        let text = "center_x = abc\n";
        match parse_box_config(text) {
            Err(ConfigError::Parse { line, .. }) => assert_eq!(line, 1),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_box_from_slices() {
        let b = DockingBox::from_slices(&[1.0, 2.0, 3.0], &[10.0, 10.0, 10.0]).unwrap();
        assert_eq!(b.center.y, 2.0);

        assert!(matches!(
            DockingBox::from_slices(&[1.0, 2.0], &[10.0, 10.0, 10.0]),
            Err(ConfigError::WrongArity { name: "center", count: 2 })
        ));
        assert!(matches!(
            DockingBox::from_slices(&[0.0, 0.0, 0.0], &[10.0, 0.0, 10.0]),
            Err(ConfigError::InvalidBoxSize(..))
        ));
    }

    #[test]
    fn test_receptor_override_wins() {
        let src = ReceptorSource::choose(
            Some(PathBuf::from("protein.pdb")),
            Some(PathBuf::from("protein.pdbqt")),
        )
        .unwrap();
        assert!(matches!(src, ReceptorSource::Prepared(_)));
        assert!(ReceptorSource::choose(None, None).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let dir = tempfile::tempdir().unwrap();
        let receptor = dir.path().join("r.pdbqt");
        std::fs::write(&receptor, "END\n").unwrap();
        let mut cfg = PipelineConfig::new(
            dir.path().to_path_buf(),
            ReceptorSource::Prepared(receptor),
            DockingBox::from_slices(&[0.0; 3], &[20.0; 3]).unwrap(),
        );
        assert!(cfg.validate().is_ok());

        cfg.batch_size = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidBatchSize)));
    }

    #[test]
    fn test_validate_rejects_zero_durations() {
        let dir = tempfile::tempdir().unwrap();
        let receptor = dir.path().join("r.pdbqt");
        std::fs::write(&receptor, "END\n").unwrap();
        let base = PipelineConfig::new(
            dir.path().to_path_buf(),
            ReceptorSource::Prepared(receptor),
            DockingBox::from_slices(&[0.0; 3], &[20.0; 3]).unwrap(),
        );

        let mut cfg = base.clone();
        cfg.monitor_interval = Duration::ZERO;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ZeroDuration("monitor interval"))
        ));

        let mut cfg = base.clone();
        cfg.convert_timeout = Duration::ZERO;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ZeroDuration("convert timeout"))
        ));

        let mut cfg = base;
        cfg.batch_timeout = Duration::from_millis(1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inputs_inside_stage_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("work");
        let ligands = work.join("raw").join("library");
        std::fs::create_dir_all(&ligands).unwrap();
        let receptor = dir.path().join("r.pdbqt");
        std::fs::write(&receptor, "END\n").unwrap();

        let mut cfg = PipelineConfig::new(
            ligands,
            ReceptorSource::Prepared(receptor),
            DockingBox::from_slices(&[0.0; 3], &[20.0; 3]).unwrap(),
        );
        cfg.work_dir = work.clone();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InputInsideWorkDir(_))
        ));

        // Elsewhere in the work directory is fine
        let library = work.join("library");
        std::fs::create_dir_all(&library).unwrap();
        cfg.ligands = library;
        assert!(cfg.validate().is_ok());
    }
}
