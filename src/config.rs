use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Run parameters, read from a JSON file (default `params/params.json`).
///
/// ```json
/// {
///   "dx_files": ["input_files/Device2_20241230.dx"],
///   "json_file": "output/nir.json",
///   "database": "output/nir.sqlite",
///   "dumas_files": ["input_files/Device1_20241230.txt"],
///   "log_dir": "logs"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    #[serde(default)]
    pub dx_files: Vec<PathBuf>,
    /// Single-file form accepted for older parameter files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dx_file: Option<PathBuf>,
    pub json_file: PathBuf,
    pub database: PathBuf,
    #[serde(default)]
    pub dumas_files: Vec<PathBuf>,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

pub const DEFAULT_PARAMS_PATH: &str = "params/params.json";

impl Params {
    /// All instrument exports to parse, legacy `dx_file` first.
    pub fn dx_inputs(&self) -> Vec<PathBuf> {
        self.dx_file
            .iter()
            .chain(self.dx_files.iter())
            .cloned()
            .collect()
    }

    pub fn report_path(&self, command: &str) -> PathBuf {
        self.log_dir.join(format!("{command}_report.json"))
    }
}

pub fn load_params(path: &Path) -> Result<Params> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading parameters from {}", path.display()))?;
    let params: Params = serde_json::from_str(&text)
        .with_context(|| format!("parsing parameters in {}", path.display()))?;
    if params.json_file.as_os_str().is_empty() {
        bail!("{}: json_file must not be empty", path.display());
    }
    Ok(params)
}
