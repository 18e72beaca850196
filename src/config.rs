use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::FontGogglesError;

pub const WORKER_ENV: &str = "FONTGOGGLES_WORKER";
pub const MAX_WORKERS_ENV: &str = "FONTGOGGLES_MAX_WORKERS";
const WORKER_BINARY: &str = "fontgoggles-worker";

/// Runtime configuration for loading fonts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Upper bound on the number of compiler subprocesses.
    pub max_workers: usize,
    /// The worker executable. When absent, `fontgoggles-worker` is looked up
    /// next to the current executable.
    pub worker_program: Option<PathBuf>,
    /// Extra arguments passed to every worker.
    pub worker_args: Vec<String>,
    /// Extra environment variables passed to every worker.
    pub worker_env: Vec<(String, String)>,
    /// Tables left out of variable fonts built from designspaces.
    pub merge_exclude: Vec<String>,
    /// Yield to the scheduler after this many fonts during bulk loads.
    pub yield_every: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_workers: 5,
            worker_program: None,
            worker_args: vec![],
            worker_env: vec![],
            merge_exclude: ["MVAR", "HVAR", "VVAR", "STAT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            yield_every: 1,
        }
    }
}

impl Config {
    /// The default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// Read a configuration from a JSON file; missing keys take their defaults.
    pub fn from_json(path: impl AsRef<Path>) -> Result<Self, FontGogglesError> {
        let buffered = std::io::BufReader::new(std::fs::File::open(path)?);
        let mut config: Config = serde_json::from_reader(buffered)?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(program) = std::env::var(WORKER_ENV) {
            self.worker_program = Some(PathBuf::from(program));
        }
        if let Ok(max) = std::env::var(MAX_WORKERS_ENV) {
            match max.parse::<usize>() {
                Ok(n) if n > 0 => self.max_workers = n,
                _ => log::warn!("Ignoring invalid {}={:?}", MAX_WORKERS_ENV, max),
            }
        }
    }

    /// Builder-style setter for the worker executable.
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    /// Builder-style setter for the worker limit.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Resolve the worker executable to run.
    pub fn resolve_worker_program(&self) -> PathBuf {
        if let Some(program) = &self.worker_program {
            return program.clone();
        }
        let exe_name = format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX);
        if let Ok(current) = std::env::current_exe() {
            // Test harnesses live one directory below the binaries
            for dir in current.ancestors().skip(1).take(2) {
                let candidate = dir.join(&exe_name);
                if candidate.exists() {
                    return candidate;
                }
            }
        }
        PathBuf::from(exe_name)
    }
}
