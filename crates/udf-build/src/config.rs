//! Build configuration: output location, worker pool, time budgets and
//! dialect toolchains.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// An external program used by a compiler strategy.
///
/// The program is invoked as `<program> <args..> <strategy args..>`, so a
/// wrapper such as `sh fake-javac.sh` can be expressed as
/// `program = "sh"`, `args = ["fake-javac.sh"]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolchainConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolchainConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

/// Configuration for a UDF build batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuildConfig {
    /// Well-known archive location, overwritten by every successful batch.
    pub output_path: PathBuf,
    /// Directory under which per-unit workspaces are created.
    pub workspace_root: PathBuf,
    /// Maximum number of units compiling at once.
    pub max_workers: usize,
    /// Time budget for a single unit (milliseconds).
    pub unit_timeout_ms: u64,
    /// Optional supervising budget for the whole batch (milliseconds).
    pub batch_timeout_ms: Option<u64>,
    pub java: ToolchainConfig,
    pub scala: ToolchainConfig,
    /// When set, Python sources are also byte-compiled by this interpreter.
    pub python: Option<ToolchainConfig>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            output_path: tmp.join("udf").join("udf.jar"),
            workspace_root: tmp,
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            unit_timeout_ms: 60_000,
            batch_timeout_ms: None,
            java: ToolchainConfig::new("javac"),
            scala: ToolchainConfig::new("scalac"),
            python: None,
        }
    }
}

impl BuildConfig {
    /// Config with the given archive path and defaults for everything else.
    pub fn with_output(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            ..Self::default()
        }
    }

    /// Load from a TOML file. Missing keys take their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay values from environment variables.
    ///
    /// Reads:
    /// - UDF_BUILD_OUTPUT
    /// - UDF_BUILD_WORKERS
    /// - UDF_BUILD_UNIT_TIMEOUT_MS
    /// - UDF_BUILD_JAVAC
    /// - UDF_BUILD_SCALAC
    /// - UDF_BUILD_PYTHON
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Ok(output) = std::env::var("UDF_BUILD_OUTPUT") {
            self.output_path = PathBuf::from(output);
        }
        if let Ok(workers) = std::env::var("UDF_BUILD_WORKERS") {
            self.max_workers = workers.parse().map_err(|_| {
                ConfigError::Invalid(format!("UDF_BUILD_WORKERS is not a number: {workers}"))
            })?;
        }
        if let Ok(timeout) = std::env::var("UDF_BUILD_UNIT_TIMEOUT_MS") {
            self.unit_timeout_ms = timeout.parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "UDF_BUILD_UNIT_TIMEOUT_MS is not a number: {timeout}"
                ))
            })?;
        }
        if let Ok(javac) = std::env::var("UDF_BUILD_JAVAC") {
            self.java = ToolchainConfig::new(javac);
        }
        if let Ok(scalac) = std::env::var("UDF_BUILD_SCALAC") {
            self.scala = ToolchainConfig::new(scalac);
        }
        if let Ok(python) = std::env::var("UDF_BUILD_PYTHON") {
            self.python = Some(ToolchainConfig::new(python));
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output_path must not be empty".into()));
        }
        if self.output_path.file_name().is_none() {
            return Err(ConfigError::Invalid(format!(
                "output_path has no file name: {}",
                self.output_path.display()
            )));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if self.unit_timeout_ms == 0 {
            return Err(ConfigError::Invalid("unit_timeout_ms must be positive".into()));
        }
        if self.batch_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid("batch_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_millis(self.unit_timeout_ms)
    }

    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_ms.map(Duration::from_millis)
    }
}
