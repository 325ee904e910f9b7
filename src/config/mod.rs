use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::CopyError;

/// Default number of buffered rows per worker before partitions are flushed.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 524_288;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub name: String,
    pub source: SourceConfig,
    /// Number of worker threads; defaults to the rayon default.
    #[serde(default)]
    pub threads: Option<usize>,
    pub copy: CopyOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: String,
    pub uris: Vec<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverwriteMode {
    #[default]
    Off,
    OverwriteOrIgnore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    #[default]
    Parquet,
    Jsonl,
}

/// The top-level write strategy, chosen once per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    SingleFile,
    Rotate,
    PerThread,
    Partitioned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyOptions {
    /// Target file (single-file mode) or directory (all other modes).
    pub path: String,
    #[serde(default)]
    pub format: FormatKind,
    #[serde(default)]
    pub partition_by: Vec<String>,
    #[serde(default)]
    pub per_thread_output: bool,
    /// Rotate to a new file once the current one reaches this many bytes.
    #[serde(default)]
    pub file_size_bytes: Option<u64>,
    #[serde(default)]
    pub overwrite: OverwriteMode,
    #[serde(default)]
    pub return_files: bool,
    #[serde(default = "default_flush_threshold")]
    pub partitioned_write_flush_threshold: usize,
    #[serde(default = "default_filename_pattern")]
    pub filename_pattern: String,
    /// Overrides the format's default extension.
    #[serde(default)]
    pub file_extension: Option<String>,
    #[serde(default = "default_use_tmp_file")]
    pub use_tmp_file: bool,
    #[serde(default)]
    pub write_partition_columns: bool,
}

fn default_flush_threshold() -> usize {
    DEFAULT_FLUSH_THRESHOLD
}

fn default_filename_pattern() -> String {
    "data_{i}".to_string()
}

fn default_use_tmp_file() -> bool {
    true
}

impl CopyOptions {
    /// Options for a plain single-file copy to `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            format: FormatKind::default(),
            partition_by: Vec::new(),
            per_thread_output: false,
            file_size_bytes: None,
            overwrite: OverwriteMode::Off,
            return_files: false,
            partitioned_write_flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            filename_pattern: default_filename_pattern(),
            file_extension: None,
            use_tmp_file: true,
            write_partition_columns: false,
        }
    }

    pub fn rotate(&self) -> bool {
        self.file_size_bytes.is_some()
    }

    pub fn overwrite_or_ignore(&self) -> bool {
        self.overwrite == OverwriteMode::OverwriteOrIgnore
    }

    pub fn mode(&self) -> WriteMode {
        if !self.partition_by.is_empty() {
            WriteMode::Partitioned
        } else if self.per_thread_output {
            WriteMode::PerThread
        } else if self.rotate() {
            WriteMode::Rotate
        } else {
            WriteMode::SingleFile
        }
    }

    /// Whether the job writes a directory of files rather than a single file.
    pub fn is_multi_file(&self) -> bool {
        self.mode() != WriteMode::SingleFile
    }

    /// The tmp-file rename only applies to a plain single file.
    pub fn uses_tmp_file(&self) -> bool {
        self.use_tmp_file && self.mode() == WriteMode::SingleFile
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.path.trim().is_empty() {
            return Err(CopyError::InvalidOptions("path must not be empty".into()));
        }
        if !self.partition_by.is_empty() && self.per_thread_output {
            return Err(CopyError::InvalidOptions(
                "PARTITION_BY cannot be combined with PER_THREAD_OUTPUT".into(),
            ));
        }
        if self.partitioned_write_flush_threshold == 0 {
            return Err(CopyError::InvalidOptions(
                "partitioned_write_flush_threshold must be greater than 0".into(),
            ));
        }
        if self.file_size_bytes == Some(0) {
            return Err(CopyError::InvalidOptions(
                "file_size_bytes must be greater than 0".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for column in &self.partition_by {
            if !seen.insert(column) {
                return Err(CopyError::InvalidOptions(format!(
                    "duplicate partition column: {}",
                    column
                )));
            }
        }
        Ok(())
    }
}

impl JobConfig {
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: JobConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.source.uris.is_empty() {
            anyhow::bail!("Job '{}' must list at least one source uri", self.name);
        }
        if self.threads == Some(0) {
            anyhow::bail!("Job '{}' must use at least one thread", self.name);
        }
        self.copy
            .validate()
            .with_context(|| format!("Invalid copy options for job '{}'", self.name))?;
        Ok(())
    }
}
