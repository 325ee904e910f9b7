//! copyto: a parallel COPY TO sink for Arrow record batches.
//!
//! Batches produced by many workers are written as one file, a series of
//! size-rotated files, one file per worker, or a hive-partitioned directory
//! tree (`col=value/...`).

pub mod config;
pub mod copy;
pub mod error;
pub mod io;
pub mod runtime;

pub use config::{CopyOptions, FormatKind, JobConfig, OverwriteMode, WriteMode};
pub use copy::{CopySummary, CopyToFile};
pub use error::{CopyError, Result};
