//! Error types for the COPY TO sink.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CopyError>;

#[derive(Debug, Error)]
pub enum CopyError {
    /// Multi-file output targets a path that is a plain file.
    #[error("Cannot write to \"{}\" - it exists and is a file, not a directory! Enable OVERWRITE_OR_IGNORE option to force writing", path.display())]
    TargetIsFile { path: PathBuf },

    /// Remote targets cannot be removed, so an existing file is always fatal.
    #[error("Cannot write to \"{}\" - it exists and is a file, not a directory!", path.display())]
    RemoteNotRemovable { path: PathBuf },

    #[error("Directory \"{}\" is not empty! Enable OVERWRITE_OR_IGNORE option to force writing", path.display())]
    DirectoryNotEmpty { path: PathBuf },

    /// Single-file output targets an existing file without overwrite.
    #[error("File \"{}\" already exists! Enable OVERWRITE_OR_IGNORE option to force writing", path.display())]
    TargetExists { path: PathBuf },

    #[error("Cannot write a single file to \"{}\" - it exists and is a directory", path.display())]
    TargetIsDirectory { path: PathBuf },

    #[error("Invalid copy options: {0}")]
    InvalidOptions(String),

    #[error("Partition column \"{0}\" not found in input schema")]
    UnknownPartitionColumn(String),

    #[error("I/O error on \"{}\": {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),


    /// Finalize was reached while some worker never ran Combine.
    #[error("{0} worker(s) have not combined their local state")]
    WorkersOutstanding(usize),

    #[error("Output writer is unavailable (already finalized)")]
    WriterUnavailable,
}

impl CopyError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CopyError::Io {
            path: path.into(),
            source,
        }
    }

    /// Check if this is a precondition failure raised before any row is written.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            CopyError::TargetIsFile { .. }
                | CopyError::RemoteNotRemovable { .. }
                | CopyError::DirectoryNotEmpty { .. }
                | CopyError::TargetExists { .. }
                | CopyError::TargetIsDirectory { .. }
        )
    }
}
