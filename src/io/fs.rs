use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{CopyError, Result};

/// Filesystem operations needed to prepare and commit output files.
///
/// Writers open their own files; this trait only covers the directory and
/// file bookkeeping done around them.
pub trait FileSystem: Send + Sync {
    /// True if `path` exists and is a plain file (not a directory).
    fn file_exists(&self, path: &Path) -> bool;

    fn directory_exists(&self, path: &Path) -> bool;

    fn create_directory(&self, path: &Path) -> Result<()>;

    fn remove_file(&self, path: &Path) -> Result<()>;

    fn move_file(&self, from: &Path, to: &Path) -> Result<()>;

    /// All files below `dir` at any depth. Directories are not returned.
    fn list_files_recursive(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// Remote (object store) targets do not support removing files.
    fn is_remote_file(&self, _path: &Path) -> bool {
        false
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl FileSystem for LocalFileSystem {
    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn directory_exists(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_directory(&self, path: &Path) -> Result<()> {
        std::fs::create_dir_all(path).map_err(|e| CopyError::io(path, e))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).map_err(|e| CopyError::io(path, e))
    }

    fn move_file(&self, from: &Path, to: &Path) -> Result<()> {
        std::fs::rename(from, to).map_err(|e| CopyError::io(from, e))
    }

    fn list_files_recursive(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1) {
            let entry = entry.map_err(|e| CopyError::io(dir, e.into()))?;
            if !entry.file_type().is_dir() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}
