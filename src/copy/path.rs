//! Output naming and target directory policy.

use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::CopyOptions;
use crate::error::{CopyError, Result};
use crate::io::FileSystem;

const TMP_PREFIX: &str = "tmp_";

/// Deterministic file naming: `dir / pattern(offset) . extension`
///
/// Supported placeholders:
///   - `{i}`: file offset
///   - `{i:NN}`: file offset zero-padded to NN digits
///   - `{uuid}`: random v4 UUID, fresh for every file
///
/// A template without placeholders gets the offset appended.
#[derive(Debug, Clone)]
pub struct FilenamePattern {
    template: String,
    index: Regex,
    has_placeholder: bool,
}

impl FilenamePattern {
    pub fn new(template: &str) -> Result<Self> {
        let index = Regex::new(r"\{i(?::(\d+))?\}")
            .map_err(|e| CopyError::InvalidOptions(format!("filename pattern: {}", e)))?;
        let has_placeholder = index.is_match(template) || template.contains("{uuid}");
        Ok(Self {
            template: template.to_string(),
            index,
            has_placeholder,
        })
    }

    pub fn render(&self, offset: u64) -> String {
        if !self.has_placeholder {
            return format!("{}{}", self.template, offset);
        }
        let mut result = self.template.clone();
        while result.contains("{uuid}") {
            result = result.replacen("{uuid}", &Uuid::new_v4().to_string(), 1);
        }
        self.index
            .replace_all(&result, |caps: &regex::Captures| match caps.get(1) {
                Some(width) => {
                    let width = width.as_str().parse::<usize>().unwrap_or(0);
                    format!("{:0width$}", offset, width = width)
                }
                None => offset.to_string(),
            })
            .to_string()
    }

    pub fn create_filename(&self, dir: &Path, extension: &str, offset: u64) -> PathBuf {
        let name = self.render(offset);
        if extension.is_empty() {
            dir.join(name)
        } else {
            dir.join(format!("{}.{}", name, extension))
        }
    }
}

/// Target path with trailing separators removed
pub fn trimmed_path(path: &str) -> PathBuf {
    let trimmed = path.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() {
        PathBuf::from(path)
    } else {
        PathBuf::from(trimmed)
    }
}

/// `dir/name` becomes `dir/tmp_name`
pub fn tmp_file_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}", TMP_PREFIX, name))
}

/// Strip a leading `tmp_` from the file name
pub fn non_tmp_file(path: &Path) -> PathBuf {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) if name.starts_with(TMP_PREFIX) => {
            path.with_file_name(&name[TMP_PREFIX.len()..])
        }
        _ => path.to_path_buf(),
    }
}

/// Replace the final file with the finished tmp file.
///
/// Remove-then-move: a crash between the two steps leaves only the tmp file.
pub fn move_tmp_file(fs: &dyn FileSystem, tmp_file_path: &Path) -> Result<()> {
    let file_path = non_tmp_file(tmp_file_path);
    if fs.file_exists(&file_path) {
        fs.remove_file(&file_path)?;
    }
    fs.move_file(tmp_file_path, &file_path)?;
    info!(from = %tmp_file_path.display(), to = %file_path.display(), "Moved tmp file into place");
    Ok(())
}

/// Validate and prepare the target before any row is written
pub fn prepare_target(fs: &dyn FileSystem, options: &CopyOptions, file_path: &Path) -> Result<()> {
    let overwrite = options.overwrite_or_ignore();

    if !options.is_multi_file() {
        if fs.directory_exists(file_path) {
            return Err(CopyError::TargetIsDirectory {
                path: file_path.to_path_buf(),
            });
        }
        if fs.file_exists(file_path) && !overwrite {
            return Err(CopyError::TargetExists {
                path: file_path.to_path_buf(),
            });
        }
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() && !fs.directory_exists(parent) {
                fs.create_directory(parent)?;
            }
        }
        return Ok(());
    }

    if fs.file_exists(file_path) {
        // The target exists and is a file, not a directory
        if fs.is_remote_file(file_path) {
            return Err(CopyError::RemoteNotRemovable {
                path: file_path.to_path_buf(),
            });
        }
        if !overwrite {
            return Err(CopyError::TargetIsFile {
                path: file_path.to_path_buf(),
            });
        }
        fs.remove_file(file_path)?;
        info!(path = %file_path.display(), "Removed existing file at target path");
    }

    if !fs.directory_exists(file_path) {
        fs.create_directory(file_path)?;
    } else {
        check_directory(fs, file_path, overwrite)?;
    }
    Ok(())
}

/// Fail on a non-empty directory, or remove every file below it when overwriting.
/// Directories are kept so they can be reused.
fn check_directory(fs: &dyn FileSystem, dir: &Path, overwrite: bool) -> Result<()> {
    if fs.is_remote_file(dir) && overwrite {
        // Remote file systems do not support removing files
        return Ok(());
    }
    let files = fs.list_files_recursive(dir)?;
    if files.is_empty() {
        return Ok(());
    }
    if !overwrite {
        return Err(CopyError::DirectoryNotEmpty {
            path: dir.to_path_buf(),
        });
    }
    for file in &files {
        fs.remove_file(file)?;
        debug!(path = %file.display(), "Removed existing output file");
    }
    info!(path = %dir.display(), files = files.len(), "Cleared existing output directory");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverwriteMode;
    use crate::io::LocalFileSystem;
    use tempfile::TempDir;

    #[test]
    fn test_default_pattern_appends_index_and_extension() {
        let pattern = FilenamePattern::new("data_{i}").unwrap();
        assert_eq!(
            pattern.create_filename(Path::new("out"), "parquet", 3),
            PathBuf::from("out/data_3.parquet")
        );
    }

    #[test]
    fn test_padded_pattern() {
        let pattern = FilenamePattern::new("part-{i:05}").unwrap();
        assert_eq!(pattern.render(42), "part-00042");
    }

    #[test]
    fn test_pattern_without_placeholder_gets_offset() {
        let pattern = FilenamePattern::new("chunk").unwrap();
        assert_eq!(pattern.render(7), "chunk7");
    }

    #[test]
    fn test_uuid_pattern_is_unique() {
        let pattern = FilenamePattern::new("file_{uuid}").unwrap();
        let a = pattern.render(0);
        let b = pattern.render(0);
        assert_ne!(a, b);
        assert!(a.starts_with("file_"));
        assert_eq!(a.len(), "file_".len() + 36);
    }

    #[test]
    fn test_tmp_file_names() {
        let tmp = tmp_file_path(Path::new("dir/out.csv"));
        assert_eq!(tmp, PathBuf::from("dir/tmp_out.csv"));
        assert_eq!(non_tmp_file(&tmp), PathBuf::from("dir/out.csv"));
        assert_eq!(
            non_tmp_file(Path::new("dir/out.csv")),
            PathBuf::from("dir/out.csv")
        );
    }

    #[test]
    fn test_trimmed_path() {
        assert_eq!(trimmed_path("out/dir///"), PathBuf::from("out/dir"));
        assert_eq!(trimmed_path("/"), PathBuf::from("/"));
    }

    #[test]
    fn test_non_empty_directory_requires_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("year=2020");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("data_0.parquet"), b"old").unwrap();

        let options = CopyOptions {
            partition_by: vec!["year".into()],
            ..CopyOptions::new(temp_dir.path().to_string_lossy())
        };
        let err = prepare_target(&LocalFileSystem, &options, temp_dir.path()).unwrap_err();
        assert!(matches!(err, CopyError::DirectoryNotEmpty { .. }));

        let options = CopyOptions {
            overwrite: OverwriteMode::OverwriteOrIgnore,
            ..options
        };
        prepare_target(&LocalFileSystem, &options, temp_dir.path()).unwrap();
        assert!(nested.is_dir());
        assert!(!nested.join("data_0.parquet").exists());
    }

    #[test]
    fn test_existing_file_blocks_multi_file_output() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("out");
        std::fs::write(&target, b"file").unwrap();

        let options = CopyOptions {
            per_thread_output: true,
            ..CopyOptions::new(target.to_string_lossy())
        };
        let err = prepare_target(&LocalFileSystem, &options, &target).unwrap_err();
        assert!(matches!(err, CopyError::TargetIsFile { .. }));

        let options = CopyOptions {
            overwrite: OverwriteMode::OverwriteOrIgnore,
            ..options
        };
        prepare_target(&LocalFileSystem, &options, &target).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn test_single_file_target_exists_without_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("out.parquet");
        std::fs::write(&target, b"old").unwrap();

        let options = CopyOptions::new(target.to_string_lossy());
        let err = prepare_target(&LocalFileSystem, &options, &target).unwrap_err();
        assert!(matches!(err, CopyError::TargetExists { .. }));
        assert!(err.is_precondition());
    }
}
