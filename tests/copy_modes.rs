use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tempfile::TempDir;
use walkdir::WalkDir;

use copyto::io::{FileSystem, JsonlWriter, LocalFileSystem, ParquetWriter};
use copyto::runtime::copy_batches;
use copyto::{CopyError, CopyOptions, CopyToFile, OverwriteMode};

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("year", DataType::Int64, false),
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
    ]))
}

/// `batches` batches of `rows` rows; the year cycles through `years`
fn make_batches(batches: usize, rows: usize, years: &[i64]) -> Vec<RecordBatch> {
    (0..batches)
        .map(|b| {
            let ids: Vec<i64> = (0..rows).map(|r| (b * rows + r) as i64).collect();
            let year: Vec<i64> = ids
                .iter()
                .map(|id| years[*id as usize % years.len()])
                .collect();
            let names: Vec<String> = ids.iter().map(|id| format!("row-{}", id)).collect();
            RecordBatch::try_new(
                schema(),
                vec![
                    Arc::new(Int64Array::from(year)),
                    Arc::new(Int64Array::from(ids)),
                    Arc::new(StringArray::from(names)),
                ],
            )
            .unwrap()
        })
        .collect()
}

fn files_below(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

fn jsonl_rows(path: &Path) -> usize {
    std::fs::read_to_string(path).unwrap().lines().count()
}

fn parquet_rows(path: &Path) -> usize {
    ParquetRecordBatchReaderBuilder::try_new(File::open(path).unwrap())
        .unwrap()
        .build()
        .unwrap()
        .map(|b| b.unwrap().num_rows())
        .sum()
}

fn names(paths: &[PathBuf]) -> BTreeSet<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect()
}

#[test]
fn test_partitioned_by_year_with_four_workers() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("events");
    let options = CopyOptions {
        partition_by: vec!["year".into()],
        partitioned_write_flush_threshold: 150,
        return_files: true,
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(JsonlWriter::new().with_buffer_size(0), options, schema()).unwrap();

    let summary = copy_batches(&op, make_batches(20, 100, &[2020, 2021]), 4).unwrap();

    assert_eq!(summary.rows_written, 2000);
    let dirs: BTreeSet<String> = std::fs::read_dir(&target)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(
        dirs,
        BTreeSet::from(["year=2020".to_string(), "year=2021".to_string()])
    );

    let files = files_below(&target);
    assert_eq!(files.len(), 2);
    for year in ["year=2020", "year=2021"] {
        let rows: usize = files
            .iter()
            .filter(|f| f.parent().unwrap().ends_with(year))
            .map(|f| jsonl_rows(f))
            .sum();
        assert_eq!(rows, 1000);
    }

    let mut reported = summary.file_paths.unwrap();
    reported.sort();
    let on_disk: Vec<String> = files
        .iter()
        .map(|f| f.to_string_lossy().to_string())
        .collect();
    assert_eq!(reported, on_disk);

    // Partition column lives in the directory name only
    let first = std::fs::read_to_string(&files[0]).unwrap();
    assert!(!first.contains("\"year\""));
}

#[test]
fn test_one_entry_per_distinct_key() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("out");
    let years = [1, 2, 3, 4, 5, 6, 7];
    let options = CopyOptions {
        partition_by: vec!["year".into()],
        partitioned_write_flush_threshold: 10,
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(JsonlWriter::new(), options, schema()).unwrap();
    let global = op.initialize_global().unwrap();

    let mut locals: Vec<_> = (0..3).map(|_| op.local_state(&global).unwrap()).collect();
    for (i, batch) in make_batches(12, 9, &years).iter().enumerate() {
        op.sink(&global, &mut locals[i % 3], batch).unwrap();
    }
    for local in locals {
        op.combine(&global, local).unwrap();
    }
    assert_eq!(global.partition_count(), years.len());
    // The target plus one directory per key
    assert_eq!(global.created_directory_count(), years.len() + 1);

    let summary = op.finalize(global).unwrap();
    assert_eq!(summary.rows_written, 108);
    let total: usize = files_below(&target).iter().map(|f| jsonl_rows(f)).sum();
    assert_eq!(total, 108);
}

#[test]
fn test_null_and_literal_null_keys_do_not_share_a_file() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("out");
    let schema = Arc::new(Schema::new(vec![
        Field::new("k", DataType::Utf8, true),
        Field::new("id", DataType::Int64, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(vec![None, Some("NULL")])),
            Arc::new(Int64Array::from(vec![1, 2])),
        ],
    )
    .unwrap();
    let options = CopyOptions {
        partition_by: vec!["k".into()],
        return_files: true,
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(JsonlWriter::new(), options, schema).unwrap();

    let summary = copy_batches(&op, vec![batch], 1).unwrap();

    assert_eq!(summary.rows_written, 2);
    let total: usize = files_below(&target).iter().map(|f| jsonl_rows(f)).sum();
    assert_eq!(total, 2);
    assert!(target.join("k=__HIVE_DEFAULT_PARTITION__").is_dir());
    assert!(target.join("k=NULL").is_dir());

    let reported = summary.file_paths.unwrap();
    let distinct: BTreeSet<&String> = reported.iter().collect();
    assert_eq!(reported.len(), 2);
    assert_eq!(distinct.len(), 2);
}

#[test]
fn test_rotation_splits_output() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("rotated");
    let options = CopyOptions {
        file_size_bytes: Some(500),
        return_files: true,
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(JsonlWriter::new().with_buffer_size(0), options, schema()).unwrap();

    let summary = copy_batches(&op, make_batches(30, 10, &[2020]), 4).unwrap();

    let files = files_below(&target);
    assert!(files.len() > 1, "expected rotation, got {:?}", files);
    assert_eq!(summary.file_paths.as_ref().map(|f| f.len()), Some(files.len()));
    let total: usize = files.iter().map(|f| jsonl_rows(f)).sum();
    assert_eq!(total, 300);
    assert_eq!(summary.rows_written, 300);

    let expected: BTreeSet<String> = (0..files.len()).map(|i| format!("data_{}.jsonl", i)).collect();
    assert_eq!(names(&files), expected);

    // Only the last file may stay below the threshold
    for i in 0..files.len() - 1 {
        let size = std::fs::metadata(target.join(format!("data_{}.jsonl", i)))
            .unwrap()
            .len();
        assert!(size >= 500, "data_{}.jsonl has {} bytes", i, size);
    }
}

#[test]
fn test_partitions_rotate_inside_their_directory() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("out");
    let options = CopyOptions {
        partition_by: vec!["year".into()],
        partitioned_write_flush_threshold: 10,
        file_size_bytes: Some(100),
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(JsonlWriter::new().with_buffer_size(0), options, schema()).unwrap();

    let summary = copy_batches(&op, make_batches(10, 10, &[2020, 2021]), 2).unwrap();
    assert_eq!(summary.rows_written, 100);

    for year in ["year=2020", "year=2021"] {
        let files = files_below(&target.join(year));
        assert!(files.len() > 1);
        let expected: BTreeSet<String> =
            (0..files.len()).map(|i| format!("data_{}.jsonl", i)).collect();
        assert_eq!(names(&files), expected);
        let rows: usize = files.iter().map(|f| jsonl_rows(f)).sum();
        assert_eq!(rows, 50);
    }
}

#[test]
fn test_per_thread_output() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("per_thread");
    let options = CopyOptions {
        per_thread_output: true,
        return_files: true,
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(JsonlWriter::new(), options, schema()).unwrap();
    let global = op.initialize_global().unwrap();

    let mut first = op.local_state(&global).unwrap();
    let mut second = op.local_state(&global).unwrap();
    let idle = op.local_state(&global).unwrap();
    let batches = make_batches(6, 50, &[2020]);
    for (i, batch) in batches.iter().enumerate() {
        let local = if i % 2 == 0 { &mut first } else { &mut second };
        op.sink(&global, local, batch).unwrap();
    }
    op.combine(&global, first).unwrap();
    op.combine(&global, second).unwrap();
    op.combine(&global, idle).unwrap();
    let summary = op.finalize(global).unwrap();

    let files = files_below(&target);
    assert_eq!(
        names(&files),
        BTreeSet::from(["data_0.jsonl".to_string(), "data_1.jsonl".to_string()])
    );
    for file in &files {
        assert_eq!(jsonl_rows(file), 150);
    }
    assert_eq!(summary.rows_written, 300);
    assert_eq!(summary.file_paths.map(|f| f.len()), Some(2));
}

#[test]
fn test_per_thread_rotation() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("per_thread");
    let options = CopyOptions {
        per_thread_output: true,
        file_size_bytes: Some(200),
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(JsonlWriter::new().with_buffer_size(0), options, schema()).unwrap();

    let summary = copy_batches(&op, make_batches(12, 10, &[2020]), 3).unwrap();

    let files = files_below(&target);
    assert!(files.len() > 3);
    let total: usize = files.iter().map(|f| jsonl_rows(f)).sum();
    assert_eq!(total, 120);
    assert_eq!(summary.rows_written, 120);
}

#[test]
fn test_atomic_replace_leaves_only_final_file() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("out.parquet");
    std::fs::write(&target, b"stale").unwrap();

    let options = CopyOptions {
        overwrite: OverwriteMode::OverwriteOrIgnore,
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(ParquetWriter::new(), options, schema()).unwrap();
    let summary = copy_batches(&op, make_batches(5, 40, &[2020, 2021]), 2).unwrap();

    assert_eq!(summary.rows_written, 200);
    let files = files_below(temp_dir.path());
    assert_eq!(files, vec![target.clone()]);
    assert_eq!(parquet_rows(&target), 200);
}

#[test]
fn test_existing_single_file_fails_at_init() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("out.jsonl");
    std::fs::write(&target, b"keep me\n").unwrap();

    let op = CopyToFile::try_new(
        JsonlWriter::new(),
        CopyOptions::new(target.to_string_lossy()),
        schema(),
    )
    .unwrap();
    let err = copy_batches(&op, make_batches(1, 5, &[2020]), 1).unwrap_err();

    assert!(matches!(err, CopyError::TargetExists { .. }));
    assert!(err.to_string().contains("OVERWRITE_OR_IGNORE"));
    assert_eq!(std::fs::read(&target).unwrap(), b"keep me\n");
    assert_eq!(files_below(temp_dir.path()), vec![target]);
}

#[test]
fn test_empty_input_writes_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("parts");
    let options = CopyOptions {
        partition_by: vec!["year".into()],
        return_files: true,
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(ParquetWriter::new(), options, schema()).unwrap();

    let summary = copy_batches(&op, Vec::new(), 4).unwrap();

    assert_eq!(summary.rows_written, 0);
    assert_eq!(summary.file_paths, Some(Vec::new()));
    assert!(target.is_dir());
    assert!(files_below(&target).is_empty());

    let row = summary.to_record_batch().unwrap();
    assert_eq!(row.num_rows(), 1);
}

#[test]
fn test_parquet_partitions_keep_columns_when_asked() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("parts");
    let options = CopyOptions {
        partition_by: vec!["year".into()],
        write_partition_columns: true,
        partitioned_write_flush_threshold: 64,
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(ParquetWriter::new(), options, schema()).unwrap();
    copy_batches(&op, make_batches(8, 32, &[2020, 2021, 2022]), 3).unwrap();

    let files = files_below(&target);
    assert_eq!(files.len(), 3);
    let total: usize = files.iter().map(|f| parquet_rows(f)).sum();
    assert_eq!(total, 256);

    let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&files[0]).unwrap()).unwrap();
    assert!(builder.schema().field_with_name("year").is_ok());
}

/// Counts `create_directory` calls per path
#[derive(Default)]
struct CountingFileSystem {
    created: Mutex<HashMap<PathBuf, usize>>,
}

impl FileSystem for CountingFileSystem {
    fn file_exists(&self, path: &Path) -> bool {
        LocalFileSystem.file_exists(path)
    }
    fn directory_exists(&self, path: &Path) -> bool {
        LocalFileSystem.directory_exists(path)
    }
    fn create_directory(&self, path: &Path) -> copyto::Result<()> {
        *self.created.lock().entry(path.to_path_buf()).or_insert(0) += 1;
        LocalFileSystem.create_directory(path)
    }
    fn remove_file(&self, path: &Path) -> copyto::Result<()> {
        LocalFileSystem.remove_file(path)
    }
    fn move_file(&self, from: &Path, to: &Path) -> copyto::Result<()> {
        LocalFileSystem.move_file(from, to)
    }
    fn list_files_recursive(&self, dir: &Path) -> copyto::Result<Vec<PathBuf>> {
        LocalFileSystem.list_files_recursive(dir)
    }
}

#[test]
fn test_partition_directories_created_once() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("out");
    let fs = Arc::new(CountingFileSystem::default());
    let options = CopyOptions {
        partition_by: vec!["year".into()],
        partitioned_write_flush_threshold: 20,
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(JsonlWriter::new(), options, schema())
        .unwrap()
        .with_file_system(fs.clone());

    copy_batches(&op, make_batches(40, 25, &[1, 2, 3]), 4).unwrap();

    let created = fs.created.lock();
    for year in 1..=3 {
        assert_eq!(created.get(&target.join(format!("year={}", year))), Some(&1));
    }
    assert!(created.values().all(|count| *count == 1));
}

/// A file system whose files cannot be removed
struct RemoteFileSystem;

impl FileSystem for RemoteFileSystem {
    fn file_exists(&self, path: &Path) -> bool {
        LocalFileSystem.file_exists(path)
    }
    fn directory_exists(&self, path: &Path) -> bool {
        LocalFileSystem.directory_exists(path)
    }
    fn create_directory(&self, path: &Path) -> copyto::Result<()> {
        LocalFileSystem.create_directory(path)
    }
    fn remove_file(&self, _path: &Path) -> copyto::Result<()> {
        panic!("remote files cannot be removed");
    }
    fn move_file(&self, from: &Path, to: &Path) -> copyto::Result<()> {
        LocalFileSystem.move_file(from, to)
    }
    fn list_files_recursive(&self, dir: &Path) -> copyto::Result<Vec<PathBuf>> {
        LocalFileSystem.list_files_recursive(dir)
    }
    fn is_remote_file(&self, _path: &Path) -> bool {
        true
    }
}

#[test]
fn test_remote_target_file_is_refused_even_with_overwrite() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("remote_out");
    std::fs::write(&target, b"object").unwrap();

    let options = CopyOptions {
        per_thread_output: true,
        overwrite: OverwriteMode::OverwriteOrIgnore,
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(JsonlWriter::new(), options, schema())
        .unwrap()
        .with_file_system(Arc::new(RemoteFileSystem));

    let err = op.initialize_global().err().unwrap();
    assert!(matches!(err, CopyError::RemoteNotRemovable { .. }));
    assert!(err.is_precondition());
    assert!(target.is_file());
}

#[test]
fn test_remote_directory_overwrite_skips_cleanup() {
    let temp_dir = TempDir::new().unwrap();
    let target = temp_dir.path().join("remote_dir");
    std::fs::create_dir_all(&target).unwrap();
    std::fs::write(target.join("existing.jsonl"), b"{}\n").unwrap();

    let options = CopyOptions {
        partition_by: vec!["year".into()],
        overwrite: OverwriteMode::OverwriteOrIgnore,
        ..CopyOptions::new(target.to_string_lossy())
    };
    let op = CopyToFile::try_new(JsonlWriter::new(), options, schema())
        .unwrap()
        .with_file_system(Arc::new(RemoteFileSystem));

    let summary = copy_batches(&op, make_batches(2, 10, &[2020]), 2).unwrap();
    assert_eq!(summary.rows_written, 20);
    assert!(target.join("existing.jsonl").exists());
    assert!(target.join("year=2020").join("data_0.jsonl").exists());
}
