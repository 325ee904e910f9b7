//! Partition keys and the per-worker hive partition buffer.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use arrow::array::{Array, AsArray, UInt32Array};
use arrow::compute::take;
use arrow::datatypes::{
    DataType, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type, UInt32Type, UInt64Type,
    UInt8Type,
};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::display::array_value_to_string;

use crate::error::Result;

/// A single partition column value
#[derive(Debug, Clone)]
pub enum PartitionValue {
    Null,
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    /// Any other type, compared by its rendered text
    Other(String),
}

impl PartitionValue {
    /// Read the value at `row` of `array`
    pub fn from_array(array: &dyn Array, row: usize) -> Result<Self> {
        if array.is_null(row) {
            return Ok(PartitionValue::Null);
        }
        let value = match array.data_type() {
            DataType::Boolean => PartitionValue::Bool(array.as_boolean().value(row)),
            DataType::Int8 => PartitionValue::Int64(array.as_primitive::<Int8Type>().value(row) as i64),
            DataType::Int16 => {
                PartitionValue::Int64(array.as_primitive::<Int16Type>().value(row) as i64)
            }
            DataType::Int32 => {
                PartitionValue::Int64(array.as_primitive::<Int32Type>().value(row) as i64)
            }
            DataType::Int64 => PartitionValue::Int64(array.as_primitive::<Int64Type>().value(row)),
            DataType::UInt8 => {
                PartitionValue::UInt64(array.as_primitive::<UInt8Type>().value(row) as u64)
            }
            DataType::UInt16 => {
                PartitionValue::UInt64(array.as_primitive::<UInt16Type>().value(row) as u64)
            }
            DataType::UInt32 => {
                PartitionValue::UInt64(array.as_primitive::<UInt32Type>().value(row) as u64)
            }
            DataType::UInt64 => {
                PartitionValue::UInt64(array.as_primitive::<UInt64Type>().value(row))
            }
            DataType::Float32 => PartitionValue::Float32(
                array.as_primitive::<arrow::datatypes::Float32Type>().value(row),
            ),
            DataType::Float64 => PartitionValue::Float64(
                array.as_primitive::<arrow::datatypes::Float64Type>().value(row),
            ),
            DataType::Utf8 => PartitionValue::String(array.as_string::<i32>().value(row).to_string()),
            DataType::LargeUtf8 => {
                PartitionValue::String(array.as_string::<i64>().value(row).to_string())
            }
            _ => PartitionValue::Other(array_value_to_string(array, row)?),
        };
        Ok(value)
    }

    /// Float identity used for equality and hashing: NaN == NaN, -0.0 == 0.0
    fn canonical_bits(f: f64) -> u64 {
        if f.is_nan() {
            f64::NAN.to_bits()
        } else if f == 0.0 {
            0.0f64.to_bits()
        } else {
            f.to_bits()
        }
    }
}

// Values compare "not distinct from": NULL matches NULL.
impl PartialEq for PartitionValue {
    fn eq(&self, other: &Self) -> bool {
        use PartitionValue::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (UInt64(a), UInt64(b)) => a == b,
            (Float32(a), Float32(b)) => {
                Self::canonical_bits(*a as f64) == Self::canonical_bits(*b as f64)
            }
            (Float64(a), Float64(b)) => Self::canonical_bits(*a) == Self::canonical_bits(*b),
            (String(a), String(b)) => a == b,
            (Other(a), Other(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PartitionValue {}

impl Hash for PartitionValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            PartitionValue::Null => {}
            PartitionValue::Bool(b) => b.hash(state),
            PartitionValue::Int64(i) => i.hash(state),
            PartitionValue::UInt64(u) => u.hash(state),
            PartitionValue::Float32(f) => Self::canonical_bits(*f as f64).hash(state),
            PartitionValue::Float64(f) => Self::canonical_bits(*f).hash(state),
            PartitionValue::String(s) | PartitionValue::Other(s) => s.hash(state),
        }
    }
}

impl fmt::Display for PartitionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionValue::Null => write!(f, "NULL"),
            PartitionValue::Bool(b) => write!(f, "{}", b),
            PartitionValue::Int64(i) => write!(f, "{}", i),
            PartitionValue::UInt64(u) => write!(f, "{}", u),
            PartitionValue::Float32(v) => write!(f, "{}", v),
            PartitionValue::Float64(v) => write!(f, "{}", v),
            PartitionValue::String(s) | PartitionValue::Other(s) => write!(f, "{}", s),
        }
    }
}

impl PartitionValue {
    /// Text of this value inside one hive path segment.
    ///
    /// NULL becomes the hive default partition name. A literal value spelled
    /// the same way gets its first `_` escaped, so no value shares NULL's directory.
    pub fn path_segment(&self) -> String {
        match self {
            PartitionValue::Null => HIVE_DEFAULT_PARTITION.to_string(),
            value => {
                let escaped = escape_path_value(&value.to_string());
                if escaped == HIVE_DEFAULT_PARTITION {
                    format!("%5F{}", &escaped[1..])
                } else {
                    escaped
                }
            }
        }
    }
}

/// Ordered tuple of partition column values
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey(pub Vec<PartitionValue>);

impl PartitionKey {
    pub fn values(&self) -> &[PartitionValue] {
        &self.0
    }
}

/// Directory value of a NULL partition key
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Render a value for use inside one hive path segment.
///
/// Path separators and `%` are percent-encoded so a value always maps to
/// exactly one directory level below the target.
pub fn escape_path_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '/' => escaped.push_str("%2F"),
            '\\' => escaped.push_str("%5C"),
            '%' => escaped.push_str("%25"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Per-worker buffer grouping rows by partition key.
///
/// `append` routes rows into per-key batch lists; `flush` hands the groups
/// out in first-seen key order and empties the buffer.
pub struct HivePartitioner {
    partition_columns: Vec<usize>,
    /// Columns written to the data files; `None` keeps every column
    projection: Option<Vec<usize>>,
    groups: Vec<(PartitionKey, Vec<RecordBatch>)>,
    index: HashMap<PartitionKey, usize>,
    buffered_rows: usize,
}

impl HivePartitioner {
    pub fn new(partition_columns: Vec<usize>, projection: Option<Vec<usize>>) -> Self {
        Self {
            partition_columns,
            projection,
            groups: Vec::new(),
            index: HashMap::new(),
            buffered_rows: 0,
        }
    }

    pub fn buffered_rows(&self) -> usize {
        self.buffered_rows
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn append(&mut self, batch: &RecordBatch) -> Result<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }

        let num_rows = row_index_bound(batch.num_rows())?;

        // Compute the partition key of every row, keeping first-seen order
        let mut keys: Vec<PartitionKey> = Vec::new();
        let mut rows_per_key: HashMap<PartitionKey, Vec<u32>> = HashMap::new();
        for row in 0..num_rows {
            let mut values = Vec::with_capacity(self.partition_columns.len());
            for &col in &self.partition_columns {
                values.push(PartitionValue::from_array(
                    batch.column(col).as_ref(),
                    row as usize,
                )?);
            }
            let key = PartitionKey(values);
            match rows_per_key.get_mut(&key) {
                Some(rows) => rows.push(row),
                None => {
                    rows_per_key.insert(key.clone(), vec![row]);
                    keys.push(key);
                }
            }
        }

        for key in keys {
            let rows = rows_per_key.remove(&key).unwrap_or_default();
            let part = if rows.len() == batch.num_rows() {
                batch.clone()
            } else {
                take_rows(batch, rows)?
            };
            let part = match &self.projection {
                Some(indices) => part.project(indices)?,
                None => part,
            };
            self.push(key, part);
        }
        self.buffered_rows += batch.num_rows();
        Ok(())
    }

    fn push(&mut self, key: PartitionKey, batch: RecordBatch) {
        match self.index.get(&key) {
            Some(&idx) => self.groups[idx].1.push(batch),
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push((key, vec![batch]));
            }
        }
    }

    /// Drain every buffered group
    pub fn flush(&mut self) -> Vec<(PartitionKey, Vec<RecordBatch>)> {
        self.index.clear();
        self.buffered_rows = 0;
        std::mem::take(&mut self.groups)
    }
}

/// Rows are addressed by u32 take indices
fn row_index_bound(rows: usize) -> Result<u32> {
    let bound = u32::try_from(rows).map_err(|_| {
        ArrowError::InvalidArgumentError(format!(
            "batch of {} rows exceeds the partitioner's u32 row index",
            rows
        ))
    })?;
    Ok(bound)
}

fn take_rows(batch: &RecordBatch, rows: Vec<u32>) -> Result<RecordBatch> {
    let indices = UInt32Array::from(rows);
    let columns = batch
        .columns()
        .iter()
        .map(|column| take(column.as_ref(), &indices, None))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}
