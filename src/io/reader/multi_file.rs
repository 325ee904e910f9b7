use super::Reader;
use crate::error::{CopyError, Result};
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

/// A reader that wraps multiple readers and reads from them sequentially
pub struct MultiFileReader {
    readers: Vec<Box<dyn Reader>>,
    current_reader_index: usize,
    schema: SchemaRef, // Schema from the first reader (all readers should have the same schema)
}

impl MultiFileReader {
    /// Create a new MultiFileReader from a list of readers
    pub fn new(readers: Vec<Box<dyn Reader>>) -> Result<Self> {
        let schema = match readers.first() {
            Some(reader) => reader.schema().clone(),
            None => {
                return Err(CopyError::InvalidOptions(
                    "MultiFileReader requires at least one reader".into(),
                ))
            }
        };

        for (idx, reader) in readers.iter().enumerate().skip(1) {
            if !schemas_compatible(&schema, reader.schema()) {
                return Err(CopyError::InvalidOptions(format!(
                    "Reader {} has incompatible schema with the first reader",
                    idx
                )));
            }
        }

        Ok(Self {
            readers,
            current_reader_index: 0,
            schema,
        })
    }
}

/// Check if two schemas are compatible (same field names and types)
fn schemas_compatible(schema1: &Schema, schema2: &Schema) -> bool {
    if schema1.fields().len() != schema2.fields().len() {
        return false;
    }

    schema1
        .fields()
        .iter()
        .zip(schema2.fields().iter())
        .all(|(f1, f2)| f1.name() == f2.name() && f1.data_type() == f2.data_type())
}

impl Iterator for MultiFileReader {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current_reader_index < self.readers.len() {
            if let Some(result) = self.readers[self.current_reader_index].next() {
                return Some(result);
            }

            // Current reader is exhausted, move to next
            self.current_reader_index += 1;
        }

        None
    }
}

impl Reader for MultiFileReader {
    fn schema(&self) -> &SchemaRef {
        &self.schema
    }
}
