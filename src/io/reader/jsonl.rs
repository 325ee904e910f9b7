use super::Reader;
use crate::error::{CopyError, Result};
use arrow::datatypes::SchemaRef;
use arrow::json::reader::infer_json_schema;
use arrow::json::ReaderBuilder;
use arrow::record_batch::RecordBatch;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

/// Number of lines sampled to infer the schema
const INFER_SAMPLE_SIZE: usize = 1000;

pub struct JsonlReader {
    reader: arrow::json::Reader<BufReader<File>>,
    schema: SchemaRef,
}

impl JsonlReader {
    /// Create a new JsonlReader from a file path
    /// The schema is inferred from the first lines of the file
    pub fn new(path: &str, batch_size: Option<usize>) -> Result<Self> {
        let file = File::open(path).map_err(|e| CopyError::io(path, e))?;
        let (schema, _) = infer_json_schema(BufReader::new(file), Some(INFER_SAMPLE_SIZE))?;
        let schema = Arc::new(schema);

        let file = File::open(path).map_err(|e| CopyError::io(path, e))?;
        let mut builder = ReaderBuilder::new(schema.clone());
        if let Some(size) = batch_size {
            builder = builder.with_batch_size(size);
        }
        let reader = builder.build(BufReader::new(file))?;

        Ok(Self { reader, schema })
    }
}

impl Iterator for JsonlReader {
    type Item = Result<RecordBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader
            .next()
            .map(|batch| batch.map_err(CopyError::from))
    }
}

impl Reader for JsonlReader {
    fn schema(&self) -> &SchemaRef {
        &self.schema
    }
}
