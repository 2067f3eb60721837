//! Parquet writer for skim output.
//!
//! # Schema: `sixb_skim_v1`
//!
//! One column per declared branch, in declaration order:
//!
//! | Branch kind | Arrow type       |
//! |-------------|------------------|
//! | int         | `Int64`          |
//! | float       | `Float64`        |
//! | bool        | `Boolean`        |
//! | vector      | `List<Float64>`  |
//!
//! The schema version is stored in the key-value metadata under
//! [`META_KEY_SCHEMA_VERSION`].

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, ListBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use sb_core::{Error, Result};
use sb_skim::{BranchKind, BranchValue, OutputRecord, OutputSchema, RecordSink};

/// Schema version string embedded in the Parquet key-value metadata.
pub const SKIM_SCHEMA_V1: &str = "sixb_skim_v1";

/// Metadata key for the schema version.
pub const META_KEY_SCHEMA_VERSION: &str = "sixb.schema_version";

/// Rows buffered before a row group is written.
pub const DEFAULT_BATCH_ROWS: usize = 8192;

enum ColumnBuilder {
    Int(Int64Builder),
    Float(Float64Builder),
    Bool(BooleanBuilder),
    FloatVec(ListBuilder<Float64Builder>),
}

impl ColumnBuilder {
    fn for_kind(kind: BranchKind) -> Self {
        match kind {
            BranchKind::Int => ColumnBuilder::Int(Int64Builder::new()),
            BranchKind::Float => ColumnBuilder::Float(Float64Builder::new()),
            BranchKind::Bool => ColumnBuilder::Bool(BooleanBuilder::new()),
            BranchKind::FloatVec => ColumnBuilder::FloatVec(ListBuilder::new(Float64Builder::new())),
        }
    }

    fn append(&mut self, value: &BranchValue) -> Result<()> {
        match (self, value) {
            (ColumnBuilder::Int(b), BranchValue::Int(v)) => b.append_value(*v),
            (ColumnBuilder::Float(b), BranchValue::Float(v)) => b.append_value(*v),
            (ColumnBuilder::Bool(b), BranchValue::Bool(v)) => b.append_value(*v),
            (ColumnBuilder::FloatVec(b), BranchValue::FloatVec(v)) => {
                b.values().append_slice(v);
                b.append(true);
            }
            (_, v) => return Err(Error::Output(format!("unexpected {} value for column", v.kind()))),
        }
        Ok(())
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Int(b) => Arc::new(b.finish()),
            ColumnBuilder::Float(b) => Arc::new(b.finish()),
            ColumnBuilder::Bool(b) => Arc::new(b.finish()),
            ColumnBuilder::FloatVec(b) => Arc::new(b.finish()),
        }
    }
}

fn arrow_field(name: &str, kind: BranchKind) -> Field {
    match kind {
        BranchKind::Int => Field::new(name, DataType::Int64, false),
        BranchKind::Float => Field::new(name, DataType::Float64, false),
        BranchKind::Bool => Field::new(name, DataType::Boolean, false),
        BranchKind::FloatVec => Field::new_list(name, Field::new("item", DataType::Float64, true), false),
    }
}

/// Arrow schema for an output schema.
pub fn arrow_schema(schema: &OutputSchema) -> SchemaRef {
    let fields: Vec<Field> = schema.branches().iter().map(|b| arrow_field(&b.name, b.kind())).collect();
    let metadata = HashMap::from([(META_KEY_SCHEMA_VERSION.to_string(), SKIM_SCHEMA_V1.to_string())]);
    Arc::new(Schema::new(fields).with_metadata(metadata))
}

struct Open {
    schema: Arc<OutputSchema>,
    arrow: SchemaRef,
    writer: ArrowWriter<File>,
    columns: Vec<ColumnBuilder>,
    buffered: usize,
}

/// [`RecordSink`] writing one Parquet file.
pub struct ParquetSink {
    path: PathBuf,
    batch_rows: usize,
    open: Option<Open>,
    n_written: usize,
    finished: bool,
}

impl ParquetSink {
    /// Sink writing to `path`. The file is created by `begin()`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), batch_rows: DEFAULT_BATCH_ROWS, open: None, n_written: 0, finished: false }
    }

    /// Rows per row group.
    pub fn with_batch_rows(mut self, batch_rows: usize) -> Self {
        self.batch_rows = batch_rows.max(1);
        self
    }

    /// Output path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(open: &mut Open, path: &Path) -> Result<()> {
        if open.buffered == 0 {
            return Ok(());
        }
        let arrays: Vec<ArrayRef> = open.columns.iter_mut().map(ColumnBuilder::finish).collect();
        let batch = RecordBatch::try_new(open.arrow.clone(), arrays)
            .map_err(|e| Error::Output(format!("failed to build RecordBatch: {e}")))?;
        open.writer
            .write(&batch)
            .map_err(|e| Error::Output(format!("failed to write {}: {e}", path.display())))?;
        tracing::debug!(rows = open.buffered, "row group written");
        open.buffered = 0;
        Ok(())
    }
}

impl RecordSink for ParquetSink {
    fn begin(&mut self, schema: &Arc<OutputSchema>) -> Result<()> {
        if self.open.is_some() || self.finished {
            return Err(Error::Output("sink already started".into()));
        }
        let arrow = arrow_schema(schema);
        let file = File::create(&self.path)
            .map_err(|e| Error::Output(format!("failed to create {}: {e}", self.path.display())))?;
        let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
        let writer = ArrowWriter::try_new(file, arrow.clone(), Some(props))
            .map_err(|e| Error::Output(format!("failed to create Parquet writer: {e}")))?;
        let columns = schema.branches().iter().map(|b| ColumnBuilder::for_kind(b.kind())).collect();
        tracing::info!(path = %self.path.display(), n_branches = schema.len(), "output opened");
        self.open = Some(Open { schema: Arc::clone(schema), arrow, writer, columns, buffered: 0 });
        Ok(())
    }

    fn commit(&mut self, record: &OutputRecord) -> Result<()> {
        let open = self.open.as_mut().ok_or_else(|| Error::Output("commit outside begin/finish".into()))?;
        if !Arc::ptr_eq(&open.schema, record.schema()) {
            return Err(Error::Output("record schema differs from sink schema".into()));
        }
        record.validate()?;
        for (column, value) in open.columns.iter_mut().zip(record.values()) {
            column.append(value)?;
        }
        open.buffered += 1;
        self.n_written += 1;
        if open.buffered >= self.batch_rows {
            Self::flush(open, &self.path)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<usize> {
        let mut open = self.open.take().ok_or_else(|| Error::Output("finish without begin".into()))?;
        Self::flush(&mut open, &self.path)?;
        open.writer
            .close()
            .map_err(|e| Error::Output(format!("failed to close {}: {e}", self.path.display())))?;
        self.finished = true;
        tracing::info!(path = %self.path.display(), n_written = self.n_written, "output written");
        Ok(self.n_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, AsArray, Int64Array};
    use arrow::datatypes::{Float64Type, Int64Type};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use sb_skim::SchemaBuilder;

    fn schema() -> Arc<OutputSchema> {
        let mut b = SchemaBuilder::new();
        b.declare_int("nfound_all", 0).unwrap();
        b.declare_bool("pass_trigger", false).unwrap();
        b.declare_float_vec("sixb_pt").unwrap();
        b.freeze()
    }

    #[test]
    fn writes_all_rows_across_row_groups() {
        let dir = std::env::temp_dir().join(format!("sb_io_sink_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.parquet");

        let s = schema();
        let mut sink = ParquetSink::new(&path).with_batch_rows(2);
        sink.begin(&s).unwrap();
        let mut r = OutputRecord::new(Arc::clone(&s));
        for i in 0..5i64 {
            r.clear();
            r.set_int("nfound_all", i).unwrap();
            r.set_bool("pass_trigger", i % 2 == 0).unwrap();
            r.set_float_vec("sixb_pt", (0..i).map(|k| k as f64).collect()).unwrap();
            sink.commit(&r).unwrap();
        }
        assert_eq!(sink.finish().unwrap(), 5);

        let file = File::open(&path).unwrap();
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        assert_eq!(
            builder.schema().metadata().get(META_KEY_SCHEMA_VERSION).map(String::as_str),
            Some(SKIM_SCHEMA_V1)
        );
        let batches: Vec<RecordBatch> = builder.build().unwrap().collect::<std::result::Result<_, _>>().unwrap();
        let merged = arrow::compute::concat_batches(&batches[0].schema(), &batches).unwrap();
        assert_eq!(merged.num_rows(), 5);

        let n = merged.column_by_name("nfound_all").unwrap().as_primitive::<Int64Type>();
        assert_eq!(n, &Int64Array::from(vec![0, 1, 2, 3, 4]));
        let pts = merged.column_by_name("sixb_pt").unwrap().as_list::<i32>();
        assert_eq!(pts.value(3).as_primitive::<Float64Type>().values().to_vec(), vec![0.0, 1.0, 2.0]);
        assert!(pts.value(0).is_empty());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn incomplete_record_rejected() {
        let dir = std::env::temp_dir().join(format!("sb_io_sink_bad_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let s = schema();
        let mut sink = ParquetSink::new(dir.join("out.parquet"));
        assert!(sink.commit(&OutputRecord::new(Arc::clone(&s))).is_err());
        sink.begin(&s).unwrap();
        let mut r = OutputRecord::new(Arc::clone(&s));
        r.set_int("nfound_all", 1).unwrap();
        let err = sink.commit(&r).unwrap_err();
        assert!(err.to_string().contains("pass_trigger"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
