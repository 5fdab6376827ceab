//! Bulk loaders: where a [`BulkFactTable`](super::BulkFactTable) sends its
//! buffer on flush.
//!
//! A loader receives the table name, the column list, the text-format
//! settings and the buffered rows in insertion order, and must preserve
//! that order. Returning an error keeps the rows buffered.

use crate::error::{EtlError, EtlResult};
use crate::row::{Row, Value};
use crate::store::Store;
use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// One flush worth of rows plus the text-format settings.
#[derive(Debug, Clone, Copy)]
pub struct BulkLoadRequest<'a> {
    pub table: &'a str,
    pub columns: &'a [String],
    pub fieldsep: &'a str,
    pub rowsep: &'a str,
    /// Text written for `Null`; `None` writes an empty field
    pub nullval: Option<&'a str>,
    pub rows: &'a [Row],
}

impl BulkLoadRequest<'_> {
    /// Write the rows in delimited text form.
    pub fn write_text<W: Write>(&self, out: &mut W) -> EtlResult<()> {
        for row in self.rows {
            for (i, column) in self.columns.iter().enumerate() {
                if i > 0 {
                    out.write_all(self.fieldsep.as_bytes())?;
                }
                match row.get(column).unwrap_or(&Value::Null) {
                    Value::Null => out.write_all(self.nullval.unwrap_or("").as_bytes())?,
                    value => write!(out, "{value}")?,
                }
            }
            out.write_all(self.rowsep.as_bytes())?;
        }
        Ok(())
    }

    pub fn to_text(&self) -> EtlResult<String> {
        let mut buf = Vec::new();
        self.write_text(&mut buf)?;
        String::from_utf8(buf).map_err(|e| EtlError::Serialization(e.to_string()))
    }
}

/// Bulk-load callback.
pub trait BulkLoader: Send {
    fn load(&mut self, request: &BulkLoadRequest<'_>) -> EtlResult<()>;
}

impl<F> BulkLoader for F
where
    F: FnMut(&BulkLoadRequest<'_>) -> EtlResult<()> + Send,
{
    fn load(&mut self, request: &BulkLoadRequest<'_>) -> EtlResult<()> {
        self(request)
    }
}

/// Appends the rows through [`Store::bulk_load`].
pub struct StoreLoader {
    store: Arc<dyn Store>,
}

impl StoreLoader {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

impl BulkLoader for StoreLoader {
    fn load(&mut self, request: &BulkLoadRequest<'_>) -> EtlResult<()> {
        self.store
            .bulk_load(request.table, request.columns, request.rows)
    }
}

/// Writes each flush as a delimited text file (`<table>-<n>.txt`), the
/// input format of a COPY-style bulk load, and optionally hands the rows on
/// to a store afterwards.
pub struct DelimitedFileLoader {
    dir: PathBuf,
    store: Option<Arc<dyn Store>>,
    written: Vec<PathBuf>,
}

impl DelimitedFileLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            store: None,
            written: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Files written so far, in flush order.
    pub fn files(&self) -> &[PathBuf] {
        &self.written
    }
}

impl BulkLoader for DelimitedFileLoader {
    fn load(&mut self, request: &BulkLoadRequest<'_>) -> EtlResult<()> {
        let path = self
            .dir
            .join(format!("{}-{:05}.txt", request.table, self.written.len()));
        let mut out = BufWriter::new(File::create(&path)?);
        request.write_text(&mut out)?;
        out.flush()?;
        if let Some(store) = &self.store {
            store.bulk_load(request.table, request.columns, request.rows)?;
        }
        debug!(table = request.table, rows = request.rows.len(), path = %path.display(), "bulk file written");
        self.written.push(path);
        Ok(())
    }
}

/// Writes each flush as one Parquet file (`<table>-<n>.parquet`).
///
/// Column types are inferred per flush: all-integer columns become
/// `Int64`, numeric columns with a float `Float64`, boolean columns
/// `Boolean`, everything else `Utf8`. Nulls are kept.
pub struct ParquetLoader {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl ParquetLoader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            written: Vec::new(),
        }
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.written
    }
}

fn infer_type<'a>(values: impl Iterator<Item = &'a Value>) -> DataType {
    let mut ty: Option<DataType> = None;
    for value in values {
        let next = match value {
            Value::Null => continue,
            Value::Bool(_) => DataType::Boolean,
            Value::Int(_) => DataType::Int64,
            Value::Float(_) => DataType::Float64,
            Value::Text(_) => return DataType::Utf8,
        };
        ty = Some(match (ty, next) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(DataType::Int64), DataType::Float64) | (Some(DataType::Float64), DataType::Int64) => {
                DataType::Float64
            }
            _ => return DataType::Utf8,
        });
    }
    ty.unwrap_or(DataType::Utf8)
}

fn build_column<'a>(ty: &DataType, values: impl Iterator<Item = &'a Value>) -> ArrayRef {
    match ty {
        DataType::Int64 => {
            let mut b = Int64Builder::new();
            values.for_each(|v| b.append_option(v.to_int()));
            Arc::new(b.finish())
        }
        DataType::Float64 => {
            let mut b = Float64Builder::new();
            values.for_each(|v| b.append_option(v.to_float()));
            Arc::new(b.finish())
        }
        DataType::Boolean => {
            let mut b = BooleanBuilder::new();
            values.for_each(|v| {
                b.append_option(match v {
                    Value::Bool(x) => Some(*x),
                    _ => None,
                })
            });
            Arc::new(b.finish())
        }
        _ => {
            let mut b = StringBuilder::new();
            values.for_each(|v| {
                if v.is_null() {
                    b.append_null()
                } else {
                    b.append_value(v.to_string())
                }
            });
            Arc::new(b.finish())
        }
    }
}

fn column_values<'a>(rows: &'a [Row], name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    rows.iter().map(move |r| r.get(name).unwrap_or(&Value::Null))
}

/// Arrow batch for a request, columns in request order.
pub fn to_record_batch(request: &BulkLoadRequest<'_>) -> EtlResult<RecordBatch> {
    let mut fields = Vec::with_capacity(request.columns.len());
    let mut arrays = Vec::with_capacity(request.columns.len());
    for name in request.columns {
        let ty = infer_type(column_values(request.rows, name));
        arrays.push(build_column(&ty, column_values(request.rows, name)));
        fields.push(Field::new(name, ty, true));
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

impl BulkLoader for ParquetLoader {
    fn load(&mut self, request: &BulkLoadRequest<'_>) -> EtlResult<()> {
        let batch = to_record_batch(request)?;
        let path = self
            .dir
            .join(format!("{}-{:05}.parquet", request.table, self.written.len()));
        let mut writer = ArrowWriter::try_new(File::create(&path)?, batch.schema(), None)?;
        writer.write(&batch)?;
        writer.close()?;
        debug!(table = request.table, rows = batch.num_rows(), path = %path.display(), "parquet file written");
        self.written.push(path);
        Ok(())
    }
}
