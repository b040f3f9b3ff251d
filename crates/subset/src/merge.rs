//! Combining per-granule tables

use crate::columns::ColumnSpec;
use crate::error::{Result, SubsetError};
use crate::table::{BEAM_COLUMN, FILENAME_COLUMN, GeoBatch};
use arrow::array::ArrayRef;
use arrow::compute::{CastOptions, cast_with_options};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use diagnostics::*;
use std::sync::Arc;

/// Concatenate per-granule results in the order given
///
/// Failed (`None`) and zero-row results are skipped. The output columns are
/// `column_order` followed by `filename` and `BEAM`; column types follow
/// the first non-empty result and later results are cast to them. With no
/// rows at all the result is an empty table of the same columns.
pub fn merge(results: Vec<Option<GeoBatch>>, column_order: &[ColumnSpec]) -> Result<GeoBatch> {
    let inputs = results.len();
    let parts: Vec<GeoBatch> = results
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect();

    let Some(first) = parts.first() else {
        debug!("No rows to merge from {inputs} results");
        return Ok(GeoBatch::empty(placeholder_schema(column_order)));
    };

    let schema = output_schema(first, column_order)?;
    let parts = parts
        .iter()
        .map(|part| conform(part, &schema))
        .collect::<Result<Vec<_>>>()?;

    let merged = GeoBatch::concat(schema, &parts)?;
    let rows = merged.num_rows();
    let granules = parts.len();
    debug!("Merged {rows} rows from {granules} of {inputs} results");
    Ok(merged)
}

/// Output column names: requested columns then provenance
pub fn output_names(column_order: &[ColumnSpec]) -> Vec<String> {
    column_order
        .iter()
        .map(ColumnSpec::name)
        .chain([FILENAME_COLUMN.to_string(), BEAM_COLUMN.to_string()])
        .collect()
}

/// Schema used when no data determines column types
pub fn placeholder_schema(column_order: &[ColumnSpec]) -> SchemaRef {
    let fields: Vec<Field> = column_order
        .iter()
        .map(|c| Field::new(c.name(), DataType::Float64, true))
        .chain([
            Field::new(FILENAME_COLUMN, DataType::Utf8, true),
            Field::new(BEAM_COLUMN, DataType::Utf8, true),
        ])
        .collect();
    Arc::new(Schema::new(fields))
}

fn output_schema(first: &GeoBatch, column_order: &[ColumnSpec]) -> Result<SchemaRef> {
    let source = first.schema();
    let fields = output_names(column_order)
        .into_iter()
        .map(|name| {
            let field = source
                .field_with_name(&name)
                .map_err(|_| SubsetError::UnknownColumn(name.clone()))?;
            Ok(Field::new(name, field.data_type().clone(), true))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Arc::new(Schema::new(fields)))
}

/// Select and cast the columns of `part` to `schema`, by name
///
/// Values the target type cannot hold are an error, never nulls.
pub(crate) fn conform(part: &GeoBatch, schema: &SchemaRef) -> Result<GeoBatch> {
    if part.schema() == *schema {
        return Ok(part.clone());
    }

    let options = CastOptions {
        safe: false,
        ..Default::default()
    };

    let columns = schema
        .fields()
        .iter()
        .map(|field| {
            let column = part
                .batch()
                .column_by_name(field.name())
                .ok_or_else(|| SubsetError::UnknownColumn(field.name().clone()))?;
            if column.data_type() == field.data_type() {
                Ok(column.clone())
            } else {
                Ok(cast_with_options(column, field.data_type(), &options)?)
            }
        })
        .collect::<Result<Vec<ArrayRef>>>()?;

    let batch = RecordBatch::try_new(schema.clone(), columns)?;
    GeoBatch::try_new(batch, part.lon().clone(), part.lat().clone())
}
