//! Vector dataset writers
//!
//! Every format receives the merged table with longitude/latitude points in
//! EPSG:4326. Files are written next to the destination and renamed into
//! place once complete, so a failed write never leaves a partial file.

pub mod fgb;
pub mod geoparquet;
pub mod gpkg;
pub mod wkb;

use crate::error::{Result, SubsetError};
use crate::table::GeoBatch;
use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use diagnostics::*;
use serde_json::Value;
use std::fmt;
use std::io::BufWriter;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    GeoParquet,
    GeoPackage,
    FlatGeobuf,
}

impl OutputFormat {
    /// Infer the format from the destination's extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("parquet" | "gpq" | "geoparquet") => Ok(OutputFormat::GeoParquet),
            Some("gpkg") => Ok(OutputFormat::GeoPackage),
            Some("fgb") => Ok(OutputFormat::FlatGeobuf),
            _ => Err(SubsetError::UnsupportedOutput(path.display().to_string())),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::GeoParquet => "parquet",
            OutputFormat::GeoPackage => "gpkg",
            OutputFormat::FlatGeobuf => "fgb",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = SubsetError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "parquet" | "geoparquet" | "gpq" => Ok(OutputFormat::GeoParquet),
            "gpkg" | "geopackage" => Ok(OutputFormat::GeoPackage),
            "fgb" | "flatgeobuf" => Ok(OutputFormat::FlatGeobuf),
            _ => Err(SubsetError::UnsupportedOutput(s.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputFormat::GeoParquet => "GeoParquet",
            OutputFormat::GeoPackage => "GeoPackage",
            OutputFormat::FlatGeobuf => "FlatGeobuf",
        };
        f.write_str(name)
    }
}

/// Write `batch` to `dest`, replacing any existing file
pub fn write(batch: &GeoBatch, dest: &Path, format: OutputFormat) -> Result<()> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&dir)?;

    // Layer and table names follow the destination's stem
    let layer = dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("subset")
        .to_string();

    let tmp = tempfile::Builder::new()
        .prefix(".gedi-subset-")
        .tempfile_in(&dir)?;

    match format {
        OutputFormat::GeoParquet => geoparquet::write(batch, BufWriter::new(tmp.as_file()))?,
        OutputFormat::FlatGeobuf => fgb::write(batch, BufWriter::new(tmp.as_file()), &layer)?,
        OutputFormat::GeoPackage => gpkg::write(batch, tmp.path(), &layer)?,
    }

    let rows = batch.num_rows();
    let path = dest.display().to_string();
    let kind = format.to_string();
    debug!("Persisting {rows} rows as {kind} to {path}");

    tmp.persist(dest).map_err(|e| SubsetError::Io(e.error))?;
    Ok(())
}

/// JSON array text for one row of a list column, `None` when the row is null
///
/// Integers stay exact, other numbers become doubles (NaN as `null`) and
/// anything else is rendered as strings.
pub(crate) fn list_json(array: &dyn Array, row: usize) -> Result<Option<String>> {
    if array.is_null(row) {
        return Ok(None);
    }
    let values = match array.data_type() {
        DataType::FixedSizeList(_, _) => array.as_fixed_size_list().value(row),
        DataType::List(_) => array.as_list::<i32>().value(row),
        DataType::LargeList(_) => array.as_list::<i64>().value(row),
        other => {
            return Err(SubsetError::InvalidColumn(format!(
                "expected a list column, found {}",
                other
            )));
        }
    };

    let items: Vec<Value> = match values.data_type() {
        dt if dt.is_integer() => cast(&values, &DataType::Int64)?
            .as_primitive::<Int64Type>()
            .iter()
            .map(|v| v.map(Value::from).unwrap_or(Value::Null))
            .collect(),
        dt if dt.is_numeric() => cast(&values, &DataType::Float64)?
            .as_primitive::<Float64Type>()
            .iter()
            .map(|v| v.map(Value::from).unwrap_or(Value::Null))
            .collect(),
        DataType::Boolean => values
            .as_boolean()
            .iter()
            .map(|v| v.map(Value::Bool).unwrap_or(Value::Null))
            .collect(),
        _ => cast(&values, &DataType::Utf8)?
            .as_string::<i32>()
            .iter()
            .map(|v| v.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null))
            .collect(),
    };

    Ok(Some(serde_json::to_string(&items)?))
}
