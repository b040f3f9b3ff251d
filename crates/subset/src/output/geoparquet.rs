//! GeoParquet 1.0 output
//!
//! Attribute columns are written as they are (2D columns stay lists) and a
//! WKB `geometry` column is appended. The `geo` key of the file metadata
//! declares it as the primary point column in OGC:CRS84.

use super::wkb;
use crate::error::Result;
use crate::table::GeoBatch;
use arrow::array::{ArrayRef, BinaryArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;

pub const GEOMETRY_COLUMN: &str = "geometry";

pub fn write<W: Write + Send>(batch: &GeoBatch, writer: W) -> Result<()> {
    let geometry: ArrayRef = Arc::new(BinaryArray::from_iter_values(
        batch
            .lon()
            .values()
            .iter()
            .zip(batch.lat().values().iter())
            .map(|(x, y)| wkb::point(*x, *y)),
    ));

    let mut fields: Vec<Field> = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.push(Field::new(GEOMETRY_COLUMN, DataType::Binary, false));
    let schema = Arc::new(Schema::new(fields));

    let mut columns = batch.batch().columns().to_vec();
    columns.push(geometry);
    let record_batch = RecordBatch::try_new(schema.clone(), columns)?;

    let props = WriterProperties::builder()
        .set_key_value_metadata(Some(vec![KeyValue::new(
            "geo".to_string(),
            geo_metadata(batch).to_string(),
        )]))
        .build();

    let mut writer = ArrowWriter::try_new(writer, schema, Some(props))?;
    writer.write(&record_batch)?;
    writer.close()?;
    Ok(())
}

fn geo_metadata(batch: &GeoBatch) -> serde_json::Value {
    let mut column = json!({
        "encoding": "WKB",
        "geometry_types": ["Point"],
    });
    if let Some(bbox) = batch.bbox() {
        column["bbox"] = json!([bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y]);
    }

    json!({
        "version": "1.0.0",
        "primary_column": GEOMETRY_COLUMN,
        "columns": { GEOMETRY_COLUMN: column },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{BEAM_COLUMN, FILENAME_COLUMN};
    use arrow::array::{Array, AsArray, Float64Array, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use parquet::file::reader::{FileReader, SerializedFileReader};

    fn sample() -> GeoBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("agbd", DataType::Float64, true),
            Field::new(FILENAME_COLUMN, DataType::Utf8, true),
            Field::new(BEAM_COLUMN, DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Float64Array::from(vec![10.0, 20.0])),
                Arc::new(StringArray::from(vec!["a.h5", "a.h5"])),
                Arc::new(StringArray::from(vec!["0000", "1011"])),
            ],
        )
        .unwrap();
        GeoBatch::try_new(batch, Float64Array::from(vec![12.0, 12.5]), Float64Array::from(vec![-1.5, -1.0])).unwrap()
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.parquet");
        write(&sample(), std::fs::File::create(&path).unwrap()).unwrap();

        let reader = ParquetRecordBatchReaderBuilder::try_new(std::fs::File::open(&path).unwrap())
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<RecordBatch> = reader.collect::<std::result::Result<_, _>>().unwrap();
        let names: Vec<_> = batches[0]
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, vec!["agbd", "filename", "BEAM", "geometry"]);

        let geometry = batches[0].column(3).as_binary::<i32>();
        assert_eq!(geometry.len(), 2);
        assert_eq!(geometry.value(0), wkb::point(12.0, -1.5).as_slice());

        let file = SerializedFileReader::new(std::fs::File::open(&path).unwrap()).unwrap();
        let metadata = file.metadata().file_metadata().key_value_metadata().unwrap();
        let geo = metadata.iter().find(|kv| kv.key == "geo").unwrap();
        let geo: serde_json::Value = serde_json::from_str(geo.value.as_deref().unwrap()).unwrap();
        assert_eq!(geo["primary_column"], "geometry");
        assert_eq!(geo["columns"]["geometry"]["bbox"], json!([12.0, -1.5, 12.5, -1.0]));
    }
}
