//! Point tables
//!
//! A [`GeoBatch`] is an Arrow `RecordBatch` of attribute and provenance
//! columns plus one lon/lat point per row. The point is kept outside the
//! batch so that the batch's columns are exactly the output columns; each
//! writer renders the point in its own geometry encoding.

use crate::error::{Result, SubsetError};
use crate::geometry::BoundingBox;
use arrow::array::{Array, ArrayRef, AsArray, Float64Array};
use arrow::compute::{concat, concat_batches};
use arrow::datatypes::{Float64Type, SchemaRef};
use arrow::record_batch::RecordBatch;

/// Provenance column holding the granule file's base name
pub const FILENAME_COLUMN: &str = "filename";

/// Provenance column holding the beam's four digit suffix
pub const BEAM_COLUMN: &str = "BEAM";

#[derive(Debug, Clone, PartialEq)]
pub struct GeoBatch {
    batch: RecordBatch,
    lon: Float64Array,
    lat: Float64Array,
}

impl GeoBatch {
    pub fn try_new(batch: RecordBatch, lon: Float64Array, lat: Float64Array) -> Result<Self> {
        if lon.len() != lat.len() {
            return Err(SubsetError::LengthMismatch {
                lat: lat.len(),
                lon: lon.len(),
            });
        }
        if lon.len() != batch.num_rows() {
            return Err(SubsetError::InvalidJob(format!(
                "{} points for {} rows",
                lon.len(),
                batch.num_rows()
            )));
        }

        Ok(Self { batch, lon, lat })
    }

    /// Zero rows with the given columns
    pub fn empty(schema: SchemaRef) -> Self {
        Self {
            batch: RecordBatch::new_empty(schema),
            lon: Float64Array::from(Vec::<f64>::new()),
            lat: Float64Array::from(Vec::<f64>::new()),
        }
    }

    /// Concatenate batches that share `schema`, in order
    pub fn concat(schema: SchemaRef, parts: &[GeoBatch]) -> Result<Self> {
        if parts.is_empty() {
            return Ok(Self::empty(schema));
        }

        let batch = concat_batches(&schema, parts.iter().map(|p| &p.batch))?;
        let lon = concat_points(parts.iter().map(|p| &p.lon as &dyn Array))?;
        let lat = concat_points(parts.iter().map(|p| &p.lat as &dyn Array))?;

        Self::try_new(batch, lon, lat)
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn lon(&self) -> &Float64Array {
        &self.lon
    }

    pub fn lat(&self) -> &Float64Array {
        &self.lat
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect()
    }

    pub fn into_parts(self) -> (RecordBatch, Float64Array, Float64Array) {
        (self.batch, self.lon, self.lat)
    }

    /// Extent of the points, `None` when there are none
    pub fn bbox(&self) -> Option<BoundingBox> {
        let mut bbox = BoundingBox::empty();
        for (x, y) in self.lon.values().iter().zip(self.lat.values().iter()) {
            bbox.extend(*x, *y);
        }
        (!bbox.is_empty()).then_some(bbox)
    }
}

fn concat_points<'a>(arrays: impl Iterator<Item = &'a dyn Array>) -> Result<Float64Array> {
    let arrays: Vec<&dyn Array> = arrays.collect();
    let joined: ArrayRef = concat(&arrays)?;
    Ok(joined.as_primitive::<Float64Type>().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::StringArray;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn part(names: &[&str], lon: Vec<f64>, lat: Vec<f64>) -> GeoBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(FILENAME_COLUMN, DataType::Utf8, true)]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(names.to_vec()))]).unwrap();
        GeoBatch::try_new(batch, Float64Array::from(lon), Float64Array::from(lat)).unwrap()
    }

    #[test]
    fn test_concat_preserves_order() {
        let a = part(&["a", "a"], vec![1.0, 2.0], vec![10.0, 20.0]);
        let b = part(&["b"], vec![3.0], vec![-30.0]);
        let joined = GeoBatch::concat(a.schema(), &[a, b]).unwrap();

        assert_eq!(joined.num_rows(), 3);
        assert_eq!(joined.lon().values().to_vec(), vec![1.0, 2.0, 3.0]);
        let names = joined.batch().column(0).as_string::<i32>();
        assert_eq!(names.value(2), "b");

        let bbox = joined.bbox().unwrap();
        assert_eq!(bbox.to_wsen_string(), "1,-30,3,20");
    }

    #[test]
    fn test_mismatched_points_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Utf8, true)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(StringArray::from(vec!["a"]))]).unwrap();
        assert!(GeoBatch::try_new(batch.clone(), Float64Array::from(vec![1.0]), Float64Array::from(vec![1.0, 2.0])).is_err());
        assert!(GeoBatch::try_new(batch, Float64Array::from(vec![1.0, 2.0]), Float64Array::from(vec![1.0, 2.0])).is_err());
    }

    #[test]
    fn test_empty() {
        let schema = Arc::new(Schema::new(vec![Field::new("x", DataType::Utf8, true)]));
        let empty = GeoBatch::empty(schema);
        assert!(empty.is_empty());
        assert!(empty.bbox().is_none());
        assert_eq!(empty.column_names(), vec!["x"]);
    }
}
