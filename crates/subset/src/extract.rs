//! Per-granule extraction
//!
//! For each selected beam the coordinates are read first and tested against
//! the AOI. Beams without a single sample inside are skipped before any
//! other dataset is read; attribute datasets (often 2D) are the expensive
//! part of a granule.

use crate::beams::beam_suffix;
use crate::columns::ColumnSpec;
use crate::error::{Result, SubsetError};
use crate::job::SubsetJob;
use crate::merge::{conform, placeholder_schema};
use crate::query;
use crate::reader::GranuleReader;
use crate::spatial;
use crate::table::{BEAM_COLUMN, FILENAME_COLUMN, GeoBatch};
use arrow::array::{Array, ArrayRef, AsArray, StringArray, UInt64Array};
use arrow::compute::{cast, filter, filter_record_batch, take};
use arrow::datatypes::{DataType, Field, Float64Type, Schema};
use arrow::record_batch::RecordBatch;
use diagnostics::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Rows of one granule inside the AOI that pass the job's query
///
/// Beams are visited in the job's order; beams the file lacks are skipped.
/// A failure to read any dataset of a visited beam fails the whole granule.
pub fn subset_granule(reader: &dyn GranuleReader, job: &SubsetJob) -> Result<GeoBatch> {
    let granule = reader.file_name().to_string();
    let present: HashSet<String> = reader.list_beams()?.into_iter().collect();
    let attributes = job.attribute_columns();

    let mut parts = Vec::new();
    for beam in job.beams() {
        if !present.contains(beam) {
            debug!("Granule {granule} has no {beam}");
            continue;
        }

        if let Some(part) = subset_beam(reader, job, beam, &attributes, &granule)? {
            parts.push(part);
        }
    }

    let Some(first) = parts.first() else {
        debug!("Granule {granule} has no matching rows");
        return Ok(GeoBatch::empty(placeholder_schema(job.columns())));
    };

    // Beams of one file normally agree on types; cast to the first if not
    let schema = first.schema();
    let parts = parts
        .iter()
        .map(|part| conform(part, &schema))
        .collect::<Result<Vec<_>>>()?;
    let result = GeoBatch::concat(schema, &parts)?;

    let rows = result.num_rows();
    debug!("Granule {granule} yielded {rows} rows");
    Ok(result)
}

fn subset_beam(
    reader: &dyn GranuleReader,
    job: &SubsetJob,
    beam: &str,
    attributes: &[ColumnSpec],
    granule: &str,
) -> Result<Option<GeoBatch>> {
    let lat = reader.read_column(beam, job.lat().path())?;
    let lon = reader.read_column(beam, job.lon().path())?;
    let samples = lat.len();

    let inside = spatial::mask_columns(&lat, &lon, job.aoi()).map_err(|e| {
        SubsetError::read(beam, format!("{},{}", job.lat(), job.lon()), e)
    })?;
    let selected = inside.true_count();
    if selected == 0 {
        debug!("Beam {beam} of {granule} has no samples inside the AOI");
        return Ok(None);
    }

    // Read each dataset once, whatever number of columns project from it
    let mut datasets: HashMap<&str, ArrayRef> = HashMap::new();
    datasets.insert(job.lat().path(), lat.clone());
    datasets.insert(job.lon().path(), lon.clone());

    let mut fields = Vec::with_capacity(attributes.len());
    let mut arrays = Vec::with_capacity(attributes.len());
    for column in attributes {
        let raw = match datasets.get(column.path()) {
            Some(array) => array.clone(),
            None => {
                let array = reader.read_column(beam, column.path())?;
                datasets.insert(column.path(), array.clone());
                array
            }
        };

        if raw.len() != samples {
            return Err(SubsetError::read(
                beam,
                column.path(),
                format!("{} values for {} samples", raw.len(), samples),
            ));
        }

        let projected = match column.component() {
            Some(index) => {
                select_component(&raw, index).map_err(|reason| SubsetError::read(beam, column.name(), reason))?
            }
            None => raw,
        };

        let kept = filter(&projected, &inside)?;
        fields.push(Field::new(column.name(), kept.data_type().clone(), true));
        arrays.push(kept);
    }

    let table = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
    let lat = filter(&cast(&lat, &DataType::Float64)?, &inside)?;
    let lon = filter(&cast(&lon, &DataType::Float64)?, &inside)?;

    let matched = query::mask(&table, job.query())?;
    let table = filter_record_batch(&table, &matched)?;
    let lat = filter(&lat, &matched)?;
    let lon = filter(&lon, &matched)?;

    let rows = table.num_rows();
    debug!("Beam {beam} of {granule}: {selected} of {samples} samples inside the AOI, {rows} match");
    if rows == 0 {
        return Ok(None);
    }

    let output = output_table(&table, job.columns().len(), granule, beam)?;
    let lon = lon.as_primitive::<Float64Type>().clone();
    let lat = lat.as_primitive::<Float64Type>().clone();
    Ok(Some(GeoBatch::try_new(output, lon, lat)?))
}

/// Keep the leading output columns and append provenance
fn output_table(table: &RecordBatch, outputs: usize, granule: &str, beam: &str) -> Result<RecordBatch> {
    let rows = table.num_rows();
    let projected = table.project(&(0..outputs).collect::<Vec<_>>())?;

    let mut fields: Vec<Field> = projected
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.push(Field::new(FILENAME_COLUMN, DataType::Utf8, true));
    fields.push(Field::new(BEAM_COLUMN, DataType::Utf8, true));

    let mut columns = projected.columns().to_vec();
    columns.push(Arc::new(StringArray::from(vec![granule; rows])));
    columns.push(Arc::new(StringArray::from(vec![beam_suffix(beam); rows])));

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Component `index` of every sample of a 2D dataset; negative indexes
/// count from the end
fn select_component(array: &ArrayRef, index: i64) -> std::result::Result<ArrayRef, String> {
    let DataType::FixedSizeList(_, width) = array.data_type() else {
        return Err(format!(
            "component [{}] requested from a one dimensional dataset",
            index
        ));
    };
    let width = i64::from(*width);
    let resolved = if index < 0 { width + index } else { index };
    if resolved < 0 || resolved >= width {
        return Err(format!(
            "component [{}] is out of range for {} components",
            index, width
        ));
    }

    let list = array.as_fixed_size_list();
    let rows = list.len() as u64;
    let width = width as u64;
    let resolved = resolved as u64;
    let indices = UInt64Array::from_iter_values((0..rows).map(|row| row * width + resolved));
    take(list.values().as_ref(), &indices, None).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beams::BeamSelection;
    use crate::geometry::{AreaOfInterest, Polygon};
    use crate::reader::{MemoryGranule, two_dimensional};
    use arrow::array::{Float32Array, Float64Array, UInt8Array};

    fn aoi() -> AreaOfInterest {
        AreaOfInterest::new(vec![Polygon::rectangle(10.0, -2.0, 11.0, -1.0).unwrap()]).unwrap()
    }

    fn floats(values: &[f64]) -> ArrayRef {
        Arc::new(Float64Array::from(values.to_vec()))
    }

    /// BEAM0000 inside the AOI, BEAM0101 outside it
    fn granule() -> MemoryGranule {
        let xvar = two_dimensional(floats(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]), 2).unwrap();
        MemoryGranule::new("GEDI04_A_test.h5")
            .with_column("BEAM0000", "lat_lowestmode", floats(&[-1.5, -1.4, -1.3, -5.0]))
            .with_column("BEAM0000", "lon_lowestmode", floats(&[10.5, 10.6, 10.7, 10.5]))
            .with_column("BEAM0000", "agbd", Arc::new(Float32Array::from(vec![1.0, 2.0, 3.0, 4.0])))
            .with_column("BEAM0000", "sensitivity", floats(&[0.9, 0.97, 0.99, 0.99]))
            .with_column("BEAM0000", "l2_quality_flag", Arc::new(UInt8Array::from(vec![1, 1, 0, 1])))
            .with_column("BEAM0000", "land_cover_data/landsat_treecover", floats(&[77.0, 98.0, 95.0, 10.0]))
            .with_column("BEAM0000", "xvar", xvar)
            .with_column("BEAM0101", "lat_lowestmode", floats(&[40.0, 41.0]))
            .with_column("BEAM0101", "lon_lowestmode", floats(&[10.5, 10.5]))
    }

    fn job(columns: &[&str], query: &str) -> SubsetJob {
        SubsetJob::builder(aoi())
            .lat("lat_lowestmode")
            .lon("lon_lowestmode")
            .columns(columns.iter().copied())
            .query(query)
            .build()
            .unwrap()
    }

    #[test]
    fn test_inside_beam_only() {
        let result = subset_granule(&granule(), &job(&["agbd"], "")).unwrap();
        assert_eq!(result.num_rows(), 3);
        assert_eq!(result.column_names(), vec!["agbd", "filename", "BEAM"]);

        let beams = result.batch().column(2).as_string::<i32>();
        assert!(beams.iter().all(|b| b == Some("0000")));
        let files = result.batch().column(1).as_string::<i32>();
        assert_eq!(files.value(0), "GEDI04_A_test.h5");

        // BEAM0101 is outside the AOI, so its missing agbd is never read
        assert_eq!(result.lat().values().to_vec(), vec![-1.5, -1.4, -1.3]);
    }

    #[test]
    fn test_query_and_column_order() {
        let result = subset_granule(
            &granule(),
            &job(&["sensitivity", "agbd"], "sensitivity > 0.95 and l2_quality_flag == 1"),
        )
        .unwrap();
        assert_eq!(result.num_rows(), 1);
        assert_eq!(result.column_names(), vec!["sensitivity", "agbd", "filename", "BEAM"]);
        let agbd = result.batch().column(1).as_primitive::<arrow::datatypes::Float32Type>();
        assert_eq!(agbd.value(0), 2.0);
    }

    #[test]
    fn test_nested_and_dotted_columns() {
        let result = subset_granule(
            &granule(),
            &job(&["land_cover_data.landsat_treecover"], "`land_cover_data/landsat_treecover` > 90"),
        )
        .unwrap();
        assert_eq!(result.num_rows(), 2);
        assert_eq!(result.column_names()[0], "land_cover_data/landsat_treecover");
    }

    #[test]
    fn test_two_dimensional_columns() {
        let result = subset_granule(&granule(), &job(&["xvar", "xvar[-1]"], "xvar[0] > 2")).unwrap();
        assert_eq!(result.num_rows(), 2);
        assert!(matches!(result.schema().field(0).data_type(), DataType::FixedSizeList(_, 2)));

        let last = result.batch().column(1).as_primitive::<Float64Type>();
        assert_eq!(last.values().to_vec(), vec![4.0, 6.0]);
    }

    #[test]
    fn test_coordinates_as_output_columns() {
        let result = subset_granule(&granule(), &job(&["lat_lowestmode", "agbd"], "")).unwrap();
        assert_eq!(result.num_rows(), 3);
        let lat = result.batch().column(0).as_primitive::<Float64Type>();
        assert_eq!(lat.value(2), -1.3);
    }

    #[test]
    fn test_beam_selection_skips_missing_beams() {
        let job = SubsetJob::builder(aoi())
            .lat("lat_lowestmode")
            .lon("lon_lowestmode")
            .columns(["agbd"])
            .beams("power".parse::<BeamSelection>().unwrap())
            .build()
            .unwrap();
        let result = subset_granule(&granule(), &job).unwrap();
        assert_eq!(result.num_rows(), 0);
        assert_eq!(result.column_names(), vec!["agbd", "filename", "BEAM"]);
    }

    #[test]
    fn test_missing_column_fails_granule() {
        let err = subset_granule(&granule(), &job(&["agbd", "agbd_se"], "")).unwrap_err();
        assert!(matches!(err, SubsetError::Read { ref beam, ref column, .. } if beam == "BEAM0000" && column == "agbd_se"));
    }

    #[test]
    fn test_query_on_unread_column_fails_only_when_visited() {
        // The query column is missing everywhere but no beam reaches the read
        let outside = AreaOfInterest::new(vec![Polygon::rectangle(100.0, 0.0, 101.0, 1.0).unwrap()]).unwrap();
        let job = SubsetJob::builder(outside)
            .lat("lat_lowestmode")
            .lon("lon_lowestmode")
            .columns(["agbd"])
            .query("missing > 1")
            .build()
            .unwrap();
        assert_eq!(subset_granule(&granule(), &job).unwrap().num_rows(), 0);
    }

    #[test]
    fn test_bad_component() {
        assert!(matches!(
            subset_granule(&granule(), &job(&["xvar[2]"], "")),
            Err(SubsetError::Read { .. })
        ));
        assert!(matches!(
            subset_granule(&granule(), &job(&["agbd[0]"], "")),
            Err(SubsetError::Read { .. })
        ));
    }

    #[test]
    fn test_length_mismatch_fails_granule() {
        let granule = granule().with_column("BEAM0000", "agbd", floats(&[1.0]));
        assert!(matches!(
            subset_granule(&granule, &job(&["agbd"], "")),
            Err(SubsetError::Read { .. })
        ));
    }
}
