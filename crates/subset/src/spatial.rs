//! Point-in-AOI masks over coordinate columns

use crate::error::{Result, SubsetError};
use crate::geometry::AreaOfInterest;
use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, BooleanBufferBuilder, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};

/// Mask of samples falling inside the AOI
///
/// Null, NaN and out-of-domain coordinates are outside. The result has no
/// nulls.
pub fn mask(lat: &Float64Array, lon: &Float64Array, aoi: &AreaOfInterest) -> Result<BooleanArray> {
    if lat.len() != lon.len() {
        return Err(SubsetError::LengthMismatch {
            lat: lat.len(),
            lon: lon.len(),
        });
    }

    let lats = lat.values();
    let lons = lon.values();
    let mut builder = BooleanBufferBuilder::new(lat.len());

    for i in 0..lat.len() {
        let (y, x) = (lats[i], lons[i]);
        let valid = lat.is_valid(i)
            && lon.is_valid(i)
            && (-90.0..=90.0).contains(&y)
            && (-180.0..=180.0).contains(&x);
        builder.append(valid && aoi.contains(x, y));
    }

    Ok(BooleanArray::new(builder.finish(), None))
}

/// Like [`mask`], casting numeric coordinate arrays to Float64 first
pub fn mask_columns(lat: &ArrayRef, lon: &ArrayRef, aoi: &AreaOfInterest) -> Result<BooleanArray> {
    let lat = to_float64(lat, "latitude")?;
    let lon = to_float64(lon, "longitude")?;
    mask(lat.as_primitive::<Float64Type>(), lon.as_primitive::<Float64Type>(), aoi)
}

fn to_float64(array: &ArrayRef, what: &str) -> Result<ArrayRef> {
    if !array.data_type().is_numeric() {
        return Err(SubsetError::Query(format!(
            "{} must be numeric, found {}",
            what,
            array.data_type()
        )));
    }
    Ok(cast(array, &DataType::Float64)?)
}

/// Number of `true` values
pub fn selected(mask: &BooleanArray) -> usize {
    mask.true_count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Polygon;
    use arrow::array::{Float32Array, Int32Array, StringArray};
    use std::sync::Arc;

    fn one_degree() -> AreaOfInterest {
        AreaOfInterest::new(vec![Polygon::rectangle(10.0, -2.0, 11.0, -1.0).unwrap()]).unwrap()
    }

    #[test]
    fn test_inside_outside() {
        let lat = Float64Array::from(vec![-1.5, -1.5, 40.0]);
        let lon = Float64Array::from(vec![10.5, 12.0, 10.5]);
        let m = mask(&lat, &lon, &one_degree()).unwrap();
        assert_eq!(m, BooleanArray::from(vec![true, false, false]));
        assert_eq!(m.null_count(), 0);
    }

    #[test]
    fn test_boundary_and_vertex_inclusive() {
        let lat = Float64Array::from(vec![-1.0, -2.0, -1.5]);
        let lon = Float64Array::from(vec![10.5, 11.0, 10.0]);
        let m = mask(&lat, &lon, &one_degree()).unwrap();
        assert_eq!(selected(&m), 3);
    }

    #[test]
    fn test_invalid_coordinates_are_outside() {
        let lat = Float64Array::from(vec![Some(f64::NAN), None, Some(-1.5), Some(-91.0), Some(-1.5)]);
        let lon = Float64Array::from(vec![Some(10.5), Some(10.5), None, Some(10.5), Some(f64::INFINITY)]);
        let m = mask(&lat, &lon, &one_degree()).unwrap();
        assert_eq!(selected(&m), 0);
        assert_eq!(m.len(), 5);
    }

    #[test]
    fn test_length_mismatch() {
        let lat = Float64Array::from(vec![1.0, 2.0]);
        let lon = Float64Array::from(vec![1.0]);
        assert!(matches!(
            mask(&lat, &lon, &one_degree()),
            Err(SubsetError::LengthMismatch { lat: 2, lon: 1 })
        ));
    }

    #[test]
    fn test_empty_arrays() {
        let lat = Float64Array::from(Vec::<f64>::new());
        let lon = Float64Array::from(Vec::<f64>::new());
        assert_eq!(mask(&lat, &lon, &one_degree()).unwrap().len(), 0);
    }

    #[test]
    fn test_mask_columns_casts() {
        let lat: ArrayRef = Arc::new(Float32Array::from(vec![-1.5_f32, 5.0]));
        let lon: ArrayRef = Arc::new(Int32Array::from(vec![10, 10]));
        let m = mask_columns(&lat, &lon, &one_degree()).unwrap();
        assert_eq!(m, BooleanArray::from(vec![true, false]));

        let text: ArrayRef = Arc::new(StringArray::from(vec!["a", "b"]));
        assert!(mask_columns(&text, &lon, &one_degree()).is_err());
    }
}
