//! Access to the beam groups of a granule
//!
//! A granule is a set of top-level `BEAMxxxx` groups, each holding 1D
//! datasets (one value per sample), 2D datasets (a fixed number of
//! components per sample) and one level of named sub-groups with more of
//! the same. Backends implement [`GranuleReader`] and hand datasets back as
//! Arrow arrays: 1D as primitive arrays, 2D as `FixedSizeListArray`.

use crate::error::{Result, SubsetError};
use arrow::array::{Array, ArrayRef, FixedSizeListArray};
use arrow::datatypes::Field;
use std::path::Path;
use std::sync::Arc;

#[cfg(feature = "hdf5")]
pub mod hdf5;
pub mod memory;

pub use memory::MemoryGranule;

/// Read access to one granule
pub trait GranuleReader: Send {
    /// Base name of the granule file, used for the `filename` column
    fn file_name(&self) -> &str;

    /// Names of the beam groups present in the file
    fn list_beams(&self) -> Result<Vec<String>>;

    /// Read `path` (slash form, relative to the beam group) in full
    fn read_column(&self, beam: &str, path: &str) -> Result<ArrayRef>;
}

const NO_BACKEND: &str = "HDF5 support is not compiled in (build with the `hdf5` feature)";

/// Fails unless this build can read granule files
///
/// The error is a configuration error, so callers can reject a job before
/// any granule is searched for or fetched.
pub fn require_backend() -> Result<()> {
    if cfg!(feature = "hdf5") {
        Ok(())
    } else {
        Err(SubsetError::InvalidJob(NO_BACKEND.to_string()))
    }
}

/// Open a local granule with the backend compiled into this build
pub fn open_path(path: &Path) -> Result<Box<dyn GranuleReader>> {
    #[cfg(feature = "hdf5")]
    {
        Ok(Box::new(hdf5::Hdf5Granule::open(path)?))
    }

    #[cfg(not(feature = "hdf5"))]
    {
        Err(SubsetError::open(path.display().to_string(), NO_BACKEND))
    }
}

/// Base name of a path or URL
pub fn base_name(location: &str) -> &str {
    let trimmed = location.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Wrap row-major `values` as one list of `width` components per sample
pub fn two_dimensional(values: ArrayRef, width: usize) -> Result<ArrayRef> {
    let size = i32::try_from(width)
        .map_err(|_| SubsetError::InvalidColumn(format!("{} components per sample is too many", width)))?;
    if width == 0 || values.len() % width != 0 {
        return Err(SubsetError::InvalidColumn(format!(
            "{} values do not divide into rows of {}",
            values.len(),
            width
        )));
    }

    let field = Arc::new(Field::new_list_field(values.data_type().clone(), true));
    Ok(Arc::new(FixedSizeListArray::try_new(field, size, values, None)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Float64Array;

    #[test]
    fn test_base_name() {
        assert_eq!(
            base_name("s3://bucket/path/GEDI04_A_2019.h5"),
            "GEDI04_A_2019.h5"
        );
        assert_eq!(base_name("/tmp/granule.h5"), "granule.h5");
        assert_eq!(base_name("granule.h5"), "granule.h5");
    }

    #[test]
    fn test_two_dimensional() {
        let values: ArrayRef = Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        let list = two_dimensional(values.clone(), 3).unwrap();
        assert_eq!(list.len(), 2);

        assert!(two_dimensional(values.clone(), 4).is_err());
        assert!(two_dimensional(values, 0).is_err());
    }

    #[cfg(not(feature = "hdf5"))]
    #[test]
    fn test_open_path_without_backend() {
        let result = open_path(Path::new("granule.h5"));
        assert!(matches!(result, Err(SubsetError::Open { .. })));

        let err = require_backend().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("hdf5"));
    }

    #[cfg(feature = "hdf5")]
    #[test]
    fn test_backend_available() {
        assert!(require_backend().is_ok());
    }
}
