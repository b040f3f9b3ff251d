//! Granules read with libhdf5

use super::{GranuleReader, base_name, two_dimensional};
use crate::beams::BEAM_PREFIX;
use crate::error::{Result, SubsetError};
use arrow::array::{
    ArrayRef, BooleanArray, Float32Array, Float64Array, Int8Array, Int16Array, Int32Array,
    Int64Array, StringArray, UInt8Array, UInt16Array, UInt32Array, UInt64Array,
};
use hdf5_metno::types::{FloatSize, IntSize, TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5_metno::{Dataset, File};
use std::path::Path;
use std::sync::Arc;

pub struct Hdf5Granule {
    file: File,
    name: String,
}

impl Hdf5Granule {
    pub fn open(path: &Path) -> Result<Self> {
        let location = path.display().to_string();
        let file = File::open(path).map_err(|e| SubsetError::open(location.clone(), e))?;

        Ok(Self {
            file,
            name: base_name(&location).to_string(),
        })
    }
}

impl GranuleReader for Hdf5Granule {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn list_beams(&self) -> Result<Vec<String>> {
        let names = self
            .file
            .member_names()
            .map_err(|e| SubsetError::open(self.name.clone(), e))?;
        Ok(names
            .into_iter()
            .filter(|name| name.starts_with(BEAM_PREFIX))
            .collect())
    }

    fn read_column(&self, beam: &str, path: &str) -> Result<ArrayRef> {
        let dataset = self
            .file
            .dataset(&format!("{}/{}", beam, path))
            .map_err(|e| SubsetError::read(beam, path, e))?;

        let shape = dataset.shape();
        let values = read_dataset(&dataset).map_err(|reason| SubsetError::read(beam, path, reason))?;

        match shape.as_slice() {
            [_] => Ok(values),
            [_, width] => two_dimensional(values, *width),
            other => Err(SubsetError::read(
                beam,
                path,
                format!("{} dimensions are not supported", other.len()),
            )),
        }
    }
}

/// Read a dataset flat, in row-major order
fn read_dataset(dataset: &Dataset) -> std::result::Result<ArrayRef, String> {
    let descriptor = dataset
        .dtype()
        .and_then(|dtype| dtype.to_descriptor())
        .map_err(|e| e.to_string())?;

    macro_rules! raw {
        ($native:ty, $array:ty) => {
            Arc::new(<$array>::from(
                dataset.read_raw::<$native>().map_err(|e| e.to_string())?,
            )) as ArrayRef
        };
    }

    let array: ArrayRef = match descriptor {
        TypeDescriptor::Integer(IntSize::U1) => raw!(i8, Int8Array),
        TypeDescriptor::Integer(IntSize::U2) => raw!(i16, Int16Array),
        TypeDescriptor::Integer(IntSize::U4) => raw!(i32, Int32Array),
        TypeDescriptor::Integer(IntSize::U8) => raw!(i64, Int64Array),
        TypeDescriptor::Unsigned(IntSize::U1) => raw!(u8, UInt8Array),
        TypeDescriptor::Unsigned(IntSize::U2) => raw!(u16, UInt16Array),
        TypeDescriptor::Unsigned(IntSize::U4) => raw!(u32, UInt32Array),
        TypeDescriptor::Unsigned(IntSize::U8) => raw!(u64, UInt64Array),
        TypeDescriptor::Float(FloatSize::U4) => raw!(f32, Float32Array),
        TypeDescriptor::Float(FloatSize::U8) => raw!(f64, Float64Array),
        TypeDescriptor::Boolean => raw!(bool, BooleanArray),
        TypeDescriptor::VarLenUnicode => {
            let values = dataset
                .read_raw::<VarLenUnicode>()
                .map_err(|e| e.to_string())?;
            Arc::new(StringArray::from_iter_values(values.iter().map(|s| s.as_str())))
        }
        TypeDescriptor::VarLenAscii => {
            let values = dataset
                .read_raw::<VarLenAscii>()
                .map_err(|e| e.to_string())?;
            Arc::new(StringArray::from_iter_values(values.iter().map(|s| s.as_str())))
        }
        other => return Err(format!("unsupported dataset type {:?}", other)),
    };

    Ok(array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    #[test]
    fn test_read_beams_and_nested_datasets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("GEDI04_A_test.h5");

        {
            let file = File::create(&path).unwrap();
            let beam = file.create_group("BEAM0000").unwrap();
            beam.new_dataset_builder()
                .with_data(&[-1.82556_f64, -9.82514, -1.82471])
                .create("lat_lowestmode")
                .unwrap();
            beam.new_dataset_builder()
                .with_data(&[0_u8, 1, 1])
                .create("l2_quality_flag")
                .unwrap();
            let land_cover = beam.create_group("land_cover_data").unwrap();
            land_cover
                .new_dataset_builder()
                .with_data(&[77.0_f32, 98.0, 95.0])
                .create("landsat_treecover")
                .unwrap();
            file.create_group("METADATA").unwrap();
        }

        let granule = Hdf5Granule::open(&path).unwrap();
        assert_eq!(granule.file_name(), "GEDI04_A_test.h5");
        assert_eq!(granule.list_beams().unwrap(), vec!["BEAM0000"]);

        let lat = granule.read_column("BEAM0000", "lat_lowestmode").unwrap();
        assert_eq!(lat.len(), 3);
        let flags = granule.read_column("BEAM0000", "l2_quality_flag").unwrap();
        assert_eq!(flags.data_type(), &arrow::datatypes::DataType::UInt8);
        let cover = granule
            .read_column("BEAM0000", "land_cover_data/landsat_treecover")
            .unwrap();
        assert_eq!(cover.len(), 3);

        assert!(matches!(
            granule.read_column("BEAM0000", "agbd"),
            Err(SubsetError::Read { .. })
        ));
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            Hdf5Granule::open(Path::new("/nonexistent/granule.h5")),
            Err(SubsetError::Open { .. })
        ));
    }
}
