//! In-memory granules

use super::GranuleReader;
use crate::columns::normalize_path;
use crate::error::{Result, SubsetError};
use arrow::array::ArrayRef;
use std::collections::BTreeMap;

/// A granule held entirely in memory, keyed by beam then dataset path
#[derive(Debug, Clone, Default)]
pub struct MemoryGranule {
    name: String,
    beams: BTreeMap<String, BTreeMap<String, ArrayRef>>,
}

impl MemoryGranule {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            beams: BTreeMap::new(),
        }
    }

    /// Add (or replace) a dataset; dotted paths are stored in slash form
    pub fn insert(&mut self, beam: &str, path: &str, array: ArrayRef) {
        self.beams
            .entry(beam.to_string())
            .or_default()
            .insert(normalize_path(path), array);
    }

    pub fn with_column(mut self, beam: &str, path: &str, array: ArrayRef) -> Self {
        self.insert(beam, path, array);
        self
    }

    /// Add an empty beam group
    pub fn with_beam(mut self, beam: &str) -> Self {
        self.beams.entry(beam.to_string()).or_default();
        self
    }
}

impl GranuleReader for MemoryGranule {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn list_beams(&self) -> Result<Vec<String>> {
        Ok(self.beams.keys().cloned().collect())
    }

    fn read_column(&self, beam: &str, path: &str) -> Result<ArrayRef> {
        let datasets = self
            .beams
            .get(beam)
            .ok_or_else(|| SubsetError::read(beam, path, "no such beam"))?;

        datasets
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| SubsetError::read(beam, path, "no such dataset"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Float64Array};
    use std::sync::Arc;

    #[test]
    fn test_read_back() {
        let granule = MemoryGranule::new("g.h5")
            .with_column("BEAM0000", "land_cover_data.landsat_treecover", Arc::new(Float64Array::from(vec![77.0])))
            .with_beam("BEAM0101");

        assert_eq!(granule.file_name(), "g.h5");
        assert_eq!(granule.list_beams().unwrap(), vec!["BEAM0000", "BEAM0101"]);

        let column = granule
            .read_column("BEAM0000", "land_cover_data/landsat_treecover")
            .unwrap();
        assert_eq!(column.len(), 1);

        assert!(matches!(
            granule.read_column("BEAM0000", "agbd"),
            Err(SubsetError::Read { .. })
        ));
        assert!(granule.read_column("BEAM1011", "agbd").is_err());
    }
}
