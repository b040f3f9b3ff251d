use crate::geometry::Polygon;
use crate::reader::base_name;
use chrono::{DateTime, Utc};

/// A granule to subset: where to read it, and what the catalog says about
/// where and when it was observed
#[derive(Debug, Clone, PartialEq)]
pub struct GranuleReference {
    /// Catalog name (the granule UR)
    pub name: String,
    /// URL or local path of the data file
    pub uri: String,
    /// Footprint polygons from the catalog metadata; empty when unknown
    pub envelope: Vec<Polygon>,
    /// Start of the observation
    pub temporal: Option<DateTime<Utc>>,
}

impl GranuleReference {
    pub fn new<N: Into<String>, U: Into<String>>(name: N, uri: U) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            envelope: Vec::new(),
            temporal: None,
        }
    }

    pub fn with_envelope(mut self, envelope: Vec<Polygon>) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn with_temporal(mut self, temporal: DateTime<Utc>) -> Self {
        self.temporal = Some(temporal);
        self
    }

    /// Base name of the data file
    pub fn file_name(&self) -> &str {
        base_name(&self.uri)
    }
}
