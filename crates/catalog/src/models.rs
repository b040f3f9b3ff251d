//! Catalog records and the UMM-JSON documents they are read from

use crate::resolver::TemporalRange;
use chrono::{DateTime, Utc};
use diagnostics::*;
use serde::Deserialize;
use subset::geometry::{BoundingBox, Coord, Polygon};

/// A collection as far as resolution cares
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Collection {
    pub concept_id: String,
    pub doi: Option<String>,
    pub short_name: String,
    pub version: String,
    /// Declared archive/distribution formats, possibly none
    pub formats: Vec<String>,
}

impl Collection {
    /// `None` when the collection declares no format at all
    pub fn is_hdf5(&self) -> Option<bool> {
        if self.formats.is_empty() {
            return None;
        }
        Some(self.formats.iter().any(|f| {
            let f = f.to_ascii_lowercase();
            f.contains("hdf5") || f.contains("hdf-5") || f == "h5"
        }))
    }
}

/// Granule search constraints
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GranuleQuery {
    pub collection_concept_id: String,
    pub bounding_box: Option<BoundingBox>,
    pub temporal: Option<TemporalRange>,
}

/// One granule search hit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GranuleRecord {
    /// The granule UR
    pub name: String,
    /// `GET DATA` link, usually HTTPS
    pub http_url: Option<String>,
    /// `GET DATA VIA DIRECT ACCESS` link, usually `s3://`
    pub direct_url: Option<String>,
    pub envelope: Vec<Polygon>,
    pub begin: Option<DateTime<Utc>>,
}

impl GranuleRecord {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_http_url<S: Into<String>>(mut self, url: S) -> Self {
        self.http_url = Some(url.into());
        self
    }

    pub fn with_direct_url<S: Into<String>>(mut self, url: S) -> Self {
        self.direct_url = Some(url.into());
        self
    }

    pub fn with_envelope(mut self, envelope: Vec<Polygon>) -> Self {
        self.envelope = envelope;
        self
    }

    pub fn with_begin(mut self, begin: DateTime<Utc>) -> Self {
        self.begin = Some(begin);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GranulePage {
    pub items: Vec<GranuleRecord>,
    /// Cursor for the next page; `None` once the catalog is exhausted
    pub search_after: Option<String>,
}

// UMM-JSON search responses

#[derive(Debug, Deserialize)]
pub struct SearchResults<T> {
    #[serde(default)]
    pub hits: Option<u64>,
    #[serde(default = "Vec::new")]
    pub items: Vec<Item<T>>,
}

#[derive(Debug, Deserialize)]
pub struct Item<T> {
    pub meta: Meta,
    pub umm: T,
}

#[derive(Debug, Deserialize)]
pub struct Meta {
    #[serde(rename = "concept-id")]
    pub concept_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UmmCollection {
    pub short_name: String,
    pub version: String,
    #[serde(rename = "DOI")]
    pub doi: Option<UmmDoi>,
    pub archive_and_distribution_information: Option<ArchiveAndDistributionInformation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UmmDoi {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ArchiveAndDistributionInformation {
    pub file_distribution_information: Vec<FileInformation>,
    pub file_archive_information: Vec<FileInformation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FileInformation {
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UmmGranule {
    #[serde(rename = "GranuleUR")]
    pub granule_ur: String,
    pub spatial_extent: Option<SpatialExtent>,
    pub temporal_extent: Option<TemporalExtent>,
    pub related_urls: Vec<RelatedUrl>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SpatialExtent {
    pub horizontal_spatial_domain: Option<HorizontalSpatialDomain>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HorizontalSpatialDomain {
    pub geometry: Option<UmmGeometry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UmmGeometry {
    #[serde(rename = "GPolygons")]
    pub gpolygons: Vec<GPolygon>,
    pub bounding_rectangles: Vec<BoundingRectangle>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GPolygon {
    pub boundary: Boundary,
    pub exclusive_zone: Option<ExclusiveZone>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Boundary {
    pub points: Vec<UmmPoint>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExclusiveZone {
    pub boundaries: Vec<Boundary>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct UmmPoint {
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BoundingRectangle {
    pub west_bounding_coordinate: f64,
    pub north_bounding_coordinate: f64,
    pub east_bounding_coordinate: f64,
    pub south_bounding_coordinate: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TemporalExtent {
    pub range_date_time: Option<RangeDateTime>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RangeDateTime {
    pub beginning_date_time: Option<DateTime<Utc>>,
    pub ending_date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RelatedUrl {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Type")]
    pub kind: Option<String>,
}

const GET_DATA: &str = "GET DATA";
const GET_DATA_DIRECT: &str = "GET DATA VIA DIRECT ACCESS";

impl From<Item<UmmCollection>> for Collection {
    fn from(item: Item<UmmCollection>) -> Self {
        let umm = item.umm;
        let formats = umm
            .archive_and_distribution_information
            .map(|info| {
                info.file_distribution_information
                    .into_iter()
                    .chain(info.file_archive_information)
                    .filter_map(|f| f.format)
                    .collect()
            })
            .unwrap_or_default();

        Collection {
            concept_id: item.meta.concept_id,
            doi: umm.doi.and_then(|d| d.doi),
            short_name: umm.short_name,
            version: umm.version,
            formats,
        }
    }
}

impl From<Item<UmmGranule>> for GranuleRecord {
    fn from(item: Item<UmmGranule>) -> Self {
        let umm = item.umm;
        let envelope = umm
            .spatial_extent
            .and_then(|s| s.horizontal_spatial_domain)
            .and_then(|h| h.geometry)
            .map(|g| envelope(&umm.granule_ur, g))
            .unwrap_or_default();

        GranuleRecord {
            http_url: data_url(&umm.related_urls, GET_DATA),
            direct_url: data_url(&umm.related_urls, GET_DATA_DIRECT),
            envelope,
            begin: umm
                .temporal_extent
                .and_then(|t| t.range_date_time)
                .and_then(|r| r.beginning_date_time),
            name: umm.granule_ur,
        }
    }
}

/// First link of type `kind`, preferring one that names an HDF5 file
fn data_url(urls: &[RelatedUrl], kind: &str) -> Option<String> {
    let mut matching = urls
        .iter()
        .filter(|u| u.kind.as_deref() == Some(kind))
        .peekable();
    let first = matching.peek().map(|u| u.url.clone());
    matching
        .find(|u| u.url.ends_with(".h5"))
        .map(|u| u.url.clone())
        .or(first)
}

/// Granule polygons, or its bounding rectangles when it has none
fn envelope(granule: &str, geometry: UmmGeometry) -> Vec<Polygon> {
    let polygons: Vec<Polygon> = geometry
        .gpolygons
        .iter()
        .filter_map(|g| {
            let holes = g
                .exclusive_zone
                .as_ref()
                .map(|z| z.boundaries.iter().map(ring).collect())
                .unwrap_or_default();
            match Polygon::new(ring(&g.boundary), holes) {
                Ok(polygon) => Some(polygon),
                Err(e) => {
                    let reason = e.to_string();
                    debug!("Ignoring polygon of {granule}: {reason}");
                    None
                }
            }
        })
        .collect();
    if !polygons.is_empty() {
        return polygons;
    }

    geometry
        .bounding_rectangles
        .iter()
        .flat_map(rectangles)
        .collect()
}

fn ring(boundary: &Boundary) -> Vec<Coord> {
    boundary.points.iter().map(|p| (p.longitude, p.latitude)).collect()
}

/// A rectangle, split in two when it crosses the antimeridian
fn rectangles(r: &BoundingRectangle) -> Vec<Polygon> {
    let (w, s, e, n) = (
        r.west_bounding_coordinate,
        r.south_bounding_coordinate,
        r.east_bounding_coordinate,
        r.north_bounding_coordinate,
    );
    let parts = if w > e {
        vec![(w, s, 180.0, n), (-180.0, s, e, n)]
    } else {
        vec![(w, s, e, n)]
    };
    parts
        .into_iter()
        .filter_map(|(w, s, e, n)| Polygon::rectangle(w, s, e, n).ok())
        .collect()
}
