//! From a DOI and an AOI to ordered granule references

use crate::collections::canonical_doi;
use crate::models::{GranuleQuery, GranuleRecord};
use crate::{Catalog, CatalogError, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use diagnostics::*;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use subset::{AreaOfInterest, GranuleReference};

/// Largest page the CMR serves
pub const PAGE_MAX: usize = 2000;

/// A closed time interval, either end possibly open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemporalRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TemporalRange {
    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| *t >= s) && self.end.is_none_or(|e| *t <= e)
    }

    /// The CMR `temporal` parameter value
    pub fn to_cmr(&self) -> String {
        let fmt = |t: &Option<DateTime<Utc>>| {
            t.map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
                .unwrap_or_default()
        };
        format!("{},{}", fmt(&self.start), fmt(&self.end))
    }
}

impl fmt::Display for TemporalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_cmr())
    }
}

/// `START,END` with RFC 3339 timestamps or `YYYY-MM-DD` dates; a date
/// covers its whole day
impl FromStr for TemporalRange {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s
            .split_once(',')
            .ok_or_else(|| CatalogError::Temporal(format!("expected START,END, found {:?}", s)))?;
        let range = TemporalRange {
            start: parse_instant(start, NaiveTime::MIN)?,
            end: parse_instant(end, end_of_day())?,
        };
        match (range.start, range.end) {
            (Some(start), Some(end)) if start > end => Err(CatalogError::Temporal(format!(
                "{} is after {}",
                start, end
            ))),
            _ => Ok(range),
        }
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

fn parse_instant(text: &str, time_of_day: NaiveTime) -> Result<Option<DateTime<Utc>>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(Some(t.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map(|d| Some(d.and_time(time_of_day).and_utc()))
        .map_err(|_| CatalogError::Temporal(format!("cannot parse {:?} as a date or timestamp", text)))
}

/// Resolves collections and pages through their granules
pub struct GranuleResolver {
    catalog: Arc<dyn Catalog>,
    page_max: usize,
    prefer_direct_access: bool,
}

impl GranuleResolver {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            page_max: PAGE_MAX,
            prefer_direct_access: false,
        }
    }

    /// Request at most `page_max` granules at a time
    pub fn with_page_max(mut self, page_max: usize) -> Self {
        self.page_max = page_max.clamp(1, PAGE_MAX);
        self
    }

    /// Use `s3://` links when a granule has them
    pub fn prefer_direct_access(mut self, prefer: bool) -> Self {
        self.prefer_direct_access = prefer;
        self
    }

    /// Granules of `doi_or_name` intersecting `aoi`, in catalog order
    ///
    /// At most `limit` catalog candidates are considered; `limit <= 0`
    /// considers all of them.
    pub async fn resolve(
        &self,
        doi_or_name: &str,
        aoi: &AreaOfInterest,
        temporal: Option<&TemporalRange>,
        limit: i64,
    ) -> Result<Vec<GranuleReference>> {
        let doi = canonical_doi(doi_or_name);
        let mut collections = self.catalog.search_collections(doi, 2).await?;
        if collections.len() > 1 {
            return Err(CatalogError::AmbiguousCollection(doi.to_string()));
        }
        let collection = collections
            .pop()
            .ok_or_else(|| CatalogError::CollectionNotFound(doi.to_string()))?;

        let concept_id = collection.concept_id.clone();
        match collection.is_hdf5() {
            Some(true) => {}
            Some(false) => {
                return Err(CatalogError::UnsupportedFormat {
                    collection: concept_id,
                    formats: collection.formats.join(", "),
                });
            }
            None => {
                warn!("Collection {concept_id} declares no file format, assuming HDF5");
            }
        }
        info!("Resolved {doi} to collection {concept_id}");

        let query = GranuleQuery {
            collection_concept_id: concept_id,
            bounding_box: Some(*aoi.bbox()),
            temporal: temporal.copied(),
        };

        let mut remaining = usize::try_from(limit).ok().filter(|n| *n > 0);
        let mut cursor: Option<String> = None;
        let mut references = Vec::new();
        let mut considered = 0_usize;

        loop {
            let page_size = remaining.map_or(self.page_max, |r| r.min(self.page_max));
            let page = self
                .catalog
                .search_granules(&query, page_size, cursor.as_deref())
                .await?;
            let fetched = page.items.len();

            for record in page.items.into_iter().take(remaining.unwrap_or(usize::MAX)) {
                considered += 1;
                if let Some(reference) = self.accept(record, aoi) {
                    references.push(reference);
                }
            }

            if let Some(r) = remaining.as_mut() {
                *r = r.saturating_sub(fetched);
            }
            cursor = page.search_after;
            if fetched == 0 || cursor.is_none() || remaining == Some(0) {
                break;
            }
        }

        let accepted = references.len();
        info!("Found {accepted} granules intersecting the AOI among {considered} candidates");
        Ok(references)
    }

    fn accept(&self, record: GranuleRecord, aoi: &AreaOfInterest) -> Option<GranuleReference> {
        let name = record.name;
        if !record.envelope.is_empty() && !aoi.intersects_any(&record.envelope) {
            debug!("Granule {name} does not intersect the AOI");
            return None;
        }

        let url = if self.prefer_direct_access {
            record.direct_url.or(record.http_url)
        } else {
            record.http_url.or(record.direct_url)
        };
        let Some(url) = url else {
            debug!("Granule {name} has no data URL");
            return None;
        };

        let mut reference = GranuleReference::new(name, url).with_envelope(record.envelope);
        if let Some(begin) = record.begin {
            reference = reference.with_temporal(begin);
        }
        Some(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_temporal_parse() {
        let range: TemporalRange = "2019-04-01,2019-04-30".parse().unwrap();
        assert_eq!(range.start, Some(Utc.with_ymd_and_hms(2019, 4, 1, 0, 0, 0).unwrap()));
        assert_eq!(range.end, Some(Utc.with_ymd_and_hms(2019, 4, 30, 23, 59, 59).unwrap()));
        assert_eq!(range.to_cmr(), "2019-04-01T00:00:00Z,2019-04-30T23:59:59Z");

        let open: TemporalRange = "2020-01-01T12:00:00Z,".parse().unwrap();
        assert_eq!(open.end, None);
        assert_eq!(open.to_cmr(), "2020-01-01T12:00:00Z,");
        assert!(open.contains(&Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert!(!open.contains(&Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()));

        assert!("2019-04-01".parse::<TemporalRange>().is_err());
        assert!("yesterday,".parse::<TemporalRange>().is_err());
        assert!("2020-01-01,2019-01-01".parse::<TemporalRange>().is_err());
    }
}
