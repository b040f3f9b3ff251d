//! The immutable description of one subsetting run

use crate::beams::BeamSelection;
use crate::columns::ColumnSpec;
use crate::error::{Result, SubsetError};
use crate::geometry::AreaOfInterest;
use crate::granule::GranuleReference;
use crate::query::Query;
use crate::output::{geoparquet, gpkg};
use crate::table::{BEAM_COLUMN, FILENAME_COLUMN};
use std::collections::HashSet;

/// Columns the writers add themselves; output formats such as SQLite
/// compare names without case
const RESERVED_COLUMNS: [&str; 5] = [
    FILENAME_COLUMN,
    BEAM_COLUMN,
    geoparquet::GEOMETRY_COLUMN,
    gpkg::GEOMETRY_COLUMN,
    gpkg::ID_COLUMN,
];

/// Everything a worker needs to subset any granule of the run
///
/// Built once with [`SubsetJobBuilder`] and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct SubsetJob {
    granules: Vec<GranuleReference>,
    selection: BeamSelection,
    beams: Vec<String>,
    lat: ColumnSpec,
    lon: ColumnSpec,
    columns: Vec<ColumnSpec>,
    query: Option<Query>,
    aoi: AreaOfInterest,
    tolerated_failure_percentage: u8,
    workers: usize,
}

impl SubsetJob {
    pub fn builder(aoi: AreaOfInterest) -> SubsetJobBuilder {
        SubsetJobBuilder::new(aoi)
    }

    /// Granules in resolution order
    pub fn granules(&self) -> &[GranuleReference] {
        &self.granules
    }

    pub fn selection(&self) -> &BeamSelection {
        &self.selection
    }

    /// Beams to visit, in order
    pub fn beams(&self) -> &[String] {
        &self.beams
    }

    pub fn lat(&self) -> &ColumnSpec {
        &self.lat
    }

    pub fn lon(&self) -> &ColumnSpec {
        &self.lon
    }

    /// Output columns in request order
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    pub fn aoi(&self) -> &AreaOfInterest {
        &self.aoi
    }

    pub fn tolerated_failure_percentage(&self) -> u8 {
        self.tolerated_failure_percentage
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Output columns followed by query-only columns, without repeats
    pub fn attribute_columns(&self) -> Vec<ColumnSpec> {
        let mut out = self.columns.clone();
        if let Some(query) = &self.query {
            for column in query.columns() {
                if !out.contains(&column) {
                    out.push(column);
                }
            }
        }
        out
    }

    /// Same job over other granules
    pub fn with_granules(&self, granules: Vec<GranuleReference>) -> Self {
        Self {
            granules,
            ..self.clone()
        }
    }
}

/// Worker count used when none is given
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Collects and validates the settings of a [`SubsetJob`]
#[derive(Debug, Clone)]
pub struct SubsetJobBuilder {
    aoi: AreaOfInterest,
    granules: Vec<GranuleReference>,
    selection: BeamSelection,
    lat: Option<String>,
    lon: Option<String>,
    columns: Vec<String>,
    query: Option<String>,
    tolerated_failure_percentage: u32,
    workers: Option<usize>,
}

impl SubsetJobBuilder {
    pub fn new(aoi: AreaOfInterest) -> Self {
        Self {
            aoi,
            granules: Vec::new(),
            selection: BeamSelection::All,
            lat: None,
            lon: None,
            columns: Vec::new(),
            query: None,
            tolerated_failure_percentage: 0,
            workers: None,
        }
    }

    pub fn granules(mut self, granules: Vec<GranuleReference>) -> Self {
        self.granules = granules;
        self
    }

    pub fn beams(mut self, selection: BeamSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn lat<S: Into<String>>(mut self, lat: S) -> Self {
        self.lat = Some(lat.into());
        self
    }

    pub fn lon<S: Into<String>>(mut self, lon: S) -> Self {
        self.lon = Some(lon.into());
        self
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Row filter; blank text disables filtering
    pub fn query<S: Into<String>>(mut self, query: S) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn tolerated_failure_percentage(mut self, percentage: u32) -> Self {
        self.tolerated_failure_percentage = percentage;
        self
    }

    /// Files processed at once; defaults to the available parallelism
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn build(self) -> Result<SubsetJob> {
        let lat = required_column(self.lat.as_deref(), "latitude")?;
        let lon = required_column(self.lon.as_deref(), "longitude")?;

        if self.columns.is_empty() {
            return Err(SubsetError::InvalidJob(
                "at least one output column is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(self.columns.len());
        for raw in &self.columns {
            let column = ColumnSpec::parse(raw)?;
            let name = column.name();
            if RESERVED_COLUMNS.iter().any(|r| r.eq_ignore_ascii_case(&name)) {
                return Err(SubsetError::InvalidJob(format!(
                    "{} is reserved for a generated column",
                    name
                )));
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(SubsetError::InvalidJob(format!(
                    "column {} is requested more than once",
                    name
                )));
            }
            columns.push(column);
        }

        let query = match &self.query {
            Some(text) => Query::parse(text)?,
            None => None,
        };

        let tolerated_failure_percentage = u8::try_from(self.tolerated_failure_percentage)
            .ok()
            .filter(|p| *p <= 100)
            .ok_or_else(|| {
                SubsetError::InvalidJob(format!(
                    "tolerated failure percentage must be between 0 and 100, found {}",
                    self.tolerated_failure_percentage
                ))
            })?;

        let workers = self.workers.unwrap_or_else(default_workers);
        if workers == 0 {
            return Err(SubsetError::InvalidJob(
                "worker count must be at least 1".to_string(),
            ));
        }

        let beams = self.selection.resolve();

        Ok(SubsetJob {
            granules: self.granules,
            selection: self.selection,
            beams,
            lat,
            lon,
            columns,
            query,
            aoi: self.aoi,
            tolerated_failure_percentage,
            workers,
        })
    }
}

fn required_column(raw: Option<&str>, what: &str) -> Result<ColumnSpec> {
    let raw = raw.ok_or_else(|| SubsetError::InvalidJob(format!("no {} column given", what)))?;
    let column = ColumnSpec::parse(raw)?;
    if column.component().is_some() {
        return Err(SubsetError::InvalidJob(format!(
            "{} column {} must be one dimensional",
            what, column
        )));
    }
    Ok(column)
}
