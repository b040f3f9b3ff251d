//! Spatial and attribute subsetting of GEDI granules
//!
//! A [`SubsetJob`] names an area of interest, the beams and datasets to
//! read and an optional attribute [`Query`]. The [`Engine`] runs the job
//! over its granules with bounded concurrency, keeps an
//! [`ExecutionReport`] and enforces the failure tolerance. Results are
//! merged into a single point table and written as GeoParquet,
//! GeoPackage or FlatGeobuf.

pub mod beams;
pub mod columns;
pub mod engine;
pub mod error;
pub mod extract;
pub mod geojson;
pub mod geometry;
pub mod granule;
pub mod job;
pub mod merge;
pub mod output;
pub mod query;
pub mod reader;
pub mod report;
pub mod spatial;
pub mod table;

pub use beams::BeamSelection;
pub use columns::ColumnSpec;
pub use engine::{Engine, GranuleSource, JobOutcome, MemorySource};
pub use error::{Result, SubsetError};
pub use geometry::{AreaOfInterest, BoundingBox, Polygon};
pub use granule::GranuleReference;
pub use job::{SubsetJob, SubsetJobBuilder};
pub use output::OutputFormat;
pub use query::Query;
pub use reader::{GranuleReader, MemoryGranule};
pub use report::{ExecutionReport, FileOutcome, FileState, JobStatus};
pub use table::GeoBatch;
