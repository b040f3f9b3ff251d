use crate::report::ExecutionReport;

/// Subsetting error types
#[derive(Debug, thiserror::Error)]
pub enum SubsetError {
    /// The area of interest could not be loaded or is not areal
    #[error("Invalid area of interest: {0}")]
    Aoi(String),

    /// The row filter expression is malformed or cannot be evaluated
    #[error("Invalid query: {0}")]
    Query(String),

    /// The beam selection names an unknown beam or mixes selection kinds
    #[error("Invalid beam selection: {0}")]
    InvalidBeams(String),

    /// A column name is empty or malformed
    #[error("Invalid column: {0}")]
    InvalidColumn(String),

    /// The job configuration is inconsistent
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// Coordinate arrays of different lengths
    #[error("Latitude and longitude lengths differ: {lat} != {lon}")]
    LengthMismatch { lat: usize, lon: usize },

    /// A query referenced a column that is not in the table
    #[error("Unknown column in query: {0}")]
    UnknownColumn(String),

    /// Reading a dataset of a beam failed
    #[error("Failed to read {column} from {beam}: {reason}")]
    Read {
        beam: String,
        column: String,
        reason: String,
    },

    /// Opening or fetching a granule failed
    #[error("Failed to open granule {granule}: {reason}")]
    Open { granule: String, reason: String },

    /// The output destination has no recognizable format
    #[error("Unsupported output format: {0}")]
    UnsupportedOutput(String),

    /// More granules failed than the job tolerates
    #[error("{}", tolerance_message(.report))]
    ToleranceExceeded { report: Box<ExecutionReport> },

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SubsetError {
    pub fn read<B: Into<String>, C: Into<String>, R: std::fmt::Display>(
        beam: B,
        column: C,
        reason: R,
    ) -> Self {
        SubsetError::Read {
            beam: beam.into(),
            column: column.into(),
            reason: reason.to_string(),
        }
    }

    pub fn open<G: Into<String>, R: std::fmt::Display>(granule: G, reason: R) -> Self {
        SubsetError::Open {
            granule: granule.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors that make the whole job fail before any granule is read
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SubsetError::Aoi(_)
                | SubsetError::Query(_)
                | SubsetError::InvalidBeams(_)
                | SubsetError::InvalidColumn(_)
                | SubsetError::InvalidJob(_)
                | SubsetError::UnsupportedOutput(_)
        )
    }
}

fn tolerance_message(report: &ExecutionReport) -> String {
    let mut message = format!(
        "{} of {} granules failed, exceeding the tolerated failure percentage of {}%",
        report.errored, report.total, report.tolerated_failure_percentage
    );
    for failure in report.failures() {
        message.push_str(&format!(
            "\n  {} ({}): {}",
            failure.granule,
            failure.uri,
            failure.error.as_deref().unwrap_or("unknown error")
        ));
    }
    message
}

/// Result type for subsetting operations
pub type Result<T> = std::result::Result<T, SubsetError>;
