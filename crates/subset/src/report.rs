//! Execution accounting
//!
//! The report is owned by the engine's coordinator loop, the only place
//! that mutates it. It serializes to JSON for `--report`.

use crate::granule::GranuleReference;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Queued,
    InProgress,
    Done,
    Errored,
}

/// What happened to one granule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    /// Position in resolution order
    pub index: usize,
    pub granule: String,
    pub uri: String,
    pub state: FileState,
    pub rows: Option<usize>,
    pub elapsed_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub status: JobStatus,
    pub total: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub errored: usize,
    /// Never dispatched because the failure tolerance was exceeded
    pub skipped: usize,
    pub tolerated_failure_percentage: u8,
    /// Matching rows over all succeeded granules
    pub rows: usize,
    pub elapsed_ms: u64,
    pub files: Vec<FileOutcome>,
}

impl ExecutionReport {
    pub fn new(granules: &[GranuleReference], tolerated_failure_percentage: u8) -> Self {
        let files = granules
            .iter()
            .enumerate()
            .map(|(index, granule)| FileOutcome {
                index,
                granule: granule.name.clone(),
                uri: granule.uri.clone(),
                state: FileState::Queued,
                rows: None,
                elapsed_ms: None,
                error: None,
            })
            .collect();

        Self {
            status: JobStatus::Pending,
            total: granules.len(),
            attempted: 0,
            succeeded: 0,
            errored: 0,
            skipped: 0,
            tolerated_failure_percentage,
            rows: 0,
            elapsed_ms: 0,
            files,
        }
    }

    pub fn start(&mut self) {
        self.status = JobStatus::Running;
    }

    pub fn mark_dispatched(&mut self, index: usize) {
        if let Some(file) = self.files.get_mut(index) {
            file.state = FileState::InProgress;
            self.attempted += 1;
        }
    }

    pub fn mark_done(&mut self, index: usize, rows: usize, elapsed: Duration) {
        if let Some(file) = self.files.get_mut(index) {
            file.state = FileState::Done;
            file.rows = Some(rows);
            file.elapsed_ms = Some(millis(elapsed));
            self.succeeded += 1;
            self.rows += rows;
        }
    }

    pub fn mark_errored(&mut self, index: usize, error: String, elapsed: Duration) {
        if let Some(file) = self.files.get_mut(index) {
            file.state = FileState::Errored;
            file.elapsed_ms = Some(millis(elapsed));
            file.error = Some(error);
            self.errored += 1;
        }
    }

    /// `errored / total * 100 > tolerated`, in integers
    pub fn tolerance_exceeded(&self) -> bool {
        self.errored as u64 * 100 > u64::from(self.tolerated_failure_percentage) * self.total as u64
    }

    /// Settle the final status; files still queued count as skipped
    pub fn finish(&mut self, status: JobStatus, elapsed: Duration) {
        self.status = status;
        self.elapsed_ms = millis(elapsed);
        self.skipped = self
            .files
            .iter()
            .filter(|f| f.state == FileState::Queued)
            .count();
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.files.iter().filter(|f| f.state == FileState::Errored)
    }

    /// One line for logs and the terminal
    pub fn summary(&self) -> String {
        format!(
            "{:?}: {} granules, {} attempted, {} succeeded, {} errored, {} skipped, {} rows in {} ms",
            self.status,
            self.total,
            self.attempted,
            self.succeeded,
            self.errored,
            self.skipped,
            self.rows,
            self.elapsed_ms
        )
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
