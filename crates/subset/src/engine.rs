//! Parallel execution of a subsetting job
//!
//! One coordinator loop owns all accounting. It keeps at most
//! `job.workers()` granules in flight on a `JoinSet`, records each
//! completion in the [`ExecutionReport`] and stops dispatching once the
//! failure tolerance is exceeded. Workers share the job through an `Arc`
//! and return `(index, result, elapsed)`; nothing else is shared.

use crate::error::{Result, SubsetError};
use crate::extract::subset_granule;
use crate::granule::GranuleReference;
use crate::job::SubsetJob;
use crate::merge::merge;
use crate::output::{self, OutputFormat};
use crate::reader::{GranuleReader, MemoryGranule};
use crate::report::{ExecutionReport, JobStatus};
use crate::table::GeoBatch;
use async_trait::async_trait;
use diagnostics::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{Id, JoinSet};

/// Opens granules for reading
///
/// Implementations own fetching, retrying and caching; the engine only sees
/// a ready reader or an error.
#[async_trait]
pub trait GranuleSource: Send + Sync {
    async fn open(&self, granule: &GranuleReference) -> Result<Box<dyn GranuleReader>>;
}

/// Serves granules from memory by URI, optionally after a delay
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    granules: HashMap<String, MemoryGranule>,
    delays: HashMap<String, Duration>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_granule<U: Into<String>>(mut self, uri: U, granule: MemoryGranule) -> Self {
        self.granules.insert(uri.into(), granule);
        self
    }

    pub fn with_delay<U: Into<String>>(mut self, uri: U, delay: Duration) -> Self {
        self.delays.insert(uri.into(), delay);
        self
    }
}

#[async_trait]
impl GranuleSource for MemorySource {
    async fn open(&self, granule: &GranuleReference) -> Result<Box<dyn GranuleReader>> {
        if let Some(delay) = self.delays.get(&granule.uri) {
            tokio::time::sleep(*delay).await;
        }

        self.granules
            .get(&granule.uri)
            .cloned()
            .map(|g| Box::new(g) as Box<dyn GranuleReader>)
            .ok_or_else(|| SubsetError::open(granule.uri.clone(), "no such granule"))
    }
}

/// Per-granule results in resolution order, with the report
#[derive(Debug)]
pub struct JobOutcome {
    pub report: ExecutionReport,
    /// `None` for granules that failed
    pub results: Vec<Option<GeoBatch>>,
}

pub struct Engine {
    source: Arc<dyn GranuleSource>,
}

type Completion = (usize, Result<GeoBatch>, Duration);

impl Engine {
    pub fn new(source: Arc<dyn GranuleSource>) -> Self {
        Self { source }
    }

    /// Subset every granule of `job`
    ///
    /// Per-granule failures are recorded in the report. The run fails with
    /// [`SubsetError::ToleranceExceeded`] once more granules failed than
    /// the job tolerates; granules already in flight still finish.
    pub async fn run(&self, job: Arc<SubsetJob>) -> Result<JobOutcome> {
        let started = Instant::now();
        let total = job.granules().len();
        let workers = job.workers();

        let mut report = ExecutionReport::new(job.granules(), job.tolerated_failure_percentage());
        let mut results: Vec<Option<GeoBatch>> = vec![None; total];
        report.start();
        info!("Subsetting {total} granules with {workers} workers");

        let mut tasks: JoinSet<Completion> = JoinSet::new();
        let mut in_flight: HashMap<Id, (usize, Instant)> = HashMap::new();
        let mut queue = 0..total;
        let mut breached = false;

        loop {
            while !breached && tasks.len() < workers {
                let Some(index) = queue.next() else {
                    break;
                };
                report.mark_dispatched(index);
                let handle = tasks.spawn(process(self.source.clone(), job.clone(), index));
                in_flight.insert(handle.id(), (index, Instant::now()));
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };

            let (index, result, elapsed) = match joined {
                Ok((id, completion)) => {
                    in_flight.remove(&id);
                    completion
                }
                Err(join_error) => {
                    let Some((index, dispatched)) = in_flight.remove(&join_error.id()) else {
                        continue;
                    };
                    let reason = format!("worker failed: {}", join_error);
                    let granule = job.granules()[index].name.clone();
                    (index, Err(SubsetError::open(granule, reason)), dispatched.elapsed())
                }
            };

            let granule = job.granules()[index].name.as_str();
            match result {
                Ok(batch) => {
                    let rows = batch.num_rows();
                    let elapsed_ms = elapsed.as_millis() as u64;
                    info!("Granule {granule} yielded {rows} rows in {elapsed_ms} ms");
                    report.mark_done(index, rows, elapsed);
                    results[index] = Some(batch);
                }
                Err(e) => {
                    let reason = e.to_string();
                    error!("Granule {granule} failed: {reason}");
                    report.mark_errored(index, reason, elapsed);
                }
            }

            if !breached && report.tolerance_exceeded() {
                breached = true;
                let errored = report.errored;
                let tolerated = report.tolerated_failure_percentage;
                warn!("{errored} of {total} granules failed, over the tolerated {tolerated}%; draining");
            }
        }

        let status = if breached {
            JobStatus::Failed
        } else {
            JobStatus::Succeeded
        };
        report.finish(status, started.elapsed());
        let summary = report.summary();
        info!("{summary}");

        if breached {
            return Err(SubsetError::ToleranceExceeded {
                report: Box::new(report),
            });
        }

        Ok(JobOutcome { report, results })
    }

    /// Run `job`, merge the results and write them to `dest`
    ///
    /// The report's `rows` is the number of rows written.
    pub async fn run_to_file(
        &self,
        job: Arc<SubsetJob>,
        dest: &Path,
        format: OutputFormat,
    ) -> Result<ExecutionReport> {
        let JobOutcome { report, results } = self.run(job.clone()).await?;

        let columns = job.columns().to_vec();
        let dest: PathBuf = dest.to_path_buf();
        let written = tokio::task::spawn_blocking(move || -> Result<usize> {
            let merged = merge(results, &columns)?;
            output::write(&merged, &dest, format)?;
            Ok(merged.num_rows())
        })
        .await
        .map_err(|e| SubsetError::Io(std::io::Error::other(format!("writer task failed: {}", e))))??;

        info!("Wrote {written} rows");
        Ok(ExecutionReport {
            rows: written,
            ..report
        })
    }
}

/// One unit of work: open the granule, then extract on the blocking pool
async fn process(source: Arc<dyn GranuleSource>, job: Arc<SubsetJob>, index: usize) -> Completion {
    let started = Instant::now();
    let result = open_and_extract(source, job, index).await;
    (index, result, started.elapsed())
}

async fn open_and_extract(source: Arc<dyn GranuleSource>, job: Arc<SubsetJob>, index: usize) -> Result<GeoBatch> {
    let granule = &job.granules()[index];
    let name = granule.name.clone();
    debug!("Opening granule {name}");
    let reader = source.open(granule).await?;

    let shared = job.clone();
    tokio::task::spawn_blocking(move || subset_granule(reader.as_ref(), &shared))
        .await
        .map_err(|e| SubsetError::open(name, format!("extraction failed: {}", e)))?
}
