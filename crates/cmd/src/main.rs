mod config;

use anyhow::{Context, Result, bail};
use catalog::{Catalog, CmrClient, GranuleResolver, ObjectStoreSource};
use clap::Parser;
use config::{ColumnList, JobConfig, JobPlan, Processes};
use diagnostics::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use subset::{Engine, ExecutionReport, SubsetError};

/// Subset GEDI granules by area of interest and attribute query
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// GeoJSON file with the area of interest
    #[arg(long)]
    aoi: Option<PathBuf>,

    /// Collection DOI or logical name (L1B, L2A, L2B, L4A, L4C)
    #[arg(long)]
    doi: Option<String>,

    /// Latitude dataset, relative to each beam
    #[arg(long)]
    lat: Option<String>,

    /// Longitude dataset, relative to each beam
    #[arg(long)]
    lon: Option<String>,

    /// Comma-separated output columns
    #[arg(long)]
    columns: Option<String>,

    /// Row filter, e.g. "l4_quality_flag == 1 and sensitivity > 0.95"; "" keeps every row
    #[arg(long)]
    query: Option<String>,

    /// all, coverage, power, or a comma-separated list of beams
    #[arg(long)]
    beams: Option<String>,

    /// START,END as RFC 3339 timestamps or YYYY-MM-DD dates; either side may be empty
    #[arg(long)]
    temporal: Option<String>,

    /// Maximum number of granules to consider; 0 or less for no limit
    #[arg(long, allow_negative_numbers = true)]
    limit: Option<i64>,

    /// Percentage of granules allowed to fail before the job fails
    #[arg(long)]
    tolerated_failure_percentage: Option<u32>,

    /// Granules processed at once: a number or "auto"
    #[arg(long)]
    processes: Option<Processes>,

    /// Output file; the extension picks the format
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output format (gpkg, parquet, fgb), overriding the extension
    #[arg(long)]
    format: Option<String>,

    /// CMR host: maap or nasa
    #[arg(long)]
    cmr_host: Option<String>,

    /// Read granules through their direct (s3) links
    #[arg(long)]
    direct_access: bool,

    /// What happens to downloaded granules: delete or keep
    #[arg(long)]
    cache_mode: Option<String>,

    /// Where downloaded granules are kept
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Bytes per ranged read
    #[arg(long)]
    block_size: Option<usize>,

    /// Accept requester-pays charges on s3 reads
    #[arg(long)]
    requester_pays: bool,

    /// YAML job file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the execution report as JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// The settings given on the command line
    fn job_config(&self) -> JobConfig {
        JobConfig {
            aoi: self.aoi.clone(),
            doi: self.doi.clone(),
            lat: self.lat.clone(),
            lon: self.lon.clone(),
            columns: self.columns.clone().map(ColumnList::Text),
            query: self.query.clone(),
            beams: self.beams.clone(),
            temporal: self.temporal.clone(),
            limit: self.limit,
            tolerated_failure_percentage: self.tolerated_failure_percentage,
            processes: self.processes,
            output: self.output.clone(),
            format: self.format.clone(),
            cmr_host: self.cmr_host.clone(),
            direct_access: self.direct_access.then_some(true),
            cache_mode: self.cache_mode.clone(),
            cache_dir: self.cache_dir.clone(),
            block_size: self.block_size,
            requester_pays: self.requester_pays.then_some(true),
            report: self.report.clone(),
        }
    }

    fn plan(&self) -> Result<JobPlan> {
        let base = match &self.config {
            Some(path) => JobConfig::load(path)?,
            None => JobConfig::default(),
        };
        JobPlan::new(base.overlay(self.job_config()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    diagnostics::init_with_level(level);

    run(&cli).await
}

async fn run(cli: &Cli) -> Result<()> {
    let plan = cli.plan()?;
    subset::reader::require_backend().context("Cannot read granules")?;
    let doi = plan.doi.clone();
    let host = plan.cmr_host.to_string();
    let limit = plan.limit;
    info!("Searching {host} for granules of {doi} (limit {limit})");

    let catalog: Arc<dyn Catalog> =
        Arc::new(CmrClient::new(plan.cmr_host).context("Failed to create CMR client")?);
    let granules = GranuleResolver::new(catalog)
        .prefer_direct_access(plan.direct_access)
        .resolve(&plan.doi, &plan.aoi, plan.temporal.as_ref(), plan.limit)
        .await
        .with_context(|| format!("Failed to find granules of {}", plan.doi))?;
    if granules.is_empty() {
        bail!("No granules of {} intersect the AOI", plan.doi);
    }

    let job = Arc::new(plan.job(granules).context("Invalid subset job")?);
    let output = plan.output.display().to_string();
    let kind = plan.format.to_string();
    info!("Writing {kind} output to {output}");

    let engine = Engine::new(Arc::new(ObjectStoreSource::new(plan.read.clone())));
    let outcome = engine.run_to_file(job, &plan.output, plan.format).await;
    conclude(outcome, plan.report.as_deref()).map(|_| ())
}

/// Write the report of a finished run, also when too many granules failed
fn conclude(
    outcome: subset::Result<ExecutionReport>,
    report_path: Option<&Path>,
) -> Result<ExecutionReport> {
    match outcome {
        Ok(report) => {
            finish(&report, report_path)?;
            Ok(report)
        }
        Err(SubsetError::ToleranceExceeded { report }) => {
            finish(&report, report_path)?;
            Err(SubsetError::ToleranceExceeded { report }).context("Subset job failed")
        }
        Err(e) => Err(e).context("Subset job failed"),
    }
}

/// Write the report file if one was asked for
fn finish(report: &ExecutionReport, path: Option<&Path>) -> Result<()> {
    if let Some(path) = path {
        write_report(report, path)?;
        let target = path.display().to_string();
        info!("Wrote execution report to {target}");
    }
    Ok(())
}

fn write_report(report: &ExecutionReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)
        .with_context(|| format!("Failed to write report {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use subset::GranuleReference;

    #[test]
    fn test_parse_flags() {
        let cli = Cli::try_parse_from([
            "gedi-subset",
            "--aoi",
            "gabon.geojson",
            "--doi",
            "L4A",
            "--columns",
            "agbd,sensitivity",
            "--query",
            "",
            "--limit",
            "-1",
            "--processes",
            "auto",
            "--requester-pays",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        let config = cli.job_config();
        assert_eq!(config.aoi, Some(PathBuf::from("gabon.geojson")));
        assert_eq!(
            config.columns.map(|c| c.names()),
            Some(vec!["agbd".to_string(), "sensitivity".to_string()])
        );
        assert_eq!(config.query.as_deref(), Some(""));
        assert_eq!(config.limit, Some(-1));
        assert_eq!(config.processes, Some(Processes::Auto));
        assert_eq!(config.requester_pays, Some(true));
        // unset switches leave the job file in charge
        assert_eq!(config.direct_access, None);
    }

    #[test]
    fn test_invalid_processes_rejected() {
        let result = Cli::try_parse_from(["gedi-subset", "--processes", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_job_file() {
        let dir = tempfile::tempdir().unwrap();
        let aoi = dir.path().join("aoi.geojson");
        std::fs::write(
            &aoi,
            r#"{"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]}"#,
        )
        .unwrap();
        let job_file = dir.path().join("job.yaml");
        std::fs::write(
            &job_file,
            format!(
                "aoi: {}\ndoi: L2A\nlimit: 10\noutput: out/subset.fgb\n",
                aoi.display()
            ),
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "gedi-subset",
            "--config",
            job_file.to_str().unwrap(),
            "--doi",
            "L4A",
        ])
        .unwrap();
        let plan = cli.plan().unwrap();

        assert_eq!(plan.doi, "10.3334/ORNLDAAC/2056");
        assert_eq!(plan.limit, 10);
        assert_eq!(plan.format, subset::OutputFormat::FlatGeobuf);
    }

    #[test]
    fn test_tolerance_failure_names_granules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let granules = vec![
            GranuleReference::new("GEDI04_A_1", "s3://bucket/GEDI04_A_1.h5"),
            GranuleReference::new("GEDI04_A_2", "s3://bucket/GEDI04_A_2.h5"),
        ];
        let mut report = ExecutionReport::new(&granules, 0);
        report.mark_errored(1, "truncated file".to_string(), Duration::ZERO);

        let err = conclude(
            Err(SubsetError::ToleranceExceeded {
                report: Box::new(report),
            }),
            Some(&path),
        )
        .unwrap_err();

        let message = format!("{:#}", err);
        assert!(message.contains("Subset job failed"));
        assert!(message.contains("GEDI04_A_2"));
        assert!(message.contains("truncated file"));
        assert!(matches!(
            err.downcast_ref::<SubsetError>(),
            Some(SubsetError::ToleranceExceeded { .. })
        ));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["errored"], 1);
    }

    #[cfg(not(feature = "hdf5"))]
    #[tokio::test]
    async fn test_missing_backend_fails_before_search() {
        let dir = tempfile::tempdir().unwrap();
        let aoi = dir.path().join("aoi.geojson");
        std::fs::write(
            &aoi,
            r#"{"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]}"#,
        )
        .unwrap();
        // an unreachable CMR host would fail differently
        let cli = Cli::try_parse_from([
            "gedi-subset",
            "--aoi",
            aoi.to_str().unwrap(),
            "--doi",
            "L4A",
            "--output",
            dir.path().join("out.gpkg").to_str().unwrap(),
        ])
        .unwrap();

        let err = run(&cli).await.unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Cannot read granules"));
        assert!(message.contains("HDF5"));
        assert!(!dir.path().join("out.gpkg").exists());
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.json");
        let granules = vec![GranuleReference::new("GEDI04_A_1", "s3://bucket/GEDI04_A_1.h5")];
        let report = ExecutionReport::new(&granules, 0);

        write_report(&report, &path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["total"], 1);
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["files"][0]["granule"], "GEDI04_A_1");
    }
}
