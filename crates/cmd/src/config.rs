//! Job settings
//!
//! Settings come from an optional YAML job file overlaid with command-line
//! flags. [`JobPlan::new`] fills in collection defaults and parses every
//! value, so a plan that exists is ready to run once granules are found.

use anyhow::{Context, Result, anyhow, bail};
use catalog::{CacheMode, CmrHost, ReadOptions, TemporalRange};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use subset::{AreaOfInterest, BeamSelection, GranuleReference, OutputFormat, SubsetJob};

pub const DEFAULT_LIMIT: i64 = 100_000;
pub const DEFAULT_OUTPUT: &str = "output/gedi_subset.gpkg";

/// Worker count: a fixed number or one per available core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "ProcessesValue")]
pub enum Processes {
    #[default]
    Auto,
    Count(usize),
}

impl FromStr for Processes {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Processes::Auto);
        }
        match s.parse::<usize>() {
            Ok(0) | Err(_) => Err(format!(
                "expected a positive worker count or auto, found {:?}",
                s
            )),
            Ok(n) => Ok(Processes::Count(n)),
        }
    }
}

impl fmt::Display for Processes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Processes::Auto => f.write_str("auto"),
            Processes::Count(n) => write!(f, "{}", n),
        }
    }
}

/// `processes:` may be written as a number or as text
#[derive(Deserialize)]
#[serde(untagged)]
enum ProcessesValue {
    Count(usize),
    Text(String),
}

impl TryFrom<ProcessesValue> for Processes {
    type Error = String;

    fn try_from(value: ProcessesValue) -> std::result::Result<Self, String> {
        match value {
            ProcessesValue::Count(n) => n.to_string().parse(),
            ProcessesValue::Text(text) => text.parse(),
        }
    }
}

/// `columns:` may be a YAML list or comma-separated text
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ColumnList {
    List(Vec<String>),
    Text(String),
}

impl ColumnList {
    pub fn names(&self) -> Vec<String> {
        match self {
            ColumnList::List(names) => names.iter().map(|n| n.trim().to_string()).collect(),
            ColumnList::Text(text) => text
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Everything a job can be told, all of it optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub struct JobConfig {
    pub aoi: Option<PathBuf>,
    pub doi: Option<String>,
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub columns: Option<ColumnList>,
    pub query: Option<String>,
    pub beams: Option<String>,
    pub temporal: Option<String>,
    pub limit: Option<i64>,
    pub tolerated_failure_percentage: Option<u32>,
    pub processes: Option<Processes>,
    pub output: Option<PathBuf>,
    pub format: Option<String>,
    pub cmr_host: Option<String>,
    pub direct_access: Option<bool>,
    pub cache_mode: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub block_size: Option<usize>,
    pub requester_pays: Option<bool>,
    pub report: Option<PathBuf>,
}

impl JobConfig {
    /// Read a YAML job file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("Invalid job file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // an empty document is an empty job
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_ng::from_str(text)?)
    }

    /// Settings of `self`, replaced by every value `over` sets
    pub fn overlay(self, over: JobConfig) -> JobConfig {
        JobConfig {
            aoi: over.aoi.or(self.aoi),
            doi: over.doi.or(self.doi),
            lat: over.lat.or(self.lat),
            lon: over.lon.or(self.lon),
            columns: over.columns.or(self.columns),
            query: over.query.or(self.query),
            beams: over.beams.or(self.beams),
            temporal: over.temporal.or(self.temporal),
            limit: over.limit.or(self.limit),
            tolerated_failure_percentage: over
                .tolerated_failure_percentage
                .or(self.tolerated_failure_percentage),
            processes: over.processes.or(self.processes),
            output: over.output.or(self.output),
            format: over.format.or(self.format),
            cmr_host: over.cmr_host.or(self.cmr_host),
            direct_access: over.direct_access.or(self.direct_access),
            cache_mode: over.cache_mode.or(self.cache_mode),
            cache_dir: over.cache_dir.or(self.cache_dir),
            block_size: over.block_size.or(self.block_size),
            requester_pays: over.requester_pays.or(self.requester_pays),
            report: over.report.or(self.report),
        }
    }
}

/// A fully resolved job, short of its granules
#[derive(Debug, Clone)]
pub struct JobPlan {
    pub aoi: AreaOfInterest,
    /// Canonical DOI of the collection
    pub doi: String,
    pub lat: String,
    pub lon: String,
    pub columns: Vec<String>,
    /// `None` keeps every sample
    pub query: Option<String>,
    pub beams: BeamSelection,
    pub temporal: Option<TemporalRange>,
    pub limit: i64,
    pub tolerated_failure_percentage: u32,
    pub processes: Processes,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub cmr_host: CmrHost,
    pub direct_access: bool,
    pub read: ReadOptions,
    pub report: Option<PathBuf>,
}

impl JobPlan {
    pub fn new(config: JobConfig) -> Result<Self> {
        let aoi_path = config.aoi.ok_or_else(|| anyhow!("an AOI is required (--aoi)"))?;
        let requested = config
            .doi
            .ok_or_else(|| anyhow!("a DOI or collection name is required (--doi)"))?;
        let defaults = catalog::collections::lookup_any(&requested);
        let doi = catalog::collections::canonical_doi(&requested).to_string();

        let aoi = AreaOfInterest::from_geojson_path(&aoi_path)
            .with_context(|| format!("Failed to load AOI {}", aoi_path.display()))?;

        let lat = match (config.lat, defaults) {
            (Some(lat), _) => lat,
            (None, Some(d)) => d.lat.to_string(),
            (None, None) => bail!("--lat is required for collection {}", doi),
        };
        let lon = match (config.lon, defaults) {
            (Some(lon), _) => lon,
            (None, Some(d)) => d.lon.to_string(),
            (None, None) => bail!("--lon is required for collection {}", doi),
        };
        let columns = match (config.columns, defaults) {
            (Some(list), _) => list.names(),
            (None, Some(d)) => d.columns.iter().map(|c| c.to_string()).collect(),
            (None, None) => bail!("--columns is required for collection {}", doi),
        };
        let query = match (config.query, defaults) {
            (Some(query), _) => Some(query),
            (None, Some(d)) => Some(d.query.to_string()),
            (None, None) => None,
        }
        .filter(|q| !q.trim().is_empty());

        let beams = match config.beams {
            Some(text) => text.parse().context("Invalid --beams")?,
            None => BeamSelection::All,
        };
        let temporal = match config.temporal {
            Some(text) if !text.trim().is_empty() => {
                Some(text.parse::<TemporalRange>().context("Invalid --temporal")?)
            }
            _ => None,
        };

        let output = config.output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
        let format = match config.format {
            Some(name) => name.parse().context("Invalid --format")?,
            None => OutputFormat::from_path(&output)
                .with_context(|| format!("Cannot tell the format of {}", output.display()))?,
        };

        let cmr_host = match config.cmr_host {
            Some(name) => name.parse().context("Invalid --cmr-host")?,
            None => CmrHost::default(),
        };

        let mut read = ReadOptions::default();
        if let Some(mode) = config.cache_mode {
            read.cache_mode = mode.parse::<CacheMode>().context("Invalid --cache-mode")?;
        }
        if let Some(block_size) = config.block_size {
            if block_size == 0 {
                bail!("--block-size must be positive");
            }
            read.block_size = block_size;
        }
        read.cache_dir = config.cache_dir;
        read.requester_pays = config.requester_pays.unwrap_or(false);

        let plan = JobPlan {
            aoi,
            doi,
            lat,
            lon,
            columns,
            query,
            beams,
            temporal,
            limit: config.limit.unwrap_or(DEFAULT_LIMIT),
            tolerated_failure_percentage: config.tolerated_failure_percentage.unwrap_or(0),
            processes: config.processes.unwrap_or_default(),
            output,
            format,
            cmr_host,
            direct_access: config.direct_access.unwrap_or(false),
            read,
            report: config.report,
        };
        // columns and query are checked before any search
        plan.job(Vec::new()).context("Invalid subset job")?;
        Ok(plan)
    }

    /// The subset job over `granules`
    pub fn job(&self, granules: Vec<GranuleReference>) -> Result<SubsetJob> {
        let mut builder = SubsetJob::builder(self.aoi.clone())
            .granules(granules)
            .beams(self.beams.clone())
            .lat(self.lat.as_str())
            .lon(self.lon.as_str())
            .columns(self.columns.iter().map(String::as_str))
            .tolerated_failure_percentage(self.tolerated_failure_percentage);
        if let Some(query) = &self.query {
            builder = builder.query(query.as_str());
        }
        if let Processes::Count(n) = self.processes {
            builder = builder.workers(n);
        }
        Ok(builder.build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const GABON: &str = r#"{
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[8.45, -4.15], [14.35, -4.15], [14.35, 2.35], [8.45, 2.35], [8.45, -4.15]]]
            }
        }]
    }"#;

    fn aoi_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(GABON.as_bytes()).unwrap();
        file
    }

    fn config(aoi: &NamedTempFile, doi: &str) -> JobConfig {
        JobConfig {
            aoi: Some(aoi.path().to_path_buf()),
            doi: Some(doi.to_string()),
            ..JobConfig::default()
        }
    }

    #[test]
    fn test_yaml_job_file() {
        let config = JobConfig::from_yaml(
            r#"
aoi: gabon.geojson
doi: L4A
columns: [agbd, "geolocation/sensitivity_a2"]
beams: power
limit: 10
processes: 4
tolerated_failure_percentage: 5
requester_pays: true
"#,
        )
        .unwrap();

        assert_eq!(config.doi.as_deref(), Some("L4A"));
        assert_eq!(
            config.columns.unwrap().names(),
            vec!["agbd", "geolocation/sensitivity_a2"]
        );
        assert_eq!(config.processes, Some(Processes::Count(4)));
        assert_eq!(config.limit, Some(10));
        assert_eq!(config.requester_pays, Some(true));

        let text = JobConfig::from_yaml("columns: agbd, sensitivity\nprocesses: auto\n").unwrap();
        assert_eq!(text.columns.unwrap().names(), vec!["agbd", "sensitivity"]);
        assert_eq!(text.processes, Some(Processes::Auto));

        assert_eq!(JobConfig::from_yaml("  \n").unwrap(), JobConfig::default());
        assert!(JobConfig::from_yaml("colums: [agbd]").is_err());
        assert!(JobConfig::from_yaml("processes: 0").is_err());
    }

    #[test]
    fn test_overlay_prefers_later_values() {
        let file = JobConfig {
            doi: Some("L2A".to_string()),
            limit: Some(10),
            query: Some("quality_flag == 1".to_string()),
            ..JobConfig::default()
        };
        let flags = JobConfig {
            doi: Some("L4A".to_string()),
            query: Some(String::new()),
            ..JobConfig::default()
        };

        let merged = file.overlay(flags);
        assert_eq!(merged.doi.as_deref(), Some("L4A"));
        assert_eq!(merged.limit, Some(10));
        assert_eq!(merged.query.as_deref(), Some(""));
    }

    #[test]
    fn test_processes_parse() {
        assert_eq!("auto".parse::<Processes>().unwrap(), Processes::Auto);
        assert_eq!(" 8 ".parse::<Processes>().unwrap(), Processes::Count(8));
        assert!("0".parse::<Processes>().is_err());
        assert!("many".parse::<Processes>().is_err());
        assert_eq!(Processes::Count(3).to_string(), "3");
    }

    #[test]
    fn test_plan_uses_collection_defaults() {
        let aoi = aoi_file();
        let plan = JobPlan::new(config(&aoi, "l4a")).unwrap();

        assert_eq!(plan.doi, "10.3334/ORNLDAAC/2056");
        assert_eq!(plan.lat, "lat_lowestmode");
        assert_eq!(plan.lon, "lon_lowestmode");
        assert!(plan.columns.contains(&"agbd".to_string()));
        assert!(plan.query.is_some());
        assert_eq!(plan.beams, BeamSelection::All);
        assert_eq!(plan.limit, DEFAULT_LIMIT);
        assert_eq!(plan.output, PathBuf::from(DEFAULT_OUTPUT));
        assert_eq!(plan.format, OutputFormat::GeoPackage);
        assert_eq!(plan.cmr_host, CmrHost::Maap);
        assert_eq!(plan.read.cache_mode, CacheMode::Delete);
        assert!(!plan.direct_access);
    }

    #[test]
    fn test_plan_overrides() {
        let aoi = aoi_file();
        let plan = JobPlan::new(JobConfig {
            columns: Some(ColumnList::Text("agbd,sensitivity".to_string())),
            query: Some("  ".to_string()),
            beams: Some("0101,BEAM0110".to_string()),
            temporal: Some("2019-04-01,2019-12-31".to_string()),
            output: Some(PathBuf::from("out/subset.parquet")),
            cmr_host: Some("nasa".to_string()),
            cache_mode: Some("keep".to_string()),
            block_size: Some(1024),
            ..config(&aoi, "L4A")
        })
        .unwrap();

        assert_eq!(plan.columns, vec!["agbd", "sensitivity"]);
        assert_eq!(plan.query, None);
        assert_eq!(
            plan.beams,
            BeamSelection::Beams(vec!["BEAM0101".to_string(), "BEAM0110".to_string()])
        );
        assert!(plan.temporal.is_some());
        assert_eq!(plan.format, OutputFormat::GeoParquet);
        assert_eq!(plan.cmr_host, CmrHost::Nasa);
        assert_eq!(plan.read.cache_mode, CacheMode::Keep);
        assert_eq!(plan.read.block_size, 1024);

        let explicit = JobPlan::new(JobConfig {
            format: Some("fgb".to_string()),
            ..config(&aoi, "L4A")
        })
        .unwrap();
        assert_eq!(explicit.format, OutputFormat::FlatGeobuf);
    }

    #[test]
    fn test_plan_errors() {
        let aoi = aoi_file();

        assert!(JobPlan::new(JobConfig::default()).is_err());
        assert!(JobPlan::new(config(&aoi, "10.5067/UNKNOWN")).is_err());
        assert!(
            JobPlan::new(JobConfig {
                beams: Some("BEAM0111".to_string()),
                ..config(&aoi, "L2A")
            })
            .is_err()
        );
        assert!(
            JobPlan::new(JobConfig {
                output: Some(PathBuf::from("subset.csv")),
                ..config(&aoi, "L2A")
            })
            .is_err()
        );
        assert!(
            JobPlan::new(JobConfig {
                aoi: Some(PathBuf::from("/nonexistent/aoi.geojson")),
                ..config(&aoi, "L2A")
            })
            .is_err()
        );

        let bad_query = JobPlan::new(JobConfig {
            query: Some("agbd >".to_string()),
            ..config(&aoi, "L4A")
        })
        .unwrap_err();
        assert!(format!("{:#}", bad_query).contains("Invalid subset job"));
        assert!(
            JobPlan::new(JobConfig {
                columns: Some(ColumnList::Text("agbd,rh[".to_string())),
                ..config(&aoi, "L2A")
            })
            .is_err()
        );
        assert!(
            JobPlan::new(JobConfig {
                columns: Some(ColumnList::Text("agbd,BEAM".to_string())),
                ..config(&aoi, "L4A")
            })
            .is_err()
        );
        assert!(
            JobPlan::new(JobConfig {
                tolerated_failure_percentage: Some(101),
                ..config(&aoi, "L4A")
            })
            .is_err()
        );

        // unknown collections work once the datasets are named
        let custom = JobPlan::new(JobConfig {
            lat: Some("lat".to_string()),
            lon: Some("lon".to_string()),
            columns: Some(ColumnList::List(vec!["agbd".to_string()])),
            ..config(&aoi, "10.5067/UNKNOWN")
        })
        .unwrap();
        assert_eq!(custom.doi, "10.5067/UNKNOWN");
        assert_eq!(custom.query, None);
    }

    #[test]
    fn test_job_from_plan() {
        let aoi = aoi_file();
        let plan = JobPlan::new(JobConfig {
            processes: Some(Processes::Count(2)),
            tolerated_failure_percentage: Some(10),
            ..config(&aoi, "L4A")
        })
        .unwrap();

        let granules = vec![GranuleReference::new("GEDI04_A_1", "s3://bucket/GEDI04_A_1.h5")];
        let job = plan.job(granules).unwrap();
        assert_eq!(job.granules().len(), 1);
        assert_eq!(job.workers(), 2);
        assert_eq!(job.tolerated_failure_percentage(), 10);
        assert!(job.query().is_some());

        let too_tolerant = JobPlan {
            tolerated_failure_percentage: 101,
            ..plan
        };
        assert!(too_tolerant.job(Vec::new()).is_err());
    }
}
