//! Granule access through `object_store`
//!
//! Remote granules (`s3://`, `https://`, `file://`) are copied to local
//! disk in ranged blocks, each block retried with exponential backoff,
//! then opened with the HDF5 backend. Plain paths are opened in place.

use crate::{CatalogError, Result};
use arrow::array::ArrayRef;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use diagnostics::*;
use object_store::ObjectStore;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use subset::engine::GranuleSource;
use subset::{GranuleReader, GranuleReference, SubsetError};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Opens a local granule file
pub type Opener = Arc<dyn Fn(&Path) -> subset::Result<Box<dyn GranuleReader>> + Send + Sync>;

/// What happens to a downloaded granule once it has been read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Remove the local copy when the reader is dropped
    #[default]
    Delete,
    /// Keep the copy in the cache directory and reuse it on later runs
    Keep,
}

impl FromStr for CacheMode {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "delete" | "none" => Ok(CacheMode::Delete),
            "keep" | "cache" => Ok(CacheMode::Keep),
            other => Err(CatalogError::InvalidOption(format!(
                "unknown cache mode {:?}, expected keep or delete",
                other
            ))),
        }
    }
}

/// Read tuning handed through to the object store
#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub cache_mode: CacheMode,
    /// Bytes per ranged request
    pub block_size: usize,
    pub requester_pays: bool,
    /// Where copies are written; the system temp dir if unset
    pub cache_dir: Option<PathBuf>,
    /// Retries per request after the first attempt
    pub max_retries: usize,
    /// Extra `object_store` configuration keys
    pub store_options: Vec<(String, String)>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            cache_mode: CacheMode::Delete,
            block_size: 8 * 1024 * 1024,
            requester_pays: false,
            cache_dir: None,
            max_retries: 5,
            store_options: Vec::new(),
        }
    }
}

impl ReadOptions {
    fn store_options(&self) -> Vec<(String, String)> {
        let mut options = self.store_options.clone();
        if self.requester_pays {
            options.push(("aws_request_payer".to_string(), "true".to_string()));
        }
        options
    }
}

/// [`GranuleSource`] over `object_store`
pub struct ObjectStoreSource {
    options: ReadOptions,
    opener: Opener,
}

impl ObjectStoreSource {
    pub fn new(options: ReadOptions) -> Self {
        let opener: Opener = Arc::new(subset::reader::open_path);
        Self { options, opener }
    }

    /// Replace the function that opens local copies
    pub fn with_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn(&Path) -> subset::Result<Box<dyn GranuleReader>> + Send + Sync + 'static,
    {
        self.opener = Arc::new(opener);
        self
    }

    pub fn options(&self) -> &ReadOptions {
        &self.options
    }

    /// Make `granule` available on local disk
    async fn fetch(&self, granule: &GranuleReference) -> Result<LocalCopy> {
        let url = match Url::parse(&granule.uri) {
            // single letters are Windows drive prefixes, not schemes
            Ok(url) if url.scheme().len() > 1 => url,
            _ => return Ok(LocalCopy::InPlace(PathBuf::from(&granule.uri))),
        };

        let name = granule.file_name();
        let dir = self
            .options
            .cache_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let cached = dir.join(name);
        if self.options.cache_mode == CacheMode::Keep && cached.exists() {
            debug!("Using cached copy of {name}");
            return Ok(LocalCopy::InPlace(cached));
        }

        let (store, path) = object_store::parse_url_opts(&url, self.options.store_options())?;
        let meta = self.retry("head", || store.head(&path)).await?;
        let size = meta.size;

        tokio::fs::create_dir_all(&dir).await?;
        let staging = dir.clone();
        let (file, tmp) = blocking(move || {
            tempfile::Builder::new()
                .prefix(".gedi-")
                .suffix(".h5")
                .tempfile_in(&staging)
                .map(tempfile::NamedTempFile::into_parts)
        })
        .await?;

        // `tmp` removes the partial copy if any block fails
        let mut out = tokio::fs::File::from_std(file);
        let block = u64::try_from(self.options.block_size.max(1)).unwrap_or(u64::MAX);
        let mut offset = 0_u64;
        while offset < size {
            let end = offset.saturating_add(block).min(size);
            let bytes = self
                .retry("read", || store.get_range(&path, offset..end))
                .await?;
            out.write_all(&bytes).await?;
            offset = end;
        }
        out.flush().await?;
        drop(out);
        debug!("Fetched {name} ({size} bytes)");

        match self.options.cache_mode {
            CacheMode::Keep => {
                let target = cached.clone();
                blocking(move || tmp.persist(&target).map_err(|e| e.error)).await?;
                Ok(LocalCopy::InPlace(cached))
            }
            CacheMode::Delete => Ok(LocalCopy::Temporary(tmp)),
        }
    }

    async fn retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = object_store::Result<T>>,
    {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(10))
            .with_max_times(self.options.max_retries);

        Ok(op
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(is_transient)
            .notify(|e: &object_store::Error, delay: Duration| {
                let reason = e.to_string();
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                warn!("Retrying {what} in {delay_ms} ms: {reason}");
            })
            .await?)
    }
}

/// Run synchronous file work on the blocking pool
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(work)
        .await
        .map_err(std::io::Error::other)?;
    Ok(result?)
}

/// Errors that a repeated request cannot fix
fn is_transient(e: &object_store::Error) -> bool {
    !matches!(
        e,
        object_store::Error::NotFound { .. }
            | object_store::Error::PermissionDenied { .. }
            | object_store::Error::Unauthenticated { .. }
            | object_store::Error::InvalidPath { .. }
            | object_store::Error::NotSupported { .. }
    )
}

#[async_trait]
impl GranuleSource for ObjectStoreSource {
    async fn open(&self, granule: &GranuleReference) -> subset::Result<Box<dyn GranuleReader>> {
        let copy = self
            .fetch(granule)
            .await
            .map_err(|e| SubsetError::open(granule.name.clone(), e))?;

        let opener = self.opener.clone();
        let name = granule.file_name().to_string();
        tokio::task::spawn_blocking(move || -> subset::Result<Box<dyn GranuleReader>> {
            let inner = opener(copy.path())?;
            Ok(Box::new(LocalGranule {
                name,
                inner,
                _copy: copy,
            }))
        })
        .await
        .map_err(|e| SubsetError::open(granule.name.clone(), e))?
    }
}

enum LocalCopy {
    InPlace(PathBuf),
    /// Deleted on drop
    Temporary(TempPath),
}

impl LocalCopy {
    fn path(&self) -> &Path {
        match self {
            LocalCopy::InPlace(path) => path,
            LocalCopy::Temporary(path) => path,
        }
    }
}

/// Reader over a local copy, named after the remote file
///
/// `inner` is declared before `_copy` so the file is closed before a
/// temporary copy is removed.
struct LocalGranule {
    name: String,
    inner: Box<dyn GranuleReader>,
    _copy: LocalCopy,
}

impl GranuleReader for LocalGranule {
    fn file_name(&self) -> &str {
        &self.name
    }

    fn list_beams(&self) -> subset::Result<Vec<String>> {
        self.inner.list_beams()
    }

    fn read_column(&self, beam: &str, path: &str) -> subset::Result<ArrayRef> {
        self.inner.read_column(beam, path)
    }
}
