//! Granule discovery and remote granule access
//!
//! The [`Catalog`] trait is the search collaborator: [`cmr::CmrClient`]
//! talks to a CMR host, [`memory::MemoryCatalog`] serves fixtures. The
//! [`resolver::GranuleResolver`] turns a DOI (or a logical name such as
//! `L4A`) and an AOI into ordered granule references, and
//! [`fetch::ObjectStoreSource`] opens those references for the engine.

pub mod cmr;
pub mod collections;
pub mod fetch;
pub mod memory;
pub mod models;
pub mod resolver;

pub use cmr::{CmrClient, CmrHost};
pub use collections::CollectionDefaults;
pub use fetch::{CacheMode, ObjectStoreSource, ReadOptions};
pub use memory::MemoryCatalog;
pub use models::{Collection, GranulePage, GranuleQuery, GranuleRecord};
pub use resolver::{GranuleResolver, TemporalRange};

use async_trait::async_trait;

/// Catalog error types
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("No collection found for {0}")]
    CollectionNotFound(String),

    #[error("More than one collection found for {0}")]
    AmbiguousCollection(String),

    /// The collection's files are not HDF5
    #[error("Collection {collection} is distributed as {formats}, not HDF5")]
    UnsupportedFormat { collection: String, formats: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid temporal range: {0}")]
    Temporal(String),

    #[error("Invalid option: {0}")]
    InvalidOption(String),

    #[error(transparent)]
    Subset(#[from] subset::SubsetError),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

/// A searchable collection/granule catalog
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Collections whose DOI is `doi`, at most `limit` of them
    async fn search_collections(&self, doi: &str, limit: usize) -> Result<Vec<Collection>>;

    /// One page of granules in catalog order
    ///
    /// `search_after` is the cursor returned with the previous page. A page
    /// may hold fewer than `page_size` items; only a missing cursor marks
    /// the end.
    async fn search_granules(
        &self,
        query: &GranuleQuery,
        page_size: usize,
        search_after: Option<&str>,
    ) -> Result<GranulePage>;
}
