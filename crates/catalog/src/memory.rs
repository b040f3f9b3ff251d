//! In-memory catalog

use crate::models::{Collection, GranulePage, GranuleQuery, GranuleRecord};
use crate::{Catalog, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Serves fixed collections and granules in insertion order
///
/// Pages never exceed `page_ceiling`, whatever size is asked for, so
/// callers must follow the cursor. Granules are filtered by time but not
/// by space. Every requested page size is recorded.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    collections: Vec<Collection>,
    granules: HashMap<String, Vec<GranuleRecord>>,
    page_ceiling: Option<usize>,
    requests: Mutex<Vec<usize>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, collection: Collection) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn with_granules(mut self, concept_id: &str, granules: Vec<GranuleRecord>) -> Self {
        self.granules
            .entry(concept_id.to_string())
            .or_default()
            .extend(granules);
        self
    }

    pub fn with_page_ceiling(mut self, ceiling: usize) -> Self {
        self.page_ceiling = Some(ceiling.max(1));
        self
    }

    /// Page sizes asked for so far
    pub fn requests(&self) -> Vec<usize> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn search_collections(&self, doi: &str, limit: usize) -> Result<Vec<Collection>> {
        Ok(self
            .collections
            .iter()
            .filter(|c| c.doi.as_deref().is_some_and(|d| d.eq_ignore_ascii_case(doi)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn search_granules(
        &self,
        query: &GranuleQuery,
        page_size: usize,
        search_after: Option<&str>,
    ) -> Result<GranulePage> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(page_size);
        }

        let matching: Vec<&GranuleRecord> = self
            .granules
            .get(&query.collection_concept_id)
            .map(|all| {
                all.iter()
                    .filter(|g| match (&query.temporal, &g.begin) {
                        (Some(range), Some(begin)) => range.contains(begin),
                        _ => true,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let start = search_after.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        let size = self.page_ceiling.map_or(page_size, |c| page_size.min(c));
        let end = (start + size).min(matching.len());
        let items = matching
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|g| (*g).clone())
            .collect();

        Ok(GranulePage {
            items,
            search_after: (end < matching.len()).then(|| end.to_string()),
        })
    }
}
