//! CMR search client

use crate::models::{
    Collection, GranulePage, GranuleQuery, GranuleRecord, SearchResults, UmmCollection, UmmGranule,
};
use crate::{Catalog, CatalogError, Result};
use async_trait::async_trait;
use diagnostics::*;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const TIMEOUT_SECONDS: u64 = 60;

/// Response and request header carrying the paging cursor
pub const SEARCH_AFTER_HEADER: &str = "CMR-Search-After";

/// Which CMR deployment to search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CmrHost {
    #[default]
    Maap,
    Nasa,
}

impl CmrHost {
    pub fn host(&self) -> &'static str {
        match self {
            CmrHost::Maap => "cmr.maap-project.org",
            CmrHost::Nasa => "cmr.earthdata.nasa.gov",
        }
    }
}

impl FromStr for CmrHost {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "maap" | "cmr.maap-project.org" => Ok(CmrHost::Maap),
            "nasa" | "cmr.earthdata.nasa.gov" => Ok(CmrHost::Nasa),
            other => Err(CatalogError::InvalidOption(format!(
                "unknown CMR host {:?}, expected maap or nasa",
                other
            ))),
        }
    }
}

impl fmt::Display for CmrHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.host())
    }
}

/// Async CMR client speaking UMM-JSON
pub struct CmrClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl CmrClient {
    pub fn new(host: CmrHost) -> Result<Self> {
        Self::with_base_url(format!("https://{}", host.host()))
    }

    /// Client for a CMR-compatible service at `base_url`
    pub fn with_base_url<S: Into<String>>(base_url: S) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECONDS))
            .gzip(true)
            .build()?;

        Ok(CmrClient {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn collections_url(&self, doi: &str, limit: usize) -> Result<Url> {
        Ok(Url::parse_with_params(
            &format!("{}/search/collections.umm_json", self.base_url),
            &[("doi", doi.to_string()), ("page_size", limit.to_string())],
        )?)
    }

    fn granules_url(&self, query: &GranuleQuery, page_size: usize) -> Result<Url> {
        let mut params = vec![
            ("collection_concept_id", query.collection_concept_id.clone()),
            ("page_size", page_size.to_string()),
        ];
        if let Some(bbox) = &query.bounding_box {
            params.push(("bounding_box", bbox.to_wsen_string()));
        }
        if let Some(temporal) = &query.temporal {
            params.push(("temporal", temporal.to_cmr()));
        }
        Ok(Url::parse_with_params(
            &format!("{}/search/granules.umm_json", self.base_url),
            &params,
        )?)
    }

    /// GET `url`, returning the parsed body and the paging cursor
    async fn fetch_json<T>(&self, url: &Url, search_after: Option<&str>) -> Result<(T, Option<String>)>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let mut request = self.http_client.get(url.clone());
        if let Some(cursor) = search_after {
            request = request.header(SEARCH_AFTER_HEADER, cursor);
        }

        let target = url.to_string();
        debug!("GET {target}");
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CatalogError::Status {
                status,
                url: target,
                body,
            });
        }

        let cursor = response
            .headers()
            .get(SEARCH_AFTER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let json_text = response.text().await?;
        Ok((serde_json::from_str(&json_text)?, cursor))
    }
}

#[async_trait]
impl Catalog for CmrClient {
    async fn search_collections(&self, doi: &str, limit: usize) -> Result<Vec<Collection>> {
        let url = self.collections_url(doi, limit)?;
        let (results, _): (SearchResults<UmmCollection>, _) = self.fetch_json(&url, None).await?;
        Ok(results.items.into_iter().map(Collection::from).collect())
    }

    async fn search_granules(
        &self,
        query: &GranuleQuery,
        page_size: usize,
        search_after: Option<&str>,
    ) -> Result<GranulePage> {
        let url = self.granules_url(query, page_size)?;
        let (results, cursor): (SearchResults<UmmGranule>, _) =
            self.fetch_json(&url, search_after).await?;

        let items: Vec<GranuleRecord> = results.items.into_iter().map(GranuleRecord::from).collect();
        // a short page is the last one, whatever the header says
        let search_after = if items.len() < page_size { None } else { cursor };
        Ok(GranulePage {
            items,
            search_after,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::TemporalRange;
    use subset::BoundingBox;

    fn param(url: &Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_hosts() {
        assert_eq!("MAAP".parse::<CmrHost>().unwrap(), CmrHost::Maap);
        assert_eq!("nasa".parse::<CmrHost>().unwrap().host(), "cmr.earthdata.nasa.gov");
        assert!("esa".parse::<CmrHost>().is_err());
    }

    #[test]
    fn test_collections_url() {
        let client = CmrClient::new(CmrHost::Maap).unwrap();
        let url = client.collections_url("10.3334/ORNLDAAC/2056", 2).unwrap();
        assert_eq!(url.host_str(), Some("cmr.maap-project.org"));
        assert_eq!(url.path(), "/search/collections.umm_json");
        assert_eq!(param(&url, "doi").as_deref(), Some("10.3334/ORNLDAAC/2056"));
        assert_eq!(param(&url, "page_size").as_deref(), Some("2"));
    }

    #[test]
    fn test_granules_url() {
        let client = CmrClient::with_base_url("http://localhost:3003/").unwrap();
        let query = GranuleQuery {
            collection_concept_id: "C2237824918-ORNL_CLOUD".to_string(),
            bounding_box: Some(BoundingBox {
                min_x: 8.45,
                min_y: -4.15,
                max_x: 14.35,
                max_y: 2.35,
            }),
            temporal: Some("2019-04-01,".parse::<TemporalRange>().unwrap()),
        };
        let url = client.granules_url(&query, 2000).unwrap();
        assert_eq!(url.path(), "/search/granules.umm_json");
        assert_eq!(param(&url, "collection_concept_id").as_deref(), Some("C2237824918-ORNL_CLOUD"));
        assert_eq!(param(&url, "page_size").as_deref(), Some("2000"));
        assert_eq!(param(&url, "bounding_box").as_deref(), Some("8.45,-4.15,14.35,2.35"));
        assert_eq!(param(&url, "temporal").as_deref(), Some("2019-04-01T00:00:00Z,"));
    }
}
