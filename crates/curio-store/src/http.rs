//! Bucket-backed object store over the Firebase Storage REST API
//!
//! Endpoints used:
//! - `GET {base}/b/{bucket}/o?prefix=&delimiter=/` lists one directory level
//! - `GET {base}/b/{bucket}/o/{object}` returns object metadata (download tokens)
//! - `{base}/b/{bucket}/o/{object}?alt=media[&token=..]` is the download URL

use curio_core::{ObjectStore, StoreError, StoreItem};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default Firebase Storage REST endpoint
pub const DEFAULT_BASE_URL: &str = "https://firebasestorage.googleapis.com/v0";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ListedObject>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMetadata {
    download_tokens: Option<String>,
}

/// HTTP object store client
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
    bucket: String,
}

impl HttpObjectStore {
    pub fn new(base_url: &str, bucket: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
        })
    }

    /// Listing prefix for a root such as `/` or `models/`
    pub fn prefix_for(root: &str) -> String {
        let trimmed = root.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}/", trimmed)
        }
    }

    /// URL of an object resource, with the object path encoded as one segment
    pub fn object_url(&self, full_path: &str) -> Result<Url, StoreError> {
        let mut url = Url::parse(&format!("{}/b/{}/o", self.base_url, self.bucket))
            .map_err(|e| StoreError::Parse(format!("invalid store URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Parse("store URL cannot have a path".to_string()))?
            .push(full_path);
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, StoreError> {
        debug!(url = %url, "Store request");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            warn!(url = %url, status = %status, "Store returned non-success status");
            return Err(StoreError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn list_page(&self, prefix: &str, page_token: Option<&str>) -> Result<ListResponse, StoreError> {
        let mut url = Url::parse(&format!("{}/b/{}/o", self.base_url, self.bucket))
            .map_err(|e| StoreError::Parse(format!("invalid store URL: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("prefix", prefix);
            query.append_pair("delimiter", "/");
            if let Some(token) = page_token {
                query.append_pair("pageToken", token);
            }
        }

        self.get(url)
            .await?
            .json::<ListResponse>()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))
    }

    async fn list(&self, root: &str) -> Result<Vec<StoreItem>, StoreError> {
        let prefix = Self::prefix_for(root);
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self.list_page(&prefix, page_token.as_deref()).await?;
            items.extend(page.items.into_iter().map(|object| StoreItem {
                name: object
                    .name
                    .rsplit('/')
                    .next()
                    .unwrap_or(&object.name)
                    .to_string(),
                full_path: object.name,
            }));
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(bucket = %self.bucket, prefix = %prefix, count = items.len(), "Listed bucket objects");
        Ok(items)
    }

    async fn resolve_download_url(&self, item: &StoreItem) -> Result<String, StoreError> {
        let url = self.object_url(&item.full_path)?;
        let metadata = self
            .get(url.clone())
            .await?
            .json::<ObjectMetadata>()
            .await
            .map_err(|e| StoreError::Parse(e.to_string()))?;

        let mut download = url;
        {
            let mut query = download.query_pairs_mut();
            query.append_pair("alt", "media");
            if let Some(token) = metadata
                .download_tokens
                .as_deref()
                .and_then(|tokens| tokens.split(',').next())
                .filter(|token| !token.is_empty())
            {
                query.append_pair("token", token);
            }
        }
        Ok(download.to_string())
    }

    async fn fetch(&self, url: &str) -> Result<String, StoreError> {
        let url = Url::parse(url).map_err(|e| StoreError::Parse(format!("invalid URL {}: {}", url, e)))?;
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| StoreError::Transport(format!("failed to read response body: {}", e)))
    }
}

impl ObjectStore for HttpObjectStore {
    fn list_all<'a>(&'a self, root: &'a str) -> BoxFuture<'a, Result<Vec<StoreItem>, StoreError>> {
        self.list(root).boxed()
    }

    fn download_url<'a>(&'a self, item: &'a StoreItem) -> BoxFuture<'a, Result<String, StoreError>> {
        self.resolve_download_url(item).boxed()
    }

    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, StoreError>> {
        self.fetch(url).boxed()
    }
}
