//! Remote object store interface
//!
//! The scene never talks to a storage backend directly. Implementations
//! (HTTP bucket, local directory, test fakes) live behind [`ObjectStore`].

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("invalid response: {0}")]
    Parse(String),
    #[error("object not found: {0}")]
    NotFound(String),
}

/// An object listed under a store root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreItem {
    /// Object name relative to the bucket (e.g., "Statue.glb")
    pub name: String,
    /// Full object path used to resolve a download URL
    pub full_path: String,
}

impl StoreItem {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            full_path: name.clone(),
            name,
        }
    }
}

/// Object storage used for the remote model library and its metadata
pub trait ObjectStore: Send + Sync {
    /// List the objects directly under `root`
    fn list_all<'a>(&'a self, root: &'a str) -> BoxFuture<'a, Result<Vec<StoreItem>, StoreError>>;

    /// Resolve a durable download URL for an object
    fn download_url<'a>(&'a self, item: &'a StoreItem) -> BoxFuture<'a, Result<String, StoreError>>;

    /// Fetch a resolved URL as text
    fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, StoreError>>;
}
