//! Model history metadata
//!
//! The remote library ships one JSON document mapping model display names to
//! free-text history. It is fetched once per session and only replaced by an
//! explicit refresh.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{SceneError, SceneResult};
use crate::store::{ObjectStore, StoreItem};

/// Text shown when a model has no recorded history
pub const FALLBACK_HISTORY: &str = "History not available for this model.";

/// Default name of the metadata document in the store
pub const DEFAULT_METADATA_OBJECT: &str = "metadata.json";

/// Display name to history text
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataIndex {
    entries: HashMap<String, String>,
    /// When the index was populated
    pub loaded_at: Option<DateTime<Utc>>,
}

impl MetadataIndex {
    pub fn from_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            loaded_at: Some(Utc::now()),
        }
    }

    /// Parse the metadata document
    ///
    /// Non-string values are skipped rather than failing the whole document.
    pub fn from_json(content: &str) -> SceneResult<Self> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| SceneError::MetadataUnavailable(format!("invalid JSON: {}", e)))?;
        let object = value.as_object().ok_or_else(|| {
            SceneError::MetadataUnavailable("metadata document is not an object".to_string())
        })?;

        let mut entries = HashMap::with_capacity(object.len());
        for (name, history) in object {
            match history.as_str() {
                Some(text) => {
                    entries.insert(name.clone(), text.to_string());
                }
                None => warn!(model = %name, "Ignoring non-text history entry"),
            }
        }

        Ok(Self {
            entries,
            loaded_at: Some(Utc::now()),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// History text for a model, or [`FALLBACK_HISTORY`]
pub fn lookup<'a>(index: &'a MetadataIndex, display_name: &str) -> &'a str {
    index
        .entries
        .get(display_name)
        .map(String::as_str)
        .unwrap_or(FALLBACK_HISTORY)
}

/// Where the session's metadata stands
#[derive(Debug, Clone, Default)]
pub enum MetadataStatus {
    #[default]
    Pending,
    Ready(Arc<MetadataIndex>),
    /// Load failed; every lookup falls back
    Unavailable(String),
}

impl MetadataStatus {
    /// History text for a model, falling back while pending or unavailable
    pub fn history_for(&self, display_name: &str) -> String {
        match self {
            Self::Ready(index) => lookup(index, display_name).to_string(),
            _ => FALLBACK_HISTORY.to_string(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn kind(&self) -> MetadataStatusKind {
        match self {
            Self::Pending => MetadataStatusKind::Pending,
            Self::Ready(index) => MetadataStatusKind::Ready {
                entries: index.len(),
            },
            Self::Unavailable(reason) => MetadataStatusKind::Unavailable {
                reason: reason.clone(),
            },
        }
    }
}

/// Serializable summary of [`MetadataStatus`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetadataStatusKind {
    Pending,
    Ready { entries: usize },
    Unavailable { reason: String },
}

/// Fetches the metadata document through the object store
#[derive(Clone)]
pub struct MetadataStore {
    store: Arc<dyn ObjectStore>,
    object: String,
}

impl MetadataStore {
    pub fn new(store: Arc<dyn ObjectStore>, object: impl Into<String>) -> Self {
        Self {
            store,
            object: object.into(),
        }
    }

    pub fn object_name(&self) -> &str {
        &self.object
    }

    pub async fn load(&self) -> SceneResult<MetadataIndex> {
        let item = StoreItem::new(self.object.clone());
        let url = self
            .store
            .download_url(&item)
            .await
            .map_err(|e| SceneError::MetadataUnavailable(e.to_string()))?;
        let content = self
            .store
            .fetch_text(&url)
            .await
            .map_err(|e| SceneError::MetadataUnavailable(e.to_string()))?;

        let index = MetadataIndex::from_json(&content)?;
        info!(entries = index.len(), object = %self.object, "Loaded model metadata");
        Ok(index)
    }
}
