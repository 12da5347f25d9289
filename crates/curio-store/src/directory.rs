//! Object store backed by a local directory, for offline use
//!
//! Objects are regular files under `dir`. Download URLs are `{url_base}/{path}`
//! so the daemon can serve the same directory over HTTP.

use curio_core::{ObjectStore, StoreError, StoreItem};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

pub struct DirectoryStore {
    dir: PathBuf,
    url_base: String,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>, url_base: &str) -> Self {
        Self {
            dir: dir.into(),
            url_base: url_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn url_base(&self) -> &str {
        &self.url_base
    }

    /// Map a relative object path onto `dir`, refusing anything that climbs out
    fn object_path(&self, relative: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(relative.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StoreError::NotFound(relative.display().to_string()));
        }
        Ok(self.dir.join(relative))
    }

    async fn list(&self, root: &str) -> Result<Vec<StoreItem>, StoreError> {
        let prefix = root.trim_matches('/');
        let listing_dir = self.object_path(prefix)?;

        let mut entries = tokio::fs::read_dir(&listing_dir)
            .await
            .map_err(|e| StoreError::Transport(format!("{}: {}", listing_dir.display(), e)))?;

        let mut items = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StoreError::Transport(e.to_string()))?;
            if !file_type.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                debug!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                continue;
            };
            let full_path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            items.push(StoreItem { name, full_path });
        }

        items.sort_by(|a, b| a.name.cmp(&b.name));
        info!(dir = %listing_dir.display(), count = items.len(), "Listed library directory");
        Ok(items)
    }

    async fn resolve_download_url(&self, item: &StoreItem) -> Result<String, StoreError> {
        let path = self.object_path(&item.full_path)?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::NotFound(item.full_path.clone()));
        }
        Ok(format!("{}/{}", self.url_base, item.full_path))
    }

    async fn fetch(&self, url: &str) -> Result<String, StoreError> {
        let relative = url
            .strip_prefix(&self.url_base)
            .filter(|rest| rest.starts_with('/'))
            .ok_or_else(|| StoreError::NotFound(url.to_string()))?;
        let path = self.object_path(relative)?;

        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(url.to_string()))
            }
            Err(e) => Err(StoreError::Transport(format!("{}: {}", path.display(), e))),
        }
    }
}

impl ObjectStore for DirectoryStore {
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
