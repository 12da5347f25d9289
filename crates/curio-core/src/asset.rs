//! Asset resolution and local blob lifetime
//!
//! A model reaches the viewer either as an uploaded local file or as an
//! entry of the remote library. Local uploads are held in an in-memory
//! [`BlobRegistry`] and addressed by an ephemeral URI. The owning
//! [`LocalBlob`] handle revokes that URI when it is released or dropped,
//! so a replaced upload can never outlive its replacement.

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{SceneError, SceneResult};
use crate::store::ObjectStore;

/// Where an asset came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetOrigin {
    Local,
    Remote,
}

/// A loadable model bound (or bindable) to the viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetReference {
    pub uri: String,
    pub origin: AssetOrigin,
    pub display_name: String,
}

impl AssetReference {
    pub fn remote(display_name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            origin: AssetOrigin::Remote,
            display_name: display_name.into(),
        }
    }
}

/// Which file extensions an upload path accepts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcceptPolicy {
    /// Model viewer: `.glb` and `.gltf`
    #[default]
    Viewer,
    /// Lighting editor model input: `.glb` only
    Editor,
}

impl AcceptPolicy {
    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Viewer => &[".glb", ".gltf"],
            Self::Editor => &[".glb"],
        }
    }

    /// Message shown when a file is rejected
    pub fn rejection_message(self) -> &'static str {
        match self {
            Self::Viewer => "Please upload a .glb or .gltf file",
            Self::Editor => "Please upload a valid .glb file",
        }
    }

    pub fn accepts(self, file_name: &str) -> bool {
        self.extensions().iter().any(|ext| file_name.ends_with(ext))
    }
}

/// In-memory store backing local upload URIs
#[derive(Debug, Clone)]
pub struct BlobRegistry {
    blobs: Arc<Mutex<HashMap<Uuid, Arc<[u8]>>>>,
    prefix: Arc<str>,
}

impl Default for BlobRegistry {
    fn default() -> Self {
        Self::new("blob:")
    }
}

impl BlobRegistry {
    /// Create a registry whose URIs are `{prefix}{id}` (a trailing `/` is inserted
    /// for path-like prefixes)
    pub fn new(prefix: &str) -> Self {
        let prefix = if prefix.ends_with(':') || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{}/", prefix)
        };
        Self {
            blobs: Arc::new(Mutex::new(HashMap::new())),
            prefix: prefix.into(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<[u8]>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store bytes and hand out the owning handle
    pub fn create(&self, bytes: Vec<u8>) -> LocalBlob {
        let id = Uuid::new_v4();
        let size = bytes.len();
        self.lock().insert(id, bytes.into());
        let uri = format!("{}{}", self.prefix, id);
        debug!(uri = %uri, size, "Created local blob");
        LocalBlob {
            id,
            uri,
            registry: self.clone(),
        }
    }

    /// Bytes of a live blob, if it has not been released
    pub fn get(&self, id: &Uuid) -> Option<Arc<[u8]>> {
        self.lock().get(id).cloned()
    }

    /// Number of blobs currently retained
    pub fn live_count(&self) -> usize {
        self.lock().len()
    }

    fn revoke(&self, id: &Uuid) {
        if self.lock().remove(id).is_some() {
            debug!(id = %id, "Revoked local blob");
        }
    }
}

/// Owned handle to a local upload; the URI dies with it
#[derive(Debug)]
pub struct LocalBlob {
    id: Uuid,
    uri: String,
    registry: BlobRegistry,
}

impl LocalBlob {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl Drop for LocalBlob {
    fn drop(&mut self) {
        self.registry.revoke(&self.id);
    }
}

/// An asset bound to the viewer, with the blob it owns when local
#[derive(Debug)]
pub struct BoundAsset {
    reference: AssetReference,
    blob: Option<LocalBlob>,
}

impl BoundAsset {
    pub fn remote(reference: AssetReference) -> Self {
        Self {
            reference,
            blob: None,
        }
    }

    pub fn reference(&self) -> &AssetReference {
        &self.reference
    }

    pub fn is_local(&self) -> bool {
        self.blob.is_some()
    }
}

/// Turns uploads and remote library entries into loadable references
#[derive(Clone)]
pub struct AssetResolver {
    store: Arc<dyn ObjectStore>,
    blobs: BlobRegistry,
    policy: AcceptPolicy,
    root: String,
    excluded: Vec<String>,
}

impl AssetResolver {
    pub fn new(store: Arc<dyn ObjectStore>, blobs: BlobRegistry, policy: AcceptPolicy) -> Self {
        Self {
            store,
            blobs,
            policy,
            root: "/".to_string(),
            excluded: Vec::new(),
        }
    }

    /// List the library under a different store root
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    /// Hide an object (such as the metadata document) from the library
    pub fn excluding(mut self, name: impl Into<String>) -> Self {
        self.excluded.push(name.into());
        self
    }

    pub fn policy(&self) -> AcceptPolicy {
        self.policy
    }

    pub fn blobs(&self) -> &BlobRegistry {
        &self.blobs
    }

    /// Accept an uploaded file and give it an ephemeral URI
    pub fn resolve_local(&self, file_name: &str, bytes: Vec<u8>) -> SceneResult<BoundAsset> {
        if !self.policy.accepts(file_name) {
            return Err(SceneError::UnsupportedFormat {
                file_name: file_name.to_string(),
                message: self.policy.rejection_message(),
            });
        }

        let blob = self.blobs.create(bytes);
        info!(file = %file_name, uri = %blob.uri(), "Resolved local model");
        Ok(BoundAsset {
            reference: AssetReference {
                uri: blob.uri().to_string(),
                origin: AssetOrigin::Local,
                display_name: file_name.to_string(),
            },
            blob: Some(blob),
        })
    }

    /// Enumerate the remote library, resolving every entry's download URL
    pub async fn list_remote(&self) -> SceneResult<Vec<AssetReference>> {
        let items = self.store.list_all(&self.root).await?;
        let items: Vec<_> = items
            .into_iter()
            .filter(|item| !self.excluded.iter().any(|name| *name == item.name))
            .collect();

        let store = self.store.as_ref();
        let assets = try_join_all(items.iter().map(|item| async move {
            let url = store.download_url(item).await?;
            Ok::<_, SceneError>(AssetReference::remote(item.name.clone(), url))
        }))
        .await?;

        info!(count = assets.len(), root = %self.root, "Listed remote models");
        Ok(assets)
    }

    /// Drop a bound asset, revoking its local URI if it had one
    pub fn release(&self, asset: BoundAsset) {
        if let Some(blob) = asset.blob {
            debug!(uri = %blob.uri(), "Releasing local model");
            drop(blob);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{StoreError, StoreItem};
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;

    struct FakeStore {
        items: Vec<&'static str>,
    }

    impl ObjectStore for FakeStore {
        fn list_all<'a>(&'a self, _root: &'a str) -> BoxFuture<'a, Result<Vec<StoreItem>, StoreError>> {
            let items = self.items.iter().map(|n| StoreItem::new(*n)).collect();
            async move { Ok(items) }.boxed()
        }

        fn download_url<'a>(&'a self, item: &'a StoreItem) -> BoxFuture<'a, Result<String, StoreError>> {
            async move { Ok(format!("https://store.test/{}", item.full_path)) }.boxed()
        }

        fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, StoreError>> {
            async move { Err(StoreError::NotFound(url.to_string())) }.boxed()
        }
    }

    fn resolver(items: Vec<&'static str>, policy: AcceptPolicy) -> AssetResolver {
        AssetResolver::new(Arc::new(FakeStore { items }), BlobRegistry::default(), policy)
    }

    #[test]
    fn test_accept_policy() {
        assert!(AcceptPolicy::Viewer.accepts("model.glb"));
        assert!(AcceptPolicy::Viewer.accepts("scene.gltf"));
        assert!(!AcceptPolicy::Viewer.accepts("model.obj"));
        assert!(!AcceptPolicy::Viewer.accepts("model.GLB"));
        assert!(AcceptPolicy::Editor.accepts("model.glb"));
        assert!(!AcceptPolicy::Editor.accepts("scene.gltf"));
    }

    #[test]
    fn test_resolve_local_rejects_unknown_extension() {
        let resolver = resolver(vec![], AcceptPolicy::Viewer);
        let err = resolver.resolve_local("model.obj", vec![1, 2, 3]).unwrap_err();
        assert_eq!(err.to_string(), "Please upload a .glb or .gltf file");
        assert_eq!(resolver.blobs().live_count(), 0);
    }

    #[test]
    fn test_release_revokes_blob_once() {
        let resolver = resolver(vec![], AcceptPolicy::Viewer);
        let asset = resolver.resolve_local("chair.glb", vec![0u8; 16]).unwrap();
        assert!(asset.is_local());
        assert_eq!(asset.reference().origin, AssetOrigin::Local);
        assert!(asset.reference().uri.starts_with("blob:"));
        assert_eq!(resolver.blobs().live_count(), 1);

        resolver.release(asset);
        assert_eq!(resolver.blobs().live_count(), 0);
    }

    #[test]
    fn test_blob_served_until_dropped() {
        let blobs = BlobRegistry::new("/blobs");
        let blob = blobs.create(b"glTF".to_vec());
        assert_eq!(blob.uri(), format!("/blobs/{}", blob.id()));
        assert_eq!(blobs.get(&blob.id()).as_deref(), Some(&b"glTF"[..]));

        let id = blob.id();
        drop(blob);
        assert!(blobs.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_list_remote_skips_excluded() {
        let resolver = resolver(vec!["Statue.glb", "metadata.json", "Vase.glb"], AcceptPolicy::Viewer)
            .excluding("metadata.json");
        let assets = resolver.list_remote().await.unwrap();
        assert_eq!(
            assets,
            vec![
                AssetReference::remote("Statue.glb", "https://store.test/Statue.glb"),
                AssetReference::remote("Vase.glb", "https://store.test/Vase.glb"),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_remote_empty_store() {
        let resolver = resolver(vec![], AcceptPolicy::Viewer);
        assert!(resolver.list_remote().await.unwrap().is_empty());
    }
}
