//! Application state management

use anyhow::{Context, Result};
use curio_core::{
    spawn_scene, AssetResolver, BlobRegistry, MetadataStore, NarrationController, ObjectStore,
    SceneHandle, SceneServices,
};
use curio_store::{DirectoryStore, HttpObjectStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bridge::ClientBridge;
use crate::config::{Config, StoreKind};

/// Path uploaded blobs are served under
pub const BLOB_PREFIX: &str = "/blobs";
/// Path a directory-backed library is served under
pub const LIBRARY_PREFIX: &str = "/library";

/// Shared application state
pub struct AppState {
    /// Running viewer session
    pub scene: SceneHandle,
    /// Uploaded models, served at `/blobs/{id}`
    pub blobs: BlobRegistry,
    /// Narration and XR primitives of the connected browser
    pub bridge: Arc<ClientBridge>,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Create the application state and start the scene runtime
    pub fn new(config: Config) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let store = build_store(&config)?;
        let bridge = Arc::new(ClientBridge::new(Duration::from_secs(
            config.daemon.client_reply_timeout_secs,
        )));
        Self::with_services(config, store, bridge)
    }

    /// Assemble state around an explicit store and client bridge
    pub fn with_services(
        config: Config,
        store: Arc<dyn ObjectStore>,
        bridge: Arc<ClientBridge>,
    ) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let blobs = BlobRegistry::new(BLOB_PREFIX);
        let resolver = build_resolver(&config, store.clone(), blobs.clone());
        let metadata = MetadataStore::new(store, config.store.metadata_object.clone());
        let narration = Arc::new(NarrationController::new(
            bridge.clone(),
            config.narration.clone(),
        ));

        let (scene, task) = spawn_scene(SceneServices {
            resolver,
            metadata,
            narration,
            xr: bridge.clone(),
            surface: bridge.clone(),
            session_request: config.viewer.session_request(),
            lighting: config.initial_lighting(),
        });

        info!(accept = ?config.viewer.accept, "Viewer session started");

        let state = Arc::new(Self {
            scene,
            blobs,
            bridge,
            config,
        });
        Ok((state, task))
    }
}

/// Object store selected by `[store]`
pub fn build_store(config: &Config) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config.store.kind {
        StoreKind::Http => {
            if config.store.bucket.is_empty() {
                anyhow::bail!("[store] bucket must be set for the http store");
            }
            let store = HttpObjectStore::new(
                &config.store.base_url,
                &config.store.bucket,
                Duration::from_secs(config.store.request_timeout_secs),
            )
            .context("failed to create object store client")?;
            info!(bucket = %config.store.bucket, "Using bucket model library");
            Arc::new(store)
        }
        StoreKind::Directory => {
            info!(directory = %config.store.directory, "Using directory model library");
            Arc::new(DirectoryStore::new(&config.store.directory, LIBRARY_PREFIX))
        }
    };
    Ok(store)
}

pub fn build_resolver(
    config: &Config,
    store: Arc<dyn ObjectStore>,
    blobs: BlobRegistry,
) -> AssetResolver {
    AssetResolver::new(store, blobs, config.viewer.accept)
        .with_root(config.store.root.clone())
        .excluding(config.store.metadata_object.clone())
}
