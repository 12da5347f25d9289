//! Scene orchestration
//!
//! [`Scene`] is the single owner of the viewer's state: the bound asset,
//! its history text, the remote library, metadata, AR session, narration
//! and lighting. Every user action lands here and either succeeds as a
//! whole or leaves the previous state intact with a user-visible message.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::ar::{ArSessionController, ArSessionState, RenderSurface, SessionId};
use crate::asset::{AssetReference, AssetResolver, BoundAsset};
use crate::error::{SceneError, SceneResult};
use crate::lighting::{ActiveLight, LightingConfiguration};
use crate::metadata::{MetadataIndex, MetadataStatus, MetadataStatusKind, FALLBACK_HISTORY};
use crate::narration::{NarrationController, NarrationState};

/// A remote selection waiting for its history text
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionTicket {
    pub generation: u64,
    pub asset: AssetReference,
}

/// Snapshot handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewState {
    pub active_asset: Option<AssetReference>,
    pub history_text: Option<String>,
    pub loading: bool,
    pub library: Vec<AssetReference>,
    pub metadata: MetadataStatusKind,
    pub xr_supported: bool,
    pub ar: ArSessionState,
    /// Whether the "View in AR" affordance is offered
    pub ar_available: bool,
    pub narration: NarrationState,
    pub lighting: LightingConfiguration,
    pub active_lights: Vec<ActiveLight>,
    pub message: Option<String>,
}

pub struct Scene {
    resolver: AssetResolver,
    narration: Arc<NarrationController>,
    ar: ArSessionController,
    lighting: LightingConfiguration,
    active: Option<BoundAsset>,
    history_text: Option<String>,
    library: Vec<AssetReference>,
    metadata: watch::Sender<MetadataStatus>,
    loading: bool,
    /// Bumped by every upload and selection; older selections are stale
    generation: u64,
    message: Option<String>,
}

impl Scene {
    pub fn new(
        resolver: AssetResolver,
        narration: Arc<NarrationController>,
        surface: Arc<dyn RenderSurface>,
        lighting: LightingConfiguration,
    ) -> Self {
        let (metadata, _) = watch::channel(MetadataStatus::Pending);
        Self {
            resolver,
            narration,
            ar: ArSessionController::new(surface),
            lighting,
            active: None,
            history_text: None,
            library: Vec::new(),
            metadata,
            loading: false,
            generation: 0,
            message: None,
        }
    }

    pub fn active_asset(&self) -> Option<&AssetReference> {
        self.active.as_ref().map(BoundAsset::reference)
    }

    pub fn history_text(&self) -> Option<&str> {
        self.history_text.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn narration(&self) -> &Arc<NarrationController> {
        &self.narration
    }

    pub fn ar(&self) -> &ArSessionController {
        &self.ar
    }

    pub fn ar_mut(&mut self) -> &mut ArSessionController {
        &mut self.ar
    }

    pub fn lighting(&self) -> &LightingConfiguration {
        &self.lighting
    }

    pub fn lighting_mut(&mut self) -> &mut LightingConfiguration {
        &mut self.lighting
    }

    /// Follow metadata status changes (used to wait out a pending load)
    pub fn metadata_watch(&self) -> watch::Receiver<MetadataStatus> {
        self.metadata.subscribe()
    }

    fn report(&mut self, error: &SceneError) {
        warn!(error = %error, "Action failed");
        self.message = Some(error.to_string());
    }

    /// Bind a new asset, releasing the one it replaces
    fn bind(&mut self, asset: BoundAsset, history: String) {
        if let Some(previous) = self.active.take() {
            debug!(asset = %previous.reference().display_name, "Releasing replaced asset");
            self.resolver.release(previous);
        }
        self.active = Some(asset);
        self.history_text = Some(history);
    }

    /// Upload control: bind a local file with the fallback history text
    pub fn upload(&mut self, file_name: &str, bytes: Vec<u8>) -> SceneResult<AssetReference> {
        let asset = match self.resolver.resolve_local(file_name, bytes) {
            Ok(asset) => asset,
            Err(e) => {
                self.report(&e);
                return Err(e);
            }
        };

        let reference = asset.reference().clone();
        // An upload supersedes any selection still in flight
        self.generation += 1;
        self.loading = false;
        self.bind(asset, FALLBACK_HISTORY.to_string());
        self.message = None;
        info!(asset = %reference.display_name, "Uploaded model bound to viewer");
        Ok(reference)
    }

    /// Remote selector: start a selection; the loading indicator stays up
    /// until [`Scene::complete_select`] applies the newest ticket
    pub fn begin_select(&mut self, display_name: &str) -> SceneResult<SelectionTicket> {
        let asset = match self
            .library
            .iter()
            .find(|asset| asset.display_name == display_name)
        {
            Some(asset) => asset.clone(),
            None => {
                let e = SceneError::UnknownAsset(display_name.to_string());
                self.report(&e);
                return Err(e);
            }
        };

        self.generation += 1;
        self.loading = true;
        debug!(asset = %display_name, generation = self.generation, "Selection started");
        Ok(SelectionTicket {
            generation: self.generation,
            asset,
        })
    }

    /// Apply a selection's result unless a newer upload or selection exists
    ///
    /// Binds the asset, shows its history and reads it aloud.
    pub fn complete_select(&mut self, ticket: SelectionTicket, history: String) -> bool {
        if ticket.generation != self.generation {
            debug!(
                asset = %ticket.asset.display_name,
                generation = ticket.generation,
                current = self.generation,
                "Discarding stale selection"
            );
            return false;
        }

        info!(asset = %ticket.asset.display_name, "Remote model bound to viewer");
        self.bind(BoundAsset::remote(ticket.asset), history.clone());
        self.narration.speak(&history);
        self.loading = false;
        self.message = None;
        true
    }

    /// Read-aloud button; with nothing bound it can only stop
    pub fn read_aloud(&mut self) -> NarrationState {
        match &self.history_text {
            Some(text) => self.narration.toggle(text),
            None => self.narration.stop(),
        }
    }

    /// View-in-AR button: requires a bound asset and a supporting device
    pub fn begin_view_in_ar(&mut self) -> SceneResult<u64> {
        let result = if self.active.is_none() {
            Err(SceneError::NoActiveAsset)
        } else {
            self.ar.begin_request()
        };
        if let Err(e) = &result {
            self.report(e);
        }
        result
    }

    pub fn finish_view_in_ar(
        &mut self,
        attempt: u64,
        result: Result<SessionId, String>,
    ) -> SceneResult<SessionId> {
        let outcome = self.ar.finish_request(attempt, result);
        match &outcome {
            Ok(_) => self.message = None,
            Err(e) => self.report(e),
        }
        outcome
    }

    pub fn ar_ended(&mut self, session: SessionId) -> bool {
        self.ar.session_ended(session)
    }

    pub fn set_library(&mut self, result: SceneResult<Vec<AssetReference>>) {
        match result {
            Ok(library) => self.library = library,
            Err(e) => self.report(&e),
        }
    }

    pub fn begin_metadata_refresh(&mut self) {
        self.metadata.send_replace(MetadataStatus::Pending);
    }

    /// Store loaded metadata; a failure means fallback text everywhere
    pub fn set_metadata(&mut self, result: SceneResult<MetadataIndex>) {
        let status = match result {
            Ok(index) => MetadataStatus::Ready(Arc::new(index)),
            Err(e) => {
                warn!(error = %e, "Using fallback history for all models");
                MetadataStatus::Unavailable(e.to_string())
            }
        };
        self.metadata.send_replace(status);
    }

    pub fn view_state(&self) -> ViewState {
        let active_asset = self.active_asset().cloned();
        ViewState {
            ar_available: self.ar.is_supported() && active_asset.is_some(),
            active_asset,
            history_text: self.history_text.clone(),
            loading: self.loading,
            library: self.library.clone(),
            metadata: self.metadata.borrow().kind(),
            xr_supported: self.ar.is_supported(),
            ar: self.ar.state().clone(),
            narration: self.narration.state(),
            lighting: self.lighting.clone(),
            active_lights: self.lighting.active_lights(),
            message: self.message.clone(),
        }
    }

    /// Release everything this viewer holds
    pub fn teardown(&mut self) {
        self.generation += 1;
        self.loading = false;
        if let Some(asset) = self.active.take() {
            self.resolver.release(asset);
        }
        self.history_text = None;
        self.narration.stop();
        self.ar.teardown();
        info!("Scene torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ar::tests::{RecordingSurface, SurfaceCall};
    use crate::asset::{AcceptPolicy, AssetOrigin, BlobRegistry};
    use crate::narration::tests::{Call, RecordingBackend};
    use crate::narration::VoiceSettings;
    use crate::store::{ObjectStore, StoreError, StoreItem};
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;

    struct EmptyStore;

    impl ObjectStore for EmptyStore {
        fn list_all<'a>(&'a self, _root: &'a str) -> BoxFuture<'a, Result<Vec<StoreItem>, StoreError>> {
            async { Ok(Vec::new()) }.boxed()
        }

        fn download_url<'a>(&'a self, item: &'a StoreItem) -> BoxFuture<'a, Result<String, StoreError>> {
            async move { Err(StoreError::NotFound(item.name.clone())) }.boxed()
        }

        fn fetch_text<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<String, StoreError>> {
            async move { Err(StoreError::NotFound(url.to_string())) }.boxed()
        }
    }

    struct Fixture {
        scene: Scene,
        blobs: BlobRegistry,
        backend: Arc<RecordingBackend>,
        surface: Arc<RecordingSurface>,
    }

    fn fixture() -> Fixture {
        let blobs = BlobRegistry::default();
        let resolver = AssetResolver::new(Arc::new(EmptyStore), blobs.clone(), AcceptPolicy::Viewer);
        let backend = Arc::new(RecordingBackend::default());
        let narration = Arc::new(NarrationController::new(backend.clone(), VoiceSettings::default()));
        let surface = Arc::new(RecordingSurface::default());
        let mut scene = Scene::new(resolver, narration, surface.clone(), LightingConfiguration::default());
        scene.set_library(Ok(vec![
            AssetReference::remote("Statue.glb", "https://store.test/Statue.glb"),
            AssetReference::remote("Vase.glb", "https://store.test/Vase.glb"),
        ]));
        Fixture {
            scene,
            blobs,
            backend,
            surface,
        }
    }

    #[test]
    fn test_uploads_retain_one_blob() {
        let mut f = fixture();
        for name in ["a.glb", "b.gltf", "c.glb"] {
            f.scene.upload(name, vec![0u8; 8]).unwrap();
            assert_eq!(f.blobs.live_count(), 1);
        }
        assert_eq!(f.scene.active_asset().unwrap().display_name, "c.glb");
        assert_eq!(f.scene.history_text(), Some(FALLBACK_HISTORY));

        f.scene.teardown();
        assert_eq!(f.blobs.live_count(), 0);
        assert!(f.scene.active_asset().is_none());
    }

    #[test]
    fn test_rejected_upload_keeps_prior_asset() {
        let mut f = fixture();
        f.scene.upload("chair.glb", vec![1]).unwrap();
        let err = f.scene.upload("model.obj", vec![2]).unwrap_err();
        assert!(matches!(err, SceneError::UnsupportedFormat { .. }));

        let state = f.scene.view_state();
        assert_eq!(state.active_asset.unwrap().display_name, "chair.glb");
        assert_eq!(state.message.as_deref(), Some("Please upload a .glb or .gltf file"));
        assert_eq!(f.blobs.live_count(), 1);
    }

    #[test]
    fn test_selection_binds_and_narrates() {
        let mut f = fixture();
        f.scene.upload("chair.glb", vec![1]).unwrap();

        let ticket = f.scene.begin_select("Statue.glb").unwrap();
        assert!(f.scene.is_loading());
        assert!(f.scene.complete_select(ticket, "Ancient Roman statue".to_string()));

        let state = f.scene.view_state();
        assert!(!state.loading);
        let active = state.active_asset.unwrap();
        assert_eq!(active.display_name, "Statue.glb");
        assert_eq!(active.origin, AssetOrigin::Remote);
        assert_eq!(state.history_text.as_deref(), Some("Ancient Roman statue"));
        assert_eq!(state.narration, NarrationState::Speaking("Ancient Roman statue".to_string()));
        // The replaced upload was released
        assert_eq!(f.blobs.live_count(), 0);
    }

    #[test]
    fn test_stale_selection_is_discarded() {
        let mut f = fixture();
        let first = f.scene.begin_select("Statue.glb").unwrap();
        let second = f.scene.begin_select("Vase.glb").unwrap();

        assert!(f.scene.complete_select(second, "A vase".to_string()));
        assert!(!f.scene.complete_select(first, "A statue".to_string()));

        assert_eq!(f.scene.active_asset().unwrap().display_name, "Vase.glb");
        assert_eq!(f.scene.history_text(), Some("A vase"));
        assert_eq!(f.backend.calls(), vec![Call::Speak("A vase".to_string())]);
    }

    #[test]
    fn test_upload_supersedes_pending_selection() {
        let mut f = fixture();
        let ticket = f.scene.begin_select("Statue.glb").unwrap();
        f.scene.upload("chair.glb", vec![1]).unwrap();
        assert!(!f.scene.is_loading());
        assert!(!f.scene.complete_select(ticket, "A statue".to_string()));
        assert_eq!(f.scene.active_asset().unwrap().display_name, "chair.glb");
    }

    #[test]
    fn test_unknown_selection() {
        let mut f = fixture();
        assert_eq!(
            f.scene.begin_select("Missing.glb"),
            Err(SceneError::UnknownAsset("Missing.glb".to_string()))
        );
        assert!(!f.scene.is_loading());
    }

    #[test]
    fn test_read_aloud_toggles_history() {
        let mut f = fixture();
        f.scene.upload("chair.glb", vec![1]).unwrap();
        assert_eq!(
            f.scene.read_aloud(),
            NarrationState::Speaking(FALLBACK_HISTORY.to_string())
        );
        assert_eq!(f.scene.read_aloud(), NarrationState::Idle);
    }

    #[test]
    fn test_ar_requires_asset_and_support() {
        let mut f = fixture();
        f.scene.ar_mut().begin_probe();
        f.scene.ar_mut().finish_probe(true);
        assert_eq!(f.scene.begin_view_in_ar(), Err(SceneError::NoActiveAsset));
        assert!(!f.scene.view_state().ar_available);

        f.scene.upload("chair.glb", vec![1]).unwrap();
        assert!(f.scene.view_state().ar_available);
        let attempt = f.scene.begin_view_in_ar().unwrap();
        let session = SessionId::new();
        assert_eq!(f.scene.finish_view_in_ar(attempt, Ok(session)), Ok(session));

        f.scene.teardown();
        assert_eq!(
            f.surface.calls(),
            vec![
                SurfaceCall::Attach(Some(session)),
                SurfaceCall::Activate,
                SurfaceCall::Attach(None),
            ]
        );
    }

    #[test]
    fn test_metadata_failure_is_not_fatal() {
        let mut f = fixture();
        f.scene.set_metadata(Err(SceneError::MetadataUnavailable("offline".to_string())));
        assert!(matches!(
            f.scene.view_state().metadata,
            MetadataStatusKind::Unavailable { .. }
        ));
        assert_eq!(f.scene.metadata_watch().borrow().history_for("Statue.glb"), FALLBACK_HISTORY);
    }
}
