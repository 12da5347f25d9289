//! Error taxonomy for the scene core
//!
//! Nothing here is fatal. Every variant describes a locally recoverable
//! failure; its `Display` text is what the presentation layer shows.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneError {
    /// Uploaded file does not carry an accepted 3D-model extension
    #[error("{message}")]
    UnsupportedFormat {
        file_name: String,
        message: &'static str,
    },
    /// Metadata document could not be fetched or parsed
    #[error("Model history is unavailable: {0}")]
    MetadataUnavailable(String),
    /// Device lacks immersive AR support
    #[error("WebXR is not supported on this device.")]
    CapabilityUnsupported,
    /// AR capability was never probed
    #[error("AR capability has not been checked yet.")]
    NotRequested,
    /// Another AR session is already requesting or active
    #[error("An AR session is already in progress.")]
    SessionBusy,
    /// AR session grant was denied or errored
    #[error("Unable to start AR session on this device: {0}")]
    SessionRequestFailed(String),
    /// Narration backend refused to speak
    #[error("Narration failed: {0}")]
    NarrationBackendFailure(String),
    /// AR requested without a model bound to the viewer
    #[error("Load a model before entering AR.")]
    NoActiveAsset,
    /// Selected name is not in the remote library
    #[error("Model not found in library: {0}")]
    UnknownAsset(String),
    /// Remote library could not be enumerated
    #[error("Failed to load model library: {0}")]
    Store(#[from] StoreError),
    /// The scene runtime is no longer running
    #[error("Viewer session is closed")]
    SceneClosed,
}

pub type SceneResult<T> = Result<T, SceneError>;
