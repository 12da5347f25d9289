//! Curio Core - Scene and session state for the 3D asset viewer
//!
//! This crate coordinates everything the viewer shows around a model:
//! - Asset resolution for local uploads and the remote model library
//! - Model history metadata with a fixed fallback text
//! - Process-wide text-to-speech narration
//! - Immersive AR session lifecycle against a capability-checked device
//! - Adjustable ambient, directional and spot lighting
//! - A single-task runtime that serializes user actions and async results

pub mod ar;
pub mod asset;
pub mod error;
pub mod lighting;
pub mod metadata;
pub mod narration;
pub mod runtime;
pub mod scene;
pub mod store;

pub use ar::{ArSessionController, ArSessionState, RenderSurface, SessionId, SessionRequest, XrDevice};
pub use asset::{AcceptPolicy, AssetOrigin, AssetReference, AssetResolver, BlobRegistry, BoundAsset, LocalBlob};
pub use error::{SceneError, SceneResult};
pub use lighting::{ActiveLight, LightMode, LightingConfiguration};
pub use metadata::{lookup, MetadataIndex, MetadataStatus, MetadataStore, FALLBACK_HISTORY};
pub use narration::{NarrationBackend, NarrationController, NarrationError, NarrationState, Utterance, VoiceSettings};
pub use runtime::{spawn_scene, LightingChange, SceneHandle, SceneServices, SelectionOutcome};
pub use scene::{Scene, SelectionTicket, ViewState};
pub use store::{ObjectStore, StoreError, StoreItem};
