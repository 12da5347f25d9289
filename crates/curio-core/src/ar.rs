//! Immersive AR session lifecycle
//!
//! ```text
//! Idle --probe--> CapabilityUnknown --> Supported | Unsupported
//! Supported | Failed | Idle(probed) --request--> Requesting
//! Requesting --grant--> Active --end--> Ended --> Idle
//! Requesting --deny--> Failed(reason)
//! Requesting --end, then grant of that session--> Idle
//! ```
//!
//! The controller is purely synchronous; the scene runtime performs the
//! device calls and feeds their outcomes (and externally fired session ends)
//! back in as events.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SceneError, SceneResult};

/// Identifier of a granted XR session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session mode and features passed to the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub mode: String,
    pub required_features: Vec<String>,
}

impl Default for SessionRequest {
    fn default() -> Self {
        Self {
            mode: "immersive-ar".to_string(),
            required_features: vec!["local-floor".to_string()],
        }
    }
}

/// Host XR capability (WebXR in a browser, a headset runtime, a test fake)
pub trait XrDevice: Send + Sync {
    /// Whether sessions of `mode` can be granted at all
    fn is_session_supported<'a>(&'a self, mode: &'a str) -> BoxFuture<'a, bool>;

    /// Ask for a session; `Err` carries the denial reason
    fn request_session<'a>(
        &'a self,
        request: &'a SessionRequest,
    ) -> BoxFuture<'a, Result<SessionId, String>>;
}

/// The viewer's AR activation entry point
pub trait RenderSurface: Send + Sync {
    /// Link a granted session, or detach with `None`
    fn attach_session(&self, session: Option<SessionId>);
    fn activate(&self);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ArSessionState {
    #[default]
    Idle,
    CapabilityUnknown,
    Supported,
    Unsupported,
    Requesting,
    Active(SessionId),
    Ended,
    Failed(String),
}

pub struct ArSessionController {
    state: ArSessionState,
    /// Outcome of the last completed probe
    capability: Option<bool>,
    /// Bumped for every request so late grants can be recognized
    attempt: u64,
    /// Sessions reported ended before their grant was applied
    pending_ends: HashSet<SessionId>,
    surface: Arc<dyn RenderSurface>,
}

impl ArSessionController {
    pub fn new(surface: Arc<dyn RenderSurface>) -> Self {
        Self {
            state: ArSessionState::Idle,
            capability: None,
            attempt: 0,
            pending_ends: HashSet::new(),
            surface,
        }
    }

    pub fn state(&self) -> &ArSessionState {
        &self.state
    }

    pub fn is_supported(&self) -> bool {
        self.capability == Some(true)
    }

    fn in_session(&self) -> bool {
        matches!(
            self.state,
            ArSessionState::Requesting | ArSessionState::Active(_)
        )
    }

    fn transition(&mut self, next: ArSessionState) {
        debug!(from = ?self.state, to = ?next, "AR state transition");
        self.state = next;
    }

    /// A capability probe has been issued
    ///
    /// A known capability stays in effect until the new answer arrives.
    pub fn begin_probe(&mut self) {
        if self.in_session() {
            debug!("Probe issued during a session, keeping session state");
            return;
        }
        if self.capability.is_some() {
            debug!(state = ?self.state, "Re-probing AR capability");
            return;
        }
        self.transition(ArSessionState::CapabilityUnknown);
    }

    pub fn finish_probe(&mut self, supported: bool) {
        self.capability = Some(supported);
        info!(supported, "AR capability probed");
        if matches!(
            self.state,
            ArSessionState::CapabilityUnknown
                | ArSessionState::Supported
                | ArSessionState::Unsupported
        ) {
            self.transition(if supported {
                ArSessionState::Supported
            } else {
                ArSessionState::Unsupported
            });
        }
    }

    /// Enter `Requesting`, returning the attempt number to echo back
    pub fn begin_request(&mut self) -> SceneResult<u64> {
        if self.in_session() {
            return Err(SceneError::SessionBusy);
        }
        match self.capability {
            None => Err(SceneError::NotRequested),
            Some(false) => Err(SceneError::CapabilityUnsupported),
            Some(true) => {
                self.attempt += 1;
                self.transition(ArSessionState::Requesting);
                Ok(self.attempt)
            }
        }
    }

    /// Apply the device's answer to request `attempt`
    ///
    /// A granted session is linked to the render surface and activated.
    pub fn finish_request(
        &mut self,
        attempt: u64,
        result: Result<SessionId, String>,
    ) -> SceneResult<SessionId> {
        if attempt != self.attempt || self.state != ArSessionState::Requesting {
            warn!(attempt, current = self.attempt, "Discarding stale AR session answer");
            return Err(SceneError::SessionRequestFailed(
                "request was superseded".to_string(),
            ));
        }

        let ended_early = match &result {
            Ok(session) => self.pending_ends.remove(session),
            Err(_) => false,
        };
        self.pending_ends.clear();

        match result {
            Ok(session) if ended_early => {
                info!(session = %session, "AR session ended before it was granted");
                self.transition(ArSessionState::Ended);
                self.transition(ArSessionState::Idle);
                Err(SceneError::SessionRequestFailed(
                    "session ended before it started".to_string(),
                ))
            }
            Ok(session) => {
                self.transition(ArSessionState::Active(session));
                self.surface.attach_session(Some(session));
                self.surface.activate();
                info!(session = %session, "AR session active");
                Ok(session)
            }
            Err(reason) => {
                warn!(reason = %reason, "AR session request failed");
                self.transition(ArSessionState::Failed(reason.clone()));
                Err(SceneError::SessionRequestFailed(reason))
            }
        }
    }

    /// Device reported that `session` ended; unlinks it from the surface
    ///
    /// While a request is outstanding the end is remembered, since the device
    /// can report it before the grant reaches the controller.
    pub fn session_ended(&mut self, session: SessionId) -> bool {
        if self.state == ArSessionState::Requesting {
            debug!(session = %session, "AR session ended while requesting");
            self.pending_ends.insert(session);
            return true;
        }
        if self.state != ArSessionState::Active(session) {
            debug!(session = %session, "Ignoring end of unknown AR session");
            return false;
        }
        self.transition(ArSessionState::Ended);
        self.surface.attach_session(None);
        info!(session = %session, "AR session ended");
        self.transition(ArSessionState::Idle);
        true
    }

    /// Viewer is going away
    pub fn teardown(&mut self) {
        if let ArSessionState::Active(session) = self.state {
            self.surface.attach_session(None);
            info!(session = %session, "Detached AR session on teardown");
        }
        // Outstanding answers for this attempt are now stale
        self.attempt += 1;
        self.pending_ends.clear();
        self.transition(ArSessionState::Idle);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum SurfaceCall {
        Attach(Option<SessionId>),
        Activate,
    }

    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub calls: Mutex<Vec<SurfaceCall>>,
    }

    impl RecordingSurface {
        pub(crate) fn calls(&self) -> Vec<SurfaceCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl RenderSurface for RecordingSurface {
        fn attach_session(&self, session: Option<SessionId>) {
            self.calls.lock().unwrap().push(SurfaceCall::Attach(session));
        }

        fn activate(&self) {
            self.calls.lock().unwrap().push(SurfaceCall::Activate);
        }
    }

    fn controller() -> (Arc<RecordingSurface>, ArSessionController) {
        let surface = Arc::new(RecordingSurface::default());
        (surface.clone(), ArSessionController::new(surface))
    }

    #[test]
    fn test_request_before_probe_is_rejected() {
        let (_, mut ar) = controller();
        assert_eq!(ar.begin_request(), Err(SceneError::NotRequested));
        ar.begin_probe();
        assert_eq!(ar.begin_request(), Err(SceneError::NotRequested));
        assert_eq!(ar.state(), &ArSessionState::CapabilityUnknown);
    }

    #[test]
    fn test_unsupported_never_requests() {
        let (surface, mut ar) = controller();
        ar.begin_probe();
        ar.finish_probe(false);
        assert_eq!(ar.state(), &ArSessionState::Unsupported);
        assert_eq!(ar.begin_request(), Err(SceneError::CapabilityUnsupported));
        assert_eq!(ar.state(), &ArSessionState::Unsupported);
        assert!(surface.calls().is_empty());
    }

    #[test]
    fn test_grant_links_and_end_unlinks() {
        let (surface, mut ar) = controller();
        ar.begin_probe();
        ar.finish_probe(true);

        let attempt = ar.begin_request().unwrap();
        assert_eq!(ar.state(), &ArSessionState::Requesting);
        assert_eq!(ar.begin_request(), Err(SceneError::SessionBusy));

        let session = SessionId::new();
        assert_eq!(ar.finish_request(attempt, Ok(session)), Ok(session));
        assert_eq!(ar.state(), &ArSessionState::Active(session));

        assert!(!ar.session_ended(SessionId::new()));
        assert!(ar.session_ended(session));
        assert_eq!(ar.state(), &ArSessionState::Idle);
        assert_eq!(
            surface.calls(),
            vec![
                SurfaceCall::Attach(Some(session)),
                SurfaceCall::Activate,
                SurfaceCall::Attach(None),
            ]
        );

        // Capability is remembered across sessions
        assert!(ar.begin_request().is_ok());
    }

    #[test]
    fn test_failure_allows_retry() {
        let (_, mut ar) = controller();
        ar.begin_probe();
        ar.finish_probe(true);

        let attempt = ar.begin_request().unwrap();
        let err = ar.finish_request(attempt, Err("user denied".to_string()));
        assert_eq!(err, Err(SceneError::SessionRequestFailed("user denied".to_string())));
        assert_eq!(ar.state(), &ArSessionState::Failed("user denied".to_string()));

        assert!(ar.begin_request().is_ok());
        assert_eq!(ar.state(), &ArSessionState::Requesting);
    }

    #[test]
    fn test_end_before_grant_is_not_linked() {
        let (surface, mut ar) = controller();
        ar.begin_probe();
        ar.finish_probe(true);
        let attempt = ar.begin_request().unwrap();

        let session = SessionId::new();
        assert!(ar.session_ended(session));
        assert!(matches!(
            ar.finish_request(attempt, Ok(session)),
            Err(SceneError::SessionRequestFailed(_))
        ));
        assert_eq!(ar.state(), &ArSessionState::Idle);
        assert!(surface.calls().is_empty());

        // The request path is free again
        let attempt = ar.begin_request().unwrap();
        let next = SessionId::new();
        assert_eq!(ar.finish_request(attempt, Ok(next)), Ok(next));
        assert_eq!(ar.state(), &ArSessionState::Active(next));
    }

    #[test]
    fn test_end_of_other_session_while_requesting() {
        let (surface, mut ar) = controller();
        ar.begin_probe();
        ar.finish_probe(true);
        let attempt = ar.begin_request().unwrap();

        ar.session_ended(SessionId::new());
        let session = SessionId::new();
        assert_eq!(ar.finish_request(attempt, Ok(session)), Ok(session));
        assert_eq!(ar.state(), &ArSessionState::Active(session));
        assert_eq!(
            surface.calls(),
            vec![SurfaceCall::Attach(Some(session)), SurfaceCall::Activate]
        );
    }

    #[test]
    fn test_reprobe_keeps_known_capability() {
        let (_, mut ar) = controller();
        ar.begin_probe();
        ar.finish_probe(true);

        ar.begin_probe();
        assert_eq!(ar.state(), &ArSessionState::Supported);
        assert!(ar.is_supported());
        assert!(ar.begin_request().is_ok());

        let (_, mut ar) = controller();
        ar.begin_probe();
        ar.finish_probe(true);
        ar.begin_probe();
        ar.finish_probe(false);
        assert_eq!(ar.state(), &ArSessionState::Unsupported);
        assert_eq!(ar.begin_request(), Err(SceneError::CapabilityUnsupported));
    }

    #[test]
    fn test_late_grant_after_teardown_is_not_linked() {
        let (surface, mut ar) = controller();
        ar.begin_probe();
        ar.finish_probe(true);
        let attempt = ar.begin_request().unwrap();
        ar.teardown();

        assert!(ar.finish_request(attempt, Ok(SessionId::new())).is_err());
        assert_eq!(ar.state(), &ArSessionState::Idle);
        assert!(surface.calls().is_empty());
    }
}
