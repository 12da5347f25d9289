//! Browser client bridge
//!
//! Speech synthesis and WebXR only exist in the connected browser. The bridge
//! implements the scene's narration, XR device and render surface seams by
//! pushing [`ClientCommand`]s over the WebSocket and waiting for the client to
//! post its answers back through the REST API.

use curio_core::{
    NarrationBackend, NarrationError, RenderSurface, SessionId, SessionRequest, Utterance,
    XrDevice,
};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Instructions for the browser client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    Speak(Utterance),
    CancelSpeech,
    ProbeXr { mode: String },
    RequestXrSession { request_id: Uuid, request: SessionRequest },
    AttachXrSession { session: Option<SessionId> },
    ActivateAr,
}

#[derive(Default)]
struct Pending {
    probes: Vec<oneshot::Sender<bool>>,
    sessions: HashMap<Uuid, oneshot::Sender<Result<SessionId, String>>>,
}

pub struct ClientBridge {
    commands: broadcast::Sender<ClientCommand>,
    pending: Mutex<Pending>,
    reply_timeout: Duration,
}

impl ClientBridge {
    pub fn new(reply_timeout: Duration) -> Self {
        let (commands, _) = broadcast::channel(100);
        Self {
            commands,
            pending: Mutex::new(Pending::default()),
            reply_timeout,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientCommand> {
        self.commands.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send to every connected client; false if none is listening
    fn push(&self, command: ClientCommand) -> bool {
        match self.commands.send(command) {
            Ok(receivers) => {
                debug!(receivers, "Pushed client command");
                true
            }
            Err(_) => false,
        }
    }

    /// Client answered a capability probe
    pub fn capability_reported(&self, supported: bool) -> usize {
        let probes = std::mem::take(&mut self.lock().probes);
        let answered = probes.len();
        for probe in probes {
            let _ = probe.send(supported);
        }
        info!(supported, answered, "Client reported XR capability");
        answered
    }

    /// Client answered session request `request_id`
    ///
    /// Returns the granted session id, or `None` when nothing was waiting.
    pub fn session_answered(
        &self,
        request_id: Uuid,
        granted: bool,
        reason: Option<String>,
    ) -> Option<Result<SessionId, String>> {
        let waiter = self.lock().sessions.remove(&request_id)?;
        let result = if granted {
            Ok(SessionId::new())
        } else {
            Err(reason.unwrap_or_else(|| "session request was denied".to_string()))
        };
        if waiter.send(result.clone()).is_err() {
            debug!(request = %request_id, "Session answer arrived after the request was dropped");
        }
        Some(result)
    }

    async fn probe(&self, mode: String) -> bool {
        let (tx, rx) = oneshot::channel();
        self.lock().probes.push(tx);

        if !self.push(ClientCommand::ProbeXr { mode }) {
            debug!("No client connected, reporting XR unsupported");
            self.lock().probes.clear();
            return false;
        }

        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(supported)) => supported,
            Ok(Err(_)) => false,
            Err(_) => {
                warn!("Timed out waiting for client XR capability");
                false
            }
        }
    }

    async fn request(&self, request: SessionRequest) -> Result<SessionId, String> {
        let request_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.lock().sessions.insert(request_id, tx);

        if !self.push(ClientCommand::RequestXrSession { request_id, request }) {
            self.lock().sessions.remove(&request_id);
            return Err("no client connected".to_string());
        }

        let answer = tokio::time::timeout(self.reply_timeout, rx).await;
        self.lock().sessions.remove(&request_id);
        match answer {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err("session request was abandoned".to_string()),
            Err(_) => {
                warn!(request = %request_id, "Timed out waiting for client session answer");
                Err("timed out waiting for the device".to_string())
            }
        }
    }
}

impl NarrationBackend for ClientBridge {
    fn speak(&self, utterance: &Utterance) -> Result<(), NarrationError> {
        if self.push(ClientCommand::Speak(utterance.clone())) {
            Ok(())
        } else {
            Err(NarrationError("no client connected".to_string()))
        }
    }

    fn cancel(&self) {
        self.push(ClientCommand::CancelSpeech);
    }
}

impl XrDevice for ClientBridge {
    fn is_session_supported<'a>(&'a self, mode: &'a str) -> BoxFuture<'a, bool> {
        self.probe(mode.to_string()).boxed()
    }

    fn request_session<'a>(
        &'a self,
        request: &'a SessionRequest,
    ) -> BoxFuture<'a, Result<SessionId, String>> {
        self.request(request.clone()).boxed()
    }
}

impl RenderSurface for ClientBridge {
    fn attach_session(&self, session: Option<SessionId>) {
        self.push(ClientCommand::AttachXrSession { session });
    }

    fn activate(&self) {
        self.push(ClientCommand::ActivateAr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_speak_without_client_fails() {
        let bridge = ClientBridge::new(Duration::from_secs(1));
        let utterance = Utterance {
            text: "Hello".to_string(),
            lang: "en-US".to_string(),
            rate: 1.0,
            pitch: 1.0,
        };
        assert!(bridge.speak(&utterance).is_err());

        let mut rx = bridge.subscribe();
        assert!(bridge.speak(&utterance).is_ok());
        assert_eq!(rx.try_recv().unwrap(), ClientCommand::Speak(utterance));
    }

    #[tokio::test]
    async fn test_probe_without_client_is_unsupported() {
        let bridge = ClientBridge::new(Duration::from_secs(1));
        assert!(!bridge.is_session_supported("immersive-ar").await);
    }

    #[tokio::test]
    async fn test_probe_answered_by_client() {
        let bridge = Arc::new(ClientBridge::new(Duration::from_secs(5)));
        let mut rx = bridge.subscribe();

        let probing = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.is_session_supported("immersive-ar").await })
        };

        assert_eq!(
            rx.recv().await.unwrap(),
            ClientCommand::ProbeXr { mode: "immersive-ar".to_string() }
        );
        assert_eq!(bridge.capability_reported(true), 1);
        assert!(probing.await.unwrap());
    }

    #[tokio::test]
    async fn test_session_granted_and_denied() {
        let bridge = Arc::new(ClientBridge::new(Duration::from_secs(5)));
        let mut rx = bridge.subscribe();

        let requesting = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.request_session(&SessionRequest::default()).await })
        };
        let ClientCommand::RequestXrSession { request_id, .. } = rx.recv().await.unwrap() else {
            panic!("expected a session request");
        };
        let granted = bridge.session_answered(request_id, true, None).unwrap().unwrap();
        assert_eq!(requesting.await.unwrap(), Ok(granted));
        assert!(bridge.session_answered(request_id, true, None).is_none());

        let requesting = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.request_session(&SessionRequest::default()).await })
        };
        let ClientCommand::RequestXrSession { request_id, .. } = rx.recv().await.unwrap() else {
            panic!("expected a session request");
        };
        bridge.session_answered(request_id, false, Some("user denied".to_string()));
        assert_eq!(requesting.await.unwrap(), Err("user denied".to_string()));
    }

    #[tokio::test]
    async fn test_session_request_times_out() {
        let bridge = ClientBridge::new(Duration::from_millis(20));
        let _rx = bridge.subscribe();
        let result = bridge.request_session(&SessionRequest::default()).await;
        assert_eq!(result, Err("timed out waiting for the device".to_string()));
    }
}
