//! Text-to-speech narration
//!
//! Speech output is a single process-wide slot. Every caller that can start
//! narration shares one [`NarrationController`] (typically behind an `Arc`),
//! which guarantees that starting a readout first cancels whatever is
//! currently being spoken.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::SceneError;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct NarrationError(pub String);

impl From<NarrationError> for SceneError {
    fn from(e: NarrationError) -> Self {
        SceneError::NarrationBackendFailure(e.0)
    }
}

/// Voice parameters applied to every utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_unit")]
    pub rate: f32,
    #[serde(default = "default_unit")]
    pub pitch: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            lang: default_lang(),
            rate: default_unit(),
            pitch: default_unit(),
        }
    }
}

fn default_lang() -> String {
    "en-US".to_string()
}

fn default_unit() -> f32 {
    1.0
}

/// One request to the speech backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    pub text: String,
    pub lang: String,
    pub rate: f32,
    pub pitch: f32,
}

/// Speech engine (browser speech synthesis, a system TTS, a test fake)
pub trait NarrationBackend: Send + Sync {
    fn speak(&self, utterance: &Utterance) -> Result<(), NarrationError>;
    fn cancel(&self);
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "text", rename_all = "snake_case")]
pub enum NarrationState {
    #[default]
    Idle,
    Speaking(String),
}

impl NarrationState {
    pub fn is_speaking(&self) -> bool {
        matches!(self, Self::Speaking(_))
    }
}

/// Shared narration service
pub struct NarrationController {
    backend: Arc<dyn NarrationBackend>,
    voice: VoiceSettings,
    state: Mutex<NarrationState>,
}

impl NarrationController {
    pub fn new(backend: Arc<dyn NarrationBackend>, voice: VoiceSettings) -> Self {
        Self {
            backend,
            voice,
            state: Mutex::new(NarrationState::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NarrationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> NarrationState {
        self.lock().clone()
    }

    /// Read-aloud button: stop if anything is speaking, otherwise speak `text`
    pub fn toggle(&self, text: &str) -> NarrationState {
        let mut state = self.lock();
        if state.is_speaking() {
            self.backend.cancel();
            *state = NarrationState::Idle;
            info!("Narration stopped");
        } else {
            self.start(&mut state, text);
        }
        state.clone()
    }

    /// Speak `text`, cancelling any narration already in progress
    pub fn speak(&self, text: &str) -> NarrationState {
        let mut state = self.lock();
        if state.is_speaking() {
            self.backend.cancel();
            *state = NarrationState::Idle;
            debug!("Cancelled previous narration");
        }
        self.start(&mut state, text);
        state.clone()
    }

    /// Stop any narration in progress
    pub fn stop(&self) -> NarrationState {
        let mut state = self.lock();
        if state.is_speaking() {
            self.backend.cancel();
            *state = NarrationState::Idle;
            info!("Narration stopped");
        }
        state.clone()
    }

    /// Backend reports the utterance ran to completion
    ///
    /// Ignored if a different text has started since.
    pub fn finished(&self, text: Option<&str>) -> NarrationState {
        let mut state = self.lock();
        if let NarrationState::Speaking(current) = &*state {
            if text.map_or(true, |t| t == current) {
                debug!("Narration finished");
                *state = NarrationState::Idle;
            }
        }
        state.clone()
    }

    fn start(&self, state: &mut NarrationState, text: &str) {
        let utterance = Utterance {
            text: text.to_string(),
            lang: self.voice.lang.clone(),
            rate: self.voice.rate,
            pitch: self.voice.pitch,
        };
        match self.backend.speak(&utterance).map_err(SceneError::from) {
            Ok(()) => {
                info!(chars = text.len(), lang = %utterance.lang, "Narration started");
                *state = NarrationState::Speaking(utterance.text);
            }
            Err(e) => {
                warn!(error = %e, "Narration backend failed, staying idle");
                *state = NarrationState::Idle;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Call {
        Speak(String),
        Cancel,
    }

    /// Records every backend call in order
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub calls: Mutex<Vec<Call>>,
        pub fail: bool,
    }

    impl RecordingBackend {
        pub(crate) fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl NarrationBackend for RecordingBackend {
        fn speak(&self, utterance: &Utterance) -> Result<(), NarrationError> {
            if self.fail {
                return Err(NarrationError("no voices installed".to_string()));
            }
            self.calls.lock().unwrap().push(Call::Speak(utterance.text.clone()));
            Ok(())
        }

        fn cancel(&self) {
            self.calls.lock().unwrap().push(Call::Cancel);
        }
    }

    fn controller() -> (Arc<RecordingBackend>, NarrationController) {
        let backend = Arc::new(RecordingBackend::default());
        let controller = NarrationController::new(backend.clone(), VoiceSettings::default());
        (backend, controller)
    }

    #[test]
    fn test_double_toggle_stops() {
        let (backend, narration) = controller();
        assert_eq!(narration.toggle("hello"), NarrationState::Speaking("hello".to_string()));
        assert_eq!(narration.toggle("hello"), NarrationState::Idle);
        assert_eq!(
            backend.calls(),
            vec![Call::Speak("hello".to_string()), Call::Cancel]
        );
    }

    #[test]
    fn test_toggle_ignores_text_when_speaking() {
        let (backend, narration) = controller();
        narration.toggle("first");
        assert_eq!(narration.toggle("second"), NarrationState::Idle);
        assert_eq!(backend.calls().len(), 2);
    }

    #[test]
    fn test_speak_cancels_previous_first() {
        let (backend, narration) = controller();
        narration.speak("first");
        assert_eq!(narration.speak("second"), NarrationState::Speaking("second".to_string()));
        assert_eq!(
            backend.calls(),
            vec![
                Call::Speak("first".to_string()),
                Call::Cancel,
                Call::Speak("second".to_string()),
            ]
        );
    }

    #[test]
    fn test_backend_failure_is_silent() {
        let backend = Arc::new(RecordingBackend {
            fail: true,
            ..Default::default()
        });
        let narration = NarrationController::new(backend, VoiceSettings::default());
        assert_eq!(narration.toggle("hello"), NarrationState::Idle);
        assert_eq!(narration.speak("hello"), NarrationState::Idle);
    }

    #[test]
    fn test_finished_only_matches_current_text() {
        let (_, narration) = controller();
        narration.speak("second");
        assert!(narration.finished(Some("first")).is_speaking());
        assert_eq!(narration.finished(Some("second")), NarrationState::Idle);
    }

    #[test]
    fn test_stop_when_idle_does_not_cancel() {
        let (backend, narration) = controller();
        assert_eq!(narration.stop(), NarrationState::Idle);
        assert!(backend.calls().is_empty());
    }
}
