//! Scene runtime
//!
//! One task owns the [`Scene`] and processes everything in order: user
//! commands from [`SceneHandle`]s, completions of the asynchronous work it
//! spawned (library listing, metadata, XR probe and session requests,
//! selections) and session-end notifications from the device. Nothing else
//! touches scene state, so no two actions ever interleave.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::ar::{RenderSurface, SessionId, SessionRequest, XrDevice};
use crate::asset::{AssetReference, AssetResolver};
use crate::error::{SceneError, SceneResult};
use crate::lighting::{LightMode, LightingConfiguration};
use crate::metadata::{MetadataIndex, MetadataStore, FALLBACK_HISTORY};
use crate::narration::{NarrationController, NarrationState};
use crate::scene::{Scene, SelectionTicket, ViewState};

const COMMAND_CAPACITY: usize = 64;
const EVENT_CAPACITY: usize = 100;

/// Collaborators a scene is built from
pub struct SceneServices {
    pub resolver: AssetResolver,
    pub metadata: MetadataStore,
    /// Shared with every other caller that can narrate
    pub narration: Arc<NarrationController>,
    pub xr: Arc<dyn XrDevice>,
    pub surface: Arc<dyn RenderSurface>,
    pub session_request: SessionRequest,
    pub lighting: LightingConfiguration,
}

/// How a selection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    Applied,
    /// A newer upload or selection took over before this one finished
    Superseded,
}

/// Lighting change requested by the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum LightingChange {
    Ambient { intensity: f32 },
    Directional { position: [f32; 3], intensity: f32 },
    Spot { position: [f32; 3], intensity: f32, angle: f32 },
    Mode(LightMode),
}

enum Command {
    Upload {
        file_name: String,
        bytes: Vec<u8>,
        reply: oneshot::Sender<SceneResult<AssetReference>>,
    },
    Select {
        display_name: String,
        reply: oneshot::Sender<SceneResult<SelectionOutcome>>,
    },
    ViewInAr {
        reply: oneshot::Sender<SceneResult<SessionId>>,
    },
    ReadAloud {
        reply: oneshot::Sender<NarrationState>,
    },
    NarrationFinished {
        text: Option<String>,
    },
    Lighting {
        change: LightingChange,
        reply: oneshot::Sender<LightingConfiguration>,
    },
    RefreshLibrary,
    RefreshMetadata,
    ProbeXr,
    ArSessionEnded(SessionId),
    Snapshot {
        reply: oneshot::Sender<ViewState>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Completion {
    Library {
        epoch: u64,
        result: SceneResult<Vec<AssetReference>>,
    },
    Metadata {
        epoch: u64,
        result: SceneResult<MetadataIndex>,
    },
    Probe(bool),
    Session {
        attempt: u64,
        result: Result<SessionId, String>,
    },
    Selection {
        ticket: SelectionTicket,
        history: String,
        reply: oneshot::Sender<SceneResult<SelectionOutcome>>,
    },
}

/// Cloneable entry point into a running scene
#[derive(Clone)]
pub struct SceneHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ViewState>,
}

impl SceneHandle {
    async fn send(&self, command: Command) -> SceneResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SceneError::SceneClosed)
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> SceneResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply)).await?;
        rx.await.map_err(|_| SceneError::SceneClosed)
    }

    /// Subscribe to view state snapshots, one per processed change
    pub fn subscribe(&self) -> broadcast::Receiver<ViewState> {
        self.events.subscribe()
    }

    pub async fn upload(&self, file_name: impl Into<String>, bytes: Vec<u8>) -> SceneResult<AssetReference> {
        let file_name = file_name.into();
        self.request(|reply| Command::Upload {
            file_name,
            bytes,
            reply,
        })
        .await?
    }

    /// Select a remote model; resolves once it is applied or superseded
    pub async fn select(&self, display_name: impl Into<String>) -> SceneResult<SelectionOutcome> {
        let display_name = display_name.into();
        self.request(|reply| Command::Select {
            display_name,
            reply,
        })
        .await?
    }

    /// Request an AR session; resolves with the grant or the failure
    pub async fn view_in_ar(&self) -> SceneResult<SessionId> {
        self.request(|reply| Command::ViewInAr { reply }).await?
    }

    pub async fn read_aloud(&self) -> SceneResult<NarrationState> {
        self.request(|reply| Command::ReadAloud { reply }).await
    }

    pub async fn narration_finished(&self, text: Option<String>) -> SceneResult<()> {
        self.send(Command::NarrationFinished { text }).await
    }

    pub async fn adjust_lighting(&self, change: LightingChange) -> SceneResult<LightingConfiguration> {
        self.request(|reply| Command::Lighting { change, reply }).await
    }

    pub async fn refresh_library(&self) -> SceneResult<()> {
        self.send(Command::RefreshLibrary).await
    }

    pub async fn refresh_metadata(&self) -> SceneResult<()> {
        self.send(Command::RefreshMetadata).await
    }

    pub async fn probe_xr(&self) -> SceneResult<()> {
        self.send(Command::ProbeXr).await
    }

    /// The device ended `session`; safe to call at any time
    pub async fn ar_session_ended(&self, session: SessionId) -> SceneResult<()> {
        self.send(Command::ArSessionEnded(session)).await
    }

    pub async fn snapshot(&self) -> SceneResult<ViewState> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Tear the scene down and stop its task
    pub async fn shutdown(&self) -> SceneResult<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// Start a scene task; it loads the library, metadata and XR capability
/// right away
pub fn spawn_scene(services: SceneServices) -> (SceneHandle, JoinHandle<()>) {
    let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (completions, completion_rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(EVENT_CAPACITY);

    let scene = Scene::new(
        services.resolver.clone(),
        services.narration.clone(),
        services.surface.clone(),
        services.lighting.clone(),
    );

    let mut runtime = SceneRuntime {
        scene,
        resolver: services.resolver,
        metadata: services.metadata,
        xr: services.xr,
        session_request: services.session_request,
        completions,
        events: events.clone(),
        ar_reply: None,
        library_epoch: 0,
        metadata_epoch: 0,
    };

    let task = tokio::spawn(async move {
        runtime.start();
        runtime.run(command_rx, completion_rx).await;
    });

    (SceneHandle { commands, events }, task)
}

struct SceneRuntime {
    scene: Scene,
    resolver: AssetResolver,
    metadata: MetadataStore,
    xr: Arc<dyn XrDevice>,
    session_request: SessionRequest,
    completions: mpsc::UnboundedSender<Completion>,
    events: broadcast::Sender<ViewState>,
    ar_reply: Option<oneshot::Sender<SceneResult<SessionId>>>,
    library_epoch: u64,
    metadata_epoch: u64,
}

impl SceneRuntime {
    fn start(&mut self) {
        self.load_library();
        self.load_metadata();
        self.probe_xr();
    }

    async fn run(
        &mut self,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!("Scene runtime started");
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Shutdown { reply }) => {
                            self.scene.teardown();
                            self.publish();
                            let _ = reply.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!("All scene handles dropped");
                            self.scene.teardown();
                            break;
                        }
                    }
                }
                Some(completion) = completions.recv() => self.handle_completion(completion),
            }
            self.publish();
        }
        info!("Scene runtime stopped");
    }

    fn publish(&self) {
        // No subscribers is fine
        let _ = self.events.send(self.scene.view_state());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Upload {
                file_name,
                bytes,
                reply,
            } => {
                let _ = reply.send(self.scene.upload(&file_name, bytes));
            }
            Command::Select {
                display_name,
                reply,
            } => match self.scene.begin_select(&display_name) {
                Ok(ticket) => self.spawn_selection(ticket, reply),
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::ViewInAr { reply } => match self.scene.begin_view_in_ar() {
                Ok(attempt) => {
                    self.ar_reply = Some(reply);
                    self.spawn_session_request(attempt);
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                }
            },
            Command::ReadAloud { reply } => {
                let _ = reply.send(self.scene.read_aloud());
            }
            Command::NarrationFinished { text } => {
                self.scene.narration().finished(text.as_deref());
            }
            Command::Lighting { change, reply } => {
                let lighting = self.scene.lighting_mut();
                match change {
                    LightingChange::Ambient { intensity } => lighting.set_ambient(intensity),
                    LightingChange::Directional {
                        position,
                        intensity,
                    } => lighting.set_directional(position, intensity),
                    LightingChange::Spot {
                        position,
                        intensity,
                        angle,
                    } => lighting.set_spot(position, intensity, angle),
                    LightingChange::Mode(mode) => lighting.set_mode(mode),
                }
                let _ = reply.send(lighting.clone());
            }
            Command::RefreshLibrary => self.load_library(),
            Command::RefreshMetadata => self.load_metadata(),
            Command::ProbeXr => self.probe_xr(),
            Command::ArSessionEnded(session) => {
                self.scene.ar_ended(session);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.scene.view_state());
            }
            // Handled by the run loop
            Command::Shutdown { .. } => {}
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Library { epoch, result } => {
                if epoch == self.library_epoch {
                    self.scene.set_library(result);
                } else {
                    debug!(epoch, "Discarding stale library listing");
                }
            }
            Completion::Metadata { epoch, result } => {
                if epoch == self.metadata_epoch {
                    self.scene.set_metadata(result);
                } else {
                    debug!(epoch, "Discarding stale metadata load");
                }
            }
            Completion::Probe(supported) => self.scene.ar_mut().finish_probe(supported),
            Completion::Session { attempt, result } => {
                let outcome = self.scene.finish_view_in_ar(attempt, result);
                if let Some(reply) = self.ar_reply.take() {
                    let _ = reply.send(outcome);
                }
            }
            Completion::Selection {
                ticket,
                history,
                reply,
            } => {
                let outcome = if self.scene.complete_select(ticket, history) {
                    SelectionOutcome::Applied
                } else {
                    SelectionOutcome::Superseded
                };
                let _ = reply.send(Ok(outcome));
            }
        }
    }

    fn load_library(&mut self) {
        self.library_epoch += 1;
        let epoch = self.library_epoch;
        let resolver = self.resolver.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = resolver.list_remote().await;
            let _ = completions.send(Completion::Library { epoch, result });
        });
    }

    fn load_metadata(&mut self) {
        self.metadata_epoch += 1;
        let epoch = self.metadata_epoch;
        self.scene.begin_metadata_refresh();
        let store = self.metadata.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = store.load().await;
            let _ = completions.send(Completion::Metadata { epoch, result });
        });
    }

    fn probe_xr(&mut self) {
        self.scene.ar_mut().begin_probe();
        let xr = self.xr.clone();
        let mode = self.session_request.mode.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let supported = xr.is_session_supported(&mode).await;
            let _ = completions.send(Completion::Probe(supported));
        });
    }

    fn spawn_session_request(&self, attempt: u64) {
        let xr = self.xr.clone();
        let request = self.session_request.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let result = xr.request_session(&request).await;
            let _ = completions.send(Completion::Session { attempt, result });
        });
    }

    /// Resolve the selection's history once metadata is no longer pending
    fn spawn_selection(
        &self,
        ticket: SelectionTicket,
        reply: oneshot::Sender<SceneResult<SelectionOutcome>>,
    ) {
        let mut metadata = self.scene.metadata_watch();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let history = {
                let status = metadata.wait_for(|status| !status.is_pending()).await;
                match status {
                    Ok(status) => status.history_for(&ticket.asset.display_name),
                    Err(_) => FALLBACK_HISTORY.to_string(),
                }
            };
            let _ = completions.send(Completion::Selection {
                ticket,
                history,
                reply,
            });
        });
    }
}
