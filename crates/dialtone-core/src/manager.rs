use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::audio::AudioSession;
use crate::errors::CallError;
use crate::events::{CallEventListener, EventEmitter, ListenerId};
use crate::permissions::{Capability, PermissionGate, PermissionPrompt};
use crate::registrar::{NativeCallRegistrar, RegistrarEvent};
use crate::session::{
    CallSession, CallSnapshot, Collaborators, SessionCommand, SessionId, SessionInput,
};
use crate::settings::CallSettings;
use crate::telephony::{StartCallRequest, TelephonyEvent, TelephonyProvider};

/// Runtime configuration for [`CallManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallConfig {
    pub required_capabilities: Vec<Capability>,
    pub connect_timeout: Option<Duration>,
    pub replay_events: bool,
    pub speaker_on_connect: bool,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self::from(&CallSettings::default())
    }
}

impl From<&CallSettings> for CallConfig {
    fn from(settings: &CallSettings) -> Self {
        let mut required_capabilities = vec![Capability::Microphone];
        if settings.request_bluetooth {
            required_capabilities.push(Capability::BluetoothConnect);
        }
        Self {
            required_capabilities,
            connect_timeout: settings
                .connect_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            replay_events: settings.replay_events,
            speaker_on_connect: settings.speaker_on_connect,
        }
    }
}

/// The occupant of the session slot.
///
/// `inbox` is `None` once shutdown has closed the funnel; the slot stays
/// occupied until the session task has finished tearing down.
struct ActiveCall {
    id: SessionId,
    inbox: Option<mpsc::UnboundedSender<SessionInput>>,
}

type SessionSlot = Arc<Mutex<Option<ActiveCall>>>;

/// Coordinates at most one outgoing call.
///
/// Owns the session slot and the serialized funnel feeding the active
/// session. SDK callbacks, registrar callbacks and UI commands may arrive
/// from any thread; they are queued and applied one at a time by the
/// session's task.
pub struct CallManager {
    config: Mutex<CallConfig>,
    telephony: Arc<dyn TelephonyProvider>,
    audio: Arc<dyn AudioSession>,
    registrar: Mutex<Option<Arc<dyn NativeCallRegistrar>>>,
    permissions: PermissionGate,
    emitter: EventEmitter,
    slot: SessionSlot,
    worker: Mutex<Option<JoinHandle<()>>>,
    status: Arc<watch::Sender<CallSnapshot>>,
}

impl CallManager {
    pub fn new(
        config: CallConfig,
        telephony: Arc<dyn TelephonyProvider>,
        audio: Arc<dyn AudioSession>,
        permissions: Arc<dyn PermissionPrompt>,
    ) -> Self {
        let emitter = if config.replay_events {
            EventEmitter::with_replay()
        } else {
            EventEmitter::new()
        };
        let (status, _) = watch::channel(CallSnapshot::idle());
        Self {
            config: Mutex::new(config),
            telephony,
            audio,
            registrar: Mutex::new(None),
            permissions: PermissionGate::new(permissions),
            emitter,
            slot: Arc::new(Mutex::new(None)),
            worker: Mutex::new(None),
            status: Arc::new(status),
        }
    }

    /// Replace the runtime configuration. Takes effect for the next call.
    pub fn set_config(&self, config: CallConfig) {
        self.emitter.set_replay(config.replay_events);
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config;
    }

    pub fn config(&self) -> CallConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Attach the platform call-registration subsystem. Takes effect for the next call.
    pub fn set_registrar(&self, registrar: Option<Arc<dyn NativeCallRegistrar>>) {
        *self.registrar.lock().unwrap_or_else(|e| e.into_inner()) = registrar;
    }

    pub fn add_listener(&self, listener: Arc<dyn CallEventListener>) -> ListenerId {
        self.emitter.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.emitter.remove_listener(id)
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.status.borrow().clone()
    }

    /// Watch the call screen status (state, mute, speaker, start time).
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.status.subscribe()
    }

    pub fn has_active_call(&self) -> bool {
        self.lock_slot().is_some()
    }

    /// Deliver the permission dialog result to a pending `start_call`.
    pub fn permission_result(&self, granted: bool) -> bool {
        self.permissions.resolve(granted)
    }

    /// Start an outgoing call.
    ///
    /// Resolves once the SDK connect has been issued. Later outcomes are
    /// reported only through listeners.
    pub async fn start_call(&self, request: StartCallRequest) -> Result<SessionId, CallError> {
        request.validate()?;
        if self.has_active_call() {
            return Err(CallError::CallInProgress);
        }

        let config = self.config();
        self.permissions
            .ensure(&config.required_capabilities)
            .await?;

        let registrar = self.registrar.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let mut session = CallSession::new(
            request.destination.clone(),
            Collaborators {
                telephony: self.telephony.clone(),
                registrar,
                audio: self.audio.clone(),
            },
            self.status.clone(),
        )
        .with_speaker(config.speaker_on_connect);
        let id = session.id().clone();

        // Reserve the slot before connecting so callbacks fired from
        // inside `connect` are queued for this session.
        let (inbox, events) = mpsc::unbounded_channel();
        {
            let mut slot = self.lock_slot();
            if slot.is_some() {
                return Err(CallError::CallInProgress);
            }
            *slot = Some(ActiveCall {
                id: id.clone(),
                inbox: Some(inbox),
            });
        }

        if let Err(e) = session.start(&request.connect_request()) {
            tracing::warn!("start_call failed: {e}");
            Self::release(&self.slot, &id);
            return Err(e);
        }

        let slot = self.slot.clone();
        let emitter = self.emitter.clone();
        let timeout = config.connect_timeout;
        let worker = tokio::spawn(async move {
            Self::event_loop(session, events, slot, emitter, timeout).await;
        });
        *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(worker);

        Ok(id)
    }

    /// Request the active call to end. Teardown is observed through the terminal event.
    pub async fn end_call(&self) -> Result<(), CallError> {
        self.command(SessionCommand::End).await.map(|_| ())
    }

    /// Returns the requested mute state; buffered until connected.
    pub async fn set_mute(&self, muted: bool) -> Result<bool, CallError> {
        self.command(SessionCommand::SetMute(muted)).await
    }

    /// Returns the effective speaker state (the platform may refuse routing).
    pub async fn set_speaker(&self, enabled: bool) -> Result<bool, CallError> {
        self.command(SessionCommand::SetSpeaker(enabled)).await
    }

    /// Queue a voice SDK callback. Safe to call from any thread.
    pub fn telephony_event(&self, event: TelephonyEvent) {
        if !self.dispatch(SessionInput::Telephony(event)) {
            tracing::debug!("telephony callback with no active call dropped");
        }
    }

    /// Queue a call-registration callback. Safe to call from any thread.
    pub fn registrar_event(&self, event: RegistrarEvent) {
        if !self.dispatch(SessionInput::Registrar(event)) {
            tracing::debug!("registrar callback {event:?} with no active call dropped");
        }
    }

    /// Close the funnel. A live session is torn down and reports `callDisconnected`.
    ///
    /// The slot is released by the session task once teardown is done, so
    /// `start_call` keeps failing with `CallInProgress` until then.
    pub fn shutdown(&self) {
        let mut slot = self.lock_slot();
        if let Some(active) = slot.as_mut() {
            if active.inbox.take().is_some() {
                tracing::info!("shutting down with active call {}", active.id);
            }
        }
    }

    /// Shut down and wait until the active session has finished tearing down.
    pub async fn close(&self) {
        self.shutdown();
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("session task failed: {e}");
            }
        }
    }

    async fn command(&self, command: SessionCommand) -> Result<bool, CallError> {
        let (reply, response) = oneshot::channel();
        if !self.dispatch(SessionInput::Command(command, reply)) {
            return Err(CallError::NoActiveCall);
        }
        response.await.map_err(|_| CallError::NoActiveCall)?
    }

    fn dispatch(&self, input: SessionInput) -> bool {
        let slot = self.lock_slot();
        match slot.as_ref().and_then(|active| active.inbox.as_ref()) {
            Some(inbox) => inbox.send(input).is_ok(),
            None => false,
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<ActiveCall>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(slot: &SessionSlot, id: &SessionId) {
        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|active| &active.id == id) {
            *slot = None;
            tracing::debug!("session slot released by {id}");
        }
    }

    async fn event_loop(
        mut session: CallSession,
        mut events: mpsc::UnboundedReceiver<SessionInput>,
        slot: SessionSlot,
        emitter: EventEmitter,
        connect_timeout: Option<Duration>,
    ) {
        let deadline = async {
            match connect_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);
        let mut deadline_armed = connect_timeout.is_some();

        loop {
            let input = tokio::select! {
                input = events.recv() => match input {
                    Some(input) => input,
                    None => break,
                },
                _ = &mut deadline, if deadline_armed => {
                    deadline_armed = false;
                    SessionInput::ConnectTimeout
                }
            };

            let event = session.apply(input);
            let terminal = session.state().is_terminal();
            if terminal {
                Self::release(&slot, session.id());
            }
            if let Some(event) = event {
                emitter.emit(session.id(), event);
            }
            if terminal {
                tracing::info!("session {} finished in {}", session.id(), session.state());
                return;
            }
        }

        // Funnel closed by shutdown while the call was still live.
        let event = session.abandon();
        Self::release(&slot, session.id());
        if let Some(event) = event {
            emitter.emit(session.id(), event);
        }
        tracing::info!("session {} event loop ended", session.id());
    }
}

impl Drop for CallManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
