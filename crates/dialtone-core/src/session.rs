use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch};
use uuid::Uuid;

use crate::audio::{AudioRouter, AudioSession};
use crate::errors::CallError;
use crate::events::CallEvent;
use crate::registrar::{EndReason, NativeCallRegistrar, RegistrarEvent, RegistrarToken};
use crate::telephony::{
    ConnectRequest, TelephonyEvent, TelephonyEventKind, TelephonyHandle, TelephonyProvider,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

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

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Connecting,
    Ringing,
    Connected,
    Reconnecting,
    Disconnected,
    Failed,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Disconnected | CallState::Failed)
    }

    /// States in which the session owns a live telephony handle.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            CallState::Connecting | CallState::Ringing | CallState::Connected | CallState::Reconnecting
        )
    }

    pub fn can_transition_to(self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Ringing)
                | (Connecting | Ringing, Connected)
                | (Connecting | Ringing, Failed)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Connecting | Ringing | Connected | Reconnecting, Disconnected)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            CallState::Idle => "Idle",
            CallState::Connecting => "Connecting",
            CallState::Ringing => "Ringing",
            CallState::Connected => "Connected",
            CallState::Reconnecting => "Reconnecting",
            CallState::Disconnected => "Disconnected",
            CallState::Failed => "Failed",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Point-in-time view of the call for the call screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub session_id: Option<SessionId>,
    pub state: CallState,
    pub is_muted: bool,
    pub is_speaker_on: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl CallSnapshot {
    pub fn idle() -> Self {
        Self {
            session_id: None,
            state: CallState::Idle,
            is_muted: false,
            is_speaker_on: false,
            started_at: None,
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.duration_at(Utc::now())
    }

    pub fn duration_at(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at.map(|started| now - started)
    }
}

impl Default for CallSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    End,
    SetMute(bool),
    SetSpeaker(bool),
}

pub type CommandReply = oneshot::Sender<Result<bool, CallError>>;

/// Everything that may mutate a session, funneled through one queue.
#[derive(Debug)]
pub enum SessionInput {
    Telephony(TelephonyEvent),
    Registrar(RegistrarEvent),
    Command(SessionCommand, CommandReply),
    ConnectTimeout,
}

/// Collaborators a session drives.
#[derive(Clone)]
pub struct Collaborators {
    pub telephony: Arc<dyn TelephonyProvider>,
    pub registrar: Option<Arc<dyn NativeCallRegistrar>>,
    pub audio: Arc<dyn AudioSession>,
}

/// State machine for one outgoing call.
///
/// Owned by a single task; every input goes through [`CallSession::apply`].
/// Events are returned rather than emitted so the owner can release the
/// session slot before the host hears about a terminal transition.
pub struct CallSession {
    id: SessionId,
    destination: String,
    state: CallState,
    is_muted: bool,
    is_speaker_on: bool,
    pending_mute: Option<bool>,
    pending_speaker: Option<bool>,
    started_at: Option<DateTime<Utc>>,
    telephony_handle: Option<TelephonyHandle>,
    registrar_token: Option<RegistrarToken>,
    disconnect_requested: bool,
    telephony: Arc<dyn TelephonyProvider>,
    registrar: Option<Arc<dyn NativeCallRegistrar>>,
    audio: AudioRouter,
    status: Arc<watch::Sender<CallSnapshot>>,
}

impl CallSession {
    pub fn new(
        destination: impl Into<String>,
        collaborators: Collaborators,
        status: Arc<watch::Sender<CallSnapshot>>,
    ) -> Self {
        Self {
            id: SessionId::new(),
            destination: destination.into(),
            state: CallState::Idle,
            is_muted: false,
            is_speaker_on: false,
            pending_mute: None,
            pending_speaker: None,
            started_at: None,
            telephony_handle: None,
            registrar_token: None,
            disconnect_requested: false,
            telephony: collaborators.telephony,
            registrar: collaborators.registrar,
            audio: AudioRouter::new(collaborators.audio),
            status,
        }
    }

    /// Initial route used on connect when no speaker command was buffered.
    pub fn with_speaker(mut self, enabled: bool) -> Self {
        self.is_speaker_on = enabled;
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn is_speaker_on(&self) -> bool {
        self.is_speaker_on
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn telephony_handle(&self) -> Option<&TelephonyHandle> {
        self.telephony_handle.as_ref()
    }

    pub fn registrar_token(&self) -> Option<&RegistrarToken> {
        self.registrar_token.as_ref()
    }

    pub fn snapshot(&self) -> CallSnapshot {
        CallSnapshot {
            session_id: Some(self.id.clone()),
            state: self.state,
            is_muted: self.is_muted,
            is_speaker_on: self.is_speaker_on,
            started_at: self.started_at,
        }
    }

    /// Issue the SDK connect and report the outgoing call.
    ///
    /// A synchronous connect error leaves the session in `Idle`.
    pub fn start(&mut self, request: &ConnectRequest) -> Result<(), CallError> {
        if self.state != CallState::Idle {
            return Err(CallError::CallInProgress);
        }

        let handle = self.telephony.connect(request)?;
        tracing::info!("call {} connecting to {} (handle {handle})", self.id, self.destination);
        self.telephony_handle = Some(handle);
        self.transition(CallState::Connecting);

        if let Some(registrar) = &self.registrar {
            match registrar.report_outgoing(&self.id, &self.destination) {
                Ok(token) => self.registrar_token = Some(token),
                Err(e) => tracing::warn!("call registrar rejected outgoing call: {e}"),
            }
        }

        self.publish();
        Ok(())
    }

    pub fn apply(&mut self, input: SessionInput) -> Option<CallEvent> {
        let event = match input {
            SessionInput::Telephony(event) => self.on_telephony(event),
            SessionInput::Registrar(event) => {
                self.on_registrar(event);
                None
            }
            SessionInput::Command(command, reply) => {
                let result = self.command(command);
                let _ = reply.send(result);
                None
            }
            SessionInput::ConnectTimeout => {
                if matches!(self.state, CallState::Connecting | CallState::Ringing) {
                    tracing::warn!("call {} still {} at connect deadline", self.id, self.state);
                    self.request_disconnect();
                }
                None
            }
        };
        self.publish();
        event
    }

    /// Tear down a live session whose funnel is closing.
    pub fn abandon(&mut self) -> Option<CallEvent> {
        if !self.state.is_live() {
            return None;
        }
        tracing::info!("abandoning call {} in state {}", self.id, self.state);
        self.request_disconnect();
        let event = self.finish(CallState::Disconnected, EndReason::LocalEnded, CallEvent::Disconnected);
        self.publish();
        Some(event)
    }

    pub fn command(&mut self, command: SessionCommand) -> Result<bool, CallError> {
        if self.state.is_terminal() {
            return Err(CallError::NoActiveCall);
        }

        match command {
            SessionCommand::End => {
                self.request_disconnect();
                Ok(true)
            }
            SessionCommand::SetMute(muted) => {
                self.is_muted = muted;
                match (&self.state, &self.telephony_handle) {
                    (CallState::Connected, Some(handle)) => {
                        self.telephony.set_muted(handle, muted);
                        self.pending_mute = None;
                        tracing::info!("microphone muted: {muted}");
                    }
                    _ => {
                        self.pending_mute = Some(muted);
                        tracing::info!("mute {muted} buffered while {}", self.state);
                    }
                }
                Ok(muted)
            }
            SessionCommand::SetSpeaker(enabled) => {
                if self.state == CallState::Connected {
                    self.pending_speaker = None;
                    self.is_speaker_on = self.audio.set_speaker(enabled);
                } else {
                    self.pending_speaker = Some(enabled);
                    self.is_speaker_on = enabled;
                    tracing::info!("speaker {enabled} buffered while {}", self.state);
                }
                Ok(self.is_speaker_on)
            }
        }
    }

    fn on_telephony(&mut self, event: TelephonyEvent) -> Option<CallEvent> {
        if self.telephony_handle.as_ref() != Some(&event.handle) {
            tracing::warn!(
                "ignoring {:?} for stale handle {} (session {})",
                event.kind,
                event.handle,
                self.id
            );
            return None;
        }

        match (self.state, event.kind) {
            (CallState::Connecting, TelephonyEventKind::Ringing) => {
                self.transition(CallState::Ringing);
                None
            }
            (CallState::Connecting | CallState::Ringing, TelephonyEventKind::Connected) => {
                Some(self.enter_connected())
            }
            (CallState::Connecting | CallState::Ringing, TelephonyEventKind::ConnectFailure(failure)) => {
                tracing::warn!("call {} failed to connect: {failure}", self.id);
                Some(self.finish(CallState::Failed, EndReason::Failed, CallEvent::Failed(failure)))
            }
            (CallState::Connected, TelephonyEventKind::Reconnecting { reason }) => {
                tracing::info!("call {} reconnecting: {reason}", self.id);
                self.transition(CallState::Reconnecting);
                None
            }
            (CallState::Reconnecting, TelephonyEventKind::Reconnected) => {
                self.transition(CallState::Connected);
                self.replay_buffered();
                None
            }
            (state, TelephonyEventKind::Disconnected(error)) if state.is_live() => {
                let reason = match (&error, self.disconnect_requested) {
                    (Some(_), _) => EndReason::Failed,
                    (None, true) => EndReason::LocalEnded,
                    (None, false) => EndReason::RemoteEnded,
                };
                let event = match error {
                    Some(failure) => {
                        tracing::warn!("call {} disconnected with error: {failure}", self.id);
                        CallEvent::Failed(failure)
                    }
                    None => CallEvent::Disconnected,
                };
                Some(self.finish(CallState::Disconnected, reason, event))
            }
            (state, kind) => {
                tracing::debug!("ignoring {kind:?} in state {state}");
                None
            }
        }
    }

    fn on_registrar(&mut self, event: RegistrarEvent) {
        let Some(handle) = self.telephony_handle.clone() else {
            tracing::debug!("ignoring registrar {event:?} in state {}", self.state);
            return;
        };

        match event {
            RegistrarEvent::PerformStart => {
                tracing::debug!("registrar performed start for call {}", self.id);
            }
            RegistrarEvent::PerformEnd => {
                tracing::info!("call {} ended from system call UI", self.id);
                self.request_disconnect();
            }
            RegistrarEvent::AudioSessionActivated => self.telephony.set_audio_enabled(&handle, true),
            RegistrarEvent::AudioSessionDeactivated => {
                self.telephony.set_audio_enabled(&handle, false)
            }
            RegistrarEvent::SetMuted(muted) => {
                let _ = self.command(SessionCommand::SetMute(muted));
            }
        }
    }

    fn enter_connected(&mut self) -> CallEvent {
        self.transition(CallState::Connected);
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }

        let speaker = self.pending_speaker.take().unwrap_or(self.is_speaker_on);
        if let Err(e) = self.audio.activate(speaker) {
            tracing::warn!("audio session activation failed: {e}");
        }
        self.is_speaker_on = self.audio.speaker_on();

        if let (Some(muted), Some(handle)) = (self.pending_mute.take(), &self.telephony_handle) {
            self.telephony.set_muted(handle, muted);
            tracing::info!("buffered mute {muted} applied");
        }

        if let (Some(registrar), Some(token)) = (&self.registrar, &self.registrar_token) {
            if let Err(e) = registrar.report_connected(token) {
                tracing::warn!("call registrar rejected connected report: {e}");
            }
        }

        tracing::info!("call {} connected", self.id);
        CallEvent::Connected
    }

    fn replay_buffered(&mut self) {
        if let (Some(muted), Some(handle)) = (self.pending_mute.take(), &self.telephony_handle) {
            self.telephony.set_muted(handle, muted);
        }
        if let Some(enabled) = self.pending_speaker.take() {
            self.is_speaker_on = self.audio.set_speaker(enabled);
        }
    }

    fn request_disconnect(&mut self) {
        if self.disconnect_requested {
            tracing::debug!("disconnect already requested for call {}", self.id);
            return;
        }
        if let Some(handle) = &self.telephony_handle {
            self.disconnect_requested = true;
            self.telephony.disconnect(handle);
            tracing::info!("disconnect requested for call {}", self.id);
        }
    }

    fn finish(&mut self, next: CallState, reason: EndReason, event: CallEvent) -> CallEvent {
        if let (Some(registrar), Some(token)) = (&self.registrar, self.registrar_token.take()) {
            if let Err(e) = registrar.report_ended(&token, reason) {
                tracing::warn!("call registrar rejected end report: {e}");
            }
        }
        self.audio.deactivate();
        self.telephony_handle = None;
        self.pending_mute = None;
        self.pending_speaker = None;
        self.transition(next);
        event
    }

    fn transition(&mut self, next: CallState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::warn!("refusing transition {} -> {next} for call {}", self.state, self.id);
            return false;
        }
        tracing::info!("call {}: {} -> {next}", self.id, self.state);
        self.state = next;
        true
    }

    /// Publish to the shared status channel unless a newer session owns it.
    fn publish(&self) {
        let snapshot = self.snapshot();
        self.status.send_if_modified(|current| {
            let superseded = current.session_id.as_ref().is_some_and(|id| id != &self.id)
                && current.state.is_live();
            if superseded {
                tracing::debug!("session {} no longer owns the call status", self.id);
                return false;
            }
            *current = snapshot;
            true
        });
    }
}
