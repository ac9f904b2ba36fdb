//! UniFFI bindings for dialtone-core.
//!
//! Provides a DialtoneClient object that wraps CallManager and the
//! settings store into a single FFI-safe interface. Host-implemented
//! callback interfaces are bridged onto the core platform traits.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use dialtone_core::{
    AudioConfiguration, CallConfig, CallFailure, CallManager, ConnectRequest,
    RegistrarToken, SessionId, SettingsStore, StartCallRequest, TelephonyHandle,
    audio::{AudioMode as CoreAudioMode, AudioSession as CoreAudioSession},
    events::{CallEvent as CoreCallEvent, CallEventListener as CoreCallEventListener, ListenerId},
    permissions::{Capability as CoreCapability, PermissionPrompt as CorePermissionPrompt},
    registrar::{
        EndReason as CoreEndReason, NativeCallRegistrar as CoreNativeCallRegistrar,
        RegistrarEvent as CoreRegistrarEvent,
    },
    session::{CallSnapshot as CoreCallSnapshot, CallState as CoreCallState},
    settings::CallSettings as CoreCallSettings,
    telephony::{
        TelephonyEvent as CoreTelephonyEvent, TelephonyEventKind as CoreTelephonyEventKind,
        TelephonyProvider as CoreTelephonyProvider,
    },
};
use tokio::runtime::RuntimeFlavor;

uniffi::include_scaffolding!("dialtone");

// ── Platform log helper ──────────────────────────────────────────────

/// Write a message to logcat on Android, syslog on iOS, or stderr elsewhere.
fn dialtone_log(msg: &str) {
    #[cfg(target_os = "android")]
    {
        use std::ffi::CString;
        unsafe extern "C" {
            fn __android_log_write(prio: i32, tag: *const std::ffi::c_char, text: *const std::ffi::c_char) -> i32;
        }
        let tag = c"DIALTONE_FFI";
        let Ok(text) = CString::new(msg) else { return };
        unsafe { __android_log_write(4 /* INFO */, tag.as_ptr(), text.as_ptr()); }
    }
    #[cfg(target_os = "ios")]
    {
        use std::ffi::CString;
        unsafe extern "C" {
            fn syslog(priority: i32, message: *const std::ffi::c_char, ...);
        }
        let Ok(text) = CString::new(msg) else { return };
        unsafe { syslog(6 /* LOG_INFO */, c"%s".as_ptr(), text.as_ptr()); }
    }
    #[cfg(not(any(target_os = "android", target_os = "ios")))]
    eprintln!("{msg}");
}

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before using DialtoneClient.
fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dialtone_core=debug,dialtone_ffi=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .try_init();
    });
}

// ── FFI-safe type conversions ──────────────────────────────────────────

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

impl From<CoreCallState> for CallState {
    fn from(s: CoreCallState) -> Self {
        match s {
            CoreCallState::Idle => Self::Idle,
            CoreCallState::Connecting => Self::Connecting,
            CoreCallState::Ringing => Self::Ringing,
            CoreCallState::Connected => Self::Connected,
            CoreCallState::Reconnecting => Self::Reconnecting,
            CoreCallState::Disconnected => Self::Disconnected,
            CoreCallState::Failed => Self::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Microphone,
    BluetoothConnect,
}

impl From<CoreCapability> for Capability {
    fn from(c: CoreCapability) -> Self {
        match c {
            CoreCapability::Microphone => Self::Microphone,
            CoreCapability::BluetoothConnect => Self::BluetoothConnect,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    Normal,
    InCommunication,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioRoute {
    pub mode: AudioMode,
    pub speaker_on: bool,
}

impl From<AudioConfiguration> for AudioRoute {
    fn from(c: AudioConfiguration) -> Self {
        Self {
            mode: match c.mode {
                CoreAudioMode::Normal => AudioMode::Normal,
                CoreAudioMode::InCommunication => AudioMode::InCommunication,
            },
            speaker_on: c.speaker_on,
        }
    }
}

impl From<AudioRoute> for AudioConfiguration {
    fn from(r: AudioRoute) -> Self {
        Self {
            mode: match r.mode {
                AudioMode::Normal => CoreAudioMode::Normal,
                AudioMode::InCommunication => CoreAudioMode::InCommunication,
            },
            speaker_on: r.speaker_on,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Failed,
    RemoteEnded,
    LocalEnded,
}

impl From<CoreEndReason> for EndReason {
    fn from(r: CoreEndReason) -> Self {
        match r {
            CoreEndReason::Failed => Self::Failed,
            CoreEndReason::RemoteEnded => Self::RemoteEnded,
            CoreEndReason::LocalEnded => Self::LocalEnded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCallOptions {
    pub to: String,
    pub access_token: String,
    pub caller_id: Option<String>,
    pub custom_parameters: HashMap<String, String>,
}

impl From<StartCallOptions> for StartCallRequest {
    fn from(o: StartCallOptions) -> Self {
        Self {
            destination: o.to,
            access_token: o.access_token,
            caller_id: o.caller_id,
            custom_parameters: o.custom_parameters.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub access_token: String,
    pub params: HashMap<String, String>,
}

impl From<&ConnectRequest> for ConnectParams {
    fn from(r: &ConnectRequest) -> Self {
        Self {
            access_token: r.access_token.clone(),
            params: r.params.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSnapshot {
    pub session_id: Option<String>,
    pub state: CallState,
    pub is_muted: bool,
    pub is_speaker_on: bool,
    pub started_at_ms: Option<i64>,
    pub duration_ms: Option<i64>,
}

impl From<CoreCallSnapshot> for CallSnapshot {
    fn from(s: CoreCallSnapshot) -> Self {
        Self {
            session_id: s.session_id.as_ref().map(SessionId::to_string),
            state: s.state.into(),
            is_muted: s.is_muted,
            is_speaker_on: s.is_speaker_on,
            started_at_ms: s.started_at.map(|t| t.timestamp_millis()),
            // Only reported while the call is live.
            duration_ms: if s.state.is_live() {
                s.duration().map(|d| d.num_milliseconds())
            } else {
                None
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSettings {
    pub request_bluetooth: bool,
    pub connect_timeout_secs: Option<u64>,
    pub replay_events: bool,
    pub speaker_on_connect: bool,
}

impl From<CoreCallSettings> for CallSettings {
    fn from(s: CoreCallSettings) -> Self {
        Self {
            request_bluetooth: s.request_bluetooth,
            connect_timeout_secs: s.connect_timeout_secs,
            replay_events: s.replay_events,
            speaker_on_connect: s.speaker_on_connect,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    CallConnected,
    CallDisconnected,
    CallFailed { error: String, code: Option<i32> },
}

impl From<CoreCallEvent> for CallEvent {
    fn from(e: CoreCallEvent) -> Self {
        match e {
            CoreCallEvent::Connected => Self::CallConnected,
            CoreCallEvent::Disconnected => Self::CallDisconnected,
            CoreCallEvent::Failed(failure) => Self::CallFailed {
                error: failure.message,
                code: failure.code,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyCallback {
    Ringing,
    Connected,
    ConnectFailure { message: String, code: Option<i32> },
    Reconnecting { reason: String },
    Reconnected,
    Disconnected { message: Option<String>, code: Option<i32> },
}

impl From<TelephonyCallback> for CoreTelephonyEventKind {
    fn from(c: TelephonyCallback) -> Self {
        match c {
            TelephonyCallback::Ringing => Self::Ringing,
            TelephonyCallback::Connected => Self::Connected,
            TelephonyCallback::ConnectFailure { message, code } => {
                Self::ConnectFailure(CallFailure::new(message, code))
            }
            TelephonyCallback::Reconnecting { reason } => Self::Reconnecting { reason },
            TelephonyCallback::Reconnected => Self::Reconnected,
            TelephonyCallback::Disconnected { message: None, code: None } => Self::Disconnected(None),
            TelephonyCallback::Disconnected { message, code } => Self::Disconnected(Some(
                CallFailure::new(message.unwrap_or_else(|| "call disconnected with error".into()), code),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrarCallback {
    PerformStart,
    PerformEnd,
    AudioSessionActivated,
    AudioSessionDeactivated,
    SetMuted { muted: bool },
}

impl From<RegistrarCallback> for CoreRegistrarEvent {
    fn from(c: RegistrarCallback) -> Self {
        match c {
            RegistrarCallback::PerformStart => Self::PerformStart,
            RegistrarCallback::PerformEnd => Self::PerformEnd,
            RegistrarCallback::AudioSessionActivated => Self::AudioSessionActivated,
            RegistrarCallback::AudioSessionDeactivated => Self::AudioSessionDeactivated,
            RegistrarCallback::SetMuted { muted } => Self::SetMuted(muted),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Pending { handle: String },
    InvalidCredentials { message: String },
    Failed { message: String },
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Missing parameter: {msg}")]
    MissingParameter { msg: String },
    #[error("Permission denied: {msg}")]
    PermissionDenied { msg: String },
    #[error("Permission request in progress: {msg}")]
    PermissionRequestInProgress { msg: String },
    #[error("Call in progress: {msg}")]
    CallInProgress { msg: String },
    #[error("No active call: {msg}")]
    NoActiveCall { msg: String },
    #[error("Invalid credentials: {msg}")]
    InvalidCredentials { msg: String },
    #[error("Connect error: {msg}")]
    Connect { msg: String },
    #[error("Routing unavailable: {msg}")]
    RoutingUnavailable { msg: String },
    #[error("Audio error: {msg}")]
    Audio { msg: String },
    #[error("Registrar error: {msg}")]
    Registrar { msg: String },
    #[error("Runtime error: {msg}")]
    Runtime { msg: String },
}

impl From<dialtone_core::CallError> for CallError {
    fn from(e: dialtone_core::CallError) -> Self {
        use dialtone_core::CallError as Core;
        tracing::error!("CallError: {e}");
        let msg = e.to_string();
        match e {
            Core::MissingParameter(_) => Self::MissingParameter { msg },
            Core::PermissionDenied => Self::PermissionDenied { msg },
            Core::PermissionRequestInProgress => Self::PermissionRequestInProgress { msg },
            Core::CallInProgress => Self::CallInProgress { msg },
            Core::NoActiveCall => Self::NoActiveCall { msg },
            Core::InvalidCredentials(_) => Self::InvalidCredentials { msg },
            Core::Connect(_) => Self::Connect { msg },
            Core::RoutingUnavailable(_) => Self::RoutingUnavailable { msg },
            Core::Audio(_) => Self::Audio { msg },
            Core::Registrar(_) => Self::Registrar { msg },
        }
    }
}

// ── Callback interfaces ───────────────────────────────────────────────

pub trait CallEventListener: Send + Sync {
    fn on_event(&self, event: CallEvent);
}

/// The platform voice SDK (e.g. Twilio Voice).
pub trait HostTelephony: Send + Sync {
    fn connect(&self, params: ConnectParams) -> ConnectOutcome;
    fn disconnect(&self, handle: String);
    fn set_muted(&self, handle: String, muted: bool);
    fn set_audio_enabled(&self, handle: String, enabled: bool);
}

pub trait HostAudioSession: Send + Sync {
    fn current(&self) -> AudioRoute;
    fn apply(&self, route: AudioRoute) -> bool;
    fn route_to_speaker(&self, enabled: bool) -> bool;
}

pub trait HostPermissions: Send + Sync {
    fn is_granted(&self, capabilities: Vec<Capability>) -> bool;
    fn request(&self, capabilities: Vec<Capability>);
}

/// CallKit on iOS, ConnectionService on Android.
pub trait HostCallRegistrar: Send + Sync {
    fn report_outgoing(&self, session_id: String, destination: String) -> Option<String>;
    fn report_connected(&self, token: String) -> bool;
    fn report_ended(&self, token: String, reason: EndReason) -> bool;
}

// ── Bridges: FFI callbacks → core traits ──────────────────────────────

struct BridgeListener {
    ffi_listener: Box<dyn CallEventListener>,
}

impl CoreCallEventListener for BridgeListener {
    fn on_event(&self, event: CoreCallEvent) {
        self.ffi_listener.on_event(event.into());
    }
}

struct TelephonyBridge(Box<dyn HostTelephony>);

impl CoreTelephonyProvider for TelephonyBridge {
    fn connect(&self, request: &ConnectRequest) -> Result<TelephonyHandle, dialtone_core::CallError> {
        match self.0.connect(request.into()) {
            ConnectOutcome::Pending { handle } => Ok(TelephonyHandle::new(handle)),
            ConnectOutcome::InvalidCredentials { message } => {
                Err(dialtone_core::CallError::InvalidCredentials(message))
            }
            ConnectOutcome::Failed { message } => Err(dialtone_core::CallError::Connect(message)),
        }
    }

    fn disconnect(&self, handle: &TelephonyHandle) {
        self.0.disconnect(handle.to_string());
    }

    fn set_muted(&self, handle: &TelephonyHandle, muted: bool) {
        self.0.set_muted(handle.to_string(), muted);
    }

    fn set_audio_enabled(&self, handle: &TelephonyHandle, enabled: bool) {
        self.0.set_audio_enabled(handle.to_string(), enabled);
    }
}

struct AudioBridge(Box<dyn HostAudioSession>);

impl CoreAudioSession for AudioBridge {
    fn current(&self) -> AudioConfiguration {
        self.0.current().into()
    }

    fn apply(&self, config: &AudioConfiguration) -> Result<(), dialtone_core::CallError> {
        if self.0.apply((*config).into()) {
            Ok(())
        } else {
            Err(dialtone_core::CallError::Audio(format!("host rejected {:?}", config.mode)))
        }
    }

    fn route_to_speaker(&self, enabled: bool) -> Result<(), dialtone_core::CallError> {
        if self.0.route_to_speaker(enabled) {
            Ok(())
        } else {
            Err(dialtone_core::CallError::RoutingUnavailable(format!(
                "host refused speaker={enabled}"
            )))
        }
    }
}

struct PermissionBridge(Box<dyn HostPermissions>);

impl CorePermissionPrompt for PermissionBridge {
    fn is_granted(&self, capabilities: &[CoreCapability]) -> bool {
        self.0.is_granted(capabilities.iter().copied().map(Capability::from).collect())
    }

    fn request(&self, capabilities: &[CoreCapability]) {
        self.0.request(capabilities.iter().copied().map(Capability::from).collect());
    }
}

struct RegistrarBridge(Box<dyn HostCallRegistrar>);

impl CoreNativeCallRegistrar for RegistrarBridge {
    fn report_outgoing(
        &self,
        id: &SessionId,
        destination: &str,
    ) -> Result<RegistrarToken, dialtone_core::CallError> {
        self.0
            .report_outgoing(id.to_string(), destination.to_string())
            .map(RegistrarToken::new)
            .ok_or_else(|| dialtone_core::CallError::Registrar("outgoing call not registered".into()))
    }

    fn report_connected(&self, token: &RegistrarToken) -> Result<(), dialtone_core::CallError> {
        if self.0.report_connected(token.to_string()) {
            Ok(())
        } else {
            Err(dialtone_core::CallError::Registrar(format!("{token} rejected connected report")))
        }
    }

    fn report_ended(
        &self,
        token: &RegistrarToken,
        reason: CoreEndReason,
    ) -> Result<(), dialtone_core::CallError> {
        if self.0.report_ended(token.to_string(), reason.into()) {
            Ok(())
        } else {
            Err(dialtone_core::CallError::Registrar(format!("{token} rejected end report")))
        }
    }
}

// ── DialtoneClient: main FFI object ───────────────────────────────────

pub struct DialtoneClient {
    manager: CallManager,
    settings: SettingsStore,
    rt: tokio::runtime::Runtime,
}

impl DialtoneClient {
    pub fn new(
        data_dir: String,
        telephony: Box<dyn HostTelephony>,
        audio: Box<dyn HostAudioSession>,
        permissions: Box<dyn HostPermissions>,
    ) -> Result<Self, CallError> {
        dialtone_log("DIALTONE FFI: DialtoneClient::new() called");
        let rt = tokio::runtime::Runtime::new().map_err(|e| CallError::Runtime {
            msg: format!("failed to create tokio runtime: {e}"),
        })?;
        let settings = SettingsStore::new(&data_dir);
        let manager = CallManager::new(
            CallConfig::from(&settings.get()),
            Arc::new(TelephonyBridge(telephony)),
            Arc::new(AudioBridge(audio)),
            Arc::new(PermissionBridge(permissions)),
        );
        dialtone_log("DIALTONE FFI: DialtoneClient::new() completed");
        Ok(Self {
            manager,
            settings,
            rt,
        })
    }

    pub fn attach_registrar(&self, registrar: Box<dyn HostCallRegistrar>) {
        self.manager
            .set_registrar(Some(Arc::new(RegistrarBridge(registrar))));
    }

    pub fn detach_registrar(&self) {
        self.manager.set_registrar(None);
    }

    /// Blocks until the SDK connect has been issued, including any
    /// permission prompt. Must not be called from the UI thread.
    pub fn start_call(&self, options: StartCallOptions) -> Result<String, CallError> {
        dialtone_log("DIALTONE FFI: start_call() entered");
        let id = self
            .block_on(self.manager.start_call(options.into()))?
            .map_err(CallError::from)?;
        dialtone_log(&format!("DIALTONE FFI: start_call() issued session {id}"));
        Ok(id.to_string())
    }

    pub fn end_call(&self) -> Result<(), CallError> {
        self.block_on(self.manager.end_call())?
            .map_err(CallError::from)
    }

    pub fn set_mute(&self, muted: bool) -> Result<bool, CallError> {
        self.block_on(self.manager.set_mute(muted))?
            .map_err(CallError::from)
    }

    pub fn set_speaker(&self, enabled: bool) -> Result<bool, CallError> {
        self.block_on(self.manager.set_speaker(enabled))?
            .map_err(CallError::from)
    }

    pub fn call_state(&self) -> CallSnapshot {
        self.manager.snapshot().into()
    }

    pub fn permission_result(&self, granted: bool) -> bool {
        self.manager.permission_result(granted)
    }

    pub fn on_telephony_event(&self, handle: String, event: TelephonyCallback) {
        self.manager.telephony_event(CoreTelephonyEvent::new(
            TelephonyHandle::new(handle),
            event.into(),
        ));
    }

    pub fn on_registrar_event(&self, event: RegistrarCallback) {
        self.manager.registrar_event(event.into());
    }

    pub fn add_listener(&self, listener: Box<dyn CallEventListener>) -> u64 {
        let bridge = Arc::new(BridgeListener {
            ffi_listener: listener,
        });
        self.manager.add_listener(bridge).as_u64()
    }

    pub fn remove_listener(&self, id: u64) -> bool {
        self.manager.remove_listener(ListenerId::from_u64(id))
    }

    pub fn get_settings(&self) -> CallSettings {
        self.settings.get().into()
    }

    pub fn set_request_bluetooth(&self, enabled: bool) {
        self.settings.set_request_bluetooth(enabled);
        self.reload_config();
    }

    pub fn set_connect_timeout_secs(&self, secs: Option<u64>) {
        self.settings.set_connect_timeout_secs(secs);
        self.reload_config();
    }

    pub fn set_replay_events(&self, enabled: bool) {
        self.settings.set_replay_events(enabled);
        self.reload_config();
    }

    pub fn set_speaker_on_connect(&self, enabled: bool) {
        self.settings.set_speaker_on_connect(enabled);
        self.reload_config();
    }

    /// End any live call and wait for its teardown.
    ///
    /// When the caller's thread cannot block, teardown still runs on the
    /// client's runtime but is not awaited.
    pub fn shutdown(&self) {
        dialtone_log("DIALTONE FFI: shutdown() called");
        if let Err(e) = self.block_on(self.manager.close()) {
            tracing::warn!("shutdown not awaited: {e}");
            self.manager.shutdown();
        }
    }

    fn reload_config(&self) {
        self.manager.set_config(CallConfig::from(&self.settings.get()));
    }

    /// Listener callbacks run on runtime workers; a host calling back into
    /// the client from one must not nest `Runtime::block_on`.
    ///
    /// `block_in_place` only works on a multi-threaded runtime. Any other
    /// caller runtime is rejected with `CallError::Runtime`.
    fn block_on<F: Future>(&self, future: F) -> Result<F::Output, CallError> {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => match handle.runtime_flavor() {
                RuntimeFlavor::MultiThread => {
                    Ok(tokio::task::block_in_place(|| handle.block_on(future)))
                }
                flavor => Err(CallError::Runtime {
                    msg: format!("cannot block inside a {flavor:?} runtime"),
                }),
            },
            Err(_) => Ok(self.rt.block_on(future)),
        }
    }
}

impl Drop for DialtoneClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
