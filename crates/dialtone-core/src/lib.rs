//! Dialtone core call-session logic.
//!
//! Pure Rust crate with no platform dependencies. The voice SDK, audio
//! session, permission dialog and call registrar are reached through
//! traits implemented by the native shells via UniFFI bindings.

pub mod audio;
pub mod errors;
pub mod events;
pub mod manager;
pub mod permissions;
pub mod registrar;
pub mod session;
pub mod settings;
pub mod telephony;

#[cfg(test)]
pub(crate) mod testing;

pub use audio::{AudioConfiguration, AudioMode, AudioRouter, AudioSession};
pub use errors::CallError;
pub use events::{CallEvent, CallEventListener, CallFailure, EventEmitter, ListenerId};
pub use manager::{CallConfig, CallManager};
pub use permissions::{Capability, PermissionGate, PermissionPrompt};
pub use registrar::{EndReason, NativeCallRegistrar, RegistrarEvent, RegistrarToken};
pub use session::{CallSession, CallSnapshot, CallState, SessionCommand, SessionId};
pub use settings::{CallSettings, SettingsStore};
pub use telephony::{
    ConnectRequest, StartCallRequest, TelephonyEvent, TelephonyEventKind, TelephonyHandle,
    TelephonyProvider,
};
