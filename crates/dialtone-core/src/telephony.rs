use std::collections::BTreeMap;
use std::fmt;

use crate::errors::CallError;
use crate::events::CallFailure;

/// Opaque handle for one pending or live SDK call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TelephonyHandle(String);

impl TelephonyHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TelephonyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated outgoing call request, as accepted by `startCall`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartCallRequest {
    pub destination: String,
    pub access_token: String,
    pub caller_id: Option<String>,
    pub custom_parameters: BTreeMap<String, String>,
}

impl StartCallRequest {
    pub fn new(destination: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    pub fn with_caller_id(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = Some(caller_id.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_parameters.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> Result<(), CallError> {
        if self.destination.trim().is_empty() {
            return Err(CallError::MissingParameter("destination"));
        }
        if self.access_token.trim().is_empty() {
            return Err(CallError::MissingParameter("access_token"));
        }
        Ok(())
    }

    /// Build the SDK connect parameters: `To`, optional `From`, then custom parameters.
    pub fn connect_request(&self) -> ConnectRequest {
        let mut params = BTreeMap::new();
        params.insert(PARAM_TO.to_string(), self.destination.clone());
        if let Some(from) = self.caller_id.as_ref().filter(|c| !c.is_empty()) {
            params.insert(PARAM_FROM.to_string(), from.clone());
        }
        for (key, value) in &self.custom_parameters {
            if key == PARAM_TO {
                tracing::warn!("custom parameter {PARAM_TO} ignored, destination takes precedence");
                continue;
            }
            params.insert(key.clone(), value.clone());
        }
        ConnectRequest {
            access_token: self.access_token.clone(),
            params,
        }
    }
}

const PARAM_TO: &str = "To";
const PARAM_FROM: &str = "From";

/// What the voice SDK receives on connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub access_token: String,
    pub params: BTreeMap<String, String>,
}

impl ConnectRequest {
    pub fn destination(&self) -> Option<&str> {
        self.params.get(PARAM_TO).map(String::as_str)
    }
}

/// Underlying voice SDK.
///
/// `connect` returns synchronously with a handle for a pending attempt;
/// every later outcome arrives as a [`TelephonyEvent`].
pub trait TelephonyProvider: Send + Sync {
    fn connect(&self, request: &ConnectRequest) -> Result<TelephonyHandle, CallError>;
    /// Fire-and-forget; completion is observed through `Disconnected`.
    fn disconnect(&self, handle: &TelephonyHandle);
    fn set_muted(&self, handle: &TelephonyHandle, muted: bool);
    /// Enable the SDK audio device once the OS hands over the audio session.
    fn set_audio_enabled(&self, _handle: &TelephonyHandle, _enabled: bool) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyEventKind {
    Ringing,
    Connected,
    ConnectFailure(CallFailure),
    Reconnecting { reason: String },
    Reconnected,
    Disconnected(Option<CallFailure>),
}

/// Callback from the voice SDK, tagged with the handle it concerns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelephonyEvent {
    pub handle: TelephonyHandle,
    pub kind: TelephonyEventKind,
}

impl TelephonyEvent {
    pub fn new(handle: TelephonyHandle, kind: TelephonyEventKind) -> Self {
        Self { handle, kind }
    }
}
