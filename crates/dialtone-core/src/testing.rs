//! In-memory platform fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::audio::{AudioConfiguration, AudioMode, AudioSession};
use crate::errors::CallError;
use crate::events::{CallEvent, CallEventListener};
use crate::permissions::{Capability, PermissionPrompt};
use crate::registrar::{EndReason, NativeCallRegistrar, RegistrarToken};
use crate::session::SessionId;
use crate::telephony::{ConnectRequest, TelephonyHandle, TelephonyProvider};

const WAIT: Duration = Duration::from_secs(2);

async fn wait_until(counter: &watch::Sender<usize>, n: usize) {
    let mut rx = counter.subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|count| *count >= n))
        .await
        .expect("timed out waiting for fake")
        .expect("fake counter closed");
}

fn bump(counter: &watch::Sender<usize>) {
    counter.send_modify(|count| *count += 1);
}

#[derive(Default)]
struct TelephonyLog {
    connects: Vec<ConnectRequest>,
    handles: Vec<TelephonyHandle>,
    disconnects: Vec<TelephonyHandle>,
    mutes: Vec<bool>,
    audio_enabled: Vec<bool>,
    fail_next: Option<CallError>,
}

pub struct FakeTelephony {
    log: Mutex<TelephonyLog>,
    disconnect_count: watch::Sender<usize>,
}

impl FakeTelephony {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(TelephonyLog::default()),
            disconnect_count: watch::channel(0).0,
        })
    }

    /// Make the next `connect` fail synchronously.
    pub fn fail_connect(&self, error: CallError) {
        self.log.lock().unwrap().fail_next = Some(error);
    }

    pub fn connects(&self) -> Vec<ConnectRequest> {
        self.log.lock().unwrap().connects.clone()
    }

    pub fn last_handle(&self) -> Option<TelephonyHandle> {
        self.log.lock().unwrap().handles.last().cloned()
    }

    pub fn disconnects(&self) -> Vec<TelephonyHandle> {
        self.log.lock().unwrap().disconnects.clone()
    }

    pub fn mutes(&self) -> Vec<bool> {
        self.log.lock().unwrap().mutes.clone()
    }

    pub fn audio_enabled(&self) -> Vec<bool> {
        self.log.lock().unwrap().audio_enabled.clone()
    }

    pub async fn wait_for_disconnects(&self, n: usize) {
        wait_until(&self.disconnect_count, n).await;
    }
}

impl TelephonyProvider for FakeTelephony {
    fn connect(&self, request: &ConnectRequest) -> Result<TelephonyHandle, CallError> {
        let mut log = self.log.lock().unwrap();
        if let Some(error) = log.fail_next.take() {
            return Err(error);
        }
        log.connects.push(request.clone());
        let handle = TelephonyHandle::new(format!("call-{}", log.connects.len()));
        log.handles.push(handle.clone());
        Ok(handle)
    }

    fn disconnect(&self, handle: &TelephonyHandle) {
        self.log.lock().unwrap().disconnects.push(handle.clone());
        bump(&self.disconnect_count);
    }

    fn set_muted(&self, _handle: &TelephonyHandle, muted: bool) {
        self.log.lock().unwrap().mutes.push(muted);
    }

    fn set_audio_enabled(&self, _handle: &TelephonyHandle, enabled: bool) {
        self.log.lock().unwrap().audio_enabled.push(enabled);
    }
}

#[derive(Default)]
struct RegistrarLog {
    outgoing: Vec<SessionId>,
    connected: usize,
    ended: Vec<EndReason>,
}

pub struct FakeRegistrar {
    log: Mutex<RegistrarLog>,
    fail: AtomicBool,
}

impl FakeRegistrar {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(RegistrarLog::default()),
            fail: AtomicBool::new(false),
        })
    }

    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn outgoing(&self) -> Vec<SessionId> {
        self.log.lock().unwrap().outgoing.clone()
    }

    pub fn connected(&self) -> usize {
        self.log.lock().unwrap().connected
    }

    pub fn ended(&self) -> Vec<EndReason> {
        self.log.lock().unwrap().ended.clone()
    }

    fn check(&self) -> Result<(), CallError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CallError::Registrar("rejected".into()));
        }
        Ok(())
    }
}

impl NativeCallRegistrar for FakeRegistrar {
    fn report_outgoing(
        &self,
        id: &SessionId,
        _destination: &str,
    ) -> Result<RegistrarToken, CallError> {
        self.check()?;
        self.log.lock().unwrap().outgoing.push(id.clone());
        Ok(RegistrarToken::new(id.to_string()))
    }

    fn report_connected(&self, _token: &RegistrarToken) -> Result<(), CallError> {
        self.check()?;
        self.log.lock().unwrap().connected += 1;
        Ok(())
    }

    fn report_ended(&self, _token: &RegistrarToken, reason: EndReason) -> Result<(), CallError> {
        self.check()?;
        self.log.lock().unwrap().ended.push(reason);
        Ok(())
    }
}

pub struct FakeAudio {
    config: Mutex<AudioConfiguration>,
    restores: AtomicUsize,
    refuse_routing: AtomicBool,
    fail_apply: AtomicBool,
}

impl FakeAudio {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(AudioConfiguration::default()),
            restores: AtomicUsize::new(0),
            refuse_routing: AtomicBool::new(false),
            fail_apply: AtomicBool::new(false),
        })
    }

    pub fn refuse_routing(&self, refuse: bool) {
        self.refuse_routing.store(refuse, Ordering::SeqCst);
    }

    pub fn fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    /// Number of times a `Normal` configuration was applied.
    pub fn restores(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }

    pub fn is_in_call(&self) -> bool {
        self.config.lock().unwrap().mode == AudioMode::InCommunication
    }

    pub fn current_speaker(&self) -> bool {
        self.config.lock().unwrap().speaker_on
    }
}

impl AudioSession for FakeAudio {
    fn current(&self) -> AudioConfiguration {
        *self.config.lock().unwrap()
    }

    fn apply(&self, config: &AudioConfiguration) -> Result<(), CallError> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(CallError::Audio("audio focus denied".into()));
        }
        if config.mode == AudioMode::Normal {
            self.restores.fetch_add(1, Ordering::SeqCst);
        }
        *self.config.lock().unwrap() = *config;
        Ok(())
    }

    fn route_to_speaker(&self, enabled: bool) -> Result<(), CallError> {
        if self.refuse_routing.load(Ordering::SeqCst) {
            return Err(CallError::RoutingUnavailable("wired headset".into()));
        }
        self.config.lock().unwrap().speaker_on = enabled;
        Ok(())
    }
}

pub struct FakePermissions {
    granted: AtomicBool,
    requests: watch::Sender<usize>,
    last_request: Mutex<Vec<Capability>>,
}

impl FakePermissions {
    pub fn granted() -> Arc<Self> {
        Self::with_grant(true)
    }

    pub fn ungranted() -> Arc<Self> {
        Self::with_grant(false)
    }

    fn with_grant(granted: bool) -> Arc<Self> {
        Arc::new(Self {
            granted: AtomicBool::new(granted),
            requests: watch::channel(0).0,
            last_request: Mutex::new(Vec::new()),
        })
    }

    /// Simulate the user granting access from system settings.
    pub fn grant(&self) {
        self.granted.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> usize {
        *self.requests.borrow()
    }

    pub fn last_request(&self) -> Vec<Capability> {
        self.last_request.lock().unwrap().clone()
    }

    pub async fn wait_for_request(&self) {
        self.wait_for_requests(1).await;
    }

    pub async fn wait_for_requests(&self, n: usize) {
        wait_until(&self.requests, n).await;
    }
}

impl PermissionPrompt for FakePermissions {
    fn is_granted(&self, _capabilities: &[Capability]) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    fn request(&self, capabilities: &[Capability]) {
        *self.last_request.lock().unwrap() = capabilities.to_vec();
        bump(&self.requests);
    }
}

/// Listener that records every event it receives.
pub struct EventRecorder {
    events: Mutex<Vec<CallEvent>>,
    count: watch::Sender<usize>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            count: watch::channel(0).0,
        })
    }

    pub fn events(&self) -> Vec<CallEvent> {
        self.events.lock().unwrap().clone()
    }

    pub async fn wait_for_count(&self, n: usize) {
        wait_until(&self.count, n).await;
    }
}

impl CallEventListener for EventRecorder {
    fn on_event(&self, event: CallEvent) {
        self.events.lock().unwrap().push(event);
        bump(&self.count);
    }
}
