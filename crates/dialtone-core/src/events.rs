use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::session::SessionId;

/// Events buffered for a late listener when replay is enabled.
const MAX_PENDING_EVENTS: usize = 16;

/// Lifecycle events delivered to the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Connected,
    Disconnected,
    Failed(CallFailure),
}

impl CallEvent {
    /// Host-facing event name.
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::Connected => "callConnected",
            CallEvent::Disconnected => "callDisconnected",
            CallEvent::Failed(_) => "callFailed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallEvent::Connected)
    }
}

/// Asynchronous failure reported by the telephony SDK after a call was initiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    pub message: String,
    pub code: Option<i32>,
}

impl CallFailure {
    pub fn new(message: impl Into<String>, code: Option<i32>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for CallFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from the session task).
/// Delivery is serialized, so `on_event` must not register listeners.
pub trait CallEventListener: Send + Sync {
    fn on_event(&self, event: CallEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(id: u64) -> Self {
        Self(id)
    }
}

struct EmitterState {
    listeners: Vec<(ListenerId, Arc<dyn CallEventListener>)>,
    next_id: u64,
    replay: bool,
    pending: VecDeque<CallEvent>,
    // De-duplication is scoped to the session that emitted last.
    session: Option<SessionId>,
    connected_fired: bool,
    terminal_fired: bool,
}

/// Event bridge that dispatches lifecycle events to registered listeners.
///
/// Each session gets at most one `Connected` and at most one terminal
/// event (`Disconnected` or `Failed`); repeats are dropped here.
#[derive(Clone)]
pub struct EventEmitter {
    state: Arc<Mutex<EmitterState>>,
    // Held across listener delivery so a replay flush and a live emit
    // cannot interleave.
    delivery: Arc<Mutex<()>>,
}

impl EventEmitter {
    /// Fire-and-forget broadcast: events emitted with no listener attached are dropped.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Events emitted with no listener attached are kept and handed to
    /// the next listener that registers.
    pub fn with_replay() -> Self {
        Self::build(true)
    }

    fn build(replay: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(EmitterState {
                listeners: Vec::new(),
                next_id: 1,
                replay,
                pending: VecDeque::new(),
                session: None,
                connected_fired: false,
                terminal_fired: false,
            })),
            delivery: Arc::new(Mutex::new(())),
        }
    }

    /// Switch replay mode. Turning it off discards anything still buffered.
    pub fn set_replay(&self, replay: bool) {
        let mut state = self.lock();
        state.replay = replay;
        if !replay {
            state.pending.clear();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EmitterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_delivery(&self) -> std::sync::MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_listener(&self, listener: Arc<dyn CallEventListener>) -> ListenerId {
        let _delivery = self.lock_delivery();
        let (id, replayed) = {
            let mut state = self.lock();
            let id = ListenerId(state.next_id);
            state.next_id += 1;
            state.listeners.push((id, listener.clone()));
            let replayed: Vec<CallEvent> = state.pending.drain(..).collect();
            (id, replayed)
        };

        if !replayed.is_empty() {
            tracing::debug!("replaying {} buffered call events", replayed.len());
        }
        for event in replayed {
            listener.on_event(event);
        }
        id
    }

    /// Detach a listener. Returns false if the id was unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut state = self.lock();
        let before = state.listeners.len();
        state.listeners.retain(|(lid, _)| *lid != id);
        state.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn emit(&self, session: &SessionId, event: CallEvent) {
        let _delivery = self.lock_delivery();
        let listeners: Vec<Arc<dyn CallEventListener>> = {
            let mut state = self.lock();
            if state.session.as_ref() != Some(session) {
                state.session = Some(session.clone());
                state.connected_fired = false;
                state.terminal_fired = false;
            }

            let already = if event.is_terminal() {
                std::mem::replace(&mut state.terminal_fired, true)
            } else {
                std::mem::replace(&mut state.connected_fired, true)
            };
            if already {
                tracing::debug!("duplicate {} for session {session} dropped", event.name());
                return;
            }

            if state.listeners.is_empty() {
                if state.replay {
                    if state.pending.len() == MAX_PENDING_EVENTS {
                        state.pending.pop_front();
                        tracing::warn!("call event replay buffer full, oldest event dropped");
                    }
                    state.pending.push_back(event);
                } else {
                    tracing::debug!("{} emitted with no listener attached", event.name());
                }
                return;
            }
            state.listeners.iter().map(|(_, l)| l.clone()).collect()
        };

        tracing::info!("emitting {} for session {session}", event.name());
        for listener in listeners {
            listener.on_event(event.clone());
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    impl CallEventListener for CountingListener {
        fn on_event(&self, _event: CallEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct EventCapture {
        events: Arc<Mutex<Vec<CallEvent>>>,
    }

    impl CallEventListener for EventCapture {
        fn on_event(&self, event: CallEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn capture() -> (Arc<EventCapture>, Arc<Mutex<Vec<CallEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (Arc::new(EventCapture { events: events.clone() }), events)
    }

    #[test]
    fn emitter_dispatches_to_multiple_listeners() {
        let emitter = EventEmitter::new();
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));
        let session = SessionId::new();

        emitter.add_listener(Arc::new(CountingListener { count: count1.clone() }));
        emitter.add_listener(Arc::new(CountingListener { count: count2.clone() }));

        emitter.emit(&session, CallEvent::Connected);

        assert_eq!(count1.load(Ordering::SeqCst), 1);
        assert_eq!(count2.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emitter_drops_duplicate_events_for_same_session() {
        let emitter = EventEmitter::new();
        let (listener, events) = capture();
        emitter.add_listener(listener);
        let session = SessionId::new();

        emitter.emit(&session, CallEvent::Connected);
        emitter.emit(&session, CallEvent::Connected);
        emitter.emit(&session, CallEvent::Disconnected);
        emitter.emit(&session, CallEvent::Failed(CallFailure::new("late", None)));

        let captured = events.lock().unwrap();
        assert_eq!(*captured, vec![CallEvent::Connected, CallEvent::Disconnected]);
    }

    #[test]
    fn new_session_resets_deduplication() {
        let emitter = EventEmitter::new();
        let (listener, events) = capture();
        emitter.add_listener(listener);

        emitter.emit(&SessionId::new(), CallEvent::Disconnected);
        emitter.emit(&SessionId::new(), CallEvent::Disconnected);

        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let emitter = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let id = emitter.add_listener(Arc::new(CountingListener { count: count.clone() }));

        assert!(emitter.remove_listener(id));
        assert!(!emitter.remove_listener(id));
        emitter.emit(&SessionId::new(), CallEvent::Connected);

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn broadcast_mode_drops_events_without_listener() {
        let emitter = EventEmitter::new();
        let session = SessionId::new();
        emitter.emit(&session, CallEvent::Connected);

        let (listener, events) = capture();
        emitter.add_listener(listener);
        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn replay_mode_flushes_buffered_events_in_order() {
        let emitter = EventEmitter::with_replay();
        let session = SessionId::new();
        emitter.emit(&session, CallEvent::Connected);
        emitter.emit(&session, CallEvent::Failed(CallFailure::new("dropped", Some(31005))));

        let (listener, events) = capture();
        emitter.add_listener(listener);

        let captured = events.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[0], CallEvent::Connected);
        match &captured[1] {
            CallEvent::Failed(failure) => assert_eq!(failure.code, Some(31005)),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    struct SlowCapture {
        entered: Mutex<Option<std::sync::mpsc::Sender<()>>>,
        events: Arc<Mutex<Vec<CallEvent>>>,
    }

    impl CallEventListener for SlowCapture {
        fn on_event(&self, event: CallEvent) {
            if let Some(entered) = self.entered.lock().unwrap().take() {
                entered.send(()).unwrap();
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn live_emit_waits_for_replay_flush() {
        let emitter = EventEmitter::with_replay();
        let session = SessionId::new();
        emitter.emit(&session, CallEvent::Connected);

        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let events = Arc::new(Mutex::new(Vec::new()));
        let listener = Arc::new(SlowCapture {
            entered: Mutex::new(Some(entered_tx)),
            events: events.clone(),
        });

        let registering = {
            let emitter = emitter.clone();
            std::thread::spawn(move || {
                emitter.add_listener(listener);
            })
        };
        entered_rx.recv().unwrap();

        let emitting = {
            let emitter = emitter.clone();
            let session = session.clone();
            std::thread::spawn(move || emitter.emit(&session, CallEvent::Disconnected))
        };
        registering.join().unwrap();
        emitting.join().unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![CallEvent::Connected, CallEvent::Disconnected]
        );
    }

    #[test]
    fn event_names_match_host_contract() {
        assert_eq!(CallEvent::Connected.name(), "callConnected");
        assert_eq!(CallEvent::Disconnected.name(), "callDisconnected");
        assert_eq!(CallEvent::Failed(CallFailure::new("x", None)).name(), "callFailed");
    }
}
