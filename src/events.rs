//! Named-event bus shared by the host player and the ad engine.
//!
//! Listeners are invoked synchronously, in registration order, from inside
//! `emit`. Emitting from a listener is allowed and dispatches immediately
//! (nested), which mirrors how the host player triggers its own events.
//!
//! One-shot listeners can be registered across a *set* of event names with
//! [`EventBus::once_any`]: whichever name fires first wins and the listener is
//! removed from every name before its callback runs. [`EventBus::next_of`]
//! wraps the same combinator in a future so async code can wait for an event;
//! dropping the future unregisters the listener.

use crate::error::AdError;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Every event name the engine emits or observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AdStart,
    AdEnd,
    AdError,
    AdsCancel,
    AdSkip,
    ContentStart,
    ContentEnd,
    FirstPlay,
    Reset,
    PostrollGo,
    Playing,
    Paused,
    Ended,
    TimeUpdate,
}

impl EventKind {
    pub const ALL: [EventKind; 14] = [
        EventKind::AdStart,
        EventKind::AdEnd,
        EventKind::AdError,
        EventKind::AdsCancel,
        EventKind::AdSkip,
        EventKind::ContentStart,
        EventKind::ContentEnd,
        EventKind::FirstPlay,
        EventKind::Reset,
        EventKind::PostrollGo,
        EventKind::Playing,
        EventKind::Paused,
        EventKind::Ended,
        EventKind::TimeUpdate,
    ];

    /// Wire name of the event on the host player's bus.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::AdStart => "vast.adStart",
            EventKind::AdEnd => "vast.adEnd",
            EventKind::AdError => "vast.adError",
            EventKind::AdsCancel => "vast.adsCancel",
            EventKind::AdSkip => "vast.adSkip",
            EventKind::ContentStart => "vast.contentStart",
            EventKind::ContentEnd => "vast.contentEnd",
            EventKind::FirstPlay => "vast.firstPlay",
            EventKind::Reset => "vast.reset",
            EventKind::PostrollGo => "vast.postrollGo",
            EventKind::Playing => "playing",
            EventKind::Paused => "paused",
            EventKind::Ended => "ended",
            EventKind::TimeUpdate => "timeupdate",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown event name '{}'", s))
    }
}

/// An event instance delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Only set on `vast.adError`
    pub error: Option<AdError>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self { kind, error: None }
    }

    pub fn ad_error(error: AdError) -> Self {
        Self {
            kind: EventKind::AdError,
            error: Some(error),
        }
    }
}

impl From<EventKind> for Event {
    fn from(kind: EventKind) -> Self {
        Event::new(kind)
    }
}

/// Handle returned by every registration; pass it to [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type PersistentHandler = Arc<dyn Fn(&Event) + Send + Sync>;
type OnceHandler = Box<dyn FnOnce(&Event) + Send>;

enum Handler {
    Persistent(PersistentHandler),
    Once(OnceHandler),
}

struct Listener {
    id: ListenerId,
    kinds: Vec<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<Listener>,
}

/// Cloneable handle to a shared listener registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, kinds: Vec<EventKind>, handler: Handler) -> ListenerId {
        let mut reg = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        reg.next_id += 1;
        let id = ListenerId(reg.next_id);
        reg.listeners.push(Listener { id, kinds, handler });
        id
    }

    /// Listen to every occurrence of `kind`.
    pub fn on<F>(&self, kind: EventKind, callback: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(vec![kind], Handler::Persistent(Arc::new(callback)))
    }

    /// Listen once across a set of names. The first matching event removes
    /// the listener from all of them, then runs `callback`.
    pub fn once_any<F>(&self, kinds: &[EventKind], callback: F) -> ListenerId
    where
        F: FnOnce(&Event) + Send + 'static,
    {
        self.register(kinds.to_vec(), Handler::Once(Box::new(callback)))
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut reg = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let before = reg.listeners.len();
        reg.listeners.retain(|l| l.id != id);
        reg.listeners.len() != before
    }

    pub fn is_registered(&self, id: ListenerId) -> bool {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .iter()
            .any(|l| l.id == id)
    }

    pub fn listener_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .len()
    }

    /// Dispatch an event to its listeners.
    ///
    /// The matching set is captured up front; a listener removed by an
    /// earlier callback in the same dispatch is skipped. The registry lock is
    /// never held while a callback runs.
    pub fn emit(&self, event: impl Into<Event>) {
        let event = event.into();
        let ids: Vec<ListenerId> = {
            let reg = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            reg.listeners
                .iter()
                .filter(|l| l.kinds.contains(&event.kind))
                .map(|l| l.id)
                .collect()
        };

        for id in ids {
            let handler = {
                let mut reg = self.registry.lock().unwrap_or_else(|e| e.into_inner());
                let Some(pos) = reg.listeners.iter().position(|l| l.id == id) else {
                    continue;
                };
                match &reg.listeners[pos].handler {
                    Handler::Persistent(cb) => Handler::Persistent(Arc::clone(cb)),
                    Handler::Once(_) => reg.listeners.remove(pos).handler,
                }
            };
            match handler {
                Handler::Persistent(cb) => cb(&event),
                Handler::Once(cb) => cb(&event),
            }
        }
    }

    /// Future resolving with the first of `kinds` emitted after this call.
    ///
    /// The listener is registered immediately, not on first poll, so events
    /// emitted before the future is awaited are still observed.
    pub fn next_of(&self, kinds: &[EventKind]) -> EventWait {
        let (tx, rx) = oneshot::channel();
        let id = self.once_any(kinds, move |event| {
            let _ = tx.send(event.clone());
        });
        EventWait {
            rx,
            _guard: ListenerGuard::new(self.clone(), id),
        }
    }
}

/// Unregisters a listener when dropped.
pub struct ListenerGuard {
    bus: EventBus,
    id: Option<ListenerId>,
}

impl ListenerGuard {
    pub fn new(bus: EventBus, id: ListenerId) -> Self {
        Self { bus, id: Some(id) }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.bus.off(id);
        }
    }
}

/// Pending wait created by [`EventBus::next_of`].
pub struct EventWait {
    rx: oneshot::Receiver<Event>,
    // Unregisters the listener when the wait is dropped
    _guard: ListenerGuard,
}

impl Future for EventWait {
    type Output = Event;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Event> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(event)) => Poll::Ready(event),
            // The sender lives in the bus; it only disappears if the
            // listener was removed from outside, so the wait never resolves.
            Poll::Ready(Err(_)) => Poll::Pending,
            Poll::Pending => Poll::Pending,
        }
    }
}
