//! Ad type dispatch: classify a fetched response and hand it to the matching
//! integrator.
//!
//! Integrators share one contract ([`AdIntegrator::play_ad`]): they receive
//! the response, a break-scoped [`AdEventSink`] for lifecycle events and an
//! [`AdCompletion`] that must be finished exactly once. Dropping the
//! completion without finishing it counts as a playback failure.

use crate::error::AdError;
use crate::events::{EventBus, EventKind, ListenerId};
use crate::platform::Player;
use crate::response::AdResponse;
use log::{debug, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Shape of a fetched ad, decided from its media files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdKind {
    Linear,
    Interactive,
}

/// Any interactive media file makes the whole response interactive.
pub fn classify(response: &AdResponse) -> AdKind {
    if response.media_files.iter().any(|m| m.is_interactive()) {
        AdKind::Interactive
    } else {
        AdKind::Linear
    }
}

/// Handle to a running ad, returned by integrators that have one.
pub trait AdUnit: Send + Sync {
    /// Tear the unit down; called when the break is canceled or skipped.
    fn stop(&self);
}

/// Break-scoped emitter for ad lifecycle events.
///
/// Once the break has been torn down the sink is revoked and every call is a
/// no-op, so a slow integrator can never announce an ad that already timed
/// out. `ad_started` emits at most once per break.
#[derive(Clone)]
pub struct AdEventSink {
    bus: EventBus,
    live: Arc<AtomicBool>,
    started: Arc<AtomicBool>,
}

impl AdEventSink {
    pub(crate) fn new(bus: EventBus) -> Self {
        Self {
            bus,
            live: Arc::new(AtomicBool::new(true)),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Announce that ad media is about to be shown. Returns whether
    /// `vast.adStart` was emitted.
    pub fn ad_started(&self) -> bool {
        if !self.is_live() || self.started.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.bus.emit(EventKind::AdStart);
        true
    }

    /// The viewer (or the unit) skipped the ad.
    pub fn ad_skipped(&self) -> bool {
        if !self.is_live() {
            return false;
        }
        self.bus.emit(EventKind::AdSkip);
        true
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn revoke(&self) {
        self.live.store(false, Ordering::SeqCst);
    }
}

/// Single-use completion callback handed to an integrator.
pub struct AdCompletion {
    tx: oneshot::Sender<Result<AdResponse, AdError>>,
}

impl AdCompletion {
    pub fn finish(self, result: Result<AdResponse, AdError>) {
        // The break may already be gone (timed out or canceled)
        let _ = self.tx.send(result);
    }

    pub fn succeed(self, response: AdResponse) {
        self.finish(Ok(response))
    }

    pub fn fail(self, message: impl Into<String>) {
        self.finish(Err(AdError::Playback(message.into())))
    }
}

/// Orchestrator side of an [`AdCompletion`].
pub(crate) struct CompletionWait {
    rx: oneshot::Receiver<Result<AdResponse, AdError>>,
}

impl Future for CompletionWait {
    type Output = Result<AdResponse, AdError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(AdError::Playback(
                "ad integrator dropped its completion callback".to_string(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

pub(crate) fn completion_channel() -> (AdCompletion, CompletionWait) {
    let (tx, rx) = oneshot::channel();
    (AdCompletion { tx }, CompletionWait { rx })
}

/// Everything an integrator needs to play one ad.
pub struct AdPlayback {
    pub response: AdResponse,
    pub events: AdEventSink,
    pub completion: AdCompletion,
    /// Resize the ad to the player viewport
    pub auto_resize: bool,
}

/// Plays one kind of ad.
pub trait AdIntegrator: Send + Sync {
    /// Begin playback. `playback.completion` must be finished exactly once;
    /// `vast.adStart` must be announced through `playback.events` before any
    /// ad media is shown.
    fn play_ad(&self, playback: AdPlayback) -> Option<Arc<dyn AdUnit>>;
}

/// The integrator pair selected from by [`classify`].
#[derive(Clone)]
pub struct Integrators {
    pub linear: Arc<dyn AdIntegrator>,
    pub interactive: Arc<dyn AdIntegrator>,
}

impl Integrators {
    pub fn new(linear: Arc<dyn AdIntegrator>, interactive: Arc<dyn AdIntegrator>) -> Self {
        Self { linear, interactive }
    }

    /// Use the same integrator for both kinds.
    pub fn uniform(integrator: Arc<dyn AdIntegrator>) -> Self {
        Self {
            linear: Arc::clone(&integrator),
            interactive: integrator,
        }
    }

    pub fn for_kind(&self, kind: AdKind) -> &Arc<dyn AdIntegrator> {
        match kind {
            AdKind::Linear => &self.linear,
            AdKind::Interactive => &self.interactive,
        }
    }
}

/// Result of handing a response to an integrator.
pub(crate) struct Dispatched {
    pub kind: AdKind,
    pub unit: Option<Arc<dyn AdUnit>>,
    pub guard: Option<ManualProgressGuard>,
    pub done: CompletionWait,
}

/// Classify `response` and start it on the matching integrator. Interactive
/// ads on iOS devices get a [`ManualProgressGuard`].
pub(crate) fn dispatch(
    integrators: &Integrators,
    response: AdResponse,
    events: AdEventSink,
    auto_resize: bool,
    player: &Arc<dyn Player>,
    bus: &EventBus,
) -> Dispatched {
    let kind = classify(&response);
    debug!("dispatching {:?} ad ({} media files)", kind, response.media_files.len());

    let guard = (kind == AdKind::Interactive && player.device().is_idevice())
        .then(|| ManualProgressGuard::arm(Arc::clone(player), bus));

    let (completion, done) = completion_channel();
    let unit = integrators.for_kind(kind).play_ad(AdPlayback {
        response,
        events,
        completion,
        auto_resize,
    });
    Dispatched {
        kind,
        unit,
        guard,
        done,
    }
}

struct GuardState {
    last_valid: f64,
    attempts: u32,
}

/// Blocks seeking and skipping through an interactive ad on platforms whose
/// native controls can't be hidden.
///
/// Any time jump larger than [`ManualProgressGuard::THRESHOLD`] is clamped back
/// to the last valid position; from the second attempt on the player is
/// also paused. An early `ended` is undone by resuming at the last valid
/// position. The guard stops at the first ad end/cancel/error/skip, or when
/// dropped.
pub struct ManualProgressGuard {
    bus: EventBus,
    ids: Vec<ListenerId>,
    active: Arc<AtomicBool>,
}

impl ManualProgressGuard {
    /// The iOS media clock is unreliable below this many seconds.
    pub const THRESHOLD: f64 = 3.0;

    pub fn arm(player: Arc<dyn Player>, bus: &EventBus) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let state = Arc::new(Mutex::new(GuardState {
            last_valid: 0.0,
            attempts: 0,
        }));

        let seek_id = {
            let player = Arc::clone(&player);
            let state = Arc::clone(&state);
            let active = Arc::clone(&active);
            bus.on(EventKind::TimeUpdate, move |_| {
                if !active.load(Ordering::SeqCst) {
                    return;
                }
                let now = player.current_time();
                let clamp_to = {
                    let mut s = state.lock().unwrap_or_else(|e| e.into_inner());
                    if (now - s.last_valid).abs() > Self::THRESHOLD {
                        s.attempts += 1;
                        Some((s.last_valid, s.attempts))
                    } else {
                        s.last_valid = now;
                        None
                    }
                };
                if let Some((last_valid, attempts)) = clamp_to {
                    warn!("blocked ad seek to {:.1}s (attempt {})", now, attempts);
                    if attempts >= 2 {
                        player.pause();
                    }
                    player.seek(last_valid);
                }
            })
        };

        let ended_id = {
            let player = Arc::clone(&player);
            let state = Arc::clone(&state);
            let active = Arc::clone(&active);
            bus.on(EventKind::Ended, move |_| {
                if !active.load(Ordering::SeqCst) {
                    return;
                }
                let last_valid = state.lock().unwrap_or_else(|e| e.into_inner()).last_valid;
                if player.duration() - last_valid > Self::THRESHOLD {
                    warn!("blocked ad skip, resuming at {:.1}s", last_valid);
                    player.pause();
                    player.play();
                    player.seek(last_valid);
                }
            })
        };

        let stop_id = {
            let bus_handle = bus.clone();
            let active = Arc::clone(&active);
            bus.once_any(
                &[
                    EventKind::AdEnd,
                    EventKind::AdsCancel,
                    EventKind::AdError,
                    EventKind::AdSkip,
                ],
                move |_| {
                    active.store(false, Ordering::SeqCst);
                    bus_handle.off(seek_id);
                    bus_handle.off(ended_id);
                },
            )
        };

        Self {
            bus: bus.clone(),
            ids: vec![seek_id, ended_id, stop_id],
            active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for ManualProgressGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        for id in self.ids.drain(..) {
            self.bus.off(id);
        }
    }
}

/// How a [`SimulatedIntegrator`] behaves on its next ads.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulatedOutcome {
    /// Start the ad and report success right away
    Complete,
    /// Start the ad and keep it running until [`SimulatedIntegrator::finish_current`]
    Hold,
    /// Report a playback failure without starting
    Fail(String),
    /// Never start and never report
    Stall,
}

type HeldCompletion = Arc<Mutex<Option<AdCompletion>>>;

struct SimulatedUnit {
    stopped: AtomicBool,
    held: HeldCompletion,
}

impl AdUnit for SimulatedUnit {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.held.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

/// In-memory integrator used by tests and the simulator.
///
/// When given a player, a started ad switches the player to the first media
/// file and plays it, so the native events an ad produces reach the bus.
pub struct SimulatedIntegrator {
    player: Option<Arc<dyn Player>>,
    outcome: Mutex<SimulatedOutcome>,
    played: Mutex<Vec<AdResponse>>,
    held: HeldCompletion,
    units: Mutex<Vec<Arc<SimulatedUnit>>>,
}

impl SimulatedIntegrator {
    pub fn new(outcome: SimulatedOutcome) -> Self {
        Self {
            player: None,
            outcome: Mutex::new(outcome),
            played: Mutex::new(Vec::new()),
            held: Arc::new(Mutex::new(None)),
            units: Mutex::new(Vec::new()),
        }
    }

    pub fn with_player(mut self, player: Arc<dyn Player>) -> Self {
        self.player = Some(player);
        self
    }

    pub fn set_outcome(&self, outcome: SimulatedOutcome) {
        *self.outcome.lock().unwrap_or_else(|e| e.into_inner()) = outcome;
    }

    /// Responses handed to `play_ad`, in order.
    pub fn played(&self) -> Vec<AdResponse> {
        self.played.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Finish a held or stalled ad. Returns false if none is pending.
    pub fn finish_current(&self, result: Result<AdResponse, AdError>) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner()).take();
        match held {
            Some(completion) => {
                completion.finish(result);
                true
            }
            None => false,
        }
    }

    /// Number of units that were stopped by the engine.
    pub fn stopped_units(&self) -> usize {
        self.units
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|u| u.stopped.load(Ordering::SeqCst))
            .count()
    }

    fn start_media(&self, response: &AdResponse, events: &AdEventSink) {
        if !events.ad_started() {
            return;
        }
        if let (Some(player), Some(media)) = (&self.player, response.media_files.first()) {
            player.set_src(&media.src);
            player.play();
        }
    }
}

impl AdIntegrator for SimulatedIntegrator {
    fn play_ad(&self, playback: AdPlayback) -> Option<Arc<dyn AdUnit>> {
        let AdPlayback {
            response,
            events,
            completion,
            ..
        } = playback;
        self.played
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(response.clone());

        let outcome = self.outcome.lock().unwrap_or_else(|e| e.into_inner()).clone();
        match outcome {
            SimulatedOutcome::Fail(message) => {
                completion.fail(message);
                return None;
            }
            SimulatedOutcome::Complete => {
                self.start_media(&response, &events);
                completion.succeed(response);
            }
            SimulatedOutcome::Hold => {
                self.start_media(&response, &events);
                *self.held.lock().unwrap_or_else(|e| e.into_inner()) = Some(completion);
            }
            SimulatedOutcome::Stall => {
                *self.held.lock().unwrap_or_else(|e| e.into_inner()) = Some(completion);
            }
        }

        let unit = Arc::new(SimulatedUnit {
            stopped: AtomicBool::new(false),
            held: Arc::clone(&self.held),
        });
        self.units
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::clone(&unit));
        Some(unit)
    }
}
