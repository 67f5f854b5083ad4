//! Per-break state machine.
//!
//! A break runs as one spawned task. Its pipeline is a sequence of async
//! stages joined with `?`: enablement check, prepare (snapshot and pause),
//! cancel-timeout arming, then fetch-and-play with fallback across the ad
//! sources. The whole pipeline races an external `vast.adsCancel` /
//! `vast.adSkip`; whichever finishes first resolves the break, and every
//! listener or timer the losing side registered is dropped with it.

use crate::config::Settings;
use crate::dispatcher::{self, AdEventSink, AdUnit, Integrators};
use crate::error::{AdError, TIMEOUT_ERROR_CODE};
use crate::events::{Event, EventBus, EventKind, ListenerId};
use crate::platform::{AdResponseFetcher, Player};
use crate::response::{AdResponse, AdSource};
use crate::sequencer::AdSourceSequencer;
use crate::snapshot::SnapshotManager;
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Delay before the loading indicator is cleared once an ad has started,
/// so content doesn't flash between the spinner and the ad.
const LOADING_CLEAR_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakKind {
    Preroll,
    Midroll,
    Postroll,
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BreakKind::Preroll => "preroll",
            BreakKind::Midroll => "midroll",
            BreakKind::Postroll => "postroll",
        })
    }
}

/// A request to run one ad break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakRequest {
    pub kind: BreakKind,
    /// Whether resolving the break counts against the remaining-ads counter
    pub decrements_remaining: bool,
}

impl BreakRequest {
    pub fn new(kind: BreakKind) -> Self {
        Self {
            kind,
            decrements_remaining: true,
        }
    }

    /// A break outside the planned schedule; leaves the counter alone.
    pub fn unplanned(kind: BreakKind) -> Self {
        Self {
            kind,
            decrements_remaining: false,
        }
    }
}

/// What became of a break request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RollOutcome {
    /// A break task is running
    Started,
    /// Ads are canceled; resolved on the spot as a failed break
    Resolved,
    /// A break is already running or the session is detached
    Refused,
}

enum BreakOutcome {
    Completed(Result<AdResponse, AdError>),
    Interrupted(EventKind),
}

pub(crate) struct SessionState {
    pub(crate) ads_enabled: bool,
    pub(crate) ad_playing: bool,
    pub(crate) ads_canceled: bool,
    pub(crate) remaining: u32,
    pub(crate) midroll_progress: Vec<bool>,
    pub(crate) ad_unit: Option<Arc<dyn AdUnit>>,
    pub(crate) response: Option<AdResponse>,
    pub(crate) content_listener: Option<ListenerId>,
    pub(crate) midroll_watcher: Option<ListenerId>,
    pub(crate) first_play_gate: Option<ListenerId>,
    /// Listeners that live for the whole session
    pub(crate) listeners: Vec<ListenerId>,
    pub(crate) break_task: Option<JoinHandle<()>>,
    pub(crate) detached: bool,
}

/// Everything shared between the scheduler, running breaks and the host
/// facing plugin handle.
pub(crate) struct Session {
    pub(crate) settings: Settings,
    pub(crate) player: Arc<dyn Player>,
    pub(crate) bus: EventBus,
    pub(crate) runtime: Handle,
    pub(crate) snapshots: SnapshotManager,
    fetcher: Arc<dyn AdResponseFetcher>,
    integrators: Integrators,
    state: Mutex<SessionState>,
}

impl Session {
    pub(crate) fn new(
        settings: Settings,
        player: Arc<dyn Player>,
        bus: EventBus,
        fetcher: Arc<dyn AdResponseFetcher>,
        integrators: Integrators,
        runtime: Handle,
    ) -> Self {
        let state = SessionState {
            ads_enabled: settings.ads_enabled,
            ad_playing: false,
            ads_canceled: false,
            remaining: settings.planned_ads(),
            midroll_progress: Vec::new(),
            ad_unit: None,
            response: None,
            content_listener: None,
            midroll_watcher: None,
            first_play_gate: None,
            listeners: Vec::new(),
            break_task: None,
            detached: false,
        };
        Self {
            settings,
            player,
            bus,
            runtime,
            snapshots: SnapshotManager::new(),
            fetcher,
            integrators,
            state: Mutex::new(state),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_ad_playing(&self) -> bool {
        self.state().ad_playing
    }

    pub(crate) fn ads_canceled(&self) -> bool {
        self.state().ads_canceled
    }

    pub(crate) fn ads_enabled(&self) -> bool {
        self.state().ads_enabled
    }

    pub(crate) fn set_ads_enabled(&self, enabled: bool) {
        self.state().ads_enabled = enabled;
    }

    /// Start a break for `request`.
    ///
    /// Once ads are canceled a request is not played but still resolves as a
    /// failed break: it counts against the remaining ads and reports
    /// `vast.adError` and `vast.adsCancel`.
    pub(crate) fn play_roll(self: &Arc<Self>, request: BreakRequest) -> RollOutcome {
        {
            let mut st = self.state();
            if st.detached {
                return RollOutcome::Refused;
            }
            if st.ad_playing || self.snapshots.is_outstanding() {
                warn!("ignoring {} request, a break is already running", request.kind);
                return RollOutcome::Refused;
            }
            if st.ads_canceled {
                if request.kind != BreakKind::Preroll || !self.settings.play_ad_always {
                    drop(st);
                    self.resolve_canceled(request);
                    return RollOutcome::Resolved;
                }
                info!("starting a new ad session");
                st.ads_canceled = false;
            }
            st.ad_playing = true;
        }

        self.disarm_midroll_watcher();
        self.player.remove_native_poster();
        info!("starting {} break", request.kind);

        // Spawned under the state lock so teardown can't clear the slot
        // before the handle is stored.
        let mut st = self.state();
        st.break_task = Some(self.runtime.spawn(Arc::clone(self).run_break(request)));
        RollOutcome::Started
    }

    fn resolve_canceled(&self, request: BreakRequest) {
        info!("{} request resolved without playing, ads are canceled", request.kind);
        if request.decrements_remaining {
            self.decrement_remaining();
        }
        self.report_ad_error(AdError::AdsCanceled);
        self.cancel_ads();
    }

    async fn run_break(self: Arc<Self>, request: BreakRequest) {
        let sink = AdEventSink::new(self.bus.clone());
        let interrupt = self.bus.next_of(&[EventKind::AdsCancel, EventKind::AdSkip]);
        let presentation = self.presentation();

        let outcome = tokio::select! {
            biased;
            event = interrupt => BreakOutcome::Interrupted(event.kind),
            result = self.pipeline(request.kind, &sink) => BreakOutcome::Completed(result),
            never = presentation => match never {},
        };
        sink.revoke();

        if request.decrements_remaining {
            self.decrement_remaining();
        }
        match outcome {
            BreakOutcome::Completed(Ok(_)) => {
                info!("{} ad finished", request.kind);
                self.bus.emit(EventKind::AdEnd);
                self.teardown(false);
            }
            BreakOutcome::Completed(Err(err)) => {
                self.track_ad_error(err);
                self.teardown(true);
            }
            BreakOutcome::Interrupted(kind) => {
                info!("{} break ended by {}", request.kind, kind);
                self.teardown(true);
            }
        }
    }

    async fn pipeline(&self, kind: BreakKind, sink: &AdEventSink) -> Result<AdResponse, AdError> {
        self.check_ads_enabled()?;
        self.prepare_for_ad(kind).await?;
        let cancel_timeout = self.cancel_timeout();
        tokio::select! {
            err = cancel_timeout => Err(err),
            result = self.fetch_and_play(sink) => result,
        }
    }

    fn check_ads_enabled(&self) -> Result<(), AdError> {
        if self.ads_enabled() {
            Ok(())
        } else {
            Err(AdError::AdsDisabled)
        }
    }

    fn can_play_preroll(&self) -> bool {
        !self.player.device().is_iphone()
            || self.player.current_time() <= self.settings.ios_preroll_cancel_timeout.as_secs_f64()
    }

    async fn prepare_for_ad(&self, kind: BreakKind) -> Result<(), AdError> {
        if kind == BreakKind::Preroll && !self.can_play_preroll() {
            return Err(AdError::PlaybackGuard(
                "video content has been playing before preroll ad".to_string(),
            ));
        }

        self.snapshots.capture(self.player.as_ref());
        let paused = self.bus.next_of(&[EventKind::Paused]);
        self.player.pause();
        self.player.set_ad_loading(true);
        if self.player.paused() {
            return Ok(());
        }

        debug!("waiting up to {:?} for content to pause", self.settings.timeout);
        tokio::time::timeout(self.settings.timeout, paused)
            .await
            .map(|_| ())
            .map_err(|_| AdError::Timeout {
                message: "timeout while waiting for content to pause".to_string(),
                code: TIMEOUT_ERROR_CODE,
            })
    }

    /// Resolves with a timeout error unless an ad starts (or the break is
    /// canceled or skipped) within the cancel window. Once disarmed it never
    /// resolves.
    fn cancel_timeout(&self) -> impl Future<Output = AdError> {
        let disarm = self
            .bus
            .next_of(&[EventKind::AdStart, EventKind::AdsCancel, EventKind::AdSkip]);
        let window = self.settings.ad_cancel_timeout;
        async move {
            tokio::select! {
                _ = tokio::time::sleep(window) => AdError::cancel_timeout(),
                _ = disarm => std::future::pending().await,
            }
        }
    }

    async fn fetch_and_play(&self, sink: &AdEventSink) -> Result<AdResponse, AdError> {
        let mut sequencer = AdSourceSequencer::for_break(&self.settings.ad_source);
        while let Some(source) = sequencer.next_source() {
            match self.play_source(&source, sink).await {
                Ok(response) => return Ok(response),
                Err(err) if err.allows_fallback() && !sink.has_started() && sequencer.has_more() => {
                    warn!(
                        "ad source {} failed: {} ({} left)",
                        source,
                        err,
                        sequencer.remaining()
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Err(AdError::Fetch {
            locator: "<none>".to_string(),
            message: "no ad source to try".to_string(),
        })
    }

    async fn play_source(&self, source: &AdSource, sink: &AdEventSink) -> Result<AdResponse, AdError> {
        debug!("requesting ad response from {}", source);
        let response = self
            .fetcher
            .get_response(source)
            .await
            .map_err(|message| AdError::Fetch {
                locator: source.locator(),
                message,
            })?;

        if self.ads_canceled() {
            return Err(AdError::AdsCanceled);
        }

        self.state().response = Some(response.clone());
        let dispatched = dispatcher::dispatch(
            &self.integrators,
            response,
            sink.clone(),
            self.settings.auto_resize,
            &self.player,
            &self.bus,
        );
        info!("playing {:?} ad from {}", dispatched.kind, source);
        self.state().ad_unit = dispatched.unit.clone();

        let _guard = dispatched.guard;
        let result = dispatched.done.await;
        if result.is_err() {
            let mut st = self.state();
            st.ad_unit = None;
            st.response = None;
        }
        result
    }

    /// Ads label and loading indicator for the lifetime of one break.
    fn presentation(&self) -> impl Future<Output = Infallible> {
        let started = self
            .bus
            .next_of(&[EventKind::AdStart, EventKind::AdsCancel, EventKind::AdSkip]);
        let player = Arc::clone(&self.player);
        async move {
            if started.await.kind == EventKind::AdStart {
                player.set_ads_label(true);
            }
            tokio::time::sleep(LOADING_CLEAR_DELAY).await;
            player.set_ad_loading(false);
            std::future::pending().await
        }
    }

    fn decrement_remaining(&self) {
        let mut st = self.state();
        st.remaining = st.remaining.saturating_sub(1);
    }

    /// Report a failed break: one `vast.adError`, then a cancel when no ads
    /// are left (or ads are disabled), a skip otherwise.
    pub(crate) fn track_ad_error(&self, err: AdError) {
        self.report_ad_error(err);

        let (remaining, enabled) = {
            let st = self.state();
            (st.remaining, st.ads_enabled)
        };
        if remaining == 0 || !enabled {
            self.cancel_ads();
        } else {
            self.bus.emit(EventKind::AdSkip);
        }
    }

    fn report_ad_error(&self, err: AdError) {
        error!("AD ERROR: {}", err);
        self.bus.emit(Event::ad_error(err));
    }

    pub(crate) fn cancel_ads(&self) {
        self.state().ads_canceled = true;
        self.bus.emit(EventKind::AdsCancel);
    }

    fn teardown(self: &Arc<Self>, stop_unit: bool) {
        let (unit, detached) = {
            let mut st = self.state();
            st.response = None;
            st.ad_playing = false;
            st.break_task = None;
            (st.ad_unit.take(), st.detached)
        };
        if stop_unit {
            if let Some(unit) = unit {
                unit.stop();
            }
        }
        self.player.set_ad_loading(false);
        self.player.set_ads_label(false);
        if detached {
            return;
        }
        self.arm_content_listeners();
        self.snapshots.restore(self.player.as_ref());
        // Content that was never paused emits no `playing` to re-arm the
        // midroll watcher.
        if !self.player.paused() {
            self.watch_midrolls();
        }
    }

    /// Wait for content to play again, announce it, then watch for its end.
    pub(crate) fn arm_content_listeners(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let id = self.bus.once_any(
            &[EventKind::Playing, EventKind::Reset, EventKind::FirstPlay],
            move |event| {
                // A `playing` during a break comes from the ad media; the
                // break's teardown arms these listeners again.
                if event.kind != EventKind::Playing || session.is_ad_playing() {
                    return;
                }
                session.bus.emit(EventKind::ContentStart);

                let inner = Arc::clone(&session);
                let id = session.bus.once_any(
                    &[EventKind::Ended, EventKind::Reset, EventKind::FirstPlay],
                    move |event| {
                        if event.kind == EventKind::Ended && !inner.is_ad_playing() {
                            inner.bus.emit(EventKind::ContentEnd);
                        }
                    },
                );
                session.replace_content_listener(id);
            },
        );
        self.replace_content_listener(id);
    }

    pub(crate) fn replace_content_listener(&self, id: ListenerId) {
        let previous = self.state().content_listener.replace(id);
        if let Some(previous) = previous {
            if previous != id {
                self.bus.off(previous);
            }
        }
    }

    /// Remove every listener this session registered and abort a running
    /// break. Idempotent.
    pub(crate) fn detach(&self) {
        let (ids, task) = {
            let mut st = self.state();
            st.detached = true;
            let mut ids: Vec<ListenerId> = st.listeners.drain(..).collect();
            ids.extend(st.content_listener.take());
            ids.extend(st.midroll_watcher.take());
            ids.extend(st.first_play_gate.take());
            (ids, st.break_task.take())
        };
        for id in ids {
            self.bus.off(id);
        }
        if let Some(task) = task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VastOptions;
    use crate::dispatcher::{SimulatedIntegrator, SimulatedOutcome};
    use crate::platform::{SimulatedPlayer, StaticFetcher};
    use crate::response::MediaFile;

    fn session(
        options: VastOptions,
        fetcher: StaticFetcher,
        outcome: SimulatedOutcome,
    ) -> (Arc<Session>, Arc<SimulatedPlayer>) {
        let bus = EventBus::new();
        let player = Arc::new(SimulatedPlayer::new(bus.clone(), "content.mp4", 60.0));
        let settings = Settings::from_options(options).unwrap();
        let session = Arc::new(Session::new(
            settings,
            player.clone(),
            bus,
            Arc::new(fetcher),
            Integrators::uniform(Arc::new(SimulatedIntegrator::new(outcome))),
            Handle::current(),
        ));
        (session, player)
    }

    fn good_ad() -> AdResponse {
        AdResponse::with_media(vec![MediaFile::new("ad.mp4")])
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[test]
    fn break_kind_names() {
        assert_eq!(BreakKind::Midroll.to_string(), "midroll");
        assert!(!BreakRequest::unplanned(BreakKind::Preroll).decrements_remaining);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_break_emits_ad_end_and_decrements() {
        let (session, player) = session(
            VastOptions::default().with_ad_tag_url("http://ad"),
            StaticFetcher::new().with_response("http://ad", good_ad()),
            SimulatedOutcome::Complete,
        );
        let ended = session.bus.next_of(&[EventKind::AdEnd]);
        player.play();

        assert_eq!(
            session.play_roll(BreakRequest::new(BreakKind::Preroll)),
            RollOutcome::Started
        );
        assert!(session.is_ad_playing());
        assert_eq!(
            session.play_roll(BreakRequest::new(BreakKind::Preroll)),
            RollOutcome::Refused
        );

        ended.await;
        settle().await;
        assert!(!session.is_ad_playing());
        assert_eq!(session.state().remaining, 0);
        assert!(!session.snapshots.is_outstanding());
        assert!(!player.paused());
        assert!(player.poster_removed());
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_ads_cancel_the_session() {
        let (session, _player) = session(
            VastOptions::default().with_ad_tag_url("http://ad"),
            StaticFetcher::new(),
            SimulatedOutcome::Complete,
        );
        session.set_ads_enabled(false);
        let error = session.bus.next_of(&[EventKind::AdError]);
        let cancel = session.bus.next_of(&[EventKind::AdsCancel]);

        session.play_roll(BreakRequest::new(BreakKind::Preroll));
        assert_eq!(error.await.error, Some(AdError::AdsDisabled));
        cancel.await;
        settle().await;
        assert!(session.ads_canceled());
        assert_eq!(
            session.play_roll(BreakRequest::new(BreakKind::Midroll)),
            RollOutcome::Resolved
        );
    }

    #[tokio::test(start_paused = true)]
    async fn canceled_requests_still_resolve_and_count() {
        let (session, _player) = session(
            VastOptions::default()
                .with_ad_tag_url("http://ad")
                .with_midrolls(vec![10.0, 30.0]),
            StaticFetcher::new().with_response("http://ad", good_ad()),
            SimulatedOutcome::Complete,
        );
        assert_eq!(session.state().remaining, 3);
        let seen = Arc::new(Mutex::new(Vec::new()));
        for kind in [EventKind::AdError, EventKind::AdsCancel, EventKind::AdStart] {
            let s = Arc::clone(&seen);
            session.bus.on(kind, move |e| s.lock().unwrap().push(e.clone()));
        }

        session.cancel_ads();
        seen.lock().unwrap().clear();

        let outcome = session.play_roll(BreakRequest::new(BreakKind::Midroll));
        assert_eq!(outcome, RollOutcome::Resolved);
        assert!(!session.is_ad_playing());
        assert_eq!(session.state().remaining, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Event::ad_error(AdError::AdsCanceled),
                Event::new(EventKind::AdsCancel)
            ]
        );

        session.play_roll(BreakRequest::unplanned(BreakKind::Midroll));
        assert_eq!(session.state().remaining, 2);
        for _ in 0..3 {
            session.play_roll(BreakRequest::new(BreakKind::Postroll));
        }
        assert_eq!(session.state().remaining, 0);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|e| e.kind == EventKind::AdError).count(), 5);
        assert!(seen.iter().all(|e| e.kind != EventKind::AdStart));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn resolved_break_leaves_no_task_handle() {
        for _ in 0..50 {
            let (session, _player) = session(
                VastOptions::default().with_ad_tag_url("http://ad"),
                StaticFetcher::new(),
                SimulatedOutcome::Complete,
            );
            // Fails on the first stage, so the task ends right away
            session.set_ads_enabled(false);
            assert_eq!(
                session.play_roll(BreakRequest::new(BreakKind::Preroll)),
                RollOutcome::Started
            );
            while session.is_ad_playing() {
                tokio::task::yield_now().await;
            }
            assert!(session.state().break_task.is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failure_with_ads_left_is_a_skip() {
        let (session, _player) = session(
            VastOptions::default()
                .with_ad_tag_url("http://missing")
                .with_midrolls(vec![10.0]),
            StaticFetcher::new(),
            SimulatedOutcome::Complete,
        );
        let skip = session.bus.next_of(&[EventKind::AdSkip]);
        session.play_roll(BreakRequest::new(BreakKind::Preroll));
        skip.await;
        settle().await;
        assert!(!session.ads_canceled());
        assert_eq!(session.state().remaining, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_pause_hits_the_ready_timeout() {
        let (session, player) = session(
            VastOptions::default().with_ad_tag_url("http://ad"),
            StaticFetcher::new().with_response("http://ad", good_ad()),
            SimulatedOutcome::Complete,
        );
        player.set_deferred_pause(true);
        player.play();
        let error = session.bus.next_of(&[EventKind::AdError]);
        session.play_roll(BreakRequest::new(BreakKind::Preroll));

        let event = error.await;
        assert_eq!(event.error.and_then(|e| e.code()), Some(TIMEOUT_ERROR_CODE));
    }

    #[tokio::test(start_paused = true)]
    async fn iphone_preroll_guard_rejects_late_preroll() {
        let bus = EventBus::new();
        let player = Arc::new(
            SimulatedPlayer::new(bus.clone(), "content.mp4", 60.0)
                .with_device(crate::platform::DeviceProfile::iphone()),
        );
        let settings =
            Settings::from_options(VastOptions::default().with_ad_tag_url("http://ad")).unwrap();
        let session = Arc::new(Session::new(
            settings,
            player.clone(),
            bus.clone(),
            Arc::new(StaticFetcher::new().with_response("http://ad", good_ad())),
            Integrators::uniform(Arc::new(SimulatedIntegrator::new(SimulatedOutcome::Complete))),
            Handle::current(),
        ));
        player.play();
        player.tick(5.0);

        let error = bus.next_of(&[EventKind::AdError]);
        session.play_roll(BreakRequest::new(BreakKind::Preroll));
        assert!(matches!(error.await.error, Some(AdError::PlaybackGuard(_))));
        settle().await;
        assert!(!player.paused(), "content was never interrupted");
    }

    #[tokio::test(start_paused = true)]
    async fn detach_removes_listeners_and_aborts_break() {
        let (session, _player) = session(
            VastOptions::default().with_ad_tag_url("http://ad"),
            StaticFetcher::new().with_response("http://ad", good_ad()),
            SimulatedOutcome::Stall,
        );
        let bus = session.bus.clone();
        session.arm_content_listeners();
        session.play_roll(BreakRequest::new(BreakKind::Preroll));
        settle().await;
        assert!(bus.listener_count() > 0);

        session.detach();
        settle().await;
        assert_eq!(bus.listener_count(), 0);
        assert_eq!(
            session.play_roll(BreakRequest::new(BreakKind::Preroll)),
            RollOutcome::Refused
        );
    }
}
