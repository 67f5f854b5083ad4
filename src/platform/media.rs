//! Host player surface and an in-memory player for tests and simulation

use super::device::DeviceProfile;
use crate::events::{EventBus, EventKind};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MediaState {
    Playing,
    Paused,
    Ended,
}

/// The media player the engine is attached to.
///
/// Implementations must emit the native events (`playing`, `paused`, `ended`,
/// `timeupdate`) on the bus handed to [`crate::attach`]. The hook methods at
/// the bottom are purely presentational and default to no-ops.
pub trait Player: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn seek(&self, seconds: f64);
    fn state(&self) -> MediaState;
    fn current_time(&self) -> f64;
    fn duration(&self) -> f64;
    fn src(&self) -> Option<String>;
    fn set_src(&self, src: &str);

    fn paused(&self) -> bool {
        self.state() != MediaState::Playing
    }

    fn ended(&self) -> bool {
        self.state() == MediaState::Ended
    }

    fn device(&self) -> DeviceProfile {
        DeviceProfile::default()
    }

    /// Inline style overrides saved with a content snapshot
    fn style(&self) -> Option<String> {
        None
    }

    fn set_style(&self, _style: Option<&str>) {}

    /// Loading indicator shown while an ad is being fetched
    fn set_ad_loading(&self, _loading: bool) {}

    /// "Advertisement" label shown while an ad plays
    fn set_ads_label(&self, _visible: bool) {}

    /// Drop the poster image so it doesn't flicker between ad and content
    fn remove_native_poster(&self) {}
}

struct SimState {
    state: MediaState,
    time: f64,
    duration: f64,
    src: Option<String>,
    style: Option<String>,
    durations: HashMap<String, f64>,
    deferred_pause: bool,
    pause_pending: bool,
    loading: bool,
    ads_label: bool,
    poster_removed: bool,
}

/// Player that keeps its state in memory and emits native events on a bus.
///
/// Time only moves when [`SimulatedPlayer::tick`] is called, which keeps
/// scheduling tests deterministic.
pub struct SimulatedPlayer {
    bus: EventBus,
    device: DeviceProfile,
    state: Mutex<SimState>,
}

impl SimulatedPlayer {
    /// A paused player loaded with `src`, which lasts `duration` seconds.
    pub fn new(bus: EventBus, src: &str, duration: f64) -> Self {
        let mut durations = HashMap::new();
        durations.insert(src.to_string(), duration);
        SimulatedPlayer {
            bus,
            device: DeviceProfile::default(),
            state: Mutex::new(SimState {
                state: MediaState::Paused,
                time: 0.0,
                duration,
                src: Some(src.to_string()),
                style: None,
                durations,
                deferred_pause: false,
                pause_pending: false,
                loading: false,
                ads_label: false,
                poster_removed: false,
            }),
        }
    }

    pub fn with_device(mut self, device: DeviceProfile) -> Self {
        self.device = device;
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the duration of another media source known (e.g. an ad creative).
    pub fn register_source(&self, src: &str, duration: f64) {
        self.lock().durations.insert(src.to_string(), duration);
    }

    /// When enabled, `pause()` only takes effect on [`Self::complete_pause`].
    pub fn set_deferred_pause(&self, deferred: bool) {
        self.lock().deferred_pause = deferred;
    }

    pub fn complete_pause(&self) {
        let emit = {
            let mut s = self.lock();
            if s.pause_pending && s.state == MediaState::Playing {
                s.pause_pending = false;
                s.state = MediaState::Paused;
                true
            } else {
                s.pause_pending = false;
                false
            }
        };
        if emit {
            self.bus.emit(EventKind::Paused);
        }
    }

    /// Advance playback by `seconds` and emit `timeupdate`. Reaching the end
    /// of the media emits `ended`. Does nothing while paused.
    pub fn tick(&self, seconds: f64) {
        let reached_end = {
            let mut s = self.lock();
            if s.state != MediaState::Playing {
                return;
            }
            s.time = (s.time + seconds).min(s.duration);
            if s.time >= s.duration {
                s.state = MediaState::Ended;
                true
            } else {
                false
            }
        };
        self.bus.emit(EventKind::TimeUpdate);
        if reached_end {
            self.bus.emit(EventKind::Ended);
        }
    }

    /// Jump straight to the end of the current media.
    pub fn finish(&self) {
        {
            let mut s = self.lock();
            s.time = s.duration;
            s.state = MediaState::Ended;
        }
        self.bus.emit(EventKind::TimeUpdate);
        self.bus.emit(EventKind::Ended);
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    pub fn ads_label_visible(&self) -> bool {
        self.lock().ads_label
    }

    pub fn poster_removed(&self) -> bool {
        self.lock().poster_removed
    }
}

impl Player for SimulatedPlayer {
    fn play(&self) {
        let emit = {
            let mut s = self.lock();
            s.pause_pending = false;
            if s.state == MediaState::Playing {
                false
            } else {
                if s.state == MediaState::Ended {
                    s.time = 0.0;
                }
                s.state = MediaState::Playing;
                true
            }
        };
        if emit {
            self.bus.emit(EventKind::Playing);
        }
    }

    fn pause(&self) {
        let emit = {
            let mut s = self.lock();
            if s.state != MediaState::Playing {
                false
            } else if s.deferred_pause {
                s.pause_pending = true;
                false
            } else {
                s.state = MediaState::Paused;
                true
            }
        };
        if emit {
            self.bus.emit(EventKind::Paused);
        }
    }

    fn seek(&self, seconds: f64) {
        let mut s = self.lock();
        // duration is NaN until a source's length is known
        s.time = seconds.max(0.0).min(s.duration);
        if s.state == MediaState::Ended && s.time < s.duration {
            s.state = MediaState::Paused;
        }
    }

    fn state(&self) -> MediaState {
        self.lock().state
    }

    fn current_time(&self) -> f64 {
        self.lock().time
    }

    fn duration(&self) -> f64 {
        self.lock().duration
    }

    fn src(&self) -> Option<String> {
        self.lock().src.clone()
    }

    fn set_src(&self, src: &str) {
        let mut s = self.lock();
        s.duration = s.durations.get(src).copied().unwrap_or(f64::NAN);
        s.src = Some(src.to_string());
        s.time = 0.0;
        s.state = MediaState::Paused;
        s.pause_pending = false;
    }

    fn device(&self) -> DeviceProfile {
        self.device
    }

    fn style(&self) -> Option<String> {
        self.lock().style.clone()
    }

    fn set_style(&self, style: Option<&str>) {
        self.lock().style = style.map(str::to_string);
    }

    fn set_ad_loading(&self, loading: bool) {
        self.lock().loading = loading;
    }

    fn set_ads_label(&self, visible: bool) {
        self.lock().ads_label = visible;
    }

    fn remove_native_poster(&self) {
        self.lock().poster_removed = true;
    }
}
