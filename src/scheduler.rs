//! Decides when breaks are requested: preroll on first play, midrolls from
//! the content timeline and postroll at the end of content.

use crate::events::EventKind;
use crate::orchestrator::{BreakKind, BreakRequest, RollOutcome, Session};
use log::{debug, info, warn};
use std::sync::Arc;

/// A midroll fires this many seconds before its trigger time.
pub const MIDROLL_LOOKAHEAD: f64 = 0.5;

/// Content counts as finished within this many seconds of its duration.
pub const CONTENT_END_TOLERANCE: f64 = 1.0;

/// Midrolls are usable only if every entry is a finite number below the
/// content duration and the list is strictly increasing.
pub fn validate_midrolls(midrolls: &[f64], duration: f64) -> bool {
    midrolls.iter().all(|m| m.is_finite() && *m < duration)
        && midrolls.windows(2).all(|w| w[0] < w[1])
}

impl Session {
    /// Register the session-long listeners that drive the schedule.
    pub(crate) fn install_scheduler(self: &Arc<Self>) {
        let mut ids = Vec::new();

        if self.settings.preroll {
            self.arm_first_play_gate();
            let s = Arc::clone(self);
            ids.push(self.bus.on(EventKind::FirstPlay, move |_| {
                s.play_roll(BreakRequest::new(BreakKind::Preroll));
            }));
        } else {
            // Content start is announced once here; content end is only
            // tracked after a break.
            let s = Arc::clone(self);
            let id = self.bus.once_any(&[EventKind::Playing], move |_| {
                if !s.is_ad_playing() {
                    s.bus.emit(EventKind::ContentStart);
                }
            });
            self.replace_content_listener(id);
        }

        if self.settings.play_ad_always {
            let s = Arc::clone(self);
            ids.push(self.bus.on(EventKind::ContentEnd, move |_| {
                // Reset on the next turn, after every contentEnd listener ran
                let bus = s.bus.clone();
                s.runtime.spawn(async move {
                    bus.emit(EventKind::Reset);
                });
            }));
        }

        let s = Arc::clone(self);
        ids.push(self.bus.on(EventKind::Ended, move |_| {
            if !s.is_ad_playing() && s.near_content_end() {
                s.bus.emit(EventKind::PostrollGo);
            }
        }));

        if self.settings.postroll {
            let s = Arc::clone(self);
            ids.push(self.bus.once_any(&[EventKind::PostrollGo], move |_| {
                if s.near_content_end() {
                    s.play_roll(BreakRequest::new(BreakKind::Postroll));
                }
            }));
        }

        let s = Arc::clone(self);
        ids.push(self.bus.on(EventKind::Playing, move |_| {
            if !s.is_ad_playing() {
                s.watch_midrolls();
            }
        }));

        let s = Arc::clone(self);
        ids.push(self.bus.on(EventKind::Paused, move |_| {
            if !s.is_ad_playing() {
                s.disarm_midroll_watcher();
            }
        }));

        let s = Arc::clone(self);
        ids.push(self.bus.on(EventKind::Reset, move |_| s.reset()));

        self.state().listeners.extend(ids);
    }

    /// The first `playing` becomes a `vast.firstPlay`.
    fn arm_first_play_gate(self: &Arc<Self>) {
        let bus = self.bus.clone();
        let id = self
            .bus
            .once_any(&[EventKind::Playing], move |_| bus.emit(EventKind::FirstPlay));
        let previous = self.state().first_play_gate.replace(id);
        if let Some(previous) = previous {
            self.bus.off(previous);
        }
    }

    fn near_content_end(&self) -> bool {
        self.player.current_time() > self.player.duration() - CONTENT_END_TOLERANCE
    }

    /// Start watching the timeline for midrolls, if there are usable ones.
    pub(crate) fn watch_midrolls(self: &Arc<Self>) {
        if self.settings.midrolls.is_empty() {
            return;
        }
        if validate_midrolls(&self.settings.midrolls, self.player.duration()) {
            self.arm_midroll_watcher();
        } else {
            warn!("midrolls {:?} are not usable, skipping", self.settings.midrolls);
        }
    }

    /// Registering twice keeps the existing watcher.
    fn arm_midroll_watcher(self: &Arc<Self>) {
        let mut st = self.state();
        if st.midroll_watcher.is_some() || st.detached {
            return;
        }
        let s = Arc::clone(self);
        st.midroll_watcher = Some(self.bus.on(EventKind::TimeUpdate, move |_| s.check_midrolls()));
    }

    pub(crate) fn disarm_midroll_watcher(&self) {
        let id = self.state().midroll_watcher.take();
        if let Some(id) = id {
            self.bus.off(id);
        }
    }

    fn check_midrolls(self: &Arc<Self>) {
        let (ad_playing, played) = {
            let st = self.state();
            (st.ad_playing, st.midroll_progress.len())
        };
        if ad_playing {
            self.disarm_midroll_watcher();
            return;
        }
        let Some(&trigger) = self.settings.midrolls.get(played) else {
            self.disarm_midroll_watcher();
            return;
        };

        let now = self.player.current_time();
        if now > trigger - MIDROLL_LOOKAHEAD && !self.player.paused() {
            self.disarm_midroll_watcher();
            debug!("midroll #{} due at {}s, now {:.2}s", played + 1, trigger, now);
            // Recorded up front: the break may resolve before play_roll returns
            self.state().midroll_progress.push(true);
            match self.play_roll(BreakRequest::new(BreakKind::Midroll)) {
                RollOutcome::Started => {}
                // No break runs to re-arm the watcher for the next midroll
                RollOutcome::Resolved => self.arm_midroll_watcher(),
                RollOutcome::Refused => {
                    self.state().midroll_progress.pop();
                }
            }
        }
    }

    /// Hard reset: no snapshot is restored and no further breaks fire.
    fn reset(self: &Arc<Self>) {
        info!("ad session reset");
        self.snapshots.discard();
        self.cancel_ads();
        self.state().remaining = 0;
        if self.settings.preroll {
            self.arm_first_play_gate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increasing_midrolls_below_duration_are_valid() {
        assert!(validate_midrolls(&[10.0, 30.0], 60.0));
        assert!(validate_midrolls(&[], 60.0));
        assert!(validate_midrolls(&[0.0], 60.0));
    }

    #[test]
    fn invalid_midrolls_are_rejected() {
        assert!(!validate_midrolls(&[10.0, 60.0], 60.0));
        assert!(!validate_midrolls(&[30.0, 10.0], 60.0));
        assert!(!validate_midrolls(&[10.0, 10.0], 60.0));
        assert!(!validate_midrolls(&[f64::NAN], 60.0));
        assert!(!validate_midrolls(&[10.0], f64::NAN));
    }
}
