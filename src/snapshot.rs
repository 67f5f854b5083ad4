//! Content state captured before a break and restored after it.

use crate::platform::Player;
use log::debug;
use std::sync::Mutex;

/// Player state at the moment a break interrupted content.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentSnapshot {
    pub time: f64,
    pub paused: bool,
    pub ended: bool,
    pub src: Option<String>,
    pub style: Option<String>,
}

impl ContentSnapshot {
    pub fn capture(player: &dyn Player) -> Self {
        Self {
            time: player.current_time(),
            paused: player.paused(),
            ended: player.ended(),
            src: player.src(),
            style: player.style(),
        }
    }

    /// Put the player back where content was interrupted. Playback resumes
    /// only if content was playing; ended content stays stopped.
    pub fn restore(&self, player: &dyn Player) {
        player.set_style(self.style.as_deref());
        if let Some(src) = &self.src {
            if player.src().as_deref() != Some(src.as_str()) {
                player.set_src(src);
            }
        }
        player.seek(self.time);
        if self.paused || self.ended {
            player.pause();
        } else {
            player.play();
        }
    }
}

/// Owner of the single outstanding snapshot.
#[derive(Debug, Default)]
pub struct SnapshotManager {
    slot: Mutex<Option<ContentSnapshot>>,
}

impl SnapshotManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the player's state. Refuses (returns false) while another
    /// snapshot is outstanding.
    pub fn capture(&self, player: &dyn Player) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(ContentSnapshot::capture(player));
        true
    }

    pub fn is_outstanding(&self) -> bool {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    pub fn peek(&self) -> Option<ContentSnapshot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn take(&self) -> Option<ContentSnapshot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    /// Forget the snapshot without applying it.
    pub fn discard(&self) -> bool {
        let dropped = self.take().is_some();
        if dropped {
            debug!("content snapshot discarded");
        }
        dropped
    }

    /// Apply and clear the snapshot. Returns false if there was none.
    pub fn restore(&self, player: &dyn Player) -> bool {
        // Taken before restoring: restoring emits player events whose
        // listeners may check for an outstanding snapshot.
        match self.take() {
            Some(snapshot) => {
                debug!("restoring content at {:.1}s", snapshot.time);
                snapshot.restore(player);
                true
            }
            None => false,
        }
    }
}
