//! rfvast: ad break scheduling for media players
//!
//! Schedules preroll, midroll and postroll ad breaks around a player's content
//! timeline. Each break runs a sequential pipeline (enablement check, content
//! snapshot and pause, cancel timeout, fetch and play) that falls back across
//! a queue of ad sources and restores content when it resolves.
//!
//! # Features
//!
//! - **Event driven**: everything is coordinated through a named-event
//!   [`EventBus`] shared with the host player
//! - **Adapter based**: the player, the ad response fetcher and the ad
//!   integrators are traits with in-memory implementations for tests
//! - **Deterministic teardown**: every timer and listener belongs to its
//!   break and goes away when the break resolves
//!
//! # Example
//!
//! ```no_run
//! use rfvast::dispatcher::{Integrators, SimulatedIntegrator, SimulatedOutcome};
//! use rfvast::platform::{SimulatedPlayer, StaticFetcher};
//! use rfvast::{attach, Collaborators, EventBus, VastOptions};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = EventBus::new();
//! let player = Arc::new(SimulatedPlayer::new(bus.clone(), "movie.mp4", 600.0));
//! let options = VastOptions::default()
//!     .with_ad_tag_url("https://ads.example.com/vast.xml")
//!     .with_midrolls(vec![120.0, 300.0]);
//! let collaborators = Collaborators::new(
//!     Arc::new(StaticFetcher::new()),
//!     Integrators::uniform(Arc::new(SimulatedIntegrator::new(SimulatedOutcome::Complete))),
//! );
//!
//! let plugin = attach(player, bus, options, collaborators)?;
//! assert_eq!(plugin.remaining_ads(), 3);
//! # Ok(())
//! # }
//! ```

use log::info;
use std::sync::Arc;
use tokio::runtime::Handle;

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod platform;
pub mod response;
pub mod scheduler;
pub mod sequencer;
pub mod snapshot;

pub use config::{AdTag, Settings, VastOptions};
pub use error::{AdError, Error, Result};
pub use events::{Event, EventBus, EventKind};
pub use orchestrator::{BreakKind, BreakRequest};

use dispatcher::{AdUnit, Integrators};
use orchestrator::{RollOutcome, Session};
use platform::{AdResponseFetcher, Player};
use response::AdResponse;
use snapshot::ContentSnapshot;

/// External services the plugin delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn AdResponseFetcher>,
    pub integrators: Integrators,
}

impl Collaborators {
    pub fn new(fetcher: Arc<dyn AdResponseFetcher>, integrators: Integrators) -> Self {
        Self {
            fetcher,
            integrators,
        }
    }
}

/// Attach the ad plugin to a player.
///
/// Validates `options`, applies the configured verbosity to the `log` facade
/// and installs the scheduler listeners on `bus`. Must be called from inside
/// a tokio runtime: breaks run as tasks on it.
///
/// # Errors
///
/// [`Error::Config`] when no usable ad source is configured and
/// [`Error::NoRuntime`] outside a runtime.
pub fn attach(
    player: Arc<dyn Player>,
    bus: EventBus,
    options: VastOptions,
    collaborators: Collaborators,
) -> Result<VastPlugin> {
    let settings = Settings::from_options(options)?;
    let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
    log::set_max_level(settings.verbosity.level_filter());

    info!(
        "attaching ads: preroll={} midrolls={:?} postroll={}",
        settings.preroll, settings.midrolls, settings.postroll
    );
    let session = Arc::new(Session::new(
        settings,
        player,
        bus,
        collaborators.fetcher,
        collaborators.integrators,
        runtime,
    ));
    session.install_scheduler();
    Ok(VastPlugin { session })
}

/// Host-facing handle of an attached plugin.
///
/// Dropping the handle detaches the plugin.
pub struct VastPlugin {
    session: Arc<Session>,
}

impl VastPlugin {
    pub fn is_enabled(&self) -> bool {
        self.session.ads_enabled()
    }

    pub fn enable(&self) {
        self.session.set_ads_enabled(true);
    }

    pub fn disable(&self) {
        self.session.set_ads_enabled(false);
    }

    /// Breaks still planned for this session.
    pub fn remaining_ads(&self) -> u32 {
        self.session.state().remaining
    }

    pub fn midrolls_played(&self) -> usize {
        self.session.state().midroll_progress.len()
    }

    pub fn is_ad_playing(&self) -> bool {
        self.session.is_ad_playing()
    }

    pub fn ads_canceled(&self) -> bool {
        self.session.ads_canceled()
    }

    /// Handle of the ad unit currently playing, if its integrator gave one.
    pub fn ad_unit(&self) -> Option<Arc<dyn AdUnit>> {
        self.session.state().ad_unit.clone()
    }

    pub fn current_response(&self) -> Option<AdResponse> {
        self.session.state().response.clone()
    }

    /// Content state saved by the running break.
    pub fn snapshot(&self) -> Option<ContentSnapshot> {
        self.session.snapshots.peek()
    }

    pub fn settings(&self) -> &Settings {
        &self.session.settings
    }

    /// Request a break outside the automatic schedule. Returns whether a
    /// break started; with ads canceled the request resolves as a failed
    /// break instead.
    pub fn play_break(&self, request: BreakRequest) -> bool {
        self.session.play_roll(request) == RollOutcome::Started
    }

    /// Remove every listener and abort a running break.
    pub fn detach(&self) {
        self.session.detach();
    }
}

impl Drop for VastPlugin {
    fn drop(&mut self) {
        self.session.detach();
    }
}
