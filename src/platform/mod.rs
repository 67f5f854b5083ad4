//! Host-facing surface: the media player, the device it runs on and the ad
//! response fetcher.
//!
//! These are the collaborators the engine drives but does not implement. Each
//! trait ships with an in-memory implementation (`SimulatedPlayer`,
//! `StaticFetcher`) that keeps tests and the simulator deterministic.

pub mod device;
pub mod fetch;
pub mod media;

pub use device::{DeviceKind, DeviceProfile};
pub use fetch::{AdResponseFetcher, StaticFetcher};
pub use media::{MediaState, Player, SimulatedPlayer};
