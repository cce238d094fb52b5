//! XR Player - dual-renderer playback engine.
//!
//! One logical timeline is presented through two alternate renderers: a plain
//! audio element and an immersive 360° video element, switchable at runtime.
//! The crate holds the engine behind that switch:
//!
//! - [`state`]: reactive state store every component and observer agrees on
//! - [`preload`]: readiness gate deciding when media is safe to play
//! - [`xr`]: audio-only / XR state machine and the clock mirroring
//! - [`player`]: a session wiring the three to two media elements
//!
//! Media elements are reached only through [`media::MediaElement`]; the
//! in-memory [`media::SimulatedMedia`] backs the CLI and the tests.

pub mod cli;
pub mod config;
pub mod error;
pub mod media;
pub mod model;
pub mod player;
pub mod preload;
pub mod state;
#[cfg(test)]
pub mod test_utils;
pub mod xr;
