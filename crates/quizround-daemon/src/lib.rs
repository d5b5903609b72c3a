//! quizround-daemon - drives scheduled quiz rounds.
//!
//! The daemon owns the clock. On every interval it asks
//! [`RoundLifecycle::tick`](quizround_core::lifecycle::RoundLifecycle::tick)
//! what to do, then hands the returned effects to an [`EffectRunner`] which
//! delivers them through an [`Announcer`] and records the outcome.
//!
//! # Modules
//!
//! - [`announcer`]: delivery of round announcements to the outside world
//! - [`driver`]: the tick loop and effect runner
//! - [`state`]: shutdown flag shared between the loop and signal handlers

pub mod announcer;
pub mod driver;
pub mod state;

pub use announcer::{AnnounceError, Announcer, LogAnnouncer};
pub use driver::{EffectRunner, RunSummary, TickDriver};
pub use state::{DaemonState, SharedState};
