//! quizround-core - scheduled quiz rounds with prize settlement
//!
//! This crate owns the parts of the quiz service that need correctness
//! guarantees under concurrent access and wall-clock timing:
//!
//! - [`schedule`]: maps the current instant and configured daily slots to
//!   round-opening decisions
//! - [`selector`]: picks the question set for a round, avoiding recent
//!   repeats and balancing answer keys across positions
//! - [`lifecycle`]: opens rounds at their slots and produces announcement
//!   effects for rounds whose prize window has closed
//! - [`settlement`]: scores attempts and resolves the race for the limited
//!   prize slots of a round
//! - [`wallet`]: per-participant balances backed by an append-only
//!   transaction log
//! - [`store`]: the `SQLite` durable state shared by all of the above
//!
//! HTTP, message delivery, and file uploads are adapters that live outside
//! this crate and call into it.
//!
//! # Example
//!
//! ```rust,no_run
//! use chrono::Utc;
//! use quizround_core::config::QuizConfig;
//! use quizround_core::lifecycle::RoundLifecycle;
//! use quizround_core::settlement::{Settlement, Submission};
//! use quizround_core::store::QuizStore;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = QuizConfig::from_file(std::path::Path::new("quizround.toml"))?;
//! let store = QuizStore::open("quizround.db")?;
//!
//! let lifecycle = RoundLifecycle::from_config(store.clone(), &config)?;
//! let report = lifecycle.tick(Utc::now())?;
//! println!("{} effects pending", report.effects.len());
//!
//! let settlement = Settlement::new(store, config.prizes.clone());
//! let submission = Submission::parse(1, "participant-1", "ABCD", 4_200)?;
//! let result = settlement.submit(&submission, Utc::now())?;
//! println!("score {}/{}", result.score, result.question_count);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod schedule;
pub mod selector;
pub mod settlement;
pub mod store;
pub mod wallet;

pub use error::QuizError;
