//! Durable state for rounds, attempts, winners, and the wallet ledger.
//!
//! All invariants that must hold across concurrent writers are enforced by
//! the database, not by in-process locks:
//!
//! - one attempt per `(round, participant)` is a UNIQUE constraint
//! - one round per slot is a UNIQUE constraint on the slot instant
//! - one prize credit per `(participant, round)` is a partial UNIQUE index
//! - the winner cap and balance checks run inside IMMEDIATE transactions
//!
//! [`QuizStore`] is the public handle. Row-level queries used by the
//! lifecycle, settlement, and wallet components live in [`queries`] and run
//! inside the caller's transaction.

pub(crate) mod queries;
mod storage;
#[cfg(test)]
pub(crate) mod testing;

pub use storage::QuizStore;
pub(crate) use storage::load_question;

use chrono::{DateTime, Utc};

use crate::error::QuizError;

/// Instant to stored Unix milliseconds.
pub(crate) fn to_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Stored Unix milliseconds to instant.
pub(crate) fn from_ms(ms: i64) -> Result<DateTime<Utc>, QuizError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QuizError::corrupt(format!("timestamp out of range: {ms}")))
}
