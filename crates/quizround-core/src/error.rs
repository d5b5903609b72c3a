//! Error taxonomy shared by every core operation.
//!
//! Each variant is a distinct, typed failure reported to the caller. Only
//! [`QuizError::StorageConflict`] is transient; callers of settlement and the
//! wallet retry on it, the core never retries internally.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::model::{RoundId, TransactionStatus};

/// Errors returned by the quiz core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuizError {
    /// The round does not exist or no longer accepts submissions.
    #[error("round {round_id} is closed for submissions")]
    RoundClosed {
        /// The round that was targeted.
        round_id: RoundId,
    },

    /// The participant already has an attempt stored for this round.
    #[error("participant {participant_id} already attempted round {round_id}")]
    DuplicateAttempt {
        /// The round that was targeted.
        round_id: RoundId,
        /// The participant that submitted twice.
        participant_id: String,
    },

    /// The number of submitted answers does not match the round.
    #[error("expected {expected} answers, got {actual}")]
    MalformedAnswers {
        /// Number of questions in the round.
        expected: usize,
        /// Number of answers submitted.
        actual: usize,
    },

    /// The reported solve time cannot be stored.
    #[error("elapsed time {elapsed_ms}ms out of range")]
    ElapsedOutOfRange {
        /// The rejected solve time.
        elapsed_ms: u64,
    },

    /// A credit must move a positive amount.
    #[error("invalid credit amount {amount} for {participant_id}")]
    InvalidAmount {
        /// The participant to credit.
        participant_id: String,
        /// The rejected amount.
        amount: u64,
    },

    /// An answer was not one of the option keys `A`-`D`.
    #[error("invalid answer key: {value:?}")]
    InvalidAnswerKey {
        /// The rejected input.
        value: String,
    },

    /// Not enough questions exist to build a round.
    #[error("insufficient content: {available} questions available, {required} required")]
    InsufficientContent {
        /// Questions currently in the pool.
        available: usize,
        /// Questions needed for one round.
        required: usize,
    },

    /// The wallet balance is below the minimum withdrawal.
    #[error(
        "insufficient balance for {participant_id}: balance={balance}, minimum withdrawal={minimum}"
    )]
    InsufficientBalance {
        /// The wallet owner.
        participant_id: String,
        /// Balance at the time of the request.
        balance: u64,
        /// Configured minimum withdrawal.
        minimum: u64,
    },

    /// The participant does not hold a winner entry for the round.
    #[error("participant {participant_id} is not a winner of round {round_id}")]
    NotAWinner {
        /// The round that was targeted.
        round_id: RoundId,
        /// The participant that is not a winner.
        participant_id: String,
    },

    /// Transient contention in the storage layer; the caller should retry.
    #[error("storage conflict: {details}")]
    StorageConflict {
        /// Description of the conflicting operation.
        details: String,
    },

    /// A round looked up by id does not exist.
    #[error("round not found: {round_id}")]
    RoundNotFound {
        /// The missing round.
        round_id: RoundId,
    },

    /// A ledger transaction looked up by id does not exist.
    #[error("transaction not found: {transaction_id}")]
    TransactionNotFound {
        /// The missing transaction.
        transaction_id: u64,
    },

    /// A withdrawal was settled twice or was never pending.
    #[error("withdrawal {transaction_id} is {status}, not pending")]
    WithdrawalNotPending {
        /// The withdrawal transaction.
        transaction_id: u64,
        /// Its current status.
        status: TransactionStatus,
    },

    /// Stored data failed to decode.
    #[error("corrupt stored data: {details}")]
    Corrupt {
        /// What failed to decode.
        details: String,
    },

    /// The in-process connection lock was poisoned by a panicking thread.
    #[error("connection lock poisoned")]
    LockPoisoned,

    /// Non-transient database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[source] rusqlite::Error),
}

impl QuizError {
    /// Returns `true` when retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StorageConflict { .. })
    }

    pub(crate) fn corrupt(details: impl Into<String>) -> Self {
        Self::Corrupt {
            details: details.into(),
        }
    }
}

impl From<rusqlite::Error> for QuizError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Self::StorageConflict {
                details: err.to_string(),
            },
            _ => Self::Database(err),
        }
    }
}

/// Returns `true` if `err` is a UNIQUE or PRIMARY KEY constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        },
        _ => false,
    }
}
