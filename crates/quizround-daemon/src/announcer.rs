//! Announcement delivery.
//!
//! An [`Announcer`] tells participants that a round opened or that its
//! results are final. Delivery is at-least-once: a result announcement that
//! fails is retried on a later tick, so implementations should tolerate
//! seeing the same round twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quizround_core::model::{RoundId, WinnerEntry};
use serde_json::json;
use thiserror::Error;
use tracing::info;

/// Errors from announcement delivery.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AnnounceError {
    /// The downstream channel rejected or dropped the message.
    #[error("announcement for round {round_id} not delivered: {reason}")]
    Delivery {
        /// The round being announced.
        round_id: RoundId,
        /// Why delivery failed.
        reason: String,
    },

    /// The payload could not be encoded.
    #[error("failed to encode announcement: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Delivers round announcements to an external channel.
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Announces that a round accepts submissions.
    async fn announce_round_opened(
        &self,
        round_id: RoundId,
        started_at: DateTime<Utc>,
        prize_window_ends_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<(), AnnounceError>;

    /// Announces a round's final winners.
    ///
    /// `winners` is in rank order.
    async fn announce_round_result(
        &self,
        round_id: RoundId,
        winners: &[WinnerEntry],
        participant_count: u64,
    ) -> Result<(), AnnounceError>;
}

/// Announcer that writes each announcement as a JSON log line.
///
/// Used when no external channel is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAnnouncer;

#[async_trait]
impl Announcer for LogAnnouncer {
    async fn announce_round_opened(
        &self,
        round_id: RoundId,
        started_at: DateTime<Utc>,
        prize_window_ends_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<(), AnnounceError> {
        let payload = serde_json::to_string(&json!({
            "round_id": round_id,
            "started_at": started_at,
            "prize_window_ends_at": prize_window_ends_at,
            "ends_at": ends_at,
        }))?;
        info!(round_id, %payload, "announce: round opened");
        Ok(())
    }

    async fn announce_round_result(
        &self,
        round_id: RoundId,
        winners: &[WinnerEntry],
        participant_count: u64,
    ) -> Result<(), AnnounceError> {
        let payload = serde_json::to_string(&json!({
            "round_id": round_id,
            "participant_count": participant_count,
            "winners": winners,
        }))?;
        info!(round_id, winner_count = winners.len(), %payload, "announce: round result");
        Ok(())
    }
}
