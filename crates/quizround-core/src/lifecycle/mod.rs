//! Round lifecycle manager.
//!
//! [`RoundLifecycle::tick`] is the only entry point the periodic driver
//! calls. A tick is idempotent and may overlap with submissions:
//!
//! 1. Every unannounced round whose prize window has closed produces an
//!    [`Effect::AnnounceRoundResult`]. The round is only flagged announced
//!    when the effect runner reports delivery through
//!    [`RoundLifecycle::mark_announced`], so delivery is at-least-once.
//! 2. The schedule is asked whether a slot is due. If so, questions are
//!    selected and the round is created inside one IMMEDIATE transaction
//!    that rechecks coverage, so concurrent drivers open a slot once.
//! 3. Every round still in its prize window whose opening was not reported
//!    delivered through [`RoundLifecycle::mark_opened_announced`] produces
//!    an [`Effect::AnnounceRoundOpened`], including a round opened by this
//!    tick.
//!
//! The tick never performs I/O beyond the store. Effects are returned to the
//! caller.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, QuizConfig, SelectionConfig};
use crate::error::QuizError;
use crate::model::{QuestionPrompt, Round, RoundId, RoundState, WinnerEntry};
use crate::schedule::{Schedule, SlotDecision};
use crate::selector;
use crate::store::{QuizStore, load_question, queries};

/// Side effect requested by a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    /// A round was opened and participants may be notified.
    AnnounceRoundOpened {
        /// The new round.
        round_id: RoundId,
        /// When submissions open.
        started_at: DateTime<Utc>,
        /// When prize eligibility ends.
        prize_window_ends_at: DateTime<Utc>,
        /// When submissions close.
        ends_at: DateTime<Utc>,
    },
    /// A round's prize window closed and its results are final.
    AnnounceRoundResult {
        /// The finished round.
        round_id: RoundId,
        /// Final winner set in rank order.
        winners: Vec<WinnerEntry>,
        /// Number of participants who submitted an attempt.
        participant_count: u64,
    },
}

impl Effect {
    /// The round the effect refers to.
    #[must_use]
    pub const fn round_id(&self) -> RoundId {
        match self {
            Self::AnnounceRoundOpened { round_id, .. }
            | Self::AnnounceRoundResult { round_id, .. } => *round_id,
        }
    }
}

/// Outcome of a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// The instant the tick evaluated.
    pub now: DateTime<Utc>,
    /// The schedule's decision at `now`.
    pub decision: SlotDecision,
    /// The round this tick created, if any.
    pub opened: Option<Round>,
    /// Effects for the effect runner, results first.
    pub effects: Vec<Effect>,
}

/// What happened after a failed result delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceRetry {
    /// The round stays pending and is retried on a later tick.
    RetryLater {
        /// Failed deliveries so far.
        attempts: u32,
    },
    /// The retry budget is spent and the round was marked announced.
    GaveUp {
        /// Failed deliveries so far.
        attempts: u32,
    },
    /// Another runner already announced the round.
    AlreadyAnnounced,
}

/// The round open at some instant, without answer keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrentRound {
    /// The round.
    pub round: Round,
    /// Its state at the queried instant.
    pub state: RoundState,
    /// Prompts in position order.
    pub questions: Vec<QuestionPrompt>,
}

/// Aggregate statistics for a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundStats {
    /// The round.
    pub round_id: RoundId,
    /// Its state at the queried instant.
    pub state: RoundState,
    /// Participants with a stored attempt.
    pub participant_count: u64,
    /// Attempts with every position correct.
    pub fully_correct_count: u64,
    /// Fastest fully correct solve time; withheld while the prize window is
    /// open.
    pub fastest_correct_ms: Option<u64>,
}

/// Opens rounds on schedule and surfaces rounds ready for announcement.
#[derive(Debug, Clone)]
pub struct RoundLifecycle {
    store: QuizStore,
    schedule: Schedule,
    selection: SelectionConfig,
}

impl RoundLifecycle {
    /// Creates a lifecycle manager.
    #[must_use]
    pub const fn new(store: QuizStore, schedule: Schedule, selection: SelectionConfig) -> Self {
        Self {
            store,
            schedule,
            selection,
        }
    }

    /// Creates a lifecycle manager from the full configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the schedule is invalid.
    pub fn from_config(store: QuizStore, config: &QuizConfig) -> Result<Self, ConfigError> {
        let schedule = Schedule::from_config(&config.schedule)?;
        Ok(Self::new(store, schedule, config.selection.clone()))
    }

    /// The schedule rounds are opened on.
    #[must_use]
    pub const fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// Runs one lifecycle step at `now`.
    ///
    /// Running out of questions is logged and leaves the slot unopened; it
    /// does not fail the tick.
    ///
    /// # Errors
    ///
    /// Returns storage errors. [`QuizError::StorageConflict`] is transient
    /// and the next tick retries.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, QuizError> {
        self.tick_with(now, &mut rand::thread_rng())
    }

    /// [`RoundLifecycle::tick`] with a caller-supplied random source.
    ///
    /// # Errors
    ///
    /// See [`RoundLifecycle::tick`].
    pub fn tick_with<R: Rng + ?Sized>(
        &self,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<TickReport, QuizError> {
        let mut effects = self.pending_results(now)?;

        let decision = self.schedule.should_open_round(now, |from, to| {
            self.store.read(|conn| queries::round_started_between(conn, from, to))
        })?;

        let opened = match decision {
            SlotDecision::Open { slot_at } => match self.open_round(slot_at, rng) {
                Ok(opened) => opened,
                Err(QuizError::InsufficientContent {
                    available,
                    required,
                }) => {
                    warn!(
                        slot_at = %slot_at,
                        available,
                        required,
                        "not enough questions to open round"
                    );
                    None
                },
                Err(e) => return Err(e),
            },
            SlotDecision::AlreadyOpened { slot_at, round_id } => {
                debug!(slot_at = %slot_at, round_id, "slot already covered");
                None
            },
            SlotDecision::Idle { .. } => None,
        };

        let unannounced = self
            .store
            .read(|conn| queries::rounds_pending_open_announcement(conn, now))?;
        effects.extend(unannounced.into_iter().map(|round| Effect::AnnounceRoundOpened {
            round_id: round.id,
            started_at: round.started_at,
            prize_window_ends_at: round.prize_window_ends_at,
            ends_at: round.ends_at,
        }));

        Ok(TickReport {
            now,
            decision,
            opened,
            effects,
        })
    }

    fn pending_results(&self, now: DateTime<Utc>) -> Result<Vec<Effect>, QuizError> {
        self.store.read(|conn| {
            queries::rounds_pending_announcement(conn, now)?
                .into_iter()
                .map(|round| -> Result<Effect, QuizError> {
                    let winners = queries::winner_entries(conn, round.id)?;
                    let counts = queries::attempt_counts(conn, round.id)?;
                    Ok(Effect::AnnounceRoundResult {
                        round_id: round.id,
                        winners,
                        participant_count: counts.participants,
                    })
                })
                .collect()
        })
    }

    /// Creates the round for `slot_at` unless one already covers it.
    fn open_round<R: Rng + ?Sized>(
        &self,
        slot_at: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Option<Round>, QuizError> {
        let timing = self.schedule.round_timing(slot_at);
        let (from, to) = self.schedule.coverage_window(slot_at);
        let keys = selector::balanced_keys(rng);

        let opened = self.store.write(|tx| {
            if let Some(existing) = queries::round_started_between(tx, from, to)? {
                debug!(round_id = existing, "slot opened concurrently");
                return Ok(None);
            }
            if let Some(active) = queries::round_overlapping(tx, timing.started_at, timing.ends_at)? {
                warn!(
                    round_id = active,
                    slot_at = %slot_at,
                    "another round is still open, skipping slot"
                );
                return Ok(None);
            }

            let pool = queries::candidates(tx)?;
            let recent = queries::recent_question_ids(tx, self.selection.recent_rounds_excluded)?;
            let selection = selector::select(&pool, &recent, &keys, rng)?;
            if !selection.is_balanced() {
                warn!(
                    reused_recent = selection.reused_recent,
                    off_key = selection.off_key,
                    "question selection relaxed its constraints"
                );
            }

            let Some(round_id) = queries::insert_round(tx, &timing, &selection.question_ids)? else {
                return Ok(None);
            };
            queries::load_round(tx, round_id)?
                .map(Some)
                .ok_or(QuizError::RoundNotFound { round_id })
        })?;

        if let Some(round) = &opened {
            info!(
                round_id = round.id,
                started_at = %round.started_at,
                ends_at = %round.ends_at,
                "round opened"
            );
        }
        Ok(opened)
    }

    /// Flags a round's opening as delivered so later ticks stop re-emitting
    /// [`Effect::AnnounceRoundOpened`] for it.
    ///
    /// Returns `false` if the opening was already recorded.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn mark_opened_announced(&self, round_id: RoundId) -> Result<bool, QuizError> {
        let changed = self
            .store
            .write(|tx| queries::mark_opened_announced(tx, round_id))?;
        if changed {
            debug!(round_id, "round opening announced");
        }
        Ok(changed)
    }

    /// Flags a round announced and records its first-place summary.
    ///
    /// Returns `false` if the round was already announced, which makes
    /// repeated delivery reports harmless.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn mark_announced(&self, round_id: RoundId) -> Result<bool, QuizError> {
        let (changed, summary) = self.store.write(|tx| {
            let summary = queries::winner_summary(tx, round_id)?;
            Ok((queries::mark_announced(tx, round_id, &summary)?, summary))
        })?;
        if changed {
            info!(
                round_id,
                first_place = summary.first_place.as_deref().unwrap_or("-"),
                winner_count = summary.winner_count,
                "round announced"
            );
        }
        Ok(changed)
    }

    /// Records a failed result delivery.
    ///
    /// Once `max_attempts` deliveries have failed the round is marked
    /// announced anyway so its state transition completes.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn record_announce_failure(
        &self,
        round_id: RoundId,
        max_attempts: u32,
    ) -> Result<AnnounceRetry, QuizError> {
        let outcome = self.store.write(|tx| {
            let Some(attempts) = queries::record_announce_failure(tx, round_id)? else {
                return Ok(AnnounceRetry::AlreadyAnnounced);
            };
            if attempts < max_attempts {
                return Ok(AnnounceRetry::RetryLater { attempts });
            }
            let summary = queries::winner_summary(tx, round_id)?;
            queries::mark_announced(tx, round_id, &summary)?;
            Ok(AnnounceRetry::GaveUp { attempts })
        })?;

        if let AnnounceRetry::GaveUp { attempts } = outcome {
            warn!(round_id, attempts, "giving up on result announcement");
        }
        Ok(outcome)
    }

    /// Loads a round.
    ///
    /// # Errors
    ///
    /// Returns [`QuizError::RoundNotFound`] for an unknown id.
    pub fn round(&self, round_id: RoundId) -> Result<Round, QuizError> {
        self.store
            .read(|conn| queries::load_round(conn, round_id))?
            .ok_or(QuizError::RoundNotFound { round_id })
    }

    /// The round accepting submissions at `now`, with its prompts.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn current_round(&self, now: DateTime<Utc>) -> Result<Option<CurrentRound>, QuizError> {
        self.store.read(|conn| {
            let Some(round) = queries::current_round(conn, now)? else {
                return Ok(None);
            };
            let questions = round
                .question_ids
                .iter()
                .map(|id| load_question(conn, *id).map(QuestionPrompt::from))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(CurrentRound {
                state: round.state_at(now),
                round,
                questions,
            }))
        })
    }

    /// The most recently announced rounds, newest first.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn history(&self, limit: u32) -> Result<Vec<Round>, QuizError> {
        self.store.read(|conn| queries::announced_rounds(conn, limit))
    }

    /// Attempt statistics for a round at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`QuizError::RoundNotFound`] for an unknown id.
    pub fn round_stats(
        &self,
        round_id: RoundId,
        now: DateTime<Utc>,
    ) -> Result<RoundStats, QuizError> {
        self.store.read(|conn| {
            let round = queries::load_round(conn, round_id)?
                .ok_or(QuizError::RoundNotFound { round_id })?;
            let counts = queries::attempt_counts(conn, round_id)?;
            let window_closed = now > round.prize_window_ends_at;
            Ok(RoundStats {
                round_id,
                state: round.state_at(now),
                participant_count: counts.participants,
                fully_correct_count: counts.fully_correct,
                fastest_correct_ms: counts.fastest_correct_ms.filter(|_| window_closed),
            })
        })
    }
}
