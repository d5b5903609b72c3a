//! Submission settlement.
//!
//! [`Settlement::submit`] validates, scores, and stores an attempt, then
//! resolves the race for the round's prize slots. All of it runs in one
//! IMMEDIATE transaction, so settlement of a round is serialized across
//! every connection to the store.
//!
//! The winner set is maintained by insert-then-trim: an eligible attempt is
//! inserted, then every entry beyond the `winners_per_round` fastest is
//! deleted, ordered by `(elapsed_ms, insertion order)`. Because every insert
//! trims under the same lock, the set after any arrival order is the N
//! fastest eligible attempts.
//!
//! An attempt that survives its own trim is credited immediately and the
//! credit is never revoked, even if a faster attempt later displaces it.
//! The total paid for a round can therefore exceed N prizes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::PrizeConfig;
use crate::error::QuizError;
use crate::model::{AnswerKey, Attempt, Question, QuestionId, Round, RoundId, WinnerEntry};
use crate::store::{QuizStore, load_question, queries};
use crate::wallet;

/// A participant's answers to a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// The round answered.
    pub round_id: RoundId,
    /// Opaque participant identifier.
    pub participant_id: String,
    /// Answers in position order.
    pub answers: Vec<AnswerKey>,
    /// Client-measured solve time.
    pub elapsed_ms: u64,
}

impl Submission {
    /// Creates a submission.
    #[must_use]
    pub fn new(
        round_id: RoundId,
        participant_id: impl Into<String>,
        answers: Vec<AnswerKey>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            round_id,
            participant_id: participant_id.into(),
            answers,
            elapsed_ms,
        }
    }

    /// Creates a submission from a compact answer string such as `"ACDB"`.
    ///
    /// # Errors
    ///
    /// Returns [`QuizError::InvalidAnswerKey`] for a letter outside `A`-`D`.
    pub fn parse(
        round_id: RoundId,
        participant_id: impl Into<String>,
        answers: &str,
        elapsed_ms: u64,
    ) -> Result<Self, QuizError> {
        Ok(Self::new(
            round_id,
            participant_id,
            AnswerKey::parse_sequence(answers)?,
            elapsed_ms,
        ))
    }
}

/// Prize standing of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PrizeOutcome {
    /// The attempt holds a slot in the winner set.
    Qualified {
        /// 1-based rank; provisional until the prize window closes.
        rank: u32,
        /// Amount credited for this round.
        credited: u64,
    },
    /// Correct and in time, but outside the winner set.
    Outpaced,
    /// Correct, but submitted after the prize window.
    WindowClosed,
    /// Not every answer was correct.
    Incorrect,
}

/// Per-question feedback revealed after the prize window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionReview {
    /// The question.
    pub question_id: QuestionId,
    /// The participant's answer.
    pub submitted: AnswerKey,
    /// The correct answer.
    pub correct_option: AnswerKey,
    /// Whether they match.
    pub is_correct: bool,
    /// Why the correct answer is correct.
    pub explanation: String,
}

/// How much of the answer key a result may reveal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disclosure", content = "questions", rename_all = "snake_case")]
pub enum Disclosure {
    /// The prize window is open; only the aggregate score is shown.
    Withheld,
    /// The prize window closed; per-question feedback is shown.
    Revealed(Vec<QuestionReview>),
}

/// Outcome of a submission, as shown to the participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementResult {
    /// The round answered.
    pub round_id: RoundId,
    /// The participant.
    pub participant_id: String,
    /// Correct answers.
    pub score: usize,
    /// Questions in the round.
    pub question_count: usize,
    /// Solve time as submitted.
    pub elapsed_ms: u64,
    /// Prize standing.
    pub prize: PrizeOutcome,
    /// Answer key disclosure.
    pub disclosure: Disclosure,
}

impl SettlementResult {
    fn build(
        round: &Round,
        attempt: &Attempt,
        questions: &[Question],
        prize: PrizeOutcome,
        now: DateTime<Utc>,
    ) -> Self {
        let disclosure = if now > round.prize_window_ends_at {
            Disclosure::Revealed(
                questions
                    .iter()
                    .zip(&attempt.submitted_answers)
                    .map(|(q, submitted)| QuestionReview {
                        question_id: q.id,
                        submitted: *submitted,
                        correct_option: q.correct_option,
                        is_correct: *submitted == q.correct_option,
                        explanation: q.explanation.clone(),
                    })
                    .collect(),
            )
        } else {
            Disclosure::Withheld
        };

        Self {
            round_id: round.id,
            participant_id: attempt.participant_id.clone(),
            score: attempt.score(),
            question_count: questions.len(),
            elapsed_ms: attempt.elapsed_ms,
            prize,
            disclosure,
        }
    }
}

/// Scores attempts and settles prizes.
#[derive(Debug, Clone)]
pub struct Settlement {
    store: QuizStore,
    prizes: PrizeConfig,
}

impl Settlement {
    /// Creates a settlement engine.
    #[must_use]
    pub const fn new(store: QuizStore, prizes: PrizeConfig) -> Self {
        Self { store, prizes }
    }

    /// Submits an attempt at `now`.
    ///
    /// Preconditions are checked in order, each with its own error.
    ///
    /// # Errors
    ///
    /// - [`QuizError::RoundClosed`] if the round does not exist or no longer
    ///   accepts submissions
    /// - [`QuizError::DuplicateAttempt`] if the participant already
    ///   attempted the round, including a concurrent submission that won
    ///   the insert
    /// - [`QuizError::MalformedAnswers`] if the answer count is wrong
    /// - [`QuizError::ElapsedOutOfRange`] if the solve time is too large to
    ///   store
    /// - [`QuizError::StorageConflict`] on lock contention; nothing was
    ///   stored and the caller may retry
    pub fn submit(
        &self,
        submission: &Submission,
        now: DateTime<Utc>,
    ) -> Result<SettlementResult, QuizError> {
        let round_id = submission.round_id;
        let participant_id = submission.participant_id.as_str();

        let (round, attempt, questions, prize) = self.store.write(|tx| {
            let round = queries::load_round(tx, round_id)?
                .filter(|r| r.accepts_submissions(now))
                .ok_or(QuizError::RoundClosed { round_id })?;

            if queries::load_attempt(tx, round_id, participant_id)?.is_some() {
                return Err(QuizError::DuplicateAttempt {
                    round_id,
                    participant_id: participant_id.to_string(),
                });
            }

            if submission.answers.len() != round.question_ids.len() {
                return Err(QuizError::MalformedAnswers {
                    expected: round.question_ids.len(),
                    actual: submission.answers.len(),
                });
            }
            if i64::try_from(submission.elapsed_ms).is_err() {
                return Err(QuizError::ElapsedOutOfRange {
                    elapsed_ms: submission.elapsed_ms,
                });
            }

            let questions = round
                .question_ids
                .iter()
                .map(|id| load_question(tx, *id))
                .collect::<Result<Vec<_>, _>>()?;
            let per_question: Vec<bool> = questions
                .iter()
                .zip(&submission.answers)
                .map(|(q, answer)| q.correct_option == *answer)
                .collect();
            let attempt = Attempt {
                round_id,
                participant_id: participant_id.to_string(),
                submitted_answers: submission.answers.clone(),
                is_fully_correct: per_question.iter().all(|ok| *ok),
                per_question,
                elapsed_ms: submission.elapsed_ms,
                created_at: now,
            };
            queries::insert_attempt(tx, &attempt)?;

            let prize = if !attempt.is_fully_correct {
                PrizeOutcome::Incorrect
            } else if !round.in_prize_window(now) {
                PrizeOutcome::WindowClosed
            } else {
                self.enter_winner_set(tx, &attempt, now)?
            };

            Ok((round, attempt, questions, prize))
        })?;

        debug!(
            round_id,
            participant_id,
            score = attempt.score(),
            elapsed_ms = attempt.elapsed_ms,
            prize = ?prize,
            "attempt settled"
        );
        Ok(SettlementResult::build(&round, &attempt, &questions, prize, now))
    }

    /// Inserts an eligible attempt, trims the set, and credits a survivor.
    fn enter_winner_set(
        &self,
        conn: &rusqlite::Connection,
        attempt: &Attempt,
        now: DateTime<Utc>,
    ) -> Result<PrizeOutcome, QuizError> {
        let round_id = attempt.round_id;
        let participant_id = attempt.participant_id.as_str();

        queries::insert_winner(
            conn,
            round_id,
            participant_id,
            attempt.elapsed_ms,
            self.prizes.prize_amount,
        )?;
        let evicted = queries::trim_winners(conn, round_id, self.prizes.winners_per_round)?;
        if evicted.iter().any(|p| p == participant_id) {
            return Ok(PrizeOutcome::Outpaced);
        }
        for displaced in &evicted {
            info!(round_id, participant_id = %displaced, "winner displaced, credit kept");
        }

        let rank = rank_of(&queries::winner_entries(conn, round_id)?, participant_id)?;
        let amount = self.prizes.prize_amount;
        let credited = if wallet::credit_in(conn, participant_id, amount, round_id, now)? {
            amount
        } else {
            0
        };
        Ok(PrizeOutcome::Qualified { rank, credited })
    }

    /// The stored result of a participant's attempt, as visible at `now`.
    ///
    /// Returns `None` if the participant has not attempted the round.
    ///
    /// # Errors
    ///
    /// Returns [`QuizError::RoundNotFound`] for an unknown round.
    pub fn result(
        &self,
        round_id: RoundId,
        participant_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SettlementResult>, QuizError> {
        self.store.read(|conn| {
            let round = queries::load_round(conn, round_id)?
                .ok_or(QuizError::RoundNotFound { round_id })?;
            let Some(attempt) = queries::load_attempt(conn, round_id, participant_id)? else {
                return Ok(None);
            };
            let questions = round
                .question_ids
                .iter()
                .map(|id| load_question(conn, *id))
                .collect::<Result<Vec<_>, _>>()?;

            let entries = queries::winner_entries(conn, round_id)?;
            let prize = match entries.iter().find(|e| e.participant_id == participant_id) {
                Some(entry) => PrizeOutcome::Qualified {
                    rank: entry.rank,
                    credited: entry.prize_amount,
                },
                None if !attempt.is_fully_correct => PrizeOutcome::Incorrect,
                None if round.in_prize_window(attempt.created_at) => PrizeOutcome::Outpaced,
                None => PrizeOutcome::WindowClosed,
            };

            Ok(Some(SettlementResult::build(&round, &attempt, &questions, prize, now)))
        })
    }

    /// The round's winner set in rank order.
    ///
    /// While the prize window is open the set is provisional.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn standings(&self, round_id: RoundId) -> Result<Vec<WinnerEntry>, QuizError> {
        self.store.read(|conn| queries::winner_entries(conn, round_id))
    }

    /// Whether the participant holds an entry in the round's winner set.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn is_winner(&self, round_id: RoundId, participant_id: &str) -> Result<bool, QuizError> {
        self.store.read(|conn| queries::is_winner(conn, round_id, participant_id))
    }

    /// Attaches a payout proof, and optionally a payout destination, to a
    /// winner entry.
    ///
    /// # Errors
    ///
    /// Returns [`QuizError::NotAWinner`] if the participant holds no entry
    /// for the round.
    pub fn attach_proof(
        &self,
        round_id: RoundId,
        participant_id: &str,
        proof_reference: &str,
        payout_destination: Option<&str>,
    ) -> Result<(), QuizError> {
        let attached = self.store.write(|tx| {
            queries::attach_proof(
                tx,
                round_id,
                participant_id,
                proof_reference,
                payout_destination,
            )
        })?;
        if !attached {
            return Err(QuizError::NotAWinner {
                round_id,
                participant_id: participant_id.to_string(),
            });
        }
        info!(round_id, participant_id, "payout proof attached");
        Ok(())
    }
}

fn rank_of(entries: &[WinnerEntry], participant_id: &str) -> Result<u32, QuizError> {
    entries
        .iter()
        .find(|e| e.participant_id == participant_id)
        .map(|e| e.rank)
        .ok_or_else(|| QuizError::corrupt(format!("winner entry for {participant_id} vanished")))
}
