//! Row-level queries over rounds, attempts, and winner entries.
//!
//! Every function takes a `&Connection` so it can run inside a transaction
//! opened by [`QuizStore::write`](super::QuizStore). None of them open
//! transactions of their own.

// SQLite returns i64 for row IDs and counts, but they're always non-negative.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::{from_ms, to_ms};
use crate::error::{QuizError, is_unique_violation};
use crate::model::{
    AnswerKey, Attempt, QuestionId, Round, RoundId, WinnerEntry, WinnerSummary,
};
use crate::schedule::RoundTiming;
use crate::selector::Candidate;

const ROUND_COLUMNS: &str = "id, slot_at_ms, started_at_ms, ends_at_ms, prize_ends_at_ms, \
     announced, announce_attempts, first_place_id, first_place_elapsed_ms, winner_count, \
     opened_announced";

/// Raw `rounds` row before question ids are attached.
struct RoundRow {
    id: i64,
    slot_at_ms: i64,
    started_at_ms: i64,
    ends_at_ms: i64,
    prize_ends_at_ms: i64,
    announced: bool,
    announce_attempts: i64,
    first_place_id: Option<String>,
    first_place_elapsed_ms: Option<i64>,
    winner_count: Option<i64>,
    opened_announced: bool,
}

impl RoundRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            slot_at_ms: row.get(1)?,
            started_at_ms: row.get(2)?,
            ends_at_ms: row.get(3)?,
            prize_ends_at_ms: row.get(4)?,
            announced: row.get(5)?,
            announce_attempts: row.get(6)?,
            first_place_id: row.get(7)?,
            first_place_elapsed_ms: row.get(8)?,
            winner_count: row.get(9)?,
            opened_announced: row.get(10)?,
        })
    }

    fn into_round(self, question_ids: Vec<QuestionId>) -> Result<Round, QuizError> {
        let winner_summary = self.announced.then(|| WinnerSummary {
            first_place: self.first_place_id,
            first_place_elapsed_ms: self.first_place_elapsed_ms.map(|ms| ms as u64),
            winner_count: self.winner_count.unwrap_or(0) as u32,
        });

        Ok(Round {
            id: self.id as RoundId,
            slot_at: from_ms(self.slot_at_ms)?,
            question_ids,
            started_at: from_ms(self.started_at_ms)?,
            ends_at: from_ms(self.ends_at_ms)?,
            prize_window_ends_at: from_ms(self.prize_ends_at_ms)?,
            opened_announced: self.opened_announced,
            announced: self.announced,
            announce_attempts: self.announce_attempts as u32,
            winner_summary,
        })
    }
}

fn attach_questions(conn: &Connection, row: RoundRow) -> Result<Round, QuizError> {
    let mut stmt = conn.prepare_cached(
        "SELECT question_id FROM round_questions WHERE round_id = ?1 ORDER BY position",
    )?;
    let ids = stmt
        .query_map(params![row.id], |r| r.get::<_, i64>(0))?
        .map(|id| id.map(|id| id as QuestionId))
        .collect::<Result<Vec<_>, _>>()?;
    row.into_round(ids)
}

fn query_rounds(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<Round>, QuizError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, RoundRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|row| attach_questions(conn, row))
        .collect()
}

/// Id of any round whose start lies in `[from, to]`.
pub(crate) fn round_started_between(
    conn: &Connection,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Option<RoundId>, QuizError> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT id FROM rounds
             WHERE started_at_ms BETWEEN ?1 AND ?2
             ORDER BY started_at_ms
             LIMIT 1",
            params![to_ms(from), to_ms(to)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(|id| id as RoundId))
}

/// Inserts a round and its question positions.
///
/// Returns `None` if a round for the same slot already exists.
pub(crate) fn insert_round(
    conn: &Connection,
    timing: &RoundTiming,
    question_ids: &[QuestionId],
) -> Result<Option<RoundId>, QuizError> {
    let inserted = conn.execute(
        "INSERT INTO rounds (slot_at_ms, started_at_ms, ends_at_ms, prize_ends_at_ms)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            to_ms(timing.slot_at),
            to_ms(timing.started_at),
            to_ms(timing.ends_at),
            to_ms(timing.prize_window_ends_at),
        ],
    );
    match inserted {
        Ok(_) => {},
        Err(e) if is_unique_violation(&e) => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let round_id = conn.last_insert_rowid();

    let mut stmt = conn.prepare_cached(
        "INSERT INTO round_questions (round_id, position, question_id) VALUES (?1, ?2, ?3)",
    )?;
    for (position, question_id) in question_ids.iter().enumerate() {
        stmt.execute(params![round_id, position as i64, question_id])?;
    }

    Ok(Some(round_id as RoundId))
}

/// Loads one round.
pub(crate) fn load_round(conn: &Connection, round_id: RoundId) -> Result<Option<Round>, QuizError> {
    let row = conn
        .query_row(
            &format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE id = ?1"),
            params![round_id],
            RoundRow::from_row,
        )
        .optional()?;
    row.map(|row| attach_questions(conn, row)).transpose()
}

/// The round accepting submissions at `now`, if any.
pub(crate) fn current_round(conn: &Connection, now: DateTime<Utc>) -> Result<Option<Round>, QuizError> {
    let ms = to_ms(now);
    Ok(query_rounds(
        conn,
        &format!(
            "SELECT {ROUND_COLUMNS} FROM rounds
             WHERE started_at_ms <= ?1 AND ?1 < ends_at_ms
             ORDER BY started_at_ms DESC
             LIMIT 1"
        ),
        params![ms],
    )?
    .pop())
}

/// Id of any round whose submission window intersects `[started_at, ends_at)`.
pub(crate) fn round_overlapping(
    conn: &Connection,
    started_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
) -> Result<Option<RoundId>, QuizError> {
    let id: Option<i64> = conn
        .query_row(
            "SELECT id FROM rounds
             WHERE started_at_ms < ?2 AND ?1 < ends_at_ms
             LIMIT 1",
            params![to_ms(started_at), to_ms(ends_at)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id.map(|id| id as RoundId))
}

/// Most recently announced rounds, newest first.
pub(crate) fn announced_rounds(conn: &Connection, limit: u32) -> Result<Vec<Round>, QuizError> {
    query_rounds(
        conn,
        &format!(
            "SELECT {ROUND_COLUMNS} FROM rounds
             WHERE announced = 1
             ORDER BY started_at_ms DESC
             LIMIT ?1"
        ),
        params![limit],
    )
}

/// Unannounced rounds whose prize window closed before `now`, oldest first.
pub(crate) fn rounds_pending_announcement(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<Round>, QuizError> {
    query_rounds(
        conn,
        &format!(
            "SELECT {ROUND_COLUMNS} FROM rounds
             WHERE announced = 0 AND prize_ends_at_ms < ?1
             ORDER BY prize_ends_at_ms"
        ),
        params![to_ms(now)],
    )
}

/// Rounds still in their prize window whose opening was not delivered,
/// oldest first.
pub(crate) fn rounds_pending_open_announcement(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<Round>, QuizError> {
    query_rounds(
        conn,
        &format!(
            "SELECT {ROUND_COLUMNS} FROM rounds
             WHERE opened_announced = 0 AND started_at_ms <= ?1 AND ?1 <= prize_ends_at_ms
             ORDER BY started_at_ms"
        ),
        params![to_ms(now)],
    )
}

/// Sets the opened-announced flag.
///
/// Returns `false` if it was already set.
pub(crate) fn mark_opened_announced(
    conn: &Connection,
    round_id: RoundId,
) -> Result<bool, QuizError> {
    let changed = conn.execute(
        "UPDATE rounds SET opened_announced = 1 WHERE id = ?1 AND opened_announced = 0",
        params![round_id],
    )?;
    Ok(changed == 1)
}

/// Questions used by the `rounds` most recently started rounds.
pub(crate) fn recent_question_ids(
    conn: &Connection,
    rounds: u32,
) -> Result<HashSet<QuestionId>, QuizError> {
    let mut stmt = conn.prepare(
        "SELECT question_id FROM round_questions
         WHERE round_id IN (SELECT id FROM rounds ORDER BY started_at_ms DESC LIMIT ?1)",
    )?;
    let ids = stmt
        .query_map(params![rounds], |row| row.get::<_, i64>(0))?
        .map(|id| id.map(|id| id as QuestionId))
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

/// Every question in the pool as a selection candidate.
pub(crate) fn candidates(conn: &Connection) -> Result<Vec<Candidate>, QuizError> {
    let mut stmt = conn.prepare("SELECT id, correct_option FROM questions ORDER BY id")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(id, key)| -> Result<Candidate, QuizError> {
            Ok(Candidate {
                id: id as QuestionId,
                correct_option: key.parse()?,
            })
        })
        .collect()
}

/// Sets the announced flag and winner summary.
///
/// Returns `false` if the round was already announced.
pub(crate) fn mark_announced(
    conn: &Connection,
    round_id: RoundId,
    summary: &WinnerSummary,
) -> Result<bool, QuizError> {
    let changed = conn.execute(
        "UPDATE rounds
         SET announced = 1, first_place_id = ?2, first_place_elapsed_ms = ?3, winner_count = ?4
         WHERE id = ?1 AND announced = 0",
        params![
            round_id,
            summary.first_place,
            summary.first_place_elapsed_ms,
            summary.winner_count,
        ],
    )?;
    Ok(changed == 1)
}

/// Increments the failed announcement counter of an unannounced round.
///
/// Returns the new count, or `None` if the round is already announced.
pub(crate) fn record_announce_failure(
    conn: &Connection,
    round_id: RoundId,
) -> Result<Option<u32>, QuizError> {
    let attempts: Option<i64> = conn
        .query_row(
            "UPDATE rounds SET announce_attempts = announce_attempts + 1
             WHERE id = ?1 AND announced = 0
             RETURNING announce_attempts",
            params![round_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(attempts.map(|n| n as u32))
}

fn encode_correctness(per_question: &[bool]) -> String {
    per_question
        .iter()
        .map(|ok| if *ok { '1' } else { '0' })
        .collect()
}

fn decode_correctness(s: &str) -> Result<Vec<bool>, QuizError> {
    s.chars()
        .map(|c| match c {
            '1' => Ok(true),
            '0' => Ok(false),
            other => Err(QuizError::corrupt(format!(
                "invalid correctness marker {other:?}"
            ))),
        })
        .collect()
}

/// Stores an attempt.
///
/// A concurrent insert for the same `(round, participant)` surfaces as
/// [`QuizError::DuplicateAttempt`].
pub(crate) fn insert_attempt(conn: &Connection, attempt: &Attempt) -> Result<(), QuizError> {
    let result = conn.execute(
        "INSERT INTO attempts
            (round_id, participant_id, answers, per_question, is_fully_correct, elapsed_ms, created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            attempt.round_id,
            attempt.participant_id,
            AnswerKey::encode_sequence(&attempt.submitted_answers),
            encode_correctness(&attempt.per_question),
            attempt.is_fully_correct,
            attempt.elapsed_ms,
            to_ms(attempt.created_at),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_unique_violation(&e) => Err(QuizError::DuplicateAttempt {
            round_id: attempt.round_id,
            participant_id: attempt.participant_id.clone(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Loads the stored attempt of a participant.
pub(crate) fn load_attempt(
    conn: &Connection,
    round_id: RoundId,
    participant_id: &str,
) -> Result<Option<Attempt>, QuizError> {
    let row = conn
        .query_row(
            "SELECT answers, per_question, is_fully_correct, elapsed_ms, created_at_ms
             FROM attempts
             WHERE round_id = ?1 AND participant_id = ?2",
            params![round_id, participant_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((answers, per_question, is_fully_correct, elapsed_ms, created_at_ms)) = row else {
        return Ok(None);
    };
    Ok(Some(Attempt {
        round_id,
        participant_id: participant_id.to_string(),
        submitted_answers: AnswerKey::parse_sequence(&answers)?,
        per_question: decode_correctness(&per_question)?,
        is_fully_correct,
        elapsed_ms: elapsed_ms as u64,
        created_at: from_ms(created_at_ms)?,
    }))
}

/// Aggregate attempt counts for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AttemptCounts {
    pub participants: u64,
    pub fully_correct: u64,
    pub fastest_correct_ms: Option<u64>,
}

pub(crate) fn attempt_counts(conn: &Connection, round_id: RoundId) -> Result<AttemptCounts, QuizError> {
    let (participants, fully_correct, fastest): (i64, Option<i64>, Option<i64>) = conn.query_row(
        "SELECT COUNT(*),
                SUM(is_fully_correct),
                MIN(CASE WHEN is_fully_correct = 1 THEN elapsed_ms END)
         FROM attempts
         WHERE round_id = ?1",
        params![round_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    Ok(AttemptCounts {
        participants: participants as u64,
        fully_correct: fully_correct.unwrap_or(0) as u64,
        fastest_correct_ms: fastest.map(|ms| ms as u64),
    })
}

/// Adds a winner entry. Capacity is enforced afterwards by [`trim_winners`].
pub(crate) fn insert_winner(
    conn: &Connection,
    round_id: RoundId,
    participant_id: &str,
    elapsed_ms: u64,
    prize_amount: u64,
) -> Result<(), QuizError> {
    conn.execute(
        "INSERT INTO winner_entries (round_id, participant_id, elapsed_ms, prize_amount)
         VALUES (?1, ?2, ?3, ?4)",
        params![round_id, participant_id, elapsed_ms, prize_amount],
    )?;
    Ok(())
}

/// Deletes every entry of the round beyond the `capacity` fastest.
///
/// Returns the evicted participant ids.
pub(crate) fn trim_winners(
    conn: &Connection,
    round_id: RoundId,
    capacity: u32,
) -> Result<Vec<String>, QuizError> {
    let mut stmt = conn.prepare_cached(
        "DELETE FROM winner_entries
         WHERE round_id = ?1
           AND id NOT IN (
               SELECT id FROM winner_entries
               WHERE round_id = ?1
               ORDER BY elapsed_ms ASC, id ASC
               LIMIT ?2
           )
         RETURNING participant_id",
    )?;
    let evicted = stmt
        .query_map(params![round_id, capacity], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(evicted)
}

/// The winner set of a round in rank order.
pub(crate) fn winner_entries(
    conn: &Connection,
    round_id: RoundId,
) -> Result<Vec<WinnerEntry>, QuizError> {
    let mut stmt = conn.prepare_cached(
        "SELECT participant_id, elapsed_ms, prize_amount, proof_reference
         FROM winner_entries
         WHERE round_id = ?1
         ORDER BY elapsed_ms ASC, id ASC",
    )?;
    let rows = stmt
        .query_map(params![round_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows
        .into_iter()
        .zip(1..)
        .map(|((participant_id, elapsed_ms, prize_amount, proof_reference), rank)| WinnerEntry {
            round_id,
            participant_id,
            elapsed_ms: elapsed_ms as u64,
            prize_amount: prize_amount as u64,
            rank,
            proof_reference,
        })
        .collect())
}

/// Whether the participant holds an entry in the round's winner set.
pub(crate) fn is_winner(
    conn: &Connection,
    round_id: RoundId,
    participant_id: &str,
) -> Result<bool, QuizError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM winner_entries WHERE round_id = ?1 AND participant_id = ?2",
            params![round_id, participant_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Stores a payout proof on a winner entry.
///
/// Returns `false` if the participant holds no entry for the round.
pub(crate) fn attach_proof(
    conn: &Connection,
    round_id: RoundId,
    participant_id: &str,
    proof_reference: &str,
    payout_destination: Option<&str>,
) -> Result<bool, QuizError> {
    let changed = conn.execute(
        "UPDATE winner_entries
         SET proof_reference = ?3, payout_destination = COALESCE(?4, payout_destination)
         WHERE round_id = ?1 AND participant_id = ?2",
        params![round_id, participant_id, proof_reference, payout_destination],
    )?;
    Ok(changed == 1)
}

/// First-place summary of a round's current winner set.
pub(crate) fn winner_summary(
    conn: &Connection,
    round_id: RoundId,
) -> Result<WinnerSummary, QuizError> {
    let entries = winner_entries(conn, round_id)?;
    let first = entries.first();
    Ok(WinnerSummary {
        first_place: first.map(|e| e.participant_id.clone()),
        first_place_elapsed_ms: first.map(|e| e.elapsed_ms),
        winner_count: entries.len() as u32,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::model::QuestionImport;
    use crate::store::QuizStore;

    fn seeded_store() -> (QuizStore, Vec<QuestionId>) {
        let store = QuizStore::in_memory().unwrap();
        let imports: Vec<QuestionImport> = AnswerKey::ALL
            .iter()
            .enumerate()
            .map(|(i, key)| QuestionImport {
                external_ref: format!("row-{i}"),
                prompt: format!("question {i}"),
                options: [
                    "a".to_string(),
                    "b".to_string(),
                    "c".to_string(),
                    "d".to_string(),
                ],
                correct_option: *key,
                explanation: String::new(),
                topic_tag: String::new(),
            })
            .collect();
        let ids = store.import_questions(&imports).unwrap();
        (store, ids)
    }

    fn timing(h: u32) -> RoundTiming {
        let slot = Utc.with_ymd_and_hms(2026, 3, 14, h, 0, 0).unwrap();
        RoundTiming {
            slot_at: slot,
            started_at: slot,
            prize_window_ends_at: slot + Duration::minutes(2),
            ends_at: slot + Duration::minutes(25),
        }
    }

    #[test]
    fn test_insert_round_is_unique_per_slot() {
        let (store, ids) = seeded_store();
        let first = store.write(|tx| insert_round(tx, &timing(9), &ids)).unwrap();
        let second = store.write(|tx| insert_round(tx, &timing(9), &ids)).unwrap();
        assert!(first.is_some());
        assert_eq!(second, None);

        let round = store
            .read(|conn| load_round(conn, first.unwrap()))
            .unwrap()
            .unwrap();
        assert_eq!(round.question_ids, ids);
        assert!(!round.announced);
    }

    #[test]
    fn test_trim_keeps_fastest_and_earliest_on_ties() {
        let (store, ids) = seeded_store();
        let round_id = store
            .write(|tx| insert_round(tx, &timing(9), &ids))
            .unwrap()
            .unwrap();

        let evicted = store
            .write(|tx| {
                insert_winner(tx, round_id, "slow", 9_000, 50)?;
                insert_winner(tx, round_id, "tie-first", 4_000, 50)?;
                insert_winner(tx, round_id, "tie-second", 4_000, 50)?;
                trim_winners(tx, round_id, 2)
            })
            .unwrap();
        assert_eq!(evicted, vec!["slow".to_string()]);

        let entries = store.read(|conn| winner_entries(conn, round_id)).unwrap();
        let order: Vec<_> = entries.iter().map(|e| (e.participant_id.as_str(), e.rank)).collect();
        assert_eq!(order, vec![("tie-first", 1), ("tie-second", 2)]);

        let evicted = store
            .write(|tx| {
                insert_winner(tx, round_id, "late-tie", 4_000, 50)?;
                trim_winners(tx, round_id, 2)
            })
            .unwrap();
        assert_eq!(evicted, vec!["late-tie".to_string()]);
    }

    #[test]
    fn test_pending_announcement_and_mark_announced() {
        let (store, ids) = seeded_store();
        let t = timing(9);
        let round_id = store
            .write(|tx| insert_round(tx, &t, &ids))
            .unwrap()
            .unwrap();

        let at_close = store
            .read(|conn| rounds_pending_announcement(conn, t.prize_window_ends_at))
            .unwrap();
        assert!(at_close.is_empty());

        let after = t.prize_window_ends_at + Duration::seconds(1);
        let pending = store
            .read(|conn| rounds_pending_announcement(conn, after))
            .unwrap();
        assert_eq!(pending.len(), 1);

        let summary = WinnerSummary {
            first_place: None,
            first_place_elapsed_ms: None,
            winner_count: 0,
        };
        assert!(store.write(|tx| mark_announced(tx, round_id, &summary)).unwrap());
        assert!(!store.write(|tx| mark_announced(tx, round_id, &summary)).unwrap());
        assert_eq!(store.write(|tx| record_announce_failure(tx, round_id)).unwrap(), None);

        let round = store.read(|conn| load_round(conn, round_id)).unwrap().unwrap();
        assert_eq!(round.winner_summary, Some(summary));
    }

    #[test]
    fn test_open_announcement_pending_until_marked() {
        let (store, ids) = seeded_store();
        let t = timing(9);
        let round_id = store
            .write(|tx| insert_round(tx, &t, &ids))
            .unwrap()
            .unwrap();

        let pending = |now| {
            store
                .read(|conn| rounds_pending_open_announcement(conn, now))
                .unwrap()
                .into_iter()
                .map(|r| r.id)
                .collect::<Vec<_>>()
        };
        assert_eq!(pending(t.started_at), vec![round_id]);
        assert_eq!(pending(t.prize_window_ends_at), vec![round_id]);
        assert!(pending(t.prize_window_ends_at + Duration::seconds(1)).is_empty());

        assert!(store.write(|tx| mark_opened_announced(tx, round_id)).unwrap());
        assert!(!store.write(|tx| mark_opened_announced(tx, round_id)).unwrap());
        assert!(pending(t.started_at).is_empty());
        assert!(
            store
                .read(|conn| load_round(conn, round_id))
                .unwrap()
                .unwrap()
                .opened_announced
        );
    }

    #[test]
    fn test_attempt_round_trip_and_duplicate() {
        let (store, ids) = seeded_store();
        let round_id = store
            .write(|tx| insert_round(tx, &timing(9), &ids))
            .unwrap()
            .unwrap();
        let attempt = Attempt {
            round_id,
            participant_id: "p1".to_string(),
            submitted_answers: vec![AnswerKey::A, AnswerKey::B, AnswerKey::D, AnswerKey::D],
            per_question: vec![true, true, false, true],
            is_fully_correct: false,
            elapsed_ms: 7_500,
            created_at: timing(9).started_at + Duration::seconds(8),
        };

        store.write(|tx| insert_attempt(tx, &attempt)).unwrap();
        let err = store.write(|tx| insert_attempt(tx, &attempt)).unwrap_err();
        assert!(matches!(err, QuizError::DuplicateAttempt { .. }));

        let loaded = store
            .read(|conn| load_attempt(conn, round_id, "p1"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded, attempt);

        let counts = store.read(|conn| attempt_counts(conn, round_id)).unwrap();
        assert_eq!(counts.participants, 1);
        assert_eq!(counts.fully_correct, 0);
        assert_eq!(counts.fastest_correct_ms, None);
    }

    #[test]
    fn test_recent_question_ids_limits_rounds() {
        let (store, ids) = seeded_store();
        store.write(|tx| insert_round(tx, &timing(9), &ids[..2])).unwrap();
        store.write(|tx| insert_round(tx, &timing(19), &ids[2..])).unwrap();

        let last = store.read(|conn| recent_question_ids(conn, 1)).unwrap();
        assert_eq!(last, ids[2..].iter().copied().collect::<HashSet<_>>());
        let both = store.read(|conn| recent_question_ids(conn, 2)).unwrap();
        assert_eq!(both.len(), 4);
        let none = store.read(|conn| recent_question_ids(conn, 0)).unwrap();
        assert!(none.is_empty());
    }
}
