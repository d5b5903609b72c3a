//! Fixtures shared by unit tests across modules.

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::{QuizStore, queries};
use crate::model::{AnswerKey, QuestionId, QuestionImport, RoundId};
use crate::schedule::RoundTiming;

/// A question whose correct option is `key`.
pub(crate) fn question(external_ref: &str, key: AnswerKey) -> QuestionImport {
    QuestionImport {
        external_ref: external_ref.to_string(),
        prompt: format!("What does {external_ref} regulate?"),
        options: [
            "option a".to_string(),
            "option b".to_string(),
            "option c".to_string(),
            "option d".to_string(),
        ],
        correct_option: key,
        explanation: format!("{external_ref} explained"),
        topic_tag: "chapter-1".to_string(),
    }
}

/// Imports `per_key` questions for each answer key.
pub(crate) fn seed_questions(store: &QuizStore, per_key: usize) -> Vec<QuestionId> {
    let imports: Vec<QuestionImport> = (0..per_key)
        .flat_map(|i| {
            AnswerKey::ALL
                .into_iter()
                .map(move |key| question(&format!("row-{i}-{key}"), key))
        })
        .collect();
    store.import_questions(&imports).unwrap()
}

/// 2026-03-14 at the given UTC time.
pub(crate) fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, h, m, s).unwrap()
}

/// Inserts `n` question-less rounds one day apart, starting at 19:00.
pub(crate) fn insert_rounds(store: &QuizStore, n: usize) -> Vec<RoundId> {
    (0..n)
        .map(|day| {
            let slot = at(19, 0, 0) + Duration::days(day as i64);
            let timing = RoundTiming {
                slot_at: slot,
                started_at: slot,
                prize_window_ends_at: slot + Duration::minutes(2),
                ends_at: slot + Duration::minutes(25),
            };
            store
                .write(|tx| queries::insert_round(tx, &timing, &[]))
                .unwrap()
                .unwrap()
        })
        .collect()
}
