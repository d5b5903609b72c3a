//! Domain records persisted by the store.
//!
//! Instants are `DateTime<Utc>` in memory and Unix milliseconds on disk.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QuizError;

/// Round identifier assigned by the store.
pub type RoundId = u64;

/// Question identifier assigned by the store.
pub type QuestionId = u64;

/// Number of questions in every round.
pub const QUESTIONS_PER_ROUND: usize = 4;

/// One of the four option keys of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnswerKey {
    /// Option A.
    A,
    /// Option B.
    B,
    /// Option C.
    C,
    /// Option D.
    D,
}

impl AnswerKey {
    /// All keys in option order.
    pub const ALL: [Self; 4] = [Self::A, Self::B, Self::C, Self::D];

    /// The key as its single-letter form.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        }
    }

    /// Parses a single letter, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`QuizError::InvalidAnswerKey`] for anything but `A`-`D`.
    pub fn from_char(c: char) -> Result<Self, QuizError> {
        match c.to_ascii_uppercase() {
            'A' => Ok(Self::A),
            'B' => Ok(Self::B),
            'C' => Ok(Self::C),
            'D' => Ok(Self::D),
            _ => Err(QuizError::InvalidAnswerKey {
                value: c.to_string(),
            }),
        }
    }

    /// Parses a compact answer string such as `"ACDB"`.
    ///
    /// Whitespace and commas between letters are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`QuizError::InvalidAnswerKey`] on the first unknown letter.
    pub fn parse_sequence(s: &str) -> Result<Vec<Self>, QuizError> {
        s.chars()
            .filter(|c| !c.is_whitespace() && *c != ',')
            .map(Self::from_char)
            .collect()
    }

    /// Encodes a sequence as a compact string, the inverse of
    /// [`AnswerKey::parse_sequence`].
    #[must_use]
    pub fn encode_sequence(keys: &[Self]) -> String {
        keys.iter().map(|k| k.as_char()).collect()
    }
}

impl fmt::Display for AnswerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for AnswerKey {
    type Err = QuizError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::from_char(c),
            _ => Err(QuizError::InvalidAnswerKey {
                value: s.to_string(),
            }),
        }
    }
}

/// Question content. Immutable once imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Store-assigned identifier.
    pub id: QuestionId,
    /// The question text.
    pub prompt: String,
    /// Option texts in `A`-`D` order.
    pub options: [String; 4],
    /// Key of the correct option.
    pub correct_option: AnswerKey,
    /// Explanation revealed once the prize window closes.
    pub explanation: String,
    /// Chapter or topic label.
    pub topic_tag: String,
}

/// Question content as supplied by an import adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestionImport {
    /// Stable reference in the source system (e.g. spreadsheet row).
    pub external_ref: String,
    /// The question text.
    pub prompt: String,
    /// Option texts in `A`-`D` order.
    pub options: [String; 4],
    /// Key of the correct option.
    pub correct_option: AnswerKey,
    /// Explanation shown after the prize window.
    #[serde(default)]
    pub explanation: String,
    /// Chapter or topic label.
    #[serde(default)]
    pub topic_tag: String,
}

/// Question text as shown to participants while a round is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionPrompt {
    /// Question identifier.
    pub id: QuestionId,
    /// The question text.
    pub prompt: String,
    /// Option texts in `A`-`D` order.
    pub options: [String; 4],
    /// Chapter or topic label.
    pub topic_tag: String,
}

impl From<Question> for QuestionPrompt {
    fn from(q: Question) -> Self {
        Self {
            id: q.id,
            prompt: q.prompt,
            options: q.options,
            topic_tag: q.topic_tag,
        }
    }
}

/// Lifecycle state of a round, derived from its timing and announcement flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundState {
    /// Created but `started_at` is still in the future.
    Scheduled,
    /// Accepting prize-eligible submissions.
    Active,
    /// Accepting scored submissions; no further prize eligibility.
    PrizeWindowClosed,
    /// No further submissions; results not yet announced.
    Ended,
    /// Ended and results delivered to the announcer.
    Announced,
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Active => "active",
            Self::PrizeWindowClosed => "prize_window_closed",
            Self::Ended => "ended",
            Self::Announced => "announced",
        };
        f.write_str(s)
    }
}

/// First-place summary written when a round is announced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerSummary {
    /// The fastest correct participant, if anyone qualified.
    pub first_place: Option<String>,
    /// Solve time of the first-place participant.
    pub first_place_elapsed_ms: Option<u64>,
    /// Number of entries in the final winner set.
    pub winner_count: u32,
}

/// A scheduled quiz instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// Store-assigned identifier.
    pub id: RoundId,
    /// The configured slot this round was opened for.
    pub slot_at: DateTime<Utc>,
    /// Question ids in position order.
    pub question_ids: Vec<QuestionId>,
    /// When submissions open.
    pub started_at: DateTime<Utc>,
    /// When submissions close.
    pub ends_at: DateTime<Utc>,
    /// When prize eligibility ends; never after `ends_at`.
    pub prize_window_ends_at: DateTime<Utc>,
    /// Whether the opening was delivered to the announcer.
    pub opened_announced: bool,
    /// Whether results were delivered to the announcer.
    pub announced: bool,
    /// Failed result deliveries so far.
    pub announce_attempts: u32,
    /// Set once the round is announced.
    pub winner_summary: Option<WinnerSummary>,
}

impl Round {
    /// Lifecycle state at `now`.
    ///
    /// The `Announced` flag is set as soon as the prize window closes, but a
    /// round keeps reporting `PrizeWindowClosed` until `ends_at` because it
    /// still accepts submissions.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> RoundState {
        if now < self.started_at {
            RoundState::Scheduled
        } else if now <= self.prize_window_ends_at {
            RoundState::Active
        } else if now < self.ends_at {
            RoundState::PrizeWindowClosed
        } else if self.announced {
            RoundState::Announced
        } else {
            RoundState::Ended
        }
    }

    /// Whether submissions are accepted at `now`.
    #[must_use]
    pub fn accepts_submissions(&self, now: DateTime<Utc>) -> bool {
        self.started_at <= now && now < self.ends_at
    }

    /// Whether a correct submission at `now` is prize-eligible.
    #[must_use]
    pub fn in_prize_window(&self, now: DateTime<Utc>) -> bool {
        self.started_at <= now && now <= self.prize_window_ends_at
    }
}

/// A participant's single scored attempt at a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    /// The round attempted.
    pub round_id: RoundId,
    /// Opaque participant identifier.
    pub participant_id: String,
    /// Answers in position order.
    pub submitted_answers: Vec<AnswerKey>,
    /// Per-position correctness.
    pub per_question: Vec<bool>,
    /// All positions correct.
    pub is_fully_correct: bool,
    /// Client-measured solve time.
    pub elapsed_ms: u64,
    /// Server time the attempt was stored.
    pub created_at: DateTime<Utc>,
}

impl Attempt {
    /// Number of correct positions.
    #[must_use]
    pub fn score(&self) -> usize {
        self.per_question.iter().filter(|ok| **ok).count()
    }
}

/// A ranked, prize-eligible attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerEntry {
    /// The round won.
    pub round_id: RoundId,
    /// The winning participant.
    pub participant_id: String,
    /// Solve time used for ranking.
    pub elapsed_ms: u64,
    /// Amount credited when the entry was accepted.
    pub prize_amount: u64,
    /// 1-based rank by `(elapsed_ms, insertion order)`.
    pub rank: u32,
    /// Payout proof attached by the winner, if any.
    pub proof_reference: Option<String>,
}

/// Per-participant balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// The wallet owner.
    pub participant_id: String,
    /// Withdrawable balance.
    pub balance: u64,
    /// Lifetime credited amount.
    pub total_earned: u64,
}

/// Kind of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Prize credit for a round.
    Win,
    /// Full-balance payout request.
    Withdraw,
}

impl TransactionKind {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Withdraw => "withdraw",
        }
    }

    pub(crate) fn parse(s: &str) -> Result<Self, QuizError> {
        match s {
            "win" => Ok(Self::Win),
            "withdraw" => Ok(Self::Withdraw),
            other => Err(QuizError::corrupt(format!(
                "unknown transaction kind {other:?}"
            ))),
        }
    }
}

/// Settlement status of a ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Withdrawal recorded, payout not yet confirmed.
    Pending,
    /// Credit applied or payout confirmed.
    Completed,
    /// Payout failed and the amount was refunded.
    Failed,
}

impl TransactionStatus {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub(crate) fn parse(s: &str) -> Result<Self, QuizError> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(QuizError::corrupt(format!(
                "unknown transaction status {other:?}"
            ))),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Store-assigned identifier.
    pub id: u64,
    /// The wallet owner.
    pub participant_id: String,
    /// Always positive; the kind gives the direction.
    pub amount: u64,
    /// Credit or withdrawal.
    pub kind: TransactionKind,
    /// The round a win was paid for.
    pub round_id: Option<RoundId>,
    /// Payout destination of a withdrawal.
    pub destination: Option<String>,
    /// Settlement status.
    pub status: TransactionStatus,
    /// When the row was appended.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn round() -> Round {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 13, 30, 0).unwrap();
        Round {
            id: 1,
            slot_at: start,
            question_ids: vec![1, 2, 3, 4],
            started_at: start,
            ends_at: start + Duration::minutes(25),
            prize_window_ends_at: start + Duration::minutes(2),
            opened_announced: false,
            announced: false,
            announce_attempts: 0,
            winner_summary: None,
        }
    }

    #[test]
    fn test_answer_sequence_parsing() {
        let keys = AnswerKey::parse_sequence("a, c d B").unwrap();
        assert_eq!(keys, vec![AnswerKey::A, AnswerKey::C, AnswerKey::D, AnswerKey::B]);
        assert_eq!(AnswerKey::encode_sequence(&keys), "ACDB");
        assert!(matches!(
            AnswerKey::parse_sequence("ABX"),
            Err(QuizError::InvalidAnswerKey { value }) if value == "X"
        ));
        assert!("AB".parse::<AnswerKey>().is_err());
        assert_eq!(" d ".parse::<AnswerKey>().unwrap(), AnswerKey::D);
    }

    #[test]
    fn test_round_state_progression() {
        let mut r = round();
        let start = r.started_at;
        assert_eq!(r.state_at(start - Duration::seconds(1)), RoundState::Scheduled);
        assert_eq!(r.state_at(start), RoundState::Active);
        assert_eq!(r.state_at(r.prize_window_ends_at), RoundState::Active);
        assert_eq!(
            r.state_at(r.prize_window_ends_at + Duration::milliseconds(1)),
            RoundState::PrizeWindowClosed
        );
        assert_eq!(r.state_at(r.ends_at), RoundState::Ended);
        r.announced = true;
        assert_eq!(
            r.state_at(r.prize_window_ends_at + Duration::seconds(5)),
            RoundState::PrizeWindowClosed
        );
        assert_eq!(r.state_at(r.ends_at), RoundState::Announced);
    }

    #[test]
    fn test_submission_windows() {
        let r = round();
        assert!(!r.accepts_submissions(r.started_at - Duration::seconds(1)));
        assert!(r.accepts_submissions(r.started_at));
        assert!(r.in_prize_window(r.prize_window_ends_at));
        assert!(!r.in_prize_window(r.prize_window_ends_at + Duration::seconds(1)));
        assert!(r.accepts_submissions(r.ends_at - Duration::milliseconds(1)));
        assert!(!r.accepts_submissions(r.ends_at));
    }

    #[test]
    fn test_question_import_rejects_unknown_fields() {
        let json = r#"{"external_ref":"row-2","prompt":"p","options":["a","b","c","d"],
            "correct_option":"B","difficulty":"hard"}"#;
        assert!(serde_json::from_str::<QuestionImport>(json).is_err());
    }
}
