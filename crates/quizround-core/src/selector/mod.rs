//! Question selection for a new round.
//!
//! Each position of a round requires a different correct-answer key so that
//! always answering the same letter scores at most one point. Keys are
//! shuffled per round. For each position a question is drawn uniformly at
//! random from those with the required key that no recent round used.
//! When that is impossible the selector relaxes, in order:
//!
//! 1. the recency restriction, for that key only;
//! 2. the key requirement, drawing from the whole pool.
//!
//! Selection only fails when the pool holds fewer distinct questions than
//! the round needs.

use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::error::QuizError;
use crate::model::{AnswerKey, QUESTIONS_PER_ROUND, QuestionId};

/// A question as seen by the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Question identifier.
    pub id: QuestionId,
    /// Its correct option.
    pub correct_option: AnswerKey,
}

/// Result of a selection, with how much the constraints were relaxed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Chosen questions in position order.
    pub question_ids: Vec<QuestionId>,
    /// The key each position was meant to have.
    pub required_keys: Vec<AnswerKey>,
    /// Positions filled by reusing a recently asked question.
    pub reused_recent: usize,
    /// Positions filled without matching the required key.
    pub off_key: usize,
}

impl Selection {
    /// Whether every position met both constraints.
    #[must_use]
    pub const fn is_balanced(&self) -> bool {
        self.reused_recent == 0 && self.off_key == 0
    }
}

/// A shuffled assignment of one distinct key per position.
pub fn balanced_keys<R: Rng + ?Sized>(rng: &mut R) -> [AnswerKey; QUESTIONS_PER_ROUND] {
    let mut keys = AnswerKey::ALL;
    keys.shuffle(rng);
    keys
}

/// Select one question per entry of `keys`.
///
/// `recent` holds questions used by the most recent rounds.
///
/// # Errors
///
/// Returns [`QuizError::InsufficientContent`] if `pool` has fewer distinct
/// questions than `keys.len()`.
pub fn select<R: Rng + ?Sized>(
    pool: &[Candidate],
    recent: &HashSet<QuestionId>,
    keys: &[AnswerKey],
    rng: &mut R,
) -> Result<Selection, QuizError> {
    let distinct: HashSet<QuestionId> = pool.iter().map(|c| c.id).collect();
    if distinct.len() < keys.len() {
        return Err(QuizError::InsufficientContent {
            available: distinct.len(),
            required: keys.len(),
        });
    }

    let mut used: HashSet<QuestionId> = HashSet::with_capacity(keys.len());
    let mut chosen: Vec<Option<QuestionId>> = vec![None; keys.len()];
    let mut reused_recent = 0;

    for (slot, key) in chosen.iter_mut().zip(keys) {
        let fresh: Vec<QuestionId> = pool
            .iter()
            .filter(|c| {
                c.correct_option == *key && !recent.contains(&c.id) && !used.contains(&c.id)
            })
            .map(|c| c.id)
            .collect();
        let pick = match fresh.choose(rng) {
            Some(id) => Some(*id),
            None => {
                let any_age: Vec<QuestionId> = pool
                    .iter()
                    .filter(|c| c.correct_option == *key && !used.contains(&c.id))
                    .map(|c| c.id)
                    .collect();
                let pick = any_age.choose(rng).copied();
                if pick.is_some() {
                    reused_recent += 1;
                }
                pick
            },
        };
        if let Some(id) = pick {
            used.insert(id);
            *slot = Some(id);
        }
    }

    let mut off_key = 0;
    for slot in chosen.iter_mut().filter(|s| s.is_none()) {
        let mut remaining: Vec<QuestionId> = distinct
            .iter()
            .copied()
            .filter(|id| !used.contains(id))
            .collect();
        remaining.sort_unstable();
        // The pool size check above guarantees a remaining question.
        if let Some(id) = remaining.choose(rng).copied() {
            used.insert(id);
            *slot = Some(id);
            off_key += 1;
        }
    }

    let question_ids = chosen
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or(QuizError::InsufficientContent {
            available: distinct.len(),
            required: keys.len(),
        })?;

    Ok(Selection {
        question_ids,
        required_keys: keys.to_vec(),
        reused_recent,
        off_key,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn pool(spec: &[(QuestionId, AnswerKey)]) -> Vec<Candidate> {
        spec.iter()
            .map(|(id, key)| Candidate {
                id: *id,
                correct_option: *key,
            })
            .collect()
    }

    fn key_of(pool: &[Candidate], id: QuestionId) -> AnswerKey {
        pool.iter().find(|c| c.id == id).unwrap().correct_option
    }

    #[test]
    fn test_balanced_keys_is_permutation() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut keys = balanced_keys(&mut rng).to_vec();
        keys.sort();
        assert_eq!(keys, AnswerKey::ALL.to_vec());
    }

    #[test]
    fn test_selects_one_question_per_key_avoiding_recent() {
        use AnswerKey::{A, B, C, D};
        let pool = pool(&[(1, A), (2, B), (3, C), (4, D), (5, A), (6, B), (7, C), (8, D)]);
        let recent: HashSet<_> = [1, 2, 3, 4].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(1);

        let selection = select(&pool, &recent, &[D, C, B, A], &mut rng).unwrap();
        assert!(selection.is_balanced());
        assert_eq!(selection.question_ids, vec![8, 7, 6, 5]);
    }

    #[test]
    fn test_reuses_recent_question_when_key_is_exhausted() {
        use AnswerKey::{A, B, C, D};
        let pool = pool(&[(1, A), (2, B), (3, C), (4, D), (5, B), (6, C), (7, D)]);
        let recent: HashSet<_> = [1].into_iter().collect();
        let mut rng = StdRng::seed_from_u64(2);

        let selection = select(&pool, &recent, &[A, B, C, D], &mut rng).unwrap();
        assert_eq!(selection.question_ids[0], 1);
        assert_eq!(selection.reused_recent, 1);
        assert_eq!(selection.off_key, 0);
        for (id, key) in selection.question_ids.iter().zip(&selection.required_keys) {
            assert_eq!(key_of(&pool, *id), *key);
        }
    }

    #[test]
    fn test_fills_off_key_when_key_missing_entirely() {
        use AnswerKey::{A, B, C, D};
        let pool = pool(&[(1, A), (2, A), (3, B), (4, B), (5, C)]);
        let mut rng = StdRng::seed_from_u64(3);

        let selection = select(&pool, &HashSet::new(), &[A, B, C, D], &mut rng).unwrap();
        assert_eq!(selection.off_key, 1);
        let distinct: HashSet<_> = selection.question_ids.iter().collect();
        assert_eq!(distinct.len(), 4);
        assert_eq!(key_of(&pool, selection.question_ids[2]), C);
    }

    #[test]
    fn test_insufficient_content() {
        use AnswerKey::{A, B, C, D};
        let pool = pool(&[(1, A), (2, B), (3, C)]);
        let mut rng = StdRng::seed_from_u64(4);

        let err = select(&pool, &HashSet::new(), &[A, B, C, D], &mut rng).unwrap_err();
        assert!(matches!(
            err,
            QuizError::InsufficientContent {
                available: 3,
                required: 4
            }
        ));
    }

    #[test]
    fn test_choice_is_spread_across_candidates() {
        use AnswerKey::{A, B, C, D};
        let pool = pool(&[(1, A), (2, A), (3, A), (4, B), (5, C), (6, D)]);
        let mut rng = StdRng::seed_from_u64(5);
        let mut counts: HashMap<QuestionId, u32> = HashMap::new();

        for _ in 0..600 {
            let selection = select(&pool, &HashSet::new(), &[A, B, C, D], &mut rng).unwrap();
            *counts.entry(selection.question_ids[0]).or_default() += 1;
        }

        for id in [1, 2, 3] {
            let n = counts.get(&id).copied().unwrap_or(0);
            assert!((120..=280).contains(&n), "question {id} picked {n} times");
        }
    }
}
