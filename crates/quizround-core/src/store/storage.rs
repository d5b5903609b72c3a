//! `SQLite`-backed store handle.
//!
//! The store uses WAL mode so readers never block the single writer. Every
//! mutation runs inside an IMMEDIATE transaction: the write lock is taken at
//! `BEGIN`, so a read-validate-write sequence is serialized against every
//! other connection to the same file, including ones in other processes.
//! Lock contention that outlasts the busy timeout surfaces as
//! [`QuizError::StorageConflict`].

// SQLite returns i64 for row IDs and counts, but they're always non-negative.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};
use tracing::{debug, info};

use crate::error::QuizError;
use crate::model::{AnswerKey, Question, QuestionId, QuestionImport};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Shared handle to the durable quiz state.
///
/// Cloning is cheap and clones share one connection. Separate
/// [`QuizStore::open`] calls on the same path get separate connections,
/// which is how multiple service instances share state.
#[derive(Clone)]
pub struct QuizStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for QuizStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuizStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl QuizStore {
    /// Opens or creates a store at the specified path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QuizError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        Self::initialize_connection(&conn)?;
        debug!(path = %path.display(), "opened quiz store");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, QuizError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    fn initialize_connection(conn: &Connection) -> Result<(), QuizError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    /// Path of the backing file, `None` for in-memory stores.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, QuizError> {
        self.conn.lock().map_err(|_| QuizError::LockPoisoned)
    }

    /// Runs `f` against the connection outside any explicit transaction.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, QuizError>,
    ) -> Result<T, QuizError> {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Runs `f` inside an IMMEDIATE transaction.
    ///
    /// The transaction commits if `f` returns `Ok` and rolls back otherwise,
    /// so a failed operation leaves no partial state.
    pub(crate) fn write<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, QuizError>,
    ) -> Result<T, QuizError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Inserts a question, or replaces the content of the question with the
    /// same external reference.
    ///
    /// Replacing keeps the question id, so rounds that already reference it
    /// stay valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn upsert_question(&self, question: &QuestionImport) -> Result<QuestionId, QuizError> {
        self.write(|tx| upsert_question(tx, question))
    }

    /// Imports a batch of questions atomically.
    ///
    /// Returns the ids in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if any write fails; nothing is imported in that case.
    pub fn import_questions(
        &self,
        questions: &[QuestionImport],
    ) -> Result<Vec<QuestionId>, QuizError> {
        let ids = self.write(|tx| {
            questions
                .iter()
                .map(|q| upsert_question(tx, q))
                .collect::<Result<Vec<_>, _>>()
        })?;
        info!(count = ids.len(), "imported questions");
        Ok(ids)
    }

    /// Loads one question.
    ///
    /// # Errors
    ///
    /// Returns [`QuizError::Corrupt`] if the question does not exist.
    pub fn question(&self, id: QuestionId) -> Result<Question, QuizError> {
        self.read(|conn| load_question(conn, id))
    }

    /// Number of questions in the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn question_count(&self) -> Result<u64, QuizError> {
        self.read(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }
}

fn upsert_question(conn: &Connection, q: &QuestionImport) -> Result<QuestionId, QuizError> {
    let [a, b, c, d] = &q.options;
    let id: i64 = conn.query_row(
        "INSERT INTO questions
            (external_ref, prompt, option_a, option_b, option_c, option_d, correct_option, explanation, topic_tag)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(external_ref) DO UPDATE SET
            prompt = excluded.prompt,
            option_a = excluded.option_a,
            option_b = excluded.option_b,
            option_c = excluded.option_c,
            option_d = excluded.option_d,
            correct_option = excluded.correct_option,
            explanation = excluded.explanation,
            topic_tag = excluded.topic_tag
         RETURNING id",
        params![
            q.external_ref,
            q.prompt,
            a,
            b,
            c,
            d,
            q.correct_option.as_char().to_string(),
            q.explanation,
            q.topic_tag,
        ],
        |row| row.get(0),
    )?;
    Ok(id as QuestionId)
}

/// Loads one question by id.
pub(crate) fn load_question(conn: &Connection, id: QuestionId) -> Result<Question, QuizError> {
    let row = conn
        .query_row(
            "SELECT id, prompt, option_a, option_b, option_c, option_d, correct_option, explanation, topic_tag
             FROM questions
             WHERE id = ?1",
            params![id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    [
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ],
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, String>(8)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| QuizError::corrupt(format!("question {id} is referenced but missing")))?;

    let (id, prompt, options, correct, explanation, topic_tag) = row;
    Ok(Question {
        id: id as QuestionId,
        prompt,
        options,
        correct_option: correct.parse::<AnswerKey>()?,
        explanation,
        topic_tag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn import(external_ref: &str, correct: AnswerKey) -> QuestionImport {
        QuestionImport {
            external_ref: external_ref.to_string(),
            prompt: format!("prompt {external_ref}"),
            options: [
                "one".to_string(),
                "two".to_string(),
                "three".to_string(),
                "four".to_string(),
            ],
            correct_option: correct,
            explanation: "because".to_string(),
            topic_tag: "physiology".to_string(),
        }
    }

    #[test]
    fn test_upsert_keeps_id_and_replaces_content() {
        let store = QuizStore::in_memory().unwrap();
        let id = store.upsert_question(&import("row-2", AnswerKey::A)).unwrap();

        let mut changed = import("row-2", AnswerKey::C);
        changed.prompt = "revised".to_string();
        let same_id = store.upsert_question(&changed).unwrap();

        assert_eq!(id, same_id);
        assert_eq!(store.question_count().unwrap(), 1);
        let q = store.question(id).unwrap();
        assert_eq!(q.prompt, "revised");
        assert_eq!(q.correct_option, AnswerKey::C);
    }

    #[test]
    fn test_import_batch_returns_ids_in_order() {
        let store = QuizStore::in_memory().unwrap();
        let ids = store
            .import_questions(&[
                import("row-2", AnswerKey::A),
                import("row-3", AnswerKey::B),
                import("row-4", AnswerKey::D),
            ])
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(store.question(ids[2]).unwrap().correct_option, AnswerKey::D);
    }

    #[test]
    fn test_missing_question_is_corrupt() {
        let store = QuizStore::in_memory().unwrap();
        assert!(matches!(store.question(42), Err(QuizError::Corrupt { .. })));
    }

    #[test]
    fn test_open_file_backed_store_enables_wal() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = QuizStore::open(dir.path().join("quiz.db")).unwrap();
        let mode: String = store
            .read(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        assert!(store.path().is_some());
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let store = QuizStore::in_memory().unwrap();
        let result: Result<(), QuizError> = store.write(|tx| {
            upsert_question(tx, &import("row-9", AnswerKey::B))?;
            Err(QuizError::corrupt("abort"))
        });
        assert!(result.is_err());
        assert_eq!(store.question_count().unwrap(), 0);
    }
}
