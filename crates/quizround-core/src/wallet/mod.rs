//! Wallet ledger.
//!
//! Balances live in `wallets`; every change to a balance appends exactly one
//! row to `ledger_transactions` in the same transaction. The invariant
//!
//! ```text
//! balance = Σ win − Σ withdraw (pending or completed)
//! ```
//!
//! holds after every committed operation and is checked by
//! [`WalletLedger::reconcile`].
//!
//! Credits are idempotent per `(participant, round)` through a partial
//! UNIQUE index. Withdrawals read and zero the balance in a single
//! `UPDATE .. RETURNING`, so concurrent withdrawals cannot both observe the
//! same funds.
//!
//! A failed withdrawal is not reversed by a new row. Its `withdraw` row is
//! flipped to `failed` and the amount returned to the balance in the same
//! transaction; failed rows fall out of the withdrawn sum, so the invariant
//! still holds. The transaction log therefore keeps one row per request,
//! and its status is the refund record.

// SQLite returns i64 for row IDs and sums, but they're always non-negative.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::WalletConfig;
use crate::error::{QuizError, is_unique_violation};
use crate::model::{RoundId, Transaction, TransactionKind, TransactionStatus, Wallet};
use crate::store::{QuizStore, from_ms, to_ms};

/// A recorded withdrawal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Withdrawal {
    /// The pending `withdraw` transaction.
    pub transaction_id: u64,
    /// The full balance that was withdrawn.
    pub amount: u64,
}

/// Balance check of one wallet against its transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    /// The wallet owner.
    pub participant_id: String,
    /// Stored balance.
    pub balance: u64,
    /// Stored lifetime earnings.
    pub total_earned: u64,
    /// Sum of `win` transactions.
    pub total_won: u64,
    /// Sum of pending and completed `withdraw` transactions.
    pub total_withdrawn: u64,
}

impl Reconciliation {
    /// Whether the stored balances agree with the log.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.total_won.checked_sub(self.total_withdrawn) == Some(self.balance)
            && self.total_earned == self.total_won
    }
}

/// All-time leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    /// 1-based position.
    pub rank: u32,
    /// The participant.
    pub participant_id: String,
    /// Lifetime earnings.
    pub total_earned: u64,
    /// Rounds credited.
    pub wins: u64,
    /// Fastest solve time among credited rounds.
    pub best_elapsed_ms: Option<u64>,
}

/// Per-participant balances and their transaction log.
#[derive(Debug, Clone)]
pub struct WalletLedger {
    store: QuizStore,
    minimum_withdrawal: u64,
}

impl WalletLedger {
    /// Creates a ledger over `store`.
    #[must_use]
    pub const fn new(store: QuizStore, config: &WalletConfig) -> Self {
        Self {
            store,
            minimum_withdrawal: config.minimum_withdrawal,
        }
    }

    /// Credits `amount` for winning `round_id`.
    ///
    /// Returns `false` without changing anything if the participant was
    /// already credited for the round.
    ///
    /// # Errors
    ///
    /// Returns [`QuizError::InvalidAmount`] for a zero amount or one that
    /// does not fit the ledger, and storage errors.
    pub fn credit(
        &self,
        participant_id: &str,
        amount: u64,
        round_id: RoundId,
        now: DateTime<Utc>,
    ) -> Result<bool, QuizError> {
        self.store.write(|tx| credit_in(tx, participant_id, amount, round_id, now))
    }

    /// Withdraws the full balance to `destination`.
    ///
    /// The balance is zeroed and a `pending` withdrawal recorded in one
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns [`QuizError::InsufficientBalance`] if the balance is below
    /// the minimum withdrawal; the balance is unchanged in that case.
    pub fn withdraw(
        &self,
        participant_id: &str,
        destination: &str,
        now: DateTime<Utc>,
    ) -> Result<Withdrawal, QuizError> {
        let minimum = self.minimum_withdrawal;
        let withdrawal = self.store.write(|tx| {
            let taken: Option<i64> = tx
                .query_row(
                    "UPDATE wallets
                     SET last_withdrawal = balance, balance = 0
                     WHERE participant_id = ?1 AND balance >= ?2 AND balance > 0
                     RETURNING last_withdrawal",
                    params![participant_id, minimum],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(amount) = taken else {
                let balance = load_wallet(tx, participant_id)?.map_or(0, |w| w.balance);
                return Err(QuizError::InsufficientBalance {
                    participant_id: participant_id.to_string(),
                    balance,
                    minimum,
                });
            };

            tx.execute(
                "INSERT INTO ledger_transactions
                    (participant_id, amount, kind, destination, status, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    participant_id,
                    amount,
                    TransactionKind::Withdraw.as_str(),
                    destination,
                    TransactionStatus::Pending.as_str(),
                    to_ms(now),
                ],
            )?;

            Ok(Withdrawal {
                transaction_id: tx.last_insert_rowid() as u64,
                amount: amount as u64,
            })
        })?;

        info!(
            participant_id,
            amount = withdrawal.amount,
            transaction_id = withdrawal.transaction_id,
            "withdrawal recorded"
        );
        Ok(withdrawal)
    }

    /// Marks a pending withdrawal as paid out.
    ///
    /// # Errors
    ///
    /// Returns [`QuizError::TransactionNotFound`] for an unknown id or a
    /// non-withdrawal, and [`QuizError::WithdrawalNotPending`] if it was
    /// already settled.
    pub fn complete_withdrawal(&self, transaction_id: u64) -> Result<Transaction, QuizError> {
        let txn = self.store.write(|tx| {
            let txn = pending_withdrawal(tx, transaction_id)?;
            set_status(tx, transaction_id, TransactionStatus::Completed)?;
            Ok(Transaction {
                status: TransactionStatus::Completed,
                ..txn
            })
        })?;
        info!(transaction_id, participant_id = %txn.participant_id, "withdrawal completed");
        Ok(txn)
    }

    /// Marks a pending withdrawal as failed and refunds its amount.
    ///
    /// # Errors
    ///
    /// Same as [`WalletLedger::complete_withdrawal`].
    pub fn fail_withdrawal(&self, transaction_id: u64) -> Result<Transaction, QuizError> {
        let txn = self.store.write(|tx| {
            let txn = pending_withdrawal(tx, transaction_id)?;
            set_status(tx, transaction_id, TransactionStatus::Failed)?;
            tx.execute(
                "UPDATE wallets SET balance = balance + ?2 WHERE participant_id = ?1",
                params![txn.participant_id, txn.amount],
            )?;
            Ok(Transaction {
                status: TransactionStatus::Failed,
                ..txn
            })
        })?;
        warn!(
            transaction_id,
            participant_id = %txn.participant_id,
            amount = txn.amount,
            "withdrawal failed, amount refunded"
        );
        Ok(txn)
    }

    /// The participant's wallet, if it was ever credited.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn wallet(&self, participant_id: &str) -> Result<Option<Wallet>, QuizError> {
        self.store.read(|conn| load_wallet(conn, participant_id))
    }

    /// The participant's balance, zero without a wallet.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn balance(&self, participant_id: &str) -> Result<u64, QuizError> {
        Ok(self.wallet(participant_id)?.map_or(0, |w| w.balance))
    }

    /// The participant's transactions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn transactions(&self, participant_id: &str) -> Result<Vec<Transaction>, QuizError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions
                 WHERE participant_id = ?1
                 ORDER BY id"
            ))?;
            let rows = stmt
                .query_map(params![participant_id], TransactionRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(TransactionRow::into_transaction).collect()
        })
    }

    /// Checks one wallet against its transaction log.
    ///
    /// Returns `None` if the participant has no wallet.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn reconcile(&self, participant_id: &str) -> Result<Option<Reconciliation>, QuizError> {
        self.store.read(|conn| {
            Ok(query_reconciliation(conn, Some(participant_id))?
                .into_iter()
                .next())
        })
    }

    /// Every wallet whose balance disagrees with its transaction log.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn discrepancies(&self) -> Result<Vec<Reconciliation>, QuizError> {
        let all = self.store.read(|conn| query_reconciliation(conn, None))?;
        let checked = all.len();
        let bad: Vec<_> = all.into_iter().filter(|r| !r.is_consistent()).collect();
        debug!(checked, discrepancies = bad.len(), "reconciled wallets");
        Ok(bad)
    }

    /// Participants ranked by lifetime earnings.
    ///
    /// Ties break on the number of rounds won, then on the fastest winning
    /// solve time, then on participant id.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn leaderboard(&self, limit: u32) -> Result<Vec<LeaderboardEntry>, QuizError> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT w.participant_id,
                        w.total_earned,
                        (SELECT COUNT(*) FROM ledger_transactions t
                         WHERE t.participant_id = w.participant_id AND t.kind = 'win') AS wins,
                        (SELECT MIN(a.elapsed_ms) FROM ledger_transactions t
                         JOIN attempts a
                           ON a.round_id = t.round_id AND a.participant_id = t.participant_id
                         WHERE t.participant_id = w.participant_id AND t.kind = 'win') AS best
                 FROM wallets w
                 WHERE w.total_earned > 0
                 ORDER BY w.total_earned DESC, wins DESC, best IS NULL, best ASC, w.participant_id ASC
                 LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rows
                .into_iter()
                .zip(1..)
                .map(|((participant_id, total_earned, wins, best), rank)| LeaderboardEntry {
                    rank,
                    participant_id,
                    total_earned: total_earned as u64,
                    wins: wins as u64,
                    best_elapsed_ms: best.map(|ms| ms as u64),
                })
                .collect())
        })
    }
}

/// Credits a round prize inside the caller's transaction.
///
/// Returns `true` if the credit was applied, `false` if the participant was
/// already credited for the round.
pub(crate) fn credit_in(
    conn: &Connection,
    participant_id: &str,
    amount: u64,
    round_id: RoundId,
    now: DateTime<Utc>,
) -> Result<bool, QuizError> {
    let Some(amount) = i64::try_from(amount).ok().filter(|a| *a > 0) else {
        return Err(QuizError::InvalidAmount {
            participant_id: participant_id.to_string(),
            amount,
        });
    };

    let inserted = conn.execute(
        "INSERT INTO ledger_transactions
            (participant_id, amount, kind, round_id, status, created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            participant_id,
            amount,
            TransactionKind::Win.as_str(),
            round_id,
            TransactionStatus::Completed.as_str(),
            to_ms(now),
        ],
    );
    match inserted {
        Ok(_) => {},
        Err(e) if is_unique_violation(&e) => {
            debug!(participant_id, round_id, "prize already credited");
            return Ok(false);
        },
        Err(e) => return Err(e.into()),
    }

    conn.execute(
        "INSERT INTO wallets (participant_id, balance, total_earned)
         VALUES (?1, ?2, ?2)
         ON CONFLICT(participant_id) DO UPDATE SET
            balance = balance + excluded.balance,
            total_earned = total_earned + excluded.total_earned",
        params![participant_id, amount],
    )?;
    info!(participant_id, round_id, amount, "prize credited");
    Ok(true)
}

fn load_wallet(conn: &Connection, participant_id: &str) -> Result<Option<Wallet>, QuizError> {
    let row: Option<(i64, i64)> = conn
        .query_row(
            "SELECT balance, total_earned FROM wallets WHERE participant_id = ?1",
            params![participant_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row.map(|(balance, total_earned)| Wallet {
        participant_id: participant_id.to_string(),
        balance: balance as u64,
        total_earned: total_earned as u64,
    }))
}

const TRANSACTION_COLUMNS: &str =
    "id, participant_id, amount, kind, round_id, destination, status, created_at_ms";

struct TransactionRow {
    id: i64,
    participant_id: String,
    amount: i64,
    kind: String,
    round_id: Option<i64>,
    destination: Option<String>,
    status: String,
    created_at_ms: i64,
}

impl TransactionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            participant_id: row.get(1)?,
            amount: row.get(2)?,
            kind: row.get(3)?,
            round_id: row.get(4)?,
            destination: row.get(5)?,
            status: row.get(6)?,
            created_at_ms: row.get(7)?,
        })
    }

    fn into_transaction(self) -> Result<Transaction, QuizError> {
        Ok(Transaction {
            id: self.id as u64,
            participant_id: self.participant_id,
            amount: self.amount as u64,
            kind: TransactionKind::parse(&self.kind)?,
            round_id: self.round_id.map(|id| id as RoundId),
            destination: self.destination,
            status: TransactionStatus::parse(&self.status)?,
            created_at: from_ms(self.created_at_ms)?,
        })
    }
}

fn pending_withdrawal(conn: &Connection, transaction_id: u64) -> Result<Transaction, QuizError> {
    let txn = conn
        .query_row(
            &format!("SELECT {TRANSACTION_COLUMNS} FROM ledger_transactions WHERE id = ?1"),
            params![transaction_id],
            TransactionRow::from_row,
        )
        .optional()?
        .map(TransactionRow::into_transaction)
        .transpose()?
        .filter(|t| t.kind == TransactionKind::Withdraw)
        .ok_or(QuizError::TransactionNotFound { transaction_id })?;

    if txn.status != TransactionStatus::Pending {
        return Err(QuizError::WithdrawalNotPending {
            transaction_id,
            status: txn.status,
        });
    }
    Ok(txn)
}

fn set_status(
    conn: &Connection,
    transaction_id: u64,
    status: TransactionStatus,
) -> Result<(), QuizError> {
    conn.execute(
        "UPDATE ledger_transactions SET status = ?2 WHERE id = ?1",
        params![transaction_id, status.as_str()],
    )?;
    Ok(())
}

fn query_reconciliation(
    conn: &Connection,
    participant_id: Option<&str>,
) -> Result<Vec<Reconciliation>, QuizError> {
    let mut stmt = conn.prepare(
        "SELECT w.participant_id,
                w.balance,
                w.total_earned,
                COALESCE((SELECT SUM(amount) FROM ledger_transactions t
                          WHERE t.participant_id = w.participant_id AND t.kind = 'win'), 0),
                COALESCE((SELECT SUM(amount) FROM ledger_transactions t
                          WHERE t.participant_id = w.participant_id
                            AND t.kind = 'withdraw'
                            AND t.status IN ('pending', 'completed')), 0)
         FROM wallets w
         WHERE ?1 IS NULL OR w.participant_id = ?1
         ORDER BY w.participant_id",
    )?;
    let rows = stmt
        .query_map(params![participant_id], |row| {
            Ok(Reconciliation {
                participant_id: row.get(0)?,
                balance: row.get::<_, i64>(1)? as u64,
                total_earned: row.get::<_, i64>(2)? as u64,
                total_won: row.get::<_, i64>(3)? as u64,
                total_withdrawn: row.get::<_, i64>(4)? as u64,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests;
