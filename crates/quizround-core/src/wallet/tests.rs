//! Tests for the wallet ledger.

// Test code uses proptest which generates patterns that trigger these lints.
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use proptest::prelude::*;

use super::*;
use crate::store::testing::{at, insert_rounds};

fn ledger(minimum: u64) -> (WalletLedger, Vec<RoundId>) {
    let store = QuizStore::in_memory().unwrap();
    let rounds = insert_rounds(&store, 8);
    let ledger = WalletLedger::new(
        store,
        &WalletConfig {
            minimum_withdrawal: minimum,
        },
    );
    (ledger, rounds)
}

#[test]
fn test_credit_creates_wallet_lazily() {
    let (ledger, rounds) = ledger(50);
    assert_eq!(ledger.wallet("alice").unwrap(), None);
    assert_eq!(ledger.balance("alice").unwrap(), 0);

    assert!(ledger.credit("alice", 50, rounds[0], at(19, 0, 10)).unwrap());

    let wallet = ledger.wallet("alice").unwrap().unwrap();
    assert_eq!(wallet.balance, 50);
    assert_eq!(wallet.total_earned, 50);

    let txns = ledger.transactions("alice").unwrap();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].kind, TransactionKind::Win);
    assert_eq!(txns[0].round_id, Some(rounds[0]));
    assert_eq!(txns[0].status, TransactionStatus::Completed);
}

#[test]
fn test_credit_is_idempotent_per_round() {
    let (ledger, rounds) = ledger(50);
    assert!(ledger.credit("alice", 50, rounds[0], at(19, 0, 10)).unwrap());
    assert!(!ledger.credit("alice", 50, rounds[0], at(19, 0, 11)).unwrap());
    assert!(ledger.credit("alice", 50, rounds[1], at(19, 0, 12)).unwrap());

    assert_eq!(ledger.balance("alice").unwrap(), 100);
    assert_eq!(ledger.transactions("alice").unwrap().len(), 2);
}

#[test]
fn test_credit_rejects_amount_the_ledger_cannot_hold() {
    let (ledger, rounds) = ledger(50);
    for amount in [0, u64::MAX] {
        let err = ledger.credit("alice", amount, rounds[0], at(19, 0, 10)).unwrap_err();
        assert!(
            matches!(&err, QuizError::InvalidAmount { participant_id, amount: a }
                if participant_id == "alice" && *a == amount),
            "unexpected error {err:?}"
        );
    }
    assert_eq!(ledger.wallet("alice").unwrap(), None);
    assert!(ledger.transactions("alice").unwrap().is_empty());

    // The round is still creditable afterwards.
    assert!(ledger.credit("alice", 50, rounds[0], at(19, 0, 11)).unwrap());
}

#[test]
fn test_withdraw_below_minimum_leaves_balance() {
    let (ledger, rounds) = ledger(50);
    ledger.credit("alice", 30, rounds[0], at(19, 0, 10)).unwrap();

    let err = ledger.withdraw("alice", "card-1234", at(20, 0, 0)).unwrap_err();
    assert!(matches!(
        err,
        QuizError::InsufficientBalance {
            balance: 30,
            minimum: 50,
            ..
        }
    ));
    assert_eq!(ledger.balance("alice").unwrap(), 30);
    assert_eq!(ledger.transactions("alice").unwrap().len(), 1);
}

#[test]
fn test_withdraw_without_wallet_reports_zero_balance() {
    let (ledger, _) = ledger(50);
    let err = ledger.withdraw("nobody", "card-1234", at(20, 0, 0)).unwrap_err();
    assert!(matches!(err, QuizError::InsufficientBalance { balance: 0, .. }));
}

#[test]
fn test_withdraw_takes_full_balance() {
    let (ledger, rounds) = ledger(50);
    ledger.credit("alice", 50, rounds[0], at(19, 0, 10)).unwrap();
    ledger.credit("alice", 50, rounds[1], at(19, 0, 10)).unwrap();

    let withdrawal = ledger.withdraw("alice", "card-1234", at(20, 0, 0)).unwrap();
    assert_eq!(withdrawal.amount, 100);

    let wallet = ledger.wallet("alice").unwrap().unwrap();
    assert_eq!(wallet.balance, 0);
    assert_eq!(wallet.total_earned, 100);

    let txns = ledger.transactions("alice").unwrap();
    let last = txns.last().unwrap();
    assert_eq!(last.id, withdrawal.transaction_id);
    assert_eq!(last.kind, TransactionKind::Withdraw);
    assert_eq!(last.status, TransactionStatus::Pending);
    assert_eq!(last.destination.as_deref(), Some("card-1234"));

    assert!(matches!(
        ledger.withdraw("alice", "card-1234", at(20, 0, 1)),
        Err(QuizError::InsufficientBalance { balance: 0, .. })
    ));
    assert!(ledger.reconcile("alice").unwrap().unwrap().is_consistent());
}

#[test]
fn test_complete_and_fail_withdrawal() {
    let (ledger, rounds) = ledger(50);
    ledger.credit("alice", 60, rounds[0], at(19, 0, 10)).unwrap();
    let first = ledger.withdraw("alice", "card-1", at(20, 0, 0)).unwrap();

    let done = ledger.complete_withdrawal(first.transaction_id).unwrap();
    assert_eq!(done.status, TransactionStatus::Completed);
    assert!(matches!(
        ledger.fail_withdrawal(first.transaction_id),
        Err(QuizError::WithdrawalNotPending {
            status: TransactionStatus::Completed,
            ..
        })
    ));

    ledger.credit("alice", 70, rounds[1], at(19, 0, 10)).unwrap();
    let second = ledger.withdraw("alice", "card-2", at(21, 0, 0)).unwrap();
    assert_eq!(second.amount, 70);
    let failed = ledger.fail_withdrawal(second.transaction_id).unwrap();
    assert_eq!(failed.status, TransactionStatus::Failed);
    assert_eq!(ledger.balance("alice").unwrap(), 70);

    // The refund is carried by the failed row itself.
    let kinds: Vec<_> = ledger
        .transactions("alice")
        .unwrap()
        .into_iter()
        .map(|t| (t.kind, t.status))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (TransactionKind::Win, TransactionStatus::Completed),
            (TransactionKind::Withdraw, TransactionStatus::Completed),
            (TransactionKind::Win, TransactionStatus::Completed),
            (TransactionKind::Withdraw, TransactionStatus::Failed),
        ]
    );

    let rec = ledger.reconcile("alice").unwrap().unwrap();
    assert_eq!(rec.total_won, 130);
    assert_eq!(rec.total_withdrawn, 60);
    assert!(rec.is_consistent());
}

#[test]
fn test_settling_unknown_or_credit_transaction_is_not_found() {
    let (ledger, rounds) = ledger(50);
    ledger.credit("alice", 60, rounds[0], at(19, 0, 10)).unwrap();
    let credit_id = ledger.transactions("alice").unwrap()[0].id;

    assert!(matches!(
        ledger.complete_withdrawal(credit_id),
        Err(QuizError::TransactionNotFound { .. })
    ));
    assert!(matches!(
        ledger.complete_withdrawal(9_999),
        Err(QuizError::TransactionNotFound {
            transaction_id: 9_999
        })
    ));
}

#[test]
fn test_discrepancies_flags_tampered_wallet() {
    let (ledger, rounds) = ledger(50);
    ledger.credit("alice", 50, rounds[0], at(19, 0, 10)).unwrap();
    ledger.credit("bob", 50, rounds[0], at(19, 0, 10)).unwrap();
    assert!(ledger.discrepancies().unwrap().is_empty());

    ledger
        .store
        .write(|tx| {
            tx.execute(
                "UPDATE wallets SET balance = 999 WHERE participant_id = 'bob'",
                [],
            )?;
            Ok(())
        })
        .unwrap();

    let bad = ledger.discrepancies().unwrap();
    assert_eq!(bad.len(), 1);
    assert_eq!(bad[0].participant_id, "bob");
    assert_eq!(bad[0].balance, 999);
}

#[test]
fn test_leaderboard_ranks_by_earnings_then_wins() {
    let (ledger, rounds) = ledger(50);
    ledger.credit("alice", 100, rounds[0], at(19, 0, 10)).unwrap();
    ledger.credit("bob", 50, rounds[0], at(19, 0, 10)).unwrap();
    ledger.credit("bob", 50, rounds[1], at(19, 0, 10)).unwrap();
    ledger.credit("carol", 50, rounds[2], at(19, 0, 10)).unwrap();

    let board = ledger.leaderboard(10).unwrap();
    let order: Vec<_> = board
        .iter()
        .map(|e| (e.rank, e.participant_id.as_str(), e.wins))
        .collect();
    assert_eq!(order, vec![(1, "bob", 2), (2, "alice", 1), (3, "carol", 1)]);

    assert_eq!(ledger.leaderboard(1).unwrap().len(), 1);
}

#[derive(Debug, Clone)]
enum Op {
    Credit { who: u8, round: usize, amount: u64 },
    Withdraw { who: u8 },
    Complete { nth: usize },
    Fail { nth: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..3, 0usize..8, 1u64..120).prop_map(|(who, round, amount)| Op::Credit {
            who,
            round,
            amount
        }),
        (0u8..3).prop_map(|who| Op::Withdraw { who }),
        (0usize..8).prop_map(|nth| Op::Complete { nth }),
        (0usize..8).prop_map(|nth| Op::Fail { nth }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: every wallet reconciles with its log after any sequence of
    /// credits, withdrawals, and settlements.
    #[test]
    fn prop_balances_reconcile(ops in prop::collection::vec(arb_op(), 1..40)) {
        let (ledger, rounds) = ledger(50);
        let mut withdrawals: Vec<u64> = Vec::new();

        for op in ops {
            match op {
                Op::Credit { who, round, amount } => {
                    ledger
                        .credit(&format!("p{who}"), amount, rounds[round], at(19, 0, 10))
                        .unwrap();
                },
                Op::Withdraw { who } => match ledger.withdraw(&format!("p{who}"), "dest", at(20, 0, 0)) {
                    Ok(w) => withdrawals.push(w.transaction_id),
                    Err(QuizError::InsufficientBalance { balance, minimum, .. }) => {
                        prop_assert!(balance < minimum);
                    },
                    Err(e) => return Err(TestCaseError::fail(e.to_string())),
                },
                Op::Complete { nth } => {
                    if let Some(id) = withdrawals.get(nth) {
                        let _ = ledger.complete_withdrawal(*id);
                    }
                },
                Op::Fail { nth } => {
                    if let Some(id) = withdrawals.get(nth) {
                        let _ = ledger.fail_withdrawal(*id);
                    }
                },
            }
        }

        prop_assert!(ledger.discrepancies().unwrap().is_empty());
    }
}
