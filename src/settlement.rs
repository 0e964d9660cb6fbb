use std::sync::Arc;

use serde::Serialize;

use crate::{
    error::{LedgerError, LedgerResult},
    schemas::{Expense, ExpenseId, UserId},
    store::LedgerStore,
};

/// Sole writer of `Expense::settled_by`.
///
/// A (expense, participant) pair moves from unsettled to settled once and
/// never back; a reversal is a new offsetting transaction.
#[derive(Clone)]
pub struct SettlementTracker {
    store: Arc<dyn LedgerStore>,
}

impl SettlementTracker {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Records that `participant` settled their share of the expense.
    /// Calling it again for a settled pair changes nothing.
    pub async fn mark_settled(
        &self,
        expense_id: &ExpenseId,
        participant: &UserId,
    ) -> LedgerResult<Expense> {
        let expense = self
            .store
            .expense(expense_id)
            .await?
            .ok_or_else(|| LedgerError::ExpenseNotFound(expense_id.clone()))?;
        if !expense.shared_with.contains(participant) {
            return Err(LedgerError::NotAParticipant {
                expense_id: expense_id.clone(),
                participant: participant.clone(),
            });
        }
        if expense.is_settled_by(participant) {
            tracing::debug!("{} already settled expense {}", participant, expense_id);
            return Ok(expense);
        }

        match self
            .store
            .add_settled_participant(expense_id, participant)
            .await?
        {
            Some(updated) => {
                tracing::info!("{} settled expense {}", participant, expense_id);
                Ok(updated)
            }
            // Deleted, or participant removed, between the read and the write.
            None => match self.store.expense(expense_id).await? {
                None => Err(LedgerError::ExpenseNotFound(expense_id.clone())),
                Some(_) => Err(LedgerError::NotAParticipant {
                    expense_id: expense_id.clone(),
                    participant: participant.clone(),
                }),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementStatus {
    pub expense_id: ExpenseId,
    pub paid_by: UserId,
    pub settled: Vec<UserId>,
    pub pending: Vec<UserId>,
    pub fully_settled: bool,
}

impl SettlementStatus {
    pub fn of(expense: &Expense) -> Self {
        let settled: Vec<UserId> = expense
            .shared_with
            .iter()
            .filter(|u| expense.settled_by.contains(*u))
            .cloned()
            .collect();
        let pending: Vec<UserId> = expense
            .shared_with
            .iter()
            .filter(|u| !expense.settled_by.contains(*u))
            .cloned()
            .collect();
        Self {
            expense_id: expense.id.clone(),
            paid_by: expense.paid_by.clone(),
            fully_settled: pending.is_empty(),
            settled,
            pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        schemas::fixtures::{expense, user},
        store::MemoryStore,
    };

    async fn tracker_with(expense: Expense) -> (Arc<MemoryStore>, SettlementTracker) {
        let store = Arc::new(MemoryStore::new());
        store.put_expense(expense).await;
        let tracker = SettlementTracker::new(store.clone());
        (store, tracker)
    }

    #[tokio::test]
    async fn mark_settled_is_idempotent() {
        let (_, tracker) = tracker_with(expense("e1", 300, "u1", &["u2", "u3"])).await;
        let id = ExpenseId::from("e1");

        let once = tracker.mark_settled(&id, &user("u2")).await.unwrap();
        let twice = tracker.mark_settled(&id, &user("u2")).await.unwrap();

        assert_eq!(once.settled_by, twice.settled_by);
        assert_eq!(twice.settled_by.len(), 1);
        assert!(twice.is_settled_by(&user("u2")));
    }

    #[tokio::test]
    async fn non_participant_is_rejected_without_mutation() {
        let (store, tracker) = tracker_with(expense("e1", 300, "u1", &["u2"])).await;
        let id = ExpenseId::from("e1");

        let err = tracker.mark_settled(&id, &user("u1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotAParticipant { .. }));

        let stored = store.expense(&id).await.unwrap().unwrap();
        assert!(stored.settled_by.is_empty());
    }

    #[tokio::test]
    async fn deleted_expense_is_not_found() {
        let (store, tracker) = tracker_with(expense("e1", 300, "u1", &["u2"])).await;
        let id = ExpenseId::from("e1");
        store.delete_expense(&id).await;

        let err = tracker.mark_settled(&id, &user("u2")).await.unwrap_err();
        assert!(matches!(err, LedgerError::ExpenseNotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_settles_do_not_lose_updates() {
        let (store, tracker) = tracker_with(expense("e1", 300, "u1", &["u2", "u3"])).await;
        let id = ExpenseId::from("e1");
        let (u2, u3) = (user("u2"), user("u3"));

        let (a, b) = tokio::join!(tracker.mark_settled(&id, &u2), tracker.mark_settled(&id, &u3));
        a.unwrap();
        b.unwrap();

        let stored = store.expense(&id).await.unwrap().unwrap();
        assert_eq!(stored.settled_by.len(), 2);
    }

    #[test]
    fn status_splits_settled_and_pending() {
        let mut e = expense("e1", 300, "u1", &["u2", "u3"]);
        e.settled_by.insert(user("u3"));

        let status = SettlementStatus::of(&e);
        assert_eq!(status.settled, vec![user("u3")]);
        assert_eq!(status.pending, vec![user("u2")]);
        assert!(!status.fully_settled);

        e.settled_by.insert(user("u2"));
        assert!(SettlementStatus::of(&e).fully_settled);
    }
}
