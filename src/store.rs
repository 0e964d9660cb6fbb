use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    error::StoreError,
    schemas::{CashConfirmation, Expense, ExpenseId, Group, GroupId, Transaction, UserId},
};

/// Result of inserting a transaction under an idempotency key.
#[derive(Clone, Debug, PartialEq)]
pub enum InsertOutcome {
    Inserted(Transaction),
    /// A transaction with the same key already existed; nothing was written.
    Existing(Transaction),
}

/// Persistence the ledger engine depends on.
///
/// `add_settled_participant` and `insert_transaction_once` must be atomic
/// at the storage layer: the first is an add-to-set guarded by membership
/// in `sharedWith`, the second a unique-key insert.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn expense(&self, id: &ExpenseId) -> Result<Option<Expense>, StoreError>;

    /// Expenses the user paid or participates in.
    async fn expenses_for_user(&self, user: &UserId) -> Result<Vec<Expense>, StoreError>;

    async fn expenses_for_group(&self, group: &GroupId) -> Result<Vec<Expense>, StoreError>;

    async fn group(&self, id: &GroupId) -> Result<Option<Group>, StoreError>;

    /// Adds `participant` to `settledBy` if the expense exists and lists them
    /// in `sharedWith`. Returns the updated expense, or `None` if no such
    /// expense/participant pair exists.
    async fn add_settled_participant(
        &self,
        id: &ExpenseId,
        participant: &UserId,
    ) -> Result<Option<Expense>, StoreError>;

    async fn transaction_by_key(&self, key: &str) -> Result<Option<Transaction>, StoreError>;

    async fn insert_transaction_once(
        &self,
        transaction: Transaction,
    ) -> Result<InsertOutcome, StoreError>;

    /// Transactions where the user is payer or payee.
    async fn transactions_for_user(&self, user: &UserId) -> Result<Vec<Transaction>, StoreError>;

    async fn transactions_for_group(
        &self,
        group: &GroupId,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn save_confirmation(&self, confirmation: CashConfirmation) -> Result<(), StoreError>;

    async fn confirmation(&self, token: &str) -> Result<Option<CashConfirmation>, StoreError>;

    async fn remove_confirmation(&self, token: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryState {
    groups: HashMap<GroupId, Group>,
    expenses: HashMap<ExpenseId, Expense>,
    transactions: Vec<Transaction>,
    confirmations: HashMap<String, CashConfirmation>,
}

/// Store kept entirely in memory; every operation runs under one lock.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_group(&self, group: Group) {
        self.state.lock().await.groups.insert(group.id.clone(), group);
    }

    pub async fn put_expense(&self, expense: Expense) {
        self.state
            .lock()
            .await
            .expenses
            .insert(expense.id.clone(), expense);
    }

    pub async fn delete_expense(&self, id: &ExpenseId) -> Option<Expense> {
        self.state.lock().await.expenses.remove(id)
    }

    pub async fn transaction_count(&self) -> usize {
        self.state.lock().await.transactions.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn expense(&self, id: &ExpenseId) -> Result<Option<Expense>, StoreError> {
        Ok(self.state.lock().await.expenses.get(id).cloned())
    }

    async fn expenses_for_user(&self, user: &UserId) -> Result<Vec<Expense>, StoreError> {
        let state = self.state.lock().await;
        let mut expenses: Vec<Expense> = state
            .expenses
            .values()
            .filter(|e| e.involves(user))
            .cloned()
            .collect();
        expenses.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(expenses)
    }

    async fn expenses_for_group(&self, group: &GroupId) -> Result<Vec<Expense>, StoreError> {
        let state = self.state.lock().await;
        let mut expenses: Vec<Expense> = state
            .expenses
            .values()
            .filter(|e| &e.group_id == group)
            .cloned()
            .collect();
        expenses.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(expenses)
    }

    async fn group(&self, id: &GroupId) -> Result<Option<Group>, StoreError> {
        Ok(self.state.lock().await.groups.get(id).cloned())
    }

    async fn add_settled_participant(
        &self,
        id: &ExpenseId,
        participant: &UserId,
    ) -> Result<Option<Expense>, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state
            .expenses
            .get_mut(id)
            .filter(|e| e.shared_with.contains(participant))
            .map(|e| {
                e.settled_by.insert(participant.clone());
                e.clone()
            }))
    }

    async fn transaction_by_key(&self, key: &str) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .find(|t| t.idempotency_key == key)
            .cloned())
    }

    async fn insert_transaction_once(
        &self,
        transaction: Transaction,
    ) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .transactions
            .iter()
            .find(|t| t.idempotency_key == transaction.idempotency_key)
        {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        state.transactions.push(transaction.clone());
        Ok(InsertOutcome::Inserted(transaction))
    }

    async fn transactions_for_user(&self, user: &UserId) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| &t.payer_id == user || &t.payee_id == user)
            .cloned()
            .collect())
    }

    async fn transactions_for_group(
        &self,
        group: &GroupId,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.group_id.as_ref() == Some(group))
            .cloned()
            .collect())
    }

    async fn save_confirmation(&self, confirmation: CashConfirmation) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .confirmations
            .insert(confirmation.token.clone(), confirmation);
        Ok(())
    }

    async fn confirmation(&self, token: &str) -> Result<Option<CashConfirmation>, StoreError> {
        Ok(self.state.lock().await.confirmations.get(token).cloned())
    }

    async fn remove_confirmation(&self, token: &str) -> Result<(), StoreError> {
        self.state.lock().await.confirmations.remove(token);
        Ok(())
    }
}
