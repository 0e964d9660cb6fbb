use std::sync::Arc;

use serde::Serialize;

use crate::{
    balance::{compute_balances, compute_group_balances, MemberBalance, UserSummary},
    error::{LedgerError, LedgerResult},
    schemas::{Expense, ExpenseId, GroupId, Money, Transaction, UserId},
    settlement::SettlementStatus,
    share::compute_share,
    store::LedgerStore,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Payer,
    Participant,
}

/// An expense as seen by one of the users on it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserExpense {
    #[serde(flatten)]
    pub expense: Expense,
    pub role: Role,
    /// The payer's own share, or what the participant owes.
    pub my_share: Money,
    pub settled: bool,
}

/// Read side of the ledger. Everything is recomputed from the stored
/// records on each call.
#[derive(Clone)]
pub struct LedgerQueryService {
    store: Arc<dyn LedgerStore>,
}

impl LedgerQueryService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn get_user_summary(&self, user: &UserId) -> LedgerResult<UserSummary> {
        let expenses = self.store.expenses_for_user(user).await?;
        let transactions = self.store.transactions_for_user(user).await?;
        Ok(compute_balances(user, &expenses, &transactions))
    }

    pub async fn get_expense_settlement_status(
        &self,
        expense_id: &ExpenseId,
    ) -> LedgerResult<SettlementStatus> {
        let expense = self
            .store
            .expense(expense_id)
            .await?
            .ok_or_else(|| LedgerError::ExpenseNotFound(expense_id.clone()))?;
        Ok(SettlementStatus::of(&expense))
    }

    pub async fn get_user_expenses(&self, user: &UserId) -> LedgerResult<Vec<UserExpense>> {
        let expenses = self.store.expenses_for_user(user).await?;
        Ok(expenses
            .into_iter()
            .filter_map(|expense| {
                let share = compute_share(&expense).ok()?;
                let (role, my_share) = if &expense.paid_by == user {
                    (Role::Payer, share.payer_share)
                } else {
                    (Role::Participant, share.per_participant)
                };
                Some(UserExpense {
                    settled: role == Role::Payer || expense.is_settled_by(user),
                    expense,
                    role,
                    my_share,
                })
            })
            .collect())
    }

    pub async fn get_user_transactions(&self, user: &UserId) -> LedgerResult<Vec<Transaction>> {
        let mut transactions = self.store.transactions_for_user(user).await?;
        transactions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(transactions)
    }

    pub async fn get_group_transactions(&self, group: &GroupId) -> LedgerResult<Vec<Transaction>> {
        let mut transactions = self.store.transactions_for_group(group).await?;
        transactions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(transactions)
    }

    pub async fn get_group_balances(&self, group_id: &GroupId) -> LedgerResult<Vec<MemberBalance>> {
        let group = self
            .store
            .group(group_id)
            .await?
            .ok_or_else(|| LedgerError::GroupNotFound(group_id.clone()))?;
        let expenses = self.store.expenses_for_group(group_id).await?;
        for expense in &expenses {
            if let Err(reason) = expense.validate(&group) {
                tracing::warn!("Expense {} violates group invariants: {}", expense.id, reason);
            }
        }
        let transactions = self.store.transactions_for_group(group_id).await?;
        Ok(compute_group_balances(&group, &expenses, &transactions))
    }
}
