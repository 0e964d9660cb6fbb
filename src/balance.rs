use std::collections::BTreeMap;

use serde::Serialize;

use crate::{
    schemas::{Expense, ExpenseId, Group, Money, Transaction, TransactionId, UserId},
    share::compute_share,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// What other participants owe on expenses the user paid.
    pub owed_to_me: Money,
    /// The user's shares of expenses somebody else paid.
    pub i_owe: Money,
    /// Settlements received minus settlements paid.
    pub transactions_net: Money,
    /// Positive: the user is owed. Negative: the user owes.
    pub net: Money,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberBalance {
    pub user_id: UserId,
    pub net: Money,
}

/// Drops repeated copies of the same expense. When copies disagree the one
/// with the largest `settled_by` wins, since that set only ever grows.
fn unique_expenses<'a>(expenses: &'a [Expense]) -> impl Iterator<Item = &'a Expense> {
    let mut by_id: BTreeMap<&ExpenseId, &Expense> = BTreeMap::new();
    for expense in expenses {
        by_id
            .entry(&expense.id)
            .and_modify(|kept| {
                if expense.settled_by.len() > kept.settled_by.len() {
                    *kept = expense;
                }
            })
            .or_insert(expense);
    }
    by_id.into_values()
}

fn unique_transactions<'a>(
    transactions: &'a [Transaction],
) -> impl Iterator<Item = &'a Transaction> {
    let mut by_id: BTreeMap<&TransactionId, &Transaction> = BTreeMap::new();
    for transaction in transactions {
        by_id.entry(&transaction.id).or_insert(transaction);
    }
    by_id.into_values()
}

/// Folds a user's full expense and settlement history into a balance.
///
/// Always recomputed from the records; no running total is kept anywhere.
/// Malformed expenses are skipped, so this never fails.
pub fn compute_balances(
    user: &UserId,
    expenses: &[Expense],
    transactions: &[Transaction],
) -> UserSummary {
    let mut summary = UserSummary::default();

    for expense in unique_expenses(expenses) {
        if !expense.involves(user) {
            continue;
        }
        let share = match compute_share(expense) {
            Ok(share) => share,
            Err(err) => {
                tracing::warn!("Skipping expense {} in balance of {}: {}", expense.id, user, err);
                continue;
            }
        };
        let (total, delta) = if &expense.paid_by == user {
            (&mut summary.owed_to_me, share.owed_to_payer)
        } else {
            (&mut summary.i_owe, share.per_participant)
        };
        match total.checked_add(delta) {
            Some(sum) => *total = sum,
            None => tracing::warn!(
                "Skipping expense {} in balance of {}: total overflows",
                expense.id,
                user
            ),
        }
    }

    for transaction in unique_transactions(transactions) {
        let mut net = summary.transactions_net;
        if &transaction.payee_id == user {
            net = match net.checked_add(transaction.amount) {
                Some(net) => net,
                None => {
                    tracing::warn!("Skipping transaction {}: total overflows", transaction.id);
                    continue;
                }
            };
        }
        if &transaction.payer_id == user {
            net = match net.checked_sub(transaction.amount) {
                Some(net) => net,
                None => {
                    tracing::warn!("Skipping transaction {}: total overflows", transaction.id);
                    continue;
                }
            };
        }
        summary.transactions_net = net;
    }

    summary.net = summary
        .owed_to_me
        .saturating_sub(summary.i_owe)
        .saturating_sub(summary.transactions_net);
    summary
}

/// Net balance of every member of a group over the group's records.
pub fn compute_group_balances(
    group: &Group,
    expenses: &[Expense],
    transactions: &[Transaction],
) -> Vec<MemberBalance> {
    let mut balances: BTreeMap<&UserId, Money> = BTreeMap::new();
    for member in &group.members {
        balances.insert(member, compute_balances(member, expenses, transactions).net);
    }

    let mut balances: Vec<MemberBalance> = balances
        .into_iter()
        .map(|(user_id, net)| MemberBalance {
            user_id: user_id.clone(),
            net,
        })
        .collect();
    balances.sort_by(|a, b| b.net.cmp(&a.net).then_with(|| a.user_id.cmp(&b.user_id)));
    balances
}
