use crate::{
    error::LedgerError,
    schemas::{Expense, Money},
};

/// How an expense's amount divides between its payer and debtors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Share {
    /// What each debtor in `shared_with` owes the payer.
    pub per_participant: Money,
    /// The payer's own share, including any rounding remainder.
    pub payer_share: Money,
    /// Sum of all debtors' shares.
    pub owed_to_payer: Money,
    pub divisor: u32,
}

/// Splits an expense so that the payer bears exactly one share and every
/// member of `shared_with` owes `amount / (|shared_with| + 1)`.
///
/// Amounts are integer minor units; the payer absorbs the remainder, so
/// `per_participant * |shared_with| + payer_share == amount` always holds.
/// An expense with nobody else on it nets to zero and is not an error.
pub fn compute_share(expense: &Expense) -> Result<Share, LedgerError> {
    if !expense.amount.is_positive() {
        return Err(LedgerError::InvalidExpense(format!(
            "expense {} has non-positive amount {}",
            expense.id, expense.amount
        )));
    }
    if expense.shared_with.contains(&expense.paid_by) {
        return Err(LedgerError::InvalidExpense(format!(
            "payer {} of expense {} is listed as a debtor",
            expense.paid_by, expense.id
        )));
    }

    let debtors = u32::try_from(expense.shared_with.len()).map_err(|_| {
        LedgerError::InvalidExpense(format!("expense {} has too many participants", expense.id))
    })?;
    let divisor = debtors + 1;
    let (per_participant, _) = expense.amount.split(divisor);
    let owed_to_payer = per_participant.times(debtors);

    Ok(Share {
        per_participant,
        payer_share: expense.amount - owed_to_payer,
        owed_to_payer,
        divisor,
    })
}
