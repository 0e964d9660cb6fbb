use crate::schemas::{ExpenseId, GroupId, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid expense: {0}")]
    InvalidExpense(String),
    #[error("{participant} is not a participant of expense {expense_id}")]
    NotAParticipant {
        expense_id: ExpenseId,
        participant: UserId,
    },
    #[error("expense {0} not found")]
    ExpenseNotFound(ExpenseId),
    #[error("group {0} not found")]
    GroupNotFound(GroupId),
    #[error("payment details missing: {0}")]
    PaymentDetailsMissing(&'static str),
    #[error("{caller} may not settle on behalf of {subject}")]
    Authorization { caller: UserId, subject: UserId },
    #[error("missing or invalid caller credentials")]
    Unauthenticated,
    #[error("invalid payment: {0}")]
    InvalidPayment(String),
    #[error("{participant} has already settled expense {expense_id}")]
    AlreadySettled {
        expense_id: ExpenseId,
        participant: UserId,
    },
    #[error("cash confirmation {0} not found")]
    ConfirmationNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}
