use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    error::{LedgerError, LedgerResult},
    schemas::{
        CashConfirmation, Expense, ExpenseId, Money, PaymentMethod, Transaction, TransactionId,
        UserId,
    },
    settlement::SettlementTracker,
    share::compute_share,
    store::{InsertOutcome, LedgerStore},
};

/// A payment-completion signal as delivered by the signed gateway webhook
/// or a confirmed cash payment. Delivery is at-least-once.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub expense_id: Option<ExpenseId>,
    pub payer_id: Option<UserId>,
    pub payee_id: Option<UserId>,
    pub amount: Option<Money>,
    pub payment_method: Option<PaymentMethod>,
    /// Checkout session id for card payments.
    #[serde(alias = "sessionId", alias = "stripeSessionId")]
    pub gateway_reference: Option<String>,
    /// Token of the confirmed cash request.
    pub confirmation_token: Option<String>,
}

/// A checkout redirect only names the session; it never carries enough
/// trust to record a payment on its own.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectCompletion {
    #[serde(alias = "sessionId", alias = "stripeSessionId")]
    pub gateway_reference: Option<String>,
}

struct PaymentDetails {
    expense_id: ExpenseId,
    payer_id: UserId,
    payee_id: UserId,
    amount: Money,
    method: PaymentMethod,
    key: String,
}

/// One cash payment per debtor and expense, however many tokens were issued.
fn cash_key(expense_id: &ExpenseId, payer_id: &UserId) -> String {
    format!("cash:{expense_id}:{payer_id}")
}

fn present<T>(value: &Option<T>, is_blank: impl Fn(&T) -> bool) -> Option<&T> {
    value.as_ref().filter(|v| !is_blank(v))
}

impl CompletionEvent {
    fn details(&self) -> LedgerResult<PaymentDetails> {
        let expense_id = present(&self.expense_id, |id| id.as_str().is_empty())
            .ok_or(LedgerError::PaymentDetailsMissing("expenseId"))?;
        let payer_id = present(&self.payer_id, |id| id.as_str().is_empty())
            .ok_or(LedgerError::PaymentDetailsMissing("payerId"))?;
        let payee_id = present(&self.payee_id, |id| id.as_str().is_empty())
            .ok_or(LedgerError::PaymentDetailsMissing("payeeId"))?;
        let amount = self
            .amount
            .filter(|a| a.is_positive())
            .ok_or(LedgerError::PaymentDetailsMissing("amount"))?;
        let method = self
            .payment_method
            .ok_or(LedgerError::PaymentDetailsMissing("paymentMethod"))?;
        let key = match method {
            PaymentMethod::Card => present(&self.gateway_reference, |k| k.is_empty())
                .ok_or(LedgerError::PaymentDetailsMissing("gatewayReference"))?
                .clone(),
            PaymentMethod::Cash => {
                present(&self.confirmation_token, |k| k.is_empty())
                    .ok_or(LedgerError::PaymentDetailsMissing("confirmationToken"))?;
                cash_key(expense_id, payer_id)
            }
        };

        Ok(PaymentDetails {
            expense_id: expense_id.clone(),
            payer_id: payer_id.clone(),
            payee_id: payee_id.clone(),
            amount,
            method,
            key,
        })
    }
}

fn check_payment(expense: &Expense, details: &PaymentDetails) -> LedgerResult<()> {
    if details.payer_id == details.payee_id {
        return Err(LedgerError::InvalidPayment(format!(
            "{} cannot pay themselves",
            details.payer_id
        )));
    }
    if details.payee_id != expense.paid_by {
        return Err(LedgerError::InvalidPayment(format!(
            "expense {} was paid by {}, not {}",
            expense.id, expense.paid_by, details.payee_id
        )));
    }
    if !expense.shared_with.contains(&details.payer_id) {
        return Err(LedgerError::NotAParticipant {
            expense_id: expense.id.clone(),
            participant: details.payer_id.clone(),
        });
    }
    let share = compute_share(expense)?;
    if details.amount < share.per_participant {
        return Err(LedgerError::InvalidPayment(format!(
            "payment of {} is below the share {} of expense {}",
            details.amount, share.per_participant, expense.id
        )));
    }
    if details.amount > share.per_participant {
        tracing::warn!(
            "Payment of {} for expense {} exceeds share {}",
            details.amount,
            expense.id,
            share.per_participant
        );
    }
    Ok(())
}

/// Rejects a caller acting for somebody else.
pub fn authorize(caller: &UserId, subject: &UserId) -> LedgerResult<()> {
    if caller == subject {
        Ok(())
    } else {
        Err(LedgerError::Authorization {
            caller: caller.clone(),
            subject: subject.clone(),
        })
    }
}

/// Turns completion signals into exactly one transaction and one
/// settlement each, keyed on the gateway session id or the cash pair.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    tracker: SettlementTracker,
}

impl Reconciler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        let tracker = SettlementTracker::new(store.clone());
        Self { store, tracker }
    }

    pub async fn reconcile(&self, event: &CompletionEvent) -> LedgerResult<Transaction> {
        let details = event.details()?;

        if let Some(existing) = self.store.transaction_by_key(&details.key).await? {
            return self.absorb_duplicate(existing).await;
        }

        let expense = self
            .store
            .expense(&details.expense_id)
            .await?
            .ok_or_else(|| LedgerError::ExpenseNotFound(details.expense_id.clone()))?;
        check_payment(&expense, &details)?;

        let transaction = Transaction {
            id: TransactionId::generate(),
            payer_id: details.payer_id,
            payee_id: details.payee_id,
            amount: details.amount,
            expense_id: Some(expense.id.clone()),
            group_id: Some(expense.group_id.clone()),
            payment_method: details.method,
            idempotency_key: details.key,
            timestamp: Utc::now(),
        };

        match self.store.insert_transaction_once(transaction).await? {
            InsertOutcome::Inserted(transaction) => {
                tracing::info!(
                    "Recorded {:?} payment {} of {} from {} to {}",
                    transaction.payment_method,
                    transaction.id,
                    transaction.amount,
                    transaction.payer_id,
                    transaction.payee_id
                );
                self.tracker
                    .mark_settled(&expense.id, &transaction.payer_id)
                    .await?;
                Ok(transaction)
            }
            InsertOutcome::Existing(transaction) => self.absorb_duplicate(transaction).await,
        }
    }

    /// Looks up what the webhook recorded for a checkout session. `None`
    /// while the gateway has not confirmed it yet. Never writes.
    pub async fn redirect_status(
        &self,
        caller: &UserId,
        redirect: &RedirectCompletion,
    ) -> LedgerResult<Option<Transaction>> {
        let session = present(&redirect.gateway_reference, |k| k.is_empty())
            .ok_or(LedgerError::PaymentDetailsMissing("gatewayReference"))?;
        let recorded = self
            .store
            .transaction_by_key(session)
            .await?
            .filter(|t| t.payment_method == PaymentMethod::Card);
        let Some(transaction) = recorded else {
            tracing::debug!("Checkout session {} not confirmed yet", session);
            return Ok(None);
        };
        authorize(caller, &transaction.payer_id)?;
        Ok(Some(transaction))
    }

    /// A redelivered signal returns the recorded transaction. The only write
    /// it may perform is finishing a settlement that never got recorded.
    async fn absorb_duplicate(&self, transaction: Transaction) -> LedgerResult<Transaction> {
        tracing::info!(
            "Duplicate completion for {} absorbed (transaction {})",
            transaction.idempotency_key,
            transaction.id
        );
        let Some(expense_id) = transaction.expense_id.clone() else {
            return Ok(transaction);
        };
        if let Some(expense) = self.store.expense(&expense_id).await? {
            if expense.shared_with.contains(&transaction.payer_id)
                && !expense.is_settled_by(&transaction.payer_id)
            {
                tracing::warn!(
                    "Transaction {} has no settlement on expense {}, repairing",
                    transaction.id,
                    expense_id
                );
                self.tracker
                    .mark_settled(&expense_id, &transaction.payer_id)
                    .await?;
            }
        }
        Ok(transaction)
    }

    /// First step of a cash payment: records what the caller is about to
    /// confirm and hands back a token for it.
    pub async fn request_confirmation(
        &self,
        caller: &UserId,
        expense_id: &ExpenseId,
        amount: Option<Money>,
    ) -> LedgerResult<CashConfirmation> {
        let expense = self
            .store
            .expense(expense_id)
            .await?
            .ok_or_else(|| LedgerError::ExpenseNotFound(expense_id.clone()))?;
        if !expense.shared_with.contains(caller) {
            return Err(LedgerError::NotAParticipant {
                expense_id: expense_id.clone(),
                participant: caller.clone(),
            });
        }
        if expense.is_settled_by(caller) {
            return Err(LedgerError::AlreadySettled {
                expense_id: expense_id.clone(),
                participant: caller.clone(),
            });
        }

        let share = compute_share(&expense)?.per_participant;
        let amount = amount.unwrap_or(share);
        if !amount.is_positive() {
            return Err(LedgerError::InvalidPayment(format!(
                "nothing to pay on expense {expense_id}"
            )));
        }
        if amount < share {
            return Err(LedgerError::InvalidPayment(format!(
                "cash amount {amount} is below the share {share}"
            )));
        }

        let confirmation = CashConfirmation {
            token: uuid::Uuid::new_v4().to_string(),
            expense_id: expense_id.clone(),
            payer_id: caller.clone(),
            payee_id: expense.paid_by.clone(),
            amount,
            created_at: Utc::now(),
        };
        self.store.save_confirmation(confirmation.clone()).await?;
        tracing::debug!("Cash confirmation requested for expense {}", expense_id);
        Ok(confirmation)
    }

    /// Second step of a cash payment. Any token for the same expense and
    /// payer, confirmed any number of times, yields the one transaction
    /// recorded for that pair.
    pub async fn confirm_and_settle(
        &self,
        caller: &UserId,
        token: &str,
    ) -> LedgerResult<Transaction> {
        let confirmation = self
            .store
            .confirmation(token)
            .await?
            .ok_or_else(|| LedgerError::ConfirmationNotFound(token.to_owned()))?;
        authorize(caller, &confirmation.payer_id)?;

        let key = cash_key(&confirmation.expense_id, &confirmation.payer_id);
        if self.store.transaction_by_key(&key).await?.is_none() {
            let expense = self
                .store
                .expense(&confirmation.expense_id)
                .await?
                .ok_or_else(|| LedgerError::ExpenseNotFound(confirmation.expense_id.clone()))?;
            if expense.is_settled_by(&confirmation.payer_id) {
                self.store.remove_confirmation(token).await?;
                return Err(LedgerError::AlreadySettled {
                    expense_id: confirmation.expense_id,
                    participant: confirmation.payer_id,
                });
            }
        }

        let event = CompletionEvent {
            expense_id: Some(confirmation.expense_id),
            payer_id: Some(confirmation.payer_id),
            payee_id: Some(confirmation.payee_id),
            amount: Some(confirmation.amount),
            payment_method: Some(PaymentMethod::Cash),
            gateway_reference: None,
            confirmation_token: Some(confirmation.token),
        };
        self.reconcile(&event).await
    }
}
