use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument},
    Client, Collection, Database, IndexModel,
};

use crate::{
    error::StoreError,
    schemas::{CashConfirmation, Expense, ExpenseId, Group, GroupId, Transaction, UserId},
    store::{InsertOutcome, LedgerStore},
};

const DUPLICATE_KEY: i32 = 11000;

pub struct MongoStore {
    database: Database,
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

impl MongoStore {
    pub fn new(client: &Client, database: &str) -> Self {
        Self {
            database: client.database(database),
        }
    }

    fn expenses(&self) -> Collection<Expense> {
        self.database.collection("Expenses")
    }

    fn groups(&self) -> Collection<Group> {
        self.database.collection("Groups")
    }

    fn transactions(&self) -> Collection<Transaction> {
        self.database.collection("Transactions")
    }

    fn confirmations(&self) -> Collection<CashConfirmation> {
        self.database.collection("CashConfirmations")
    }

    /// Creates the unique index that makes transaction inserts idempotent.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique = IndexOptions::builder().unique(true).build();
        self.transactions()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "idempotencyKey": 1 })
                    .options(unique.clone())
                    .build(),
                None,
            )
            .await?;
        self.expenses()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "id": 1 })
                    .options(unique.clone())
                    .build(),
                None,
            )
            .await?;
        self.confirmations()
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "token": 1 })
                    .options(unique)
                    .build(),
                None,
            )
            .await?;
        Ok(())
    }

    async fn find_expenses(&self, filter: Document) -> Result<Vec<Expense>, StoreError> {
        let expenses: Vec<Expense> = self
            .expenses()
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        Ok(expenses)
    }

    async fn find_transactions(&self, filter: Document) -> Result<Vec<Transaction>, StoreError> {
        let transactions: Vec<Transaction> = self
            .transactions()
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        Ok(transactions)
    }
}

#[async_trait]
impl LedgerStore for MongoStore {
    async fn expense(&self, id: &ExpenseId) -> Result<Option<Expense>, StoreError> {
        Ok(self
            .expenses()
            .find_one(doc! { "id": id.as_str() }, None)
            .await?)
    }

    async fn expenses_for_user(&self, user: &UserId) -> Result<Vec<Expense>, StoreError> {
        self.find_expenses(doc! {
            "$or": [ { "paidBy": user.as_str() }, { "sharedWith": user.as_str() } ]
        })
        .await
    }

    async fn expenses_for_group(&self, group: &GroupId) -> Result<Vec<Expense>, StoreError> {
        self.find_expenses(doc! { "groupId": group.as_str() }).await
    }

    async fn group(&self, id: &GroupId) -> Result<Option<Group>, StoreError> {
        Ok(self
            .groups()
            .find_one(doc! { "id": id.as_str() }, None)
            .await?)
    }

    async fn add_settled_participant(
        &self,
        id: &ExpenseId,
        participant: &UserId,
    ) -> Result<Option<Expense>, StoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(self
            .expenses()
            .find_one_and_update(
                doc! { "id": id.as_str(), "sharedWith": participant.as_str() },
                doc! { "$addToSet": { "settledBy": participant.as_str() } },
                options,
            )
            .await?)
    }

    async fn transaction_by_key(&self, key: &str) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .transactions()
            .find_one(doc! { "idempotencyKey": key }, None)
            .await?)
    }

    async fn insert_transaction_once(
        &self,
        transaction: Transaction,
    ) -> Result<InsertOutcome, StoreError> {
        match self.transactions().insert_one(&transaction, None).await {
            Ok(_) => Ok(InsertOutcome::Inserted(transaction)),
            Err(err) if is_duplicate_key(&err) => {
                match self.transaction_by_key(&transaction.idempotency_key).await? {
                    Some(existing) => Ok(InsertOutcome::Existing(existing)),
                    None => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn transactions_for_user(&self, user: &UserId) -> Result<Vec<Transaction>, StoreError> {
        self.find_transactions(doc! {
            "$or": [ { "payerId": user.as_str() }, { "payeeId": user.as_str() } ]
        })
        .await
    }

    async fn transactions_for_group(
        &self,
        group: &GroupId,
    ) -> Result<Vec<Transaction>, StoreError> {
        self.find_transactions(doc! { "groupId": group.as_str() })
            .await
    }

    async fn save_confirmation(&self, confirmation: CashConfirmation) -> Result<(), StoreError> {
        self.confirmations().insert_one(confirmation, None).await?;
        Ok(())
    }

    async fn confirmation(&self, token: &str) -> Result<Option<CashConfirmation>, StoreError> {
        Ok(self
            .confirmations()
            .find_one(doc! { "token": token }, None)
            .await?)
    }

    async fn remove_confirmation(&self, token: &str) -> Result<(), StoreError> {
        self.confirmations()
            .delete_one(doc! { "token": token }, None)
            .await?;
        Ok(())
    }
}
