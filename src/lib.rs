//! Balance computation and settlement reconciliation for shared expenses.
//!
//! Reads fold expenses and settlement transactions into balances
//! ([`balance`], [`query`]); writes flow from a payment-completion signal
//! through the [`reconcile::Reconciler`] into the
//! [`settlement::SettlementTracker`], the only writer of an expense's
//! `settledBy` set.

pub mod api;
pub mod auth;
pub mod balance;
pub mod config;
pub mod error;
pub mod mongo;
pub mod query;
pub mod reconcile;
pub mod schemas;
pub mod settlement;
pub mod share;
pub mod store;

pub use balance::{compute_balances, compute_group_balances, MemberBalance, UserSummary};
pub use error::{ConfigError, LedgerError, LedgerResult, StoreError};
pub use query::LedgerQueryService;
pub use reconcile::{CompletionEvent, Reconciler, RedirectCompletion};
pub use settlement::{SettlementStatus, SettlementTracker};
pub use share::{compute_share, Share};
pub use store::{InsertOutcome, LedgerStore, MemoryStore};
