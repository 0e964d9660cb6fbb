use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt,
    ops::{Add, Sub},
};

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

opaque_id!(UserId);
opaque_id!(GroupId);
opaque_id!(ExpenseId);
opaque_id!(TransactionId);

impl TransactionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Amount in integer minor units (cents, paise, ...).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(value: i64) -> Self {
        Self(value)
    }

    pub fn minor(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Floor division by a participant count, returning quotient and remainder.
    pub fn split(self, parts: u32) -> (Money, Money) {
        let parts = i64::from(parts.max(1));
        (Money(self.0 / parts), Money(self.0 % parts))
    }

    pub fn times(self, count: u32) -> Money {
        Money(self.0 * i64::from(count))
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    pub fn saturating_sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<UserId>,
}

impl Group {
    pub fn has_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: ExpenseId,
    pub group_id: GroupId,
    pub description: String,
    pub amount: Money,
    pub paid_by: UserId,
    /// Debtors other than the payer; the payer always bears one implicit share.
    #[serde(default)]
    pub shared_with: BTreeSet<UserId>,
    #[serde(default)]
    pub settled_by: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Expense {
    pub fn involves(&self, user: &UserId) -> bool {
        &self.paid_by == user || self.shared_with.contains(user)
    }

    pub fn is_settled_by(&self, user: &UserId) -> bool {
        self.settled_by.contains(user)
    }

    /// Checks the invariants the expense-editing boundary is expected to enforce.
    pub fn validate(&self, group: &Group) -> Result<(), String> {
        if !self.amount.is_positive() {
            return Err(format!("amount must be positive, got {}", self.amount));
        }
        if self.group_id != group.id {
            return Err(format!("expense belongs to group {}", self.group_id));
        }
        if !group.has_member(&self.paid_by) {
            return Err(format!("payer {} is not a group member", self.paid_by));
        }
        if self.shared_with.contains(&self.paid_by) {
            return Err(format!("payer {} listed as a debtor", self.paid_by));
        }
        if let Some(outsider) = self.shared_with.iter().find(|u| !group.has_member(u)) {
            return Err(format!("participant {outsider} is not a group member"));
        }
        if let Some(stray) = self.settled_by.difference(&self.shared_with).next() {
            return Err(format!("{stray} settled without being a participant"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    #[serde(alias = "stripe")]
    Card,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub amount: Money,
    pub expense_id: Option<ExpenseId>,
    pub group_id: Option<GroupId>,
    pub payment_method: PaymentMethod,
    /// Gateway session id for card payments, `cash:<expense>:<payer>` for cash.
    pub idempotency_key: String,
    pub timestamp: DateTime<Utc>,
}

/// Pending cash payment awaiting the debtor's confirmation.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashConfirmation {
    pub token: String,
    pub expense_id: ExpenseId,
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}
