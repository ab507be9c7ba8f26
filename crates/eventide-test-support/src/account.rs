//! Bank account aggregate used as the fixture domain in tests.

use chrono::{DateTime, Utc};
use eventide_core::aggregate::Aggregate;
use eventide_core::aggregate_root::AggregateRoot;
use eventide_core::error::DomainError;
use eventide_core::event::DomainEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lowest balance an account may reach.
pub const ACCOUNT_LIMIT: i64 = -5000;

/// Emitted when an account is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    /// Account holder.
    pub owner: String,
    /// Opening time.
    pub opened_at: DateTime<Utc>,
}

/// Emitted when money is deposited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyAdded {
    /// Deposited amount in cents.
    pub amount: i64,
}

/// Emitted when money is withdrawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneySubtracted {
    /// Withdrawn amount in cents.
    pub amount: i64,
}

/// Emitted when a withdrawal would take the balance below `ACCOUNT_LIMIT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLimitHit {
    /// The refused amount.
    pub amount: i64,
}

/// Events of the account aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    /// The account was opened.
    Opened(AccountOpened),
    /// Money was deposited.
    MoneyAdded(MoneyAdded),
    /// Money was withdrawn.
    MoneySubtracted(MoneySubtracted),
    /// A withdrawal was refused.
    AccountLimitHit(AccountLimitHit),
}

impl DomainEvent for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::Opened(_) => "account.opened",
            AccountEvent::MoneyAdded(_) => "account.money_added",
            AccountEvent::MoneySubtracted(_) => "account.money_subtracted",
            AccountEvent::AccountLimitHit(_) => "account.limit_hit",
        }
    }
}

/// Account state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account holder, once opened.
    pub owner: Option<String>,
    /// Current balance in cents.
    pub balance: i64,
}

impl Aggregate for Account {
    const TYPE: &'static str = "account";

    type Event = AccountEvent;

    fn apply(&mut self, event: &AccountEvent) {
        match event {
            AccountEvent::Opened(opened) => self.owner = Some(opened.owner.clone()),
            AccountEvent::MoneyAdded(added) => self.balance += added.amount,
            AccountEvent::MoneySubtracted(subtracted) => self.balance -= subtracted.amount,
            AccountEvent::AccountLimitHit(_) => {}
        }
    }

    fn export_state(&self) -> Result<Value, DomainError> {
        Ok(serde_json::to_value(self)?)
    }

    fn import_state(state: Value) -> Result<Self, DomainError> {
        Ok(serde_json::from_value(state)?)
    }
}

/// Business operations on an account root.
pub trait AccountCommands {
    /// Opens the account for `owner`.
    fn open(&mut self, owner: &str, opened_at: DateTime<Utc>) -> &mut Self;

    /// Deposits `amount`.
    fn add_money(&mut self, amount: i64) -> &mut Self;

    /// Withdraws `amount`, or records `AccountLimitHit` when the balance
    /// would drop below `ACCOUNT_LIMIT`. Returns whether the money was
    /// withdrawn.
    fn subtract_money(&mut self, amount: i64) -> bool;
}

impl AccountCommands for AggregateRoot<Account> {
    fn open(&mut self, owner: &str, opened_at: DateTime<Utc>) -> &mut Self {
        self.record_that(AccountEvent::Opened(AccountOpened {
            owner: owner.to_owned(),
            opened_at,
        }))
    }

    fn add_money(&mut self, amount: i64) -> &mut Self {
        self.record_that(AccountEvent::MoneyAdded(MoneyAdded { amount }))
    }

    fn subtract_money(&mut self, amount: i64) -> bool {
        if self.state().balance - amount < ACCOUNT_LIMIT {
            self.record_that(AccountEvent::AccountLimitHit(AccountLimitHit { amount }));
            return false;
        }
        self.record_that(AccountEvent::MoneySubtracted(MoneySubtracted { amount }));
        true
    }
}
