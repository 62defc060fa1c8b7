use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{Currency, Money, MoneyError};

pub type AccountId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Checking,
    Savings,
    MoneyMarket,
    CertificateOfDeposit,
    Business,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Checking => "checking",
            AccountType::Savings => "savings",
            AccountType::MoneyMarket => "money_market",
            AccountType::CertificateOfDeposit => "certificate_of_deposit",
            AccountType::Business => "business",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "checking" => Some(AccountType::Checking),
            "savings" => Some(AccountType::Savings),
            "money_market" => Some(AccountType::MoneyMarket),
            "certificate_of_deposit" | "cd" => Some(AccountType::CertificateOfDeposit),
            "business" => Some(AccountType::Business),
            _ => None,
        }
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Inactive,
    Suspended,
    /// Terminal: a closed account is never reopened.
    Closed,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Inactive => "inactive",
            AccountStatus::Suspended => "suspended",
            AccountStatus::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(AccountStatus::Active),
            "inactive" => Some(AccountStatus::Inactive),
            "suspended" => Some(AccountStatus::Suspended),
            "closed" => Some(AccountStatus::Closed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: AccountStatus) -> bool {
        *self != AccountStatus::Closed && *self != next
    }
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("account {account} is {status}")]
    NotActive {
        account: AccountId,
        status: AccountStatus,
    },

    #[error("insufficient funds in account {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        available: Money,
        requested: Money,
    },

    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// Consistent view of an account's balance pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub account_id: AccountId,
    pub balance: Money,
    pub available_balance: Money,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub account_number: String,
    pub routing_number: String,
    pub account_type: AccountType,
    pub status: AccountStatus,
    pub balance: Money,
    pub available_balance: Money,
    pub currency: Currency,
    pub daily_withdrawal_limit: Money,
    pub daily_transfer_limit: Money,
    pub overdraft_protected: bool,
    pub overdraft_limit: Money,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    /// Incremented by the store on every persisted mutation.
    pub version: u64,
}

impl Account {
    /// Create a new, active account with zero balance. Limits default to zero
    /// and are expected to be set by the caller.
    pub fn new(
        account_number: String,
        routing_number: String,
        account_type: AccountType,
        currency: Currency,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_number,
            routing_number,
            account_type,
            status: AccountStatus::Active,
            balance: Money::zero(currency),
            available_balance: Money::zero(currency),
            currency,
            daily_withdrawal_limit: Money::zero(currency),
            daily_transfer_limit: Money::zero(currency),
            overdraft_protected: false,
            overdraft_limit: Money::zero(currency),
            created_at,
            last_activity: None,
            version: 0,
        }
    }

    pub fn with_limits(mut self, daily_withdrawal: Money, daily_transfer: Money) -> Self {
        self.daily_withdrawal_limit = daily_withdrawal;
        self.daily_transfer_limit = daily_transfer;
        self
    }

    pub fn with_overdraft(mut self, limit: Money) -> Self {
        self.overdraft_protected = true;
        self.overdraft_limit = limit;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn ensure_active(&self) -> Result<(), AccountError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(AccountError::NotActive {
                account: self.id,
                status: self.status,
            })
        }
    }

    /// Funds that may be debited right now, overdraft headroom included.
    pub fn spendable(&self) -> Result<Money, MoneyError> {
        if self.overdraft_protected {
            self.available_balance.checked_add(self.overdraft_limit)
        } else {
            Ok(self.available_balance)
        }
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            account_id: self.id,
            balance: self.balance,
            available_balance: self.available_balance,
            version: self.version,
        }
    }

    /// Reduce both balances by `amount`.
    pub fn debit(
        &mut self,
        amount: Money,
        at: DateTime<Utc>,
    ) -> Result<BalanceSnapshot, AccountError> {
        self.ensure_active()?;
        let amount = amount.ensure_currency(self.currency)?.ensure_positive()?;

        if self.spendable()?.cents() < amount.cents() {
            return Err(AccountError::InsufficientFunds {
                account: self.id,
                available: self.available_balance,
                requested: amount,
            });
        }

        let balance = self.balance.checked_sub(amount)?;
        let available_balance = self.available_balance.checked_sub(amount)?;
        self.balance = balance;
        self.available_balance = available_balance;
        self.last_activity = Some(at);
        Ok(self.snapshot())
    }

    /// Increase both balances by `amount`.
    pub fn credit(
        &mut self,
        amount: Money,
        at: DateTime<Utc>,
    ) -> Result<BalanceSnapshot, AccountError> {
        self.ensure_active()?;
        let amount = amount.ensure_currency(self.currency)?.ensure_positive()?;

        let balance = self.balance.checked_add(amount)?;
        let available_balance = self.available_balance.checked_add(amount)?;
        self.balance = balance;
        self.available_balance = available_balance;
        self.last_activity = Some(at);
        Ok(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd(cents: i64) -> Money {
        Money::new(cents, Currency::USD)
    }

    fn checking() -> Account {
        Account::new(
            "0000000001".into(),
            "000000001".into(),
            AccountType::Checking,
            Currency::USD,
            Utc::now(),
        )
        .with_limits(usd(100_000), usd(1_000_000))
    }

    #[test]
    fn test_account_type_roundtrip() {
        for at in [
            AccountType::Checking,
            AccountType::Savings,
            AccountType::MoneyMarket,
            AccountType::CertificateOfDeposit,
            AccountType::Business,
        ] {
            assert_eq!(AccountType::from_str(at.as_str()), Some(at));
        }
        assert_eq!(
            AccountType::from_str("money-market"),
            Some(AccountType::MoneyMarket)
        );
    }

    #[test]
    fn test_closed_is_terminal() {
        assert!(AccountStatus::Active.can_transition_to(AccountStatus::Suspended));
        assert!(AccountStatus::Suspended.can_transition_to(AccountStatus::Active));
        assert!(AccountStatus::Active.can_transition_to(AccountStatus::Closed));
        assert!(!AccountStatus::Closed.can_transition_to(AccountStatus::Active));
        assert!(!AccountStatus::Active.can_transition_to(AccountStatus::Active));
    }

    #[test]
    fn test_credit_then_debit() {
        let mut acc = checking();
        let now = Utc::now();

        let snap = acc.credit(usd(10_000), now).unwrap();
        assert_eq!(snap.balance, usd(10_000));
        assert_eq!(snap.available_balance, usd(10_000));
        assert_eq!(acc.last_activity, Some(now));

        let snap = acc.debit(usd(4_000), now).unwrap();
        assert_eq!(snap.balance, usd(6_000));
        assert_eq!(snap.available_balance, usd(6_000));
    }

    #[test]
    fn test_debit_insufficient_funds_leaves_state() {
        let mut acc = checking();
        acc.credit(usd(2_000), Utc::now()).unwrap();
        let before = acc.clone();

        let err = acc.debit(usd(4_000), Utc::now()).unwrap_err();
        assert!(matches!(err, AccountError::InsufficientFunds { .. }));
        assert_eq!(acc, before);
    }

    #[test]
    fn test_overdraft_headroom() {
        let mut acc = checking().with_overdraft(usd(5_000));
        acc.credit(usd(1_000), Utc::now()).unwrap();

        let snap = acc.debit(usd(6_000), Utc::now()).unwrap();
        assert_eq!(snap.balance, usd(-5_000));

        let err = acc.debit(usd(1), Utc::now()).unwrap_err();
        assert!(matches!(err, AccountError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_inactive_account_rejects_everything() {
        let mut acc = checking();
        acc.status = AccountStatus::Suspended;

        assert!(matches!(
            acc.credit(usd(100), Utc::now()),
            Err(AccountError::NotActive {
                status: AccountStatus::Suspended,
                ..
            })
        ));
        assert!(matches!(
            acc.debit(usd(100), Utc::now()),
            Err(AccountError::NotActive { .. })
        ));
    }

    #[test]
    fn test_currency_mismatch() {
        let mut acc = checking();
        let err = acc
            .credit(Money::new(100, Currency::EUR), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            AccountError::Money(MoneyError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn test_snapshot_is_stable() {
        let mut acc = checking();
        acc.credit(usd(500), Utc::now()).unwrap();
        assert_eq!(acc.snapshot(), acc.snapshot());
    }
}
