use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Account, AccountId, Currency, Money, MoneyError, Transaction};

/// Compute the balance of a single account by replaying its history.
/// Balance = sum of the signed effects of every completed transaction.
pub fn replay_balance(
    account: AccountId,
    currency: Currency,
    history: &[Transaction],
) -> Result<Money, MoneyError> {
    history
        .iter()
        .try_fold(Money::zero(currency), |balance, tx| {
            balance.checked_add(tx.effect_on(account)?)
        })
}

/// Balance immediately before `instant`: only transactions created strictly
/// earlier are replayed.
pub fn replay_balance_before(
    account: AccountId,
    currency: Currency,
    history: &[Transaction],
    instant: DateTime<Utc>,
) -> Result<Money, MoneyError> {
    history
        .iter()
        .filter(|tx| tx.created_at < instant)
        .try_fold(Money::zero(currency), |balance, tx| {
            balance.checked_add(tx.effect_on(account)?)
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// Materialized balance differs from the replayed transaction log.
    BalanceDrift {
        account_id: AccountId,
        recorded: Money,
        replayed: Money,
    },
    AvailableExceedsBalance {
        account_id: AccountId,
        balance: Money,
        available: Money,
    },
    /// Balance below zero, or below the overdraft limit for protected accounts.
    BalanceBelowFloor {
        account_id: AccountId,
        balance: Money,
        floor: Money,
    },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::BalanceDrift {
                account_id,
                recorded,
                replayed,
            } => write!(
                f,
                "account {}: recorded balance {} but transactions sum to {}",
                account_id, recorded, replayed
            ),
            IntegrityIssue::AvailableExceedsBalance {
                account_id,
                balance,
                available,
            } => write!(
                f,
                "account {}: available {} exceeds balance {}",
                account_id, available, balance
            ),
            IntegrityIssue::BalanceBelowFloor {
                account_id,
                balance,
                floor,
            } => write!(f, "account {}: balance {} below floor {}", account_id, balance, floor),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub accounts_checked: usize,
    pub transactions_checked: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }

    /// Verify one account against its full history and fold the result in.
    pub fn check_account(
        &mut self,
        account: &Account,
        history: &[Transaction],
    ) -> Result<(), MoneyError> {
        self.accounts_checked += 1;
        self.transactions_checked += history.len();
        self.issues.extend(account_issues(account, history)?);
        Ok(())
    }
}

/// All invariant violations for `account` given its full history.
pub fn account_issues(
    account: &Account,
    history: &[Transaction],
) -> Result<Vec<IntegrityIssue>, MoneyError> {
    let mut issues = Vec::new();

    let replayed = replay_balance(account.id, account.currency, history)?;
    if replayed != account.balance {
        issues.push(IntegrityIssue::BalanceDrift {
            account_id: account.id,
            recorded: account.balance,
            replayed,
        });
    }

    if account.available_balance.cents() > account.balance.cents() {
        issues.push(IntegrityIssue::AvailableExceedsBalance {
            account_id: account.id,
            balance: account.balance,
            available: account.available_balance,
        });
    }

    let floor = if account.overdraft_protected {
        account.overdraft_limit.checked_neg()?
    } else {
        Money::zero(account.currency)
    };
    if account.balance.cents() < floor.cents() {
        issues.push(IntegrityIssue::BalanceBelowFloor {
            account_id: account.id,
            balance: account.balance,
            floor,
        });
    }

    Ok(issues)
}
