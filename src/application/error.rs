use chrono::NaiveDate;
use thiserror::Error;

use crate::domain::{
    AccountError, AccountId, AccountStatus, Money, MoneyError, MovementError, PeriodError,
    ReversalError, TransactionId, TransactionKind,
};
use crate::storage::StoreError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account {account} is not active (status: {status})")]
    AccountNotActive {
        account: AccountId,
        status: AccountStatus,
    },

    #[error("Insufficient funds in account {account}: available {available}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        available: Money,
        requested: Money,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),

    #[error("Cannot transfer from account {0} to itself")]
    SelfTransfer(AccountId),

    #[error(
        "Daily {kind} limit exceeded for account {account}: limit {limit}, used today {used}, requested {requested}"
    )]
    DailyLimitExceeded {
        account: AccountId,
        kind: TransactionKind,
        limit: Money,
        used: Money,
        requested: Money,
    },

    #[error("Invalid statement range: start {start} must be before end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Statement range of {days} days exceeds the maximum of {max} days")]
    RangeTooLong { days: i64, max: i64 },

    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),

    #[error("Statement not found: {0}")]
    StatementNotFound(String),

    #[error("Transaction {original} was already reversed by {reversal}")]
    AlreadyReversed {
        original: TransactionId,
        reversal: TransactionId,
    },

    #[error("Transaction {0} cannot be reversed: {1}")]
    NotReversible(TransactionId, ReversalError),

    #[error("Account {account} cannot change status from {from} to {to}")]
    InvalidStatusTransition {
        account: AccountId,
        from: AccountStatus,
        to: AccountStatus,
    },

    #[error("Ledger temporarily unavailable: gave up after {attempts} conflicting attempts")]
    Unavailable { attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl From<AccountError> for LedgerError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::NotActive { account, status } => {
                LedgerError::AccountNotActive { account, status }
            }
            AccountError::InsufficientFunds {
                account,
                available,
                requested,
            } => LedgerError::InsufficientFunds {
                account,
                available,
                requested,
            },
            AccountError::Money(err) => LedgerError::InvalidAmount(err),
        }
    }
}

impl From<MovementError> for LedgerError {
    fn from(err: MovementError) -> Self {
        match err {
            MovementError::SelfTransfer(account) => LedgerError::SelfTransfer(account),
            other => LedgerError::Storage(anyhow::Error::new(other)),
        }
    }
}

impl From<PeriodError> for LedgerError {
    fn from(err: PeriodError) -> Self {
        match err {
            PeriodError::InvalidRange { start, end } => LedgerError::InvalidRange { start, end },
            PeriodError::RangeTooLong { days, max } => LedgerError::RangeTooLong { days, max },
        }
    }
}

/// Only non-retryable store failures reach callers; conflicts are retried
/// by the service before this conversion applies.
impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Backend(err) => LedgerError::Storage(err),
            other => LedgerError::Storage(anyhow::Error::new(other)),
        }
    }
}

impl From<anyhow::Error> for LedgerError {
    fn from(err: anyhow::Error) -> Self {
        LedgerError::Storage(err)
    }
}
