mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Account, AccountId, Statement, Transaction, TransactionId};

/// SQL migration for initial schema
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

#[derive(Error, Debug)]
pub enum StoreError {
    /// Optimistic version check failed, or the backend was busy. Retryable.
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("transaction id already exists: {0}")]
    DuplicateTransactionId(TransactionId),

    #[error("account number already exists: {0}")]
    DuplicateAccountNumber(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// New state for an account row, accepted only if the stored row is still
/// at `expected_version`. The stored version becomes `account.version`.
#[derive(Debug, Clone)]
pub struct AccountWrite {
    pub expected_version: u64,
    pub account: Account,
}

impl AccountWrite {
    /// Stage `next` as the successor of a row read at `expected_version`.
    pub fn new(expected_version: u64, mut next: Account) -> Self {
        next.version = expected_version + 1;
        Self {
            expected_version,
            account: next,
        }
    }
}

/// Position of a transaction in the newest-first listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionKey {
    pub created_at: DateTime<Utc>,
    pub sequence: i64,
}

impl TransactionKey {
    pub fn of(tx: &Transaction) -> Self {
        Self {
            created_at: tx.created_at,
            sequence: tx.sequence,
        }
    }

    /// True when `tx` is listed after this key, i.e. it is strictly older.
    pub fn precedes(&self, tx: &Transaction) -> bool {
        (tx.created_at, tx.sequence) < (self.created_at, self.sequence)
    }
}

/// Account registry and transaction log.
///
/// Implementations must:
/// - apply every write of a `commit` and append its transaction atomically
/// - reject a write whose `expected_version` does not match with `Conflict`
/// - assign strictly increasing transaction sequence numbers
/// - never modify an appended transaction
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    /// Insert a new account, with its opening deposit when there is one.
    /// Returns the sequence number assigned to the deposit.
    async fn create_account(
        &self,
        account: &Account,
        opening_deposit: Option<&Transaction>,
    ) -> Result<Option<i64>, StoreError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn find_account_by_number(&self, number: &str) -> Result<Option<Account>, StoreError>;

    /// All accounts, oldest first.
    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Replace an account row without appending to the log (status changes).
    async fn update_account(&self, write: &AccountWrite) -> Result<(), StoreError>;

    /// Apply `writes` and append `transaction` as one unit. Returns the
    /// sequence number assigned to the transaction.
    async fn commit(
        &self,
        writes: &[AccountWrite],
        transaction: &Transaction,
    ) -> Result<i64, StoreError>;

    async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, StoreError>;

    /// The record compensating `original`, if any.
    async fn find_reversal(
        &self,
        original: &TransactionId,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Transactions touching `account`, newest first (created_at, then sequence).
    async fn list_transactions(
        &self,
        account: AccountId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Up to `limit` transactions touching `account` listed after `after`,
    /// newest first. Rows appended later never shift the page boundaries.
    async fn list_transactions_after(
        &self,
        account: AccountId,
        after: Option<&TransactionKey>,
        limit: u64,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn count_transactions(&self, account: AccountId) -> Result<u64, StoreError>;

    /// Transactions touching `account` created in `[from, until)`, in sequence
    /// order. Open bounds are unbounded.
    async fn history(
        &self,
        account: AccountId,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Insert or replace by statement number.
    async fn save_statement(&self, statement: &Statement) -> Result<(), StoreError>;

    async fn get_statement(&self, number: &str) -> Result<Option<Statement>, StoreError>;

    /// Statements of `account`, most recent period first.
    async fn list_statements(
        &self,
        account: AccountId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Statement>, StoreError>;
}
