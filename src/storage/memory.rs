use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Account, AccountId, Statement, Transaction, TransactionId};

use super::{AccountWrite, LedgerStore, StoreError, TransactionKey};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    numbers: HashMap<String, AccountId>,
    /// Append-only, in sequence order
    transactions: Vec<Transaction>,
    positions: HashMap<TransactionId, usize>,
    reversals: HashMap<TransactionId, TransactionId>,
    statements: HashMap<String, Statement>,
    last_sequence: i64,
}

impl State {
    fn check_version(&self, write: &AccountWrite) -> Result<(), StoreError> {
        let id = write.account.id;
        match self.accounts.get(&id) {
            Some(stored) if stored.version == write.expected_version => Ok(()),
            Some(stored) => Err(StoreError::Conflict(format!(
                "account {id}: expected version {}, found {}",
                write.expected_version, stored.version
            ))),
            None => Err(StoreError::Backend(anyhow::anyhow!(
                "account {id} does not exist"
            ))),
        }
    }

    fn append(&mut self, transaction: &Transaction) -> i64 {
        self.last_sequence += 1;
        let mut stored = transaction.clone();
        stored.sequence = self.last_sequence;

        if let Some(original) = &stored.reverses {
            self.reversals.insert(original.clone(), stored.id.clone());
        }
        self.positions
            .insert(stored.id.clone(), self.transactions.len());
        self.transactions.push(stored);
        self.last_sequence
    }

    fn touching(&self, account: AccountId) -> impl Iterator<Item = &Transaction> {
        self.transactions
            .iter()
            .filter(move |tx| tx.involves(account))
    }

    fn newest_first(&self, account: AccountId) -> Vec<&Transaction> {
        let mut matching: Vec<&Transaction> = self.touching(account).collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.sequence.cmp(&a.sequence))
        });
        matching
    }
}

/// In-memory ledger store.
///
/// Intended for tests and embedding. All data lives behind a single lock, so
/// every commit is trivially atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store lock poisoned")))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn create_account(
        &self,
        account: &Account,
        opening_deposit: Option<&Transaction>,
    ) -> Result<Option<i64>, StoreError> {
        let mut state = self.write()?;

        if state.numbers.contains_key(&account.account_number) {
            return Err(StoreError::DuplicateAccountNumber(
                account.account_number.clone(),
            ));
        }
        if let Some(tx) = opening_deposit.filter(|tx| state.positions.contains_key(&tx.id)) {
            return Err(StoreError::DuplicateTransactionId(tx.id.clone()));
        }

        state
            .numbers
            .insert(account.account_number.clone(), account.id);
        state.accounts.insert(account.id, account.clone());
        Ok(opening_deposit.map(|tx| state.append(tx)))
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn find_account_by_number(&self, number: &str) -> Result<Option<Account>, StoreError> {
        let state = self.read()?;
        Ok(state
            .numbers
            .get(number)
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self.read()?.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.account_number.cmp(&b.account_number))
        });
        Ok(accounts)
    }

    async fn update_account(&self, write: &AccountWrite) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.check_version(write)?;
        state
            .accounts
            .insert(write.account.id, write.account.clone());
        Ok(())
    }

    async fn commit(
        &self,
        writes: &[AccountWrite],
        transaction: &Transaction,
    ) -> Result<i64, StoreError> {
        let mut state = self.write()?;

        // Validate everything before touching anything
        for write in writes {
            state.check_version(write)?;
        }
        if state.positions.contains_key(&transaction.id) {
            return Err(StoreError::DuplicateTransactionId(transaction.id.clone()));
        }

        for write in writes {
            state
                .accounts
                .insert(write.account.id, write.account.clone());
        }
        Ok(state.append(transaction))
    }

    async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, StoreError> {
        let state = self.read()?;
        Ok(state
            .positions
            .get(id)
            .and_then(|&pos| state.transactions.get(pos))
            .cloned())
    }

    async fn find_reversal(
        &self,
        original: &TransactionId,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.read()?;
        Ok(state
            .reversals
            .get(original)
            .and_then(|id| state.positions.get(id))
            .and_then(|&pos| state.transactions.get(pos))
            .cloned())
    }

    async fn list_transactions(
        &self,
        account: AccountId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.read()?;
        Ok(state
            .newest_first(account)
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn list_transactions_after(
        &self,
        account: AccountId,
        after: Option<&TransactionKey>,
        limit: u64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.read()?;
        Ok(state
            .newest_first(account)
            .into_iter()
            .filter(|tx| after.is_none_or(|key| key.precedes(tx)))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn count_transactions(&self, account: AccountId) -> Result<u64, StoreError> {
        Ok(self.read()?.touching(account).count() as u64)
    }

    async fn history(
        &self,
        account: AccountId,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.read()?;
        Ok(state
            .touching(account)
            .filter(|tx| from.is_none_or(|from| tx.created_at >= from))
            .filter(|tx| until.is_none_or(|until| tx.created_at < until))
            .cloned()
            .collect())
    }

    async fn save_statement(&self, statement: &Statement) -> Result<(), StoreError> {
        self.write()?
            .statements
            .insert(statement.statement_number.clone(), statement.clone());
        Ok(())
    }

    async fn get_statement(&self, number: &str) -> Result<Option<Statement>, StoreError> {
        Ok(self.read()?.statements.get(number).cloned())
    }

    async fn list_statements(
        &self,
        account: AccountId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Statement>, StoreError> {
        let state = self.read()?;
        let mut statements: Vec<&Statement> = state
            .statements
            .values()
            .filter(|s| s.account_id == account)
            .collect();
        statements.sort_by(|a, b| {
            b.period
                .start_date
                .cmp(&a.period.start_date)
                .then_with(|| b.period.end_date.cmp(&a.period.end_date))
        });
        Ok(statements
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}
