use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{RwLock as AsyncRwLock, RwLockWriteGuard};

use crate::domain::{Account, AccountId};

use super::LedgerError;

/// Exclusive scope for one account: the cached account state behind an
/// async lock. Every balance mutation holds the write guard from its checks
/// through the store commit.
#[derive(Debug)]
pub(crate) struct AccountCell {
    pub id: AccountId,
    pub state: AsyncRwLock<Account>,
}

/// Process-wide map from account id to its cell. Cells are created on first
/// use and never removed, so two callers always contend on the same lock.
#[derive(Debug, Default)]
pub(crate) struct AccountRegistry {
    cells: RwLock<HashMap<AccountId, Arc<AccountCell>>>,
}

impl AccountRegistry {
    pub fn get(&self, id: AccountId) -> Result<Option<Arc<AccountCell>>, LedgerError> {
        let cells = self
            .cells
            .read()
            .map_err(|_| LedgerError::Storage(anyhow::anyhow!("account registry lock poisoned")))?;
        Ok(cells.get(&id).cloned())
    }

    /// Register `account`, unless another caller got there first, in which
    /// case the existing cell wins.
    pub fn insert(&self, account: Account) -> Result<Arc<AccountCell>, LedgerError> {
        let mut cells = self
            .cells
            .write()
            .map_err(|_| LedgerError::Storage(anyhow::anyhow!("account registry lock poisoned")))?;
        let cell = cells.entry(account.id).or_insert_with(|| {
            Arc::new(AccountCell {
                id: account.id,
                state: AsyncRwLock::new(account),
            })
        });
        Ok(Arc::clone(cell))
    }
}

/// Write guards over both sides of a transfer.
pub(crate) struct PairGuard<'a> {
    pub from: RwLockWriteGuard<'a, Account>,
    pub to: RwLockWriteGuard<'a, Account>,
}

/// Lock two distinct accounts in ascending id order, whatever the direction
/// of the movement, so opposite transfers cannot deadlock.
pub(crate) async fn lock_pair<'a>(from: &'a AccountCell, to: &'a AccountCell) -> PairGuard<'a> {
    if from.id < to.id {
        let from = from.state.write().await;
        let to = to.state.write().await;
        PairGuard { from, to }
    } else {
        let to = to.state.write().await;
        let from = from.state.write().await;
        PairGuard { from, to }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;

    use super::*;
    use crate::domain::{AccountType, Currency};

    fn account(number: &str) -> Account {
        Account::new(
            number.into(),
            "000000001".into(),
            AccountType::Checking,
            Currency::USD,
            Utc::now(),
        )
    }

    #[test]
    fn test_registry_keeps_first_cell() {
        let registry = AccountRegistry::default();
        let acc = account("0000000001");
        let first = registry.insert(acc.clone()).unwrap();

        let mut changed = acc.clone();
        changed.account_number = "9999999999".into();
        let second = registry.insert(changed).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &registry.get(acc.id).unwrap().unwrap()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_opposite_pairs_do_not_deadlock() {
        let registry = AccountRegistry::default();
        let a = registry.insert(account("0000000001")).unwrap();
        let b = registry.insert(account("0000000002")).unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..200 {
            let (a, b) = (Arc::clone(&a), Arc::clone(&b));
            tasks.spawn(async move {
                let (x, y) = if i % 2 == 0 { (&a, &b) } else { (&b, &a) };
                let guard = lock_pair(x, y).await;
                assert_eq!(guard.from.id, x.id);
                assert_eq!(guard.to.id, y.id);
                tokio::task::yield_now().await;
            });
        }

        let all = async {
            while let Some(joined) = tasks.join_next().await {
                joined.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(10), all)
            .await
            .expect("lock ordering deadlocked");
    }
}
