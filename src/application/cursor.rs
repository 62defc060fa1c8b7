use crate::domain::{AccountId, Transaction};
use crate::storage::{LedgerStore, TransactionKey};

use super::{LedgerError, LedgerService};

/// Walks an account's transactions newest first, one page per call.
///
/// Pages continue from the last record returned, so transactions committed
/// while walking are neither repeated nor able to push older ones out.
pub struct TransactionCursor<'a, S> {
    service: &'a LedgerService<S>,
    account_id: AccountId,
    page_size: u64,
    last: Option<TransactionKey>,
    exhausted: bool,
}

impl<'a, S: LedgerStore> TransactionCursor<'a, S> {
    pub(crate) fn new(
        service: &'a LedgerService<S>,
        account_id: AccountId,
        page_size: u64,
    ) -> Self {
        Self {
            service,
            account_id,
            page_size: page_size.max(1),
            last: None,
            exhausted: false,
        }
    }

    /// Next page, or `None` once every transaction has been returned.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Transaction>>, LedgerError> {
        if self.exhausted {
            return Ok(None);
        }

        let page = self
            .service
            .transactions_after(self.account_id, self.last.as_ref(), self.page_size)
            .await?;
        if (page.len() as u64) < self.page_size {
            self.exhausted = true;
        }
        let Some(last) = page.last() else {
            return Ok(None);
        };
        self.last = Some(TransactionKey::of(last));
        Ok(Some(page))
    }

    /// Start again from the most recent transaction.
    pub fn reset(&mut self) {
        self.last = None;
        self.exhausted = false;
    }
}
