use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::domain::{
    Account, AccountId, AccountStatus, AccountType, BalanceSnapshot, Clock, Currency,
    IntegrityReport, LimitWindow, Money, Movement, Statement, StatementPeriod, SystemClock,
    Transaction, TransactionId, TransferRoute, daily_limit, replay_balance_before,
};
use crate::storage::{
    AccountWrite, LedgerStore, MemoryStore, SqliteStore, StoreError, TransactionKey,
};

use super::LedgerError;
use super::cursor::TransactionCursor;
use super::locks::{AccountCell, AccountRegistry, PairGuard, lock_pair};

/// Application service providing high-level operations for the ledger.
/// This is the primary interface for any client (CLI, API, batch jobs, etc.).
///
/// Every balance mutation runs inside the exclusive scope of the accounts it
/// touches; the limit check, the balance check and the store commit all
/// happen under that scope.
pub struct LedgerService<S> {
    store: S,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    window: LimitWindow,
    registry: AccountRegistry,
}

/// Parameters for opening an account. Unset limits come from configuration.
#[derive(Debug, Clone)]
pub struct OpenAccount {
    pub account_type: AccountType,
    pub currency: Option<Currency>,
    pub initial_deposit: Option<Money>,
    pub daily_withdrawal_limit: Option<Money>,
    pub daily_transfer_limit: Option<Money>,
    pub overdraft_limit: Option<Money>,
}

impl OpenAccount {
    pub fn new(account_type: AccountType) -> Self {
        Self {
            account_type,
            currency: None,
            initial_deposit: None,
            daily_withdrawal_limit: None,
            daily_transfer_limit: None,
            overdraft_limit: None,
        }
    }

    pub fn currency(mut self, currency: Currency) -> Self {
        self.currency = Some(currency);
        self
    }

    pub fn initial_deposit(mut self, amount: Money) -> Self {
        self.initial_deposit = Some(amount);
        self
    }

    pub fn limits(mut self, daily_withdrawal: Money, daily_transfer: Money) -> Self {
        self.daily_withdrawal_limit = Some(daily_withdrawal);
        self.daily_transfer_limit = Some(daily_transfer);
        self
    }

    pub fn overdraft(mut self, limit: Money) -> Self {
        self.overdraft_limit = Some(limit);
        self
    }
}

/// A movement waiting to be applied.
struct Posting {
    movement: Movement,
    amount: Money,
    description: Option<String>,
    reference: Option<String>,
    reverses: Option<TransactionId>,
    limited: bool,
}

impl Posting {
    fn new(movement: Movement, amount: Money) -> Self {
        Self {
            movement,
            amount,
            description: None,
            reference: None,
            reverses: None,
            limited: false,
        }
    }

    fn describe(mut self, description: Option<String>, reference: Option<String>) -> Self {
        self.description = description;
        self.reference = reference;
        self
    }

    fn limited(mut self) -> Self {
        self.limited = true;
        self
    }

    /// Build the completed record for this posting, stamped `at`.
    fn draft(&self, currency: Currency, at: DateTime<Utc>) -> Result<Transaction, LedgerError> {
        let amount = self.amount.ensure_currency(currency)?;
        let tx = Transaction::new(self.movement, amount, at)?
            .with_description(self.description.clone())
            .with_reference(self.reference.clone());
        let tx = match &self.reverses {
            Some(original) => tx.with_reverses(original.clone()),
            None => tx,
        };
        Ok(tx.complete(at))
    }
}

impl LedgerService<SqliteStore> {
    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str, config: LedgerConfig) -> anyhow::Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let store = SqliteStore::init(&db_url).await?;
        Self::new(store, config)
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str, config: LedgerConfig) -> anyhow::Result<Self> {
        let db_url = format!("sqlite:{}", database_path);
        let store = SqliteStore::connect(&db_url).await?;
        Self::new(store, config)
    }
}

impl LedgerService<MemoryStore> {
    pub fn in_memory(config: LedgerConfig) -> anyhow::Result<Self> {
        Self::new(MemoryStore::new(), config)
    }
}

impl<S: LedgerStore> LedgerService<S> {
    /// Create a new ledger service over `store`, reading time from the system clock.
    pub fn new(store: S, config: LedgerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            clock: Arc::new(SystemClock),
            window: config.window()?,
            config,
            registry: AccountRegistry::default(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn window(&self) -> &LimitWindow {
        &self.window
    }

    // ========================
    // Account operations
    // ========================

    /// Open a new active account. A positive initial deposit is recorded as a
    /// completed deposit in the same store commit.
    #[tracing::instrument(skip(self))]
    pub async fn open_account(&self, request: OpenAccount) -> Result<Account, LedgerError> {
        let currency = request.currency.unwrap_or(self.config.currency);
        let non_negative = |amount: Money| amount.ensure_currency(currency)?.ensure_non_negative();

        let withdrawal_limit = non_negative(
            request
                .daily_withdrawal_limit
                .unwrap_or(self.config.daily_withdrawal_limit(currency)),
        )?;
        let transfer_limit = non_negative(
            request
                .daily_transfer_limit
                .unwrap_or(self.config.daily_transfer_limit(currency)),
        )?;
        let overdraft = request.overdraft_limit.map(non_negative).transpose()?;
        let deposit = request
            .initial_deposit
            .map(non_negative)
            .transpose()?
            .filter(Money::is_positive);

        for attempt in 1..=self.config.max_commit_attempts {
            let number = generate_account_number();
            if self.store.find_account_by_number(&number).await?.is_some() {
                tracing::debug!(%number, "account number collision, drawing another");
                continue;
            }

            let now = self.clock.now();
            let mut account = Account::new(
                number,
                self.config.routing_number.clone(),
                request.account_type,
                currency,
                now,
            )
            .with_limits(withdrawal_limit, transfer_limit);
            if let Some(limit) = overdraft {
                account = account.with_overdraft(limit);
            }

            let opening = match deposit {
                Some(amount) => {
                    let tx = Posting::new(Movement::Deposit { account: account.id }, amount)
                        .describe(Some("Initial deposit".to_string()), None)
                        .draft(currency, now)?;
                    apply_effect(&mut account, &tx, now)?;
                    Some(tx)
                }
                None => None,
            };

            match self.store.create_account(&account, opening.as_ref()).await {
                Ok(sequence) => {
                    tracing::info!(
                        account = %account.id,
                        number = %account.account_number,
                        balance = %account.balance,
                        opening_sequence = ?sequence,
                        "account opened"
                    );
                    self.registry.insert(account.clone())?;
                    return Ok(account);
                }
                Err(err) => self.retry_or_fail(err, attempt)?,
            }
        }
        Err(self.exhausted())
    }

    /// Move an account to `status`. Closed accounts never change again.
    #[tracing::instrument(skip(self))]
    pub async fn set_status(
        &self,
        account_id: AccountId,
        status: AccountStatus,
    ) -> Result<Account, LedgerError> {
        let cell = self.cell(account_id).await?;
        let mut account = cell.state.write().await;

        for attempt in 1..=self.config.max_commit_attempts {
            if !account.status.can_transition_to(status) {
                return Err(LedgerError::InvalidStatusTransition {
                    account: account_id,
                    from: account.status,
                    to: status,
                });
            }

            let mut next = account.clone();
            next.status = status;
            let write = AccountWrite::new(account.version, next);
            match self.store.update_account(&write).await {
                Ok(()) => {
                    tracing::info!(from = %account.status, to = %status, "account status changed");
                    *account = write.account;
                    return Ok(account.clone());
                }
                Err(err) => {
                    self.retry_or_fail(err, attempt)?;
                    *account = self.reload(account_id).await?;
                }
            }
        }
        Err(self.exhausted())
    }

    pub async fn close_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.set_status(account_id, AccountStatus::Closed).await
    }

    /// Get an account by ID, as currently stored.
    pub async fn get_account(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.current(account_id).await
    }

    /// Get an account by its 10-digit account number.
    pub async fn find_account_by_number(&self, number: &str) -> Result<Account, LedgerError> {
        let found = self
            .store
            .find_account_by_number(number)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(number.to_string()))?;
        self.get_account(found.id).await
    }

    /// List all accounts, oldest first.
    pub async fn list_accounts(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.list_accounts().await?)
    }

    /// Consistent `(balance, available_balance)` pair.
    pub async fn snapshot(&self, account_id: AccountId) -> Result<BalanceSnapshot, LedgerError> {
        Ok(self.current(account_id).await?.snapshot())
    }

    // ========================
    // Movements
    // ========================

    #[tracing::instrument(skip(self, description, reference))]
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Money,
        description: Option<String>,
        reference: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        let posting = Posting::new(Movement::Deposit { account: account_id }, amount)
            .describe(description, reference);
        logged("deposit", self.post_single(account_id, &posting).await)
    }

    /// Withdraw cash. Gated by the account's daily withdrawal limit.
    #[tracing::instrument(skip(self, description, reference))]
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Money,
        description: Option<String>,
        reference: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        let posting = Posting::new(Movement::Withdrawal { account: account_id }, amount)
            .describe(description, reference)
            .limited();
        logged("withdrawal", self.post_single(account_id, &posting).await)
    }

    /// Post a fee debit. Fees are not subject to daily limits.
    #[tracing::instrument(skip(self, description))]
    pub async fn charge_fee(
        &self,
        account_id: AccountId,
        amount: Money,
        description: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        let posting =
            Posting::new(Movement::Fee { account: account_id }, amount).describe(description, None);
        logged("fee", self.post_single(account_id, &posting).await)
    }

    /// Move `amount` between two accounts as one record. Gated by the source
    /// account's daily transfer limit.
    #[tracing::instrument(skip(self, description, reference))]
    pub async fn transfer(
        &self,
        from_id: AccountId,
        to_id: AccountId,
        amount: Money,
        description: Option<String>,
        reference: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        let result: Result<Transaction, LedgerError> = async {
            let movement = Movement::transfer(from_id, to_id)?;
            let posting = Posting::new(movement, amount)
                .describe(description, reference)
                .limited();
            self.post_pair(&posting).await
        }
        .await;
        logged("transfer", result)
    }

    /// Append a compensating record for a completed transaction. The original
    /// stays in the log untouched.
    #[tracing::instrument(skip(self))]
    pub async fn reverse_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Transaction, LedgerError> {
        let result: Result<Transaction, LedgerError> = async {
            let original = self.get_transaction(transaction_id).await?;
            let compensation = original
                .create_reversal(self.clock.now())
                .map_err(|err| LedgerError::NotReversible(original.id.clone(), err))?;

            let mut posting = Posting::new(original.movement, original.amount)
                .describe(compensation.description, compensation.reference);
            posting.reverses = Some(original.id.clone());

            match original.movement {
                Movement::Transfer(_) => self.post_pair(&posting).await,
                other => self.post_single(other.primary_account(), &posting).await,
            }
        }
        .await;
        logged("reversal", result)
    }

    /// Apply `posting` to a single account under its exclusive scope.
    async fn post_single(
        &self,
        account_id: AccountId,
        posting: &Posting,
    ) -> Result<Transaction, LedgerError> {
        let cell = self.cell(account_id).await?;
        let mut account = cell.state.write().await;

        for attempt in 1..=self.config.max_commit_attempts {
            account.ensure_active()?;
            let now = self.clock.now();
            let mut tx = posting.draft(account.currency, now)?;
            self.ensure_not_reversed(posting).await?;
            if posting.limited {
                self.enforce_limit(&account, &tx, now).await?;
            }

            let mut next = account.clone();
            apply_effect(&mut next, &tx, now)?;
            let write = AccountWrite::new(account.version, next);

            match self.store.commit(std::slice::from_ref(&write), &tx).await {
                Ok(sequence) => {
                    tx.sequence = sequence;
                    *account = write.account;
                    return Ok(tx);
                }
                Err(err) => {
                    self.retry_or_fail(err, attempt)?;
                    *account = self.reload(account_id).await?;
                }
            }
        }
        Err(self.exhausted())
    }

    /// Apply a transfer posting to both accounts, all or nothing.
    async fn post_pair(&self, posting: &Posting) -> Result<Transaction, LedgerError> {
        let route: TransferRoute = posting.movement.route().ok_or_else(|| {
            LedgerError::Storage(anyhow::anyhow!("posting is not a transfer"))
        })?;
        let from_cell = self.cell(route.from()).await?;
        let to_cell = self.cell(route.to()).await?;
        let PairGuard { mut from, mut to } = lock_pair(&from_cell, &to_cell).await;

        for attempt in 1..=self.config.max_commit_attempts {
            from.ensure_active()?;
            to.ensure_active()?;
            posting.amount.ensure_currency(to.currency)?;
            let now = self.clock.now();
            let mut tx = posting.draft(from.currency, now)?;
            self.ensure_not_reversed(posting).await?;
            if posting.limited {
                self.enforce_limit(&from, &tx, now).await?;
            }

            let mut next_from = from.clone();
            apply_effect(&mut next_from, &tx, now)?;
            let mut next_to = to.clone();
            apply_effect(&mut next_to, &tx, now)?;
            let writes = [
                AccountWrite::new(from.version, next_from),
                AccountWrite::new(to.version, next_to),
            ];

            match self.store.commit(&writes, &tx).await {
                Ok(sequence) => {
                    tx.sequence = sequence;
                    let [from_write, to_write] = writes;
                    *from = from_write.account;
                    *to = to_write.account;
                    return Ok(tx);
                }
                Err(err) => {
                    self.retry_or_fail(err, attempt)?;
                    *from = self.reload(route.from()).await?;
                    *to = self.reload(route.to()).await?;
                }
            }
        }
        Err(self.exhausted())
    }

    /// Reject `kind` movements that would push today's total past the limit.
    async fn enforce_limit(
        &self,
        account: &Account,
        tx: &Transaction,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let kind = tx.kind();
        if daily_limit(account, kind).is_none() {
            return Ok(());
        }

        let (start, end) = self.window.day_bounds(now);
        let today = self.store.history(account.id, Some(start), Some(end)).await?;
        let Some(check) = self
            .window
            .evaluate(account, kind, tx.amount, &today, now)?
        else {
            return Ok(());
        };

        if check.exceeded()? {
            return Err(LedgerError::DailyLimitExceeded {
                account: account.id,
                kind,
                limit: check.limit,
                used: check.used,
                requested: check.requested,
            });
        }
        Ok(())
    }

    async fn ensure_not_reversed(&self, posting: &Posting) -> Result<(), LedgerError> {
        let Some(original) = &posting.reverses else {
            return Ok(());
        };
        match self.store.find_reversal(original).await? {
            Some(existing) => Err(LedgerError::AlreadyReversed {
                original: original.clone(),
                reversal: existing.id,
            }),
            None => Ok(()),
        }
    }

    // ========================
    // Transaction queries
    // ========================

    /// Get a transaction by ID.
    pub async fn get_transaction(&self, id: &TransactionId) -> Result<Transaction, LedgerError> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(id.clone()))
    }

    /// Transactions touching the account, newest first.
    pub async fn list_transactions(
        &self,
        account_id: AccountId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.cell(account_id).await?;
        Ok(self
            .store
            .list_transactions(account_id, offset, limit)
            .await?)
    }

    pub async fn count_transactions(&self, account_id: AccountId) -> Result<u64, LedgerError> {
        self.cell(account_id).await?;
        Ok(self.store.count_transactions(account_id).await?)
    }

    /// Lazy page-by-page view of the account's transactions, newest first.
    pub fn transactions(&self, account_id: AccountId, page_size: u64) -> TransactionCursor<'_, S> {
        TransactionCursor::new(self, account_id, page_size)
    }

    pub(crate) async fn transactions_after(
        &self,
        account_id: AccountId,
        after: Option<&TransactionKey>,
        limit: u64,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.cell(account_id).await?;
        Ok(self
            .store
            .list_transactions_after(account_id, after, limit)
            .await?)
    }

    // ========================
    // Statements
    // ========================

    /// Summarize `[start_date, end_date)` for one account and cache the result.
    #[tracing::instrument(skip(self))]
    pub async fn generate_statement(
        &self,
        account_id: AccountId,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Statement, LedgerError> {
        let period = StatementPeriod::new(
            start_date,
            end_date,
            &self.window,
            self.config.max_statement_days,
        )?;
        let account = self.get_account(account_id).await?;

        let history = self
            .store
            .history(account_id, None, Some(period.end))
            .await?;
        let opening = replay_balance_before(account_id, account.currency, &history, period.start)?;
        let statement =
            Statement::aggregate(&account, period, opening, &history, self.clock.now())?;

        self.store.save_statement(&statement).await?;
        tracing::info!(
            statement = %statement.statement_number,
            transactions = statement.transaction_count,
            closing = %statement.closing_balance,
            "statement generated"
        );
        Ok(statement)
    }

    pub async fn get_statement(&self, number: &str) -> Result<Statement, LedgerError> {
        self.store
            .get_statement(number)
            .await?
            .ok_or_else(|| LedgerError::StatementNotFound(number.to_string()))
    }

    /// Cached statements of an account, most recent period first.
    pub async fn list_statements(
        &self,
        account_id: AccountId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Statement>, LedgerError> {
        self.cell(account_id).await?;
        Ok(self
            .store
            .list_statements(account_id, offset, limit)
            .await?)
    }

    // ========================
    // Integrity operations
    // ========================

    /// Replay every account's history and compare it with the stored balances.
    pub async fn check_integrity(&self) -> Result<IntegrityReport, LedgerError> {
        let mut report = IntegrityReport::default();

        for listed in self.store.list_accounts().await? {
            let cell = self.cell(listed.id).await?;
            // Hold the scope so no local commit lands between the two reads
            let mut account = cell.state.write().await;
            self.refresh(&mut account).await?;
            let history = self.store.history(account.id, None, None).await?;
            report.check_account(&account, &history)?;
        }

        if report.is_healthy() {
            tracing::info!(accounts = report.accounts_checked, "ledger integrity verified");
        } else {
            tracing::warn!(issues = report.issues.len(), "ledger integrity issues found");
        }
        Ok(report)
    }

    // ========================
    // Internals
    // ========================

    /// The account's exclusive scope, loading it from the store on first use.
    async fn cell(&self, account_id: AccountId) -> Result<Arc<AccountCell>, LedgerError> {
        if let Some(cell) = self.registry.get(account_id)? {
            return Ok(cell);
        }
        let account = self.reload(account_id).await?;
        self.registry.insert(account)
    }

    /// Cached state, replaced by the stored row when another writer sharing
    /// the store has moved the account on.
    async fn current(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        let cell = self.cell(account_id).await?;
        let mut account = cell.state.write().await;
        self.refresh(&mut account).await?;
        Ok(account.clone())
    }

    async fn refresh(&self, account: &mut Account) -> Result<(), LedgerError> {
        let stored = self.reload(account.id).await?;
        if stored.version > account.version {
            tracing::debug!(
                account = %account.id,
                cached = account.version,
                stored = stored.version,
                "cached account state is stale, refreshing"
            );
            *account = stored;
        }
        Ok(())
    }

    async fn reload(&self, account_id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// Decide whether a failed commit is retried. Conflicts and identifier
    /// collisions are retried until the configured attempts run out.
    fn retry_or_fail(&self, err: StoreError, attempt: u32) -> Result<(), LedgerError> {
        let retryable = matches!(
            err,
            StoreError::Conflict(_)
                | StoreError::DuplicateTransactionId(_)
                | StoreError::DuplicateAccountNumber(_)
        );
        if !retryable {
            return Err(err.into());
        }
        if attempt >= self.config.max_commit_attempts {
            tracing::warn!(attempt, error = %err, "giving up after repeated conflicts");
            return Err(LedgerError::Unavailable { attempts: attempt });
        }
        tracing::warn!(attempt, error = %err, "commit conflict, retrying");
        Ok(())
    }

    fn exhausted(&self) -> LedgerError {
        LedgerError::Unavailable {
            attempts: self.config.max_commit_attempts,
        }
    }
}

/// Apply the record's signed effect on `account` through its debit/credit
/// primitives, so the materialized balance always equals the replayed one.
fn apply_effect(
    account: &mut Account,
    tx: &Transaction,
    at: DateTime<Utc>,
) -> Result<(), LedgerError> {
    let effect = tx.effect_on(account.id)?;
    if effect.is_negative() {
        account.debit(effect.checked_neg()?, at)?;
    } else if effect.is_positive() {
        account.credit(effect, at)?;
    }
    Ok(())
}

fn generate_account_number() -> String {
    let value = Uuid::new_v4().as_u128() % 10_000_000_000;
    format!("{value:010}")
}

fn logged(
    operation: &'static str,
    result: Result<Transaction, LedgerError>,
) -> Result<Transaction, LedgerError> {
    match &result {
        Ok(tx) => tracing::info!(
            transaction = %tx.id,
            sequence = tx.sequence,
            kind = %tx.kind(),
            amount = %tx.amount,
            "{operation} posted"
        ),
        Err(err) => tracing::debug!(error = %err, "{operation} rejected"),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_number_shape() {
        for _ in 0..100 {
            let number = generate_account_number();
            assert_eq!(number.len(), 10);
            assert!(number.bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_apply_effect_matches_replay() {
        let now = Utc::now();
        let mut account = Account::new(
            "0000000001".into(),
            "021000021".into(),
            AccountType::Checking,
            Currency::USD,
            now,
        );
        let deposit = Posting::new(
            Movement::Deposit { account: account.id },
            Money::new(900, Currency::USD),
        )
        .draft(Currency::USD, now)
        .unwrap();
        apply_effect(&mut account, &deposit, now).unwrap();

        let fee = Posting::new(
            Movement::Fee { account: account.id },
            Money::new(150, Currency::USD),
        )
        .draft(Currency::USD, now)
        .unwrap();
        apply_effect(&mut account, &fee, now).unwrap();

        assert_eq!(account.balance, Money::new(750, Currency::USD));
        assert_eq!(
            crate::domain::replay_balance(account.id, Currency::USD, &[deposit, fee]).unwrap(),
            account.balance
        );
    }

    #[test]
    fn test_draft_rejects_foreign_currency() {
        let posting = Posting::new(
            Movement::Deposit {
                account: Uuid::new_v4(),
            },
            Money::new(100, Currency::EUR),
        );
        assert!(matches!(
            posting.draft(Currency::USD, Utc::now()),
            Err(LedgerError::InvalidAmount(_))
        ));
    }
}
