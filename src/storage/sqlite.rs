use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, AccountStatus, AccountType, Currency, Money, Movement, Statement,
    StatementPeriod, Transaction, TransactionId, TransactionKind, TransactionStatus,
};

use super::{AccountWrite, LedgerStore, MIGRATION_001_INITIAL, StoreError, TransactionKey};

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

const ACCOUNT_COLUMNS: &str = "id, account_number, routing_number, account_type, status, currency, \
    balance_cents, available_cents, daily_withdrawal_limit_cents, daily_transfer_limit_cents, \
    overdraft_protected, overdraft_limit_cents, created_at, last_activity, version";

const TRANSACTION_COLUMNS: &str = "id, sequence, kind, account_id, from_account_id, to_account_id, \
    status, amount_cents, fee_cents, currency, description, reference, reverses, created_at, \
    processed_at, settled_at";

const STATEMENT_COLUMNS: &str = "statement_number, account_id, account_number, currency, \
    period_start_date, period_end_date, period_start, period_end, opening_balance_cents, \
    closing_balance_cents, total_deposits_cents, total_withdrawals_cents, \
    total_transfers_in_cents, total_transfers_out_cents, total_fees_cents, total_interest_cents, \
    net_change_cents, transaction_count, deposits_count, withdrawals_count, generated_at";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Ledger store backed by a SQLite database.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database URL (`sqlite:path/to/file.db` or
    /// `sqlite::memory:`). Creates the database file if it doesn't exist.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .context("Invalid database URL")?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        // Every connection to an in-memory database is a separate database
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let (options, max_connections) = if in_memory {
            (options, 1)
        } else {
            (options.journal_mode(SqliteJournalMode::Wal), 5)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let store = Self::connect(database_url).await?;
        store.migrate().await?;
        Ok(store)
    }

    // ========================
    // Statements shared with commits
    // ========================

    async fn insert_account(
        conn: &mut SqliteConnection,
        account: &Account,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO accounts ({ACCOUNT_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(account.id.to_string())
            .bind(&account.account_number)
            .bind(&account.routing_number)
            .bind(account.account_type.as_str())
            .bind(account.status.as_str())
            .bind(account.currency.as_str())
            .bind(account.balance.cents())
            .bind(account.available_balance.cents())
            .bind(account.daily_withdrawal_limit.cents())
            .bind(account.daily_transfer_limit.cents())
            .bind(account.overdraft_protected)
            .bind(account.overdraft_limit.cents())
            .bind(timestamp(account.created_at))
            .bind(account.last_activity.map(timestamp))
            .bind(to_i64(account.version)?)
            .execute(conn)
            .await
            .map_err(|e| match unique_violation(&e).as_deref() {
                Some("accounts.account_number") => {
                    StoreError::DuplicateAccountNumber(account.account_number.clone())
                }
                _ => store_error(e, "Failed to save account"),
            })?;
        Ok(())
    }

    async fn write_account(
        conn: &mut SqliteConnection,
        write: &AccountWrite,
    ) -> Result<(), StoreError> {
        let account = &write.account;
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET status = ?, balance_cents = ?, available_cents = ?,
                daily_withdrawal_limit_cents = ?, daily_transfer_limit_cents = ?,
                overdraft_protected = ?, overdraft_limit_cents = ?, last_activity = ?, version = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(account.status.as_str())
        .bind(account.balance.cents())
        .bind(account.available_balance.cents())
        .bind(account.daily_withdrawal_limit.cents())
        .bind(account.daily_transfer_limit.cents())
        .bind(account.overdraft_protected)
        .bind(account.overdraft_limit.cents())
        .bind(account.last_activity.map(timestamp))
        .bind(to_i64(account.version)?)
        .bind(account.id.to_string())
        .bind(to_i64(write.expected_version)?)
        .execute(conn)
        .await
        .map_err(|e| store_error(e, "Failed to update account"))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "account {} is no longer at version {}",
                account.id, write.expected_version
            )));
        }
        Ok(())
    }

    /// Get the next sequence number and increment the counter.
    async fn next_sequence(conn: &mut SqliteConnection) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'transaction_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(conn)
        .await
        .map_err(|e| store_error(e, "Failed to get next sequence number"))?;

        Ok(row.get("value"))
    }

    /// Append a transaction. Assigns the next sequence number.
    async fn append(conn: &mut SqliteConnection, tx: &Transaction) -> Result<i64, StoreError> {
        let sequence = Self::next_sequence(conn).await?;
        let route = tx.movement.route();

        let sql = format!(
            "INSERT INTO transactions ({TRANSACTION_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(tx.id.as_str())
            .bind(sequence)
            .bind(tx.kind().as_str())
            .bind(tx.movement.primary_account().to_string())
            .bind(route.map(|r| r.from().to_string()))
            .bind(route.map(|r| r.to().to_string()))
            .bind(tx.status.as_str())
            .bind(tx.amount.cents())
            .bind(tx.fee.cents())
            .bind(tx.amount.currency().as_str())
            .bind(&tx.description)
            .bind(&tx.reference)
            .bind(tx.reverses.as_ref().map(|id| id.as_str()))
            .bind(timestamp(tx.created_at))
            .bind(tx.processed_at.map(timestamp))
            .bind(tx.settled_at.map(timestamp))
            .execute(conn)
            .await
            .map_err(|e| match unique_violation(&e).as_deref() {
                Some("transactions.id") => StoreError::DuplicateTransactionId(tx.id.clone()),
                // Someone else reversed the same original first
                Some("transactions.reverses") => {
                    StoreError::Conflict(format!("transaction {} already reversed", tx.id))
                }
                _ => store_error(e, "Failed to save transaction"),
            })?;

        Ok(sequence)
    }

    // ========================
    // Row mapping
    // ========================

    fn row_to_account(row: &SqliteRow) -> Result<Account> {
        let id_str: String = row.get("id");
        let type_str: String = row.get("account_type");
        let status_str: String = row.get("status");
        let currency_str: String = row.get("currency");
        let created_at_str: String = row.get("created_at");
        let last_activity_str: Option<String> = row.get("last_activity");
        let version: i64 = row.get("version");

        let currency = Currency::new(&currency_str).context("Invalid account currency")?;
        let money = |column: &str| Money::new(row.get(column), currency);

        Ok(Account {
            id: Uuid::parse_str(&id_str).context("Invalid account ID")?,
            account_number: row.get("account_number"),
            routing_number: row.get("routing_number"),
            account_type: AccountType::from_str(&type_str)
                .ok_or_else(|| anyhow!("Invalid account type: {}", type_str))?,
            status: AccountStatus::from_str(&status_str)
                .ok_or_else(|| anyhow!("Invalid account status: {}", status_str))?,
            balance: money("balance_cents"),
            available_balance: money("available_cents"),
            currency,
            daily_withdrawal_limit: money("daily_withdrawal_limit_cents"),
            daily_transfer_limit: money("daily_transfer_limit_cents"),
            overdraft_protected: row.get::<i32, _>("overdraft_protected") != 0,
            overdraft_limit: money("overdraft_limit_cents"),
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
            last_activity: last_activity_str
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .context("Invalid last_activity timestamp")?,
            version: u64::try_from(version).context("Invalid account version")?,
        })
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let kind_str: String = row.get("kind");
        let status_str: String = row.get("status");
        let account_str: String = row.get("account_id");
        let from_str: Option<String> = row.get("from_account_id");
        let to_str: Option<String> = row.get("to_account_id");
        let currency_str: String = row.get("currency");
        let reverses: Option<String> = row.get("reverses");
        let created_at_str: String = row.get("created_at");
        let processed_at_str: Option<String> = row.get("processed_at");
        let settled_at_str: Option<String> = row.get("settled_at");

        let parse_id = |s: &str| Uuid::parse_str(s).context("Invalid account ID");
        let kind = TransactionKind::from_str(&kind_str)
            .ok_or_else(|| anyhow!("Invalid transaction kind: {}", kind_str))?;
        let movement = Movement::from_parts(
            kind,
            parse_id(&account_str)?,
            from_str.as_deref().map(parse_id).transpose()?,
            to_str.as_deref().map(parse_id).transpose()?,
        )
        .context("Invalid transaction accounts")?;
        let currency = Currency::new(&currency_str).context("Invalid transaction currency")?;

        Ok(Transaction {
            id: TransactionId::from(row.get::<String, _>("id")),
            sequence: row.get("sequence"),
            movement,
            status: TransactionStatus::from_str(&status_str)
                .ok_or_else(|| anyhow!("Invalid transaction status: {}", status_str))?,
            amount: Money::new(row.get("amount_cents"), currency),
            fee: Money::new(row.get("fee_cents"), currency),
            description: row.get("description"),
            reference: row.get("reference"),
            reverses: reverses.map(TransactionId::from),
            created_at: parse_timestamp(&created_at_str).context("Invalid created_at timestamp")?,
            processed_at: processed_at_str
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .context("Invalid processed_at timestamp")?,
            settled_at: settled_at_str
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .context("Invalid settled_at timestamp")?,
        })
    }

    fn row_to_statement(row: &SqliteRow) -> Result<Statement> {
        let account_str: String = row.get("account_id");
        let currency_str: String = row.get("currency");
        let start_date_str: String = row.get("period_start_date");
        let end_date_str: String = row.get("period_end_date");
        let start_str: String = row.get("period_start");
        let end_str: String = row.get("period_end");
        let generated_at_str: String = row.get("generated_at");

        let currency = Currency::new(&currency_str).context("Invalid statement currency")?;
        let money = |column: &str| Money::new(row.get(column), currency);
        let count =
            |column: &str| u32::try_from(row.get::<i64, _>(column)).context("Invalid count");

        Ok(Statement {
            statement_number: row.get("statement_number"),
            account_id: Uuid::parse_str(&account_str).context("Invalid account ID")?,
            account_number: row.get("account_number"),
            period: StatementPeriod {
                start_date: NaiveDate::parse_from_str(&start_date_str, DATE_FORMAT)
                    .context("Invalid period start date")?,
                end_date: NaiveDate::parse_from_str(&end_date_str, DATE_FORMAT)
                    .context("Invalid period end date")?,
                start: parse_timestamp(&start_str).context("Invalid period start")?,
                end: parse_timestamp(&end_str).context("Invalid period end")?,
            },
            currency,
            opening_balance: money("opening_balance_cents"),
            closing_balance: money("closing_balance_cents"),
            total_deposits: money("total_deposits_cents"),
            total_withdrawals: money("total_withdrawals_cents"),
            total_transfers_in: money("total_transfers_in_cents"),
            total_transfers_out: money("total_transfers_out_cents"),
            total_fees: money("total_fees_cents"),
            total_interest: money("total_interest_cents"),
            net_change: money("net_change_cents"),
            transaction_count: count("transaction_count")?,
            deposits_count: count("deposits_count")?,
            withdrawals_count: count("withdrawals_count")?,
            generated_at: parse_timestamp(&generated_at_str)
                .context("Invalid generated_at timestamp")?,
        })
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn create_account(
        &self,
        account: &Account,
        opening_deposit: Option<&Transaction>,
    ) -> Result<Option<i64>, StoreError> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error(e, "Failed to begin transaction"))?;

        Self::insert_account(&mut *db_tx, account).await?;
        let sequence = match opening_deposit {
            Some(tx) => Some(Self::append(&mut *db_tx, tx).await?),
            None => None,
        };

        db_tx
            .commit()
            .await
            .map_err(|e| store_error(e, "Failed to commit account"))?;
        Ok(sequence)
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error(e, "Failed to fetch account"))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_account_by_number(&self, number: &str) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_number = ?");
        let row = sqlx::query(&sql)
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error(e, "Failed to fetch account by number"))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_account(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let sql =
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at, account_number");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(e, "Failed to list accounts"))?;

        Ok(rows
            .iter()
            .map(Self::row_to_account)
            .collect::<Result<Vec<_>>>()?)
    }

    async fn update_account(&self, write: &AccountWrite) -> Result<(), StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| store_error(e, "Failed to acquire connection"))?;
        Self::write_account(&mut conn, write).await
    }

    async fn commit(
        &self,
        writes: &[AccountWrite],
        transaction: &Transaction,
    ) -> Result<i64, StoreError> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error(e, "Failed to begin transaction"))?;

        // Dropping db_tx on any error rolls everything back
        for write in writes {
            Self::write_account(&mut *db_tx, write).await?;
        }
        let sequence = Self::append(&mut *db_tx, transaction).await?;

        db_tx
            .commit()
            .await
            .map_err(|e| store_error(e, "Failed to commit transaction"))?;
        Ok(sequence)
    }

    async fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, StoreError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error(e, "Failed to fetch transaction"))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_reversal(
        &self,
        original: &TransactionId,
    ) -> Result<Option<Transaction>, StoreError> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE reverses = ?");
        let row = sqlx::query(&sql)
            .bind(original.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error(e, "Failed to fetch reversal"))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_transaction(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_transactions(
        &self,
        account: AccountId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE account_id = ? OR to_account_id = ? \
             ORDER BY created_at DESC, sequence DESC \
             LIMIT ? OFFSET ?"
        );
        let account = account.to_string();
        let rows = sqlx::query(&sql)
            .bind(&account)
            .bind(&account)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(e, "Failed to list transactions"))?;

        Ok(rows
            .iter()
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>>>()?)
    }

    async fn list_transactions_after(
        &self,
        account: AccountId,
        after: Option<&TransactionKey>,
        limit: u64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE (account_id = ? OR to_account_id = ?) \
               AND (? IS NULL OR created_at < ? OR (created_at = ? AND sequence < ?)) \
             ORDER BY created_at DESC, sequence DESC \
             LIMIT ?"
        );
        let account = account.to_string();
        let created_at = after.map(|key| timestamp(key.created_at));
        let sequence = after.map(|key| key.sequence);
        let rows = sqlx::query(&sql)
            .bind(&account)
            .bind(&account)
            .bind(&created_at)
            .bind(&created_at)
            .bind(&created_at)
            .bind(sequence)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(e, "Failed to page transactions"))?;

        Ok(rows
            .iter()
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>>>()?)
    }

    async fn count_transactions(&self, account: AccountId) -> Result<u64, StoreError> {
        let account = account.to_string();
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) as count FROM transactions WHERE account_id = ? OR to_account_id = ?",
        )
        .bind(&account)
        .bind(&account)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error(e, "Failed to count transactions"))?
        .get("count");

        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn history(
        &self,
        account: AccountId,
        from: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Transaction>, StoreError> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE (account_id = ? OR to_account_id = ?) \
               AND (? IS NULL OR created_at >= ?) \
               AND (? IS NULL OR created_at < ?) \
             ORDER BY sequence"
        );
        let account = account.to_string();
        let from = from.map(timestamp);
        let until = until.map(timestamp);
        let rows = sqlx::query(&sql)
            .bind(&account)
            .bind(&account)
            .bind(&from)
            .bind(&from)
            .bind(&until)
            .bind(&until)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(e, "Failed to scan transaction history"))?;

        Ok(rows
            .iter()
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>>>()?)
    }

    async fn save_statement(&self, statement: &Statement) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT OR REPLACE INTO statements ({STATEMENT_COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(&statement.statement_number)
            .bind(statement.account_id.to_string())
            .bind(&statement.account_number)
            .bind(statement.currency.as_str())
            .bind(statement.period.start_date.format(DATE_FORMAT).to_string())
            .bind(statement.period.end_date.format(DATE_FORMAT).to_string())
            .bind(timestamp(statement.period.start))
            .bind(timestamp(statement.period.end))
            .bind(statement.opening_balance.cents())
            .bind(statement.closing_balance.cents())
            .bind(statement.total_deposits.cents())
            .bind(statement.total_withdrawals.cents())
            .bind(statement.total_transfers_in.cents())
            .bind(statement.total_transfers_out.cents())
            .bind(statement.total_fees.cents())
            .bind(statement.total_interest.cents())
            .bind(statement.net_change.cents())
            .bind(i64::from(statement.transaction_count))
            .bind(i64::from(statement.deposits_count))
            .bind(i64::from(statement.withdrawals_count))
            .bind(timestamp(statement.generated_at))
            .execute(&self.pool)
            .await
            .map_err(|e| store_error(e, "Failed to save statement"))?;
        Ok(())
    }

    async fn get_statement(&self, number: &str) -> Result<Option<Statement>, StoreError> {
        let sql = format!("SELECT {STATEMENT_COLUMNS} FROM statements WHERE statement_number = ?");
        let row = sqlx::query(&sql)
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error(e, "Failed to fetch statement"))?;

        match row {
            Some(row) => Ok(Some(Self::row_to_statement(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_statements(
        &self,
        account: AccountId,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Statement>, StoreError> {
        let sql = format!(
            "SELECT {STATEMENT_COLUMNS} FROM statements WHERE account_id = ? \
             ORDER BY period_start_date DESC, period_end_date DESC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(account.to_string())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(i64::try_from(offset).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error(e, "Failed to list statements"))?;

        Ok(rows
            .iter()
            .map(Self::row_to_statement)
            .collect::<Result<Vec<_>>>()?)
    }
}

/// RFC 3339 with fixed microsecond precision, so text order is time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn to_i64(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::Backend(anyhow!("value {value} out of range")))
}

/// `table.column` named by a UNIQUE constraint failure, if that is what `err` is.
fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => db_err
            .message()
            .rsplit(": ")
            .next()
            .map(|target| target.trim().to_string()),
        _ => None,
    }
}

fn store_error(err: sqlx::Error, context: &'static str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        let code = db_err
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .unwrap_or_default();
        // Extended result codes keep the primary code in the low byte
        if matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED) {
            return StoreError::Conflict(format!("{context}: database is busy"));
        }
    }
    StoreError::Backend(anyhow::Error::new(err).context(context))
}
