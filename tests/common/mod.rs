// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tally::application::{LedgerService, OpenAccount};
use tally::config::LedgerConfig;
use tally::domain::{Account, AccountType, Currency, ManualClock, Money};
use tally::storage::{MemoryStore, SqliteStore};
use tempfile::TempDir;

/// Fixed starting instant for every test clock: 2024-03-15 10:00 UTC.
pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap()
}

pub fn usd(cents: i64) -> Money {
    Money::new(cents, Currency::USD)
}

/// Helper to parse a date string into NaiveDate
pub fn date(date_str: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap()
}

/// Helper to create an in-memory service driven by a manual clock
pub fn memory_service() -> (LedgerService<MemoryStore>, Arc<ManualClock>) {
    memory_service_with(LedgerConfig::default())
}

pub fn memory_service_with(config: LedgerConfig) -> (LedgerService<MemoryStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let service = LedgerService::in_memory(config)
        .unwrap()
        .with_clock(clock.clone());
    (service, clock)
}

/// Helper to create a test service with a temporary database
pub async fn sqlite_service() -> Result<(LedgerService<SqliteStore>, TempDir, Arc<ManualClock>)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let clock = Arc::new(ManualClock::new(start()));
    let service = LedgerService::init(db_path.to_str().unwrap(), LedgerConfig::default())
        .await?
        .with_clock(clock.clone());
    Ok((service, temp_dir, clock))
}

/// Open a checking account, funded with `cents` when positive.
pub async fn open_funded<S: tally::storage::LedgerStore>(
    service: &LedgerService<S>,
    cents: i64,
) -> Result<Account> {
    let request = OpenAccount::new(AccountType::Checking).initial_deposit(usd(cents));
    Ok(service.open_account(request).await?)
}
