//! Ledger configuration.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::domain::{Cents, Currency, LimitWindow, Money};

/// Ledger engine configuration. Every field has a default, so an empty JSON
/// object is a valid configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Daily withdrawal limit given to new accounts, in cents.
    #[serde(default = "default_daily_withdrawal_limit")]
    pub daily_withdrawal_limit_cents: Cents,
    /// Daily transfer limit given to new accounts, in cents.
    #[serde(default = "default_daily_transfer_limit")]
    pub daily_transfer_limit_cents: Cents,
    /// Currency of new accounts when none is given.
    #[serde(default = "default_currency")]
    pub currency: Currency,
    /// Offset east of UTC, in minutes, at which calendar days start.
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Longest statement period, in days.
    #[serde(default = "default_max_statement_days")]
    pub max_statement_days: i64,
    /// Attempts per operation before an optimistic conflict surfaces.
    #[serde(default = "default_max_commit_attempts")]
    pub max_commit_attempts: u32,
    /// Routing number stamped on new accounts.
    #[serde(default = "default_routing_number")]
    pub routing_number: String,
}

fn default_daily_withdrawal_limit() -> Cents {
    100_000 // 1,000.00
}

fn default_daily_transfer_limit() -> Cents {
    1_000_000 // 10,000.00
}

fn default_currency() -> Currency {
    Currency::USD
}

fn default_max_statement_days() -> i64 {
    365
}

fn default_max_commit_attempts() -> u32 {
    5
}

fn default_routing_number() -> String {
    "021000021".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            daily_withdrawal_limit_cents: default_daily_withdrawal_limit(),
            daily_transfer_limit_cents: default_daily_transfer_limit(),
            currency: default_currency(),
            utc_offset_minutes: 0,
            max_statement_days: default_max_statement_days(),
            max_commit_attempts: default_max_commit_attempts(),
            routing_number: default_routing_number(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.daily_withdrawal_limit_cents < 0 || self.daily_transfer_limit_cents < 0 {
            bail!("Daily limits must not be negative");
        }
        if self.max_statement_days < 1 {
            bail!("max_statement_days must be at least 1");
        }
        if self.max_commit_attempts < 1 {
            bail!("max_commit_attempts must be at least 1");
        }
        if self.routing_number.len() != 9
            || !self.routing_number.bytes().all(|b| b.is_ascii_digit())
        {
            bail!("routing_number must be 9 digits, got {:?}", self.routing_number);
        }
        self.window()?;
        Ok(())
    }

    /// Day boundaries for limits and statements.
    pub fn window(&self) -> Result<LimitWindow> {
        LimitWindow::from_offset_minutes(self.utc_offset_minutes).with_context(|| {
            format!("UTC offset of {} minutes is out of range", self.utc_offset_minutes)
        })
    }

    pub fn daily_withdrawal_limit(&self, currency: Currency) -> Money {
        Money::new(self.daily_withdrawal_limit_cents, currency)
    }

    pub fn daily_transfer_limit(&self, currency: Currency) -> Money {
        Money::new(self.daily_transfer_limit_cents, currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: LedgerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.daily_withdrawal_limit_cents, 100_000);
        assert_eq!(config.daily_transfer_limit_cents, 1_000_000);
        assert_eq!(config.currency, Currency::USD);
        assert_eq!(config.utc_offset_minutes, 0);
        assert_eq!(config.max_statement_days, 365);
        assert_eq!(config.max_commit_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tally.json");
        std::fs::write(
            &path,
            r#"{"currency": "eur", "utc_offset_minutes": 60, "max_commit_attempts": 3}"#,
        )
        .unwrap();

        let config = LedgerConfig::load(&path).unwrap();
        assert_eq!(config.currency, Currency::EUR);
        assert_eq!(config.max_commit_attempts, 3);
        assert_eq!(config.window().unwrap().offset().local_minus_utc(), 3600);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let config = LedgerConfig {
            utc_offset_minutes: 24 * 60,
            ..LedgerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = LedgerConfig {
            max_commit_attempts: 0,
            ..LedgerConfig::default()
        };
        assert!(config.validate().is_err());

        assert!(serde_json::from_str::<LedgerConfig>(r#"{"currency": "DOLLARS"}"#).is_err());
    }
}
