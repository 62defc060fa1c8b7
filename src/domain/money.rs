use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Money is represented as integer cents to avoid floating-point precision issues.
/// For USD/EUR, 1 unit = 100 cents, so $50.00 = 5000 cents.
pub type Cents = i64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("invalid money format: {0}")]
    InvalidFormat(String),

    #[error("amount {0} has more than two fractional digits")]
    TooPrecise(String),

    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),

    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    #[error("amount must be positive, got {0}")]
    NotPositive(Money),

    #[error("amount must not be negative, got {0}")]
    Negative(Money),

    #[error("amount overflow")]
    Overflow,
}

/// Format cents as a human-readable decimal string.
/// Example: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs_cents = cents.unsigned_abs();
    let units = abs_cents / 100;
    let remainder = abs_cents % 100;
    format!("{}{}.{:02}", sign, units, remainder)
}

/// Parse a decimal string into cents.
/// Example: "50.00" -> 5000, "12.5" -> 1250, "100" -> 10000
///
/// More than two fractional digits is an error, never a truncation.
pub fn parse_cents(input: &str) -> Result<Cents, MoneyError> {
    let trimmed = input.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let invalid = || MoneyError::InvalidFormat(input.to_string());
    let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

    let (units_str, decimal_str) = match digits.split_once('.') {
        Some((units, decimal)) => (units, decimal),
        None => (digits, ""),
    };

    if (units_str.is_empty() && decimal_str.is_empty())
        || !is_digits(units_str)
        || !is_digits(decimal_str)
    {
        return Err(invalid());
    }
    if decimal_str.len() > 2 {
        return Err(MoneyError::TooPrecise(input.to_string()));
    }

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str.parse().map_err(|_| MoneyError::Overflow)?
    };

    // Single digit like "5" means 50 cents
    let decimal_cents: i64 = match decimal_str.len() {
        0 => 0,
        1 => decimal_str.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => decimal_str.parse().map_err(|_| invalid())?,
    };

    let cents = units
        .checked_mul(100)
        .and_then(|c| c.checked_add(decimal_cents))
        .ok_or(MoneyError::Overflow)?;
    Ok(if negative { -cents } else { cents })
}

/// ISO 4217 style three-letter currency code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    pub const USD: Currency = Currency(*b"USD");
    pub const EUR: Currency = Currency(*b"EUR");

    pub fn new(code: &str) -> Result<Self, MoneyError> {
        let code = code.trim();
        match code.as_bytes() {
            [a, b, c] if code.bytes().all(|ch| ch.is_ascii_alphabetic()) => Ok(Currency([
                a.to_ascii_uppercase(),
                b.to_ascii_uppercase(),
                c.to_ascii_uppercase(),
            ])),
            _ => Err(MoneyError::InvalidCurrency(code.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.as_str().to_string()
    }
}

/// An exact amount of cents tagged with its currency.
///
/// Arithmetic is checked: mixing currencies or overflowing `i64` is an error.
/// Ordering is total (by currency, then amount), but callers comparing balances
/// are expected to have checked currencies first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money {
    currency: Currency,
    cents: Cents,
}

impl Money {
    pub const fn new(cents: Cents, currency: Currency) -> Self {
        Self { currency, cents }
    }

    pub const fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    /// Parse a decimal string ("12.50") in the given currency.
    pub fn parse(input: &str, currency: Currency) -> Result<Self, MoneyError> {
        Ok(Self::new(parse_cents(input)?, currency))
    }

    pub fn cents(&self) -> Cents {
        self.cents
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }

    /// Amounts moved by the engine must be strictly positive.
    pub fn ensure_positive(self) -> Result<Self, MoneyError> {
        if self.is_positive() {
            Ok(self)
        } else {
            Err(MoneyError::NotPositive(self))
        }
    }

    /// Fees may be zero but never negative.
    pub fn ensure_non_negative(self) -> Result<Self, MoneyError> {
        if self.is_negative() {
            Err(MoneyError::Negative(self))
        } else {
            Ok(self)
        }
    }

    pub fn ensure_currency(self, expected: Currency) -> Result<Self, MoneyError> {
        if self.currency == expected {
            Ok(self)
        } else {
            Err(MoneyError::CurrencyMismatch {
                expected,
                found: self.currency,
            })
        }
    }

    pub fn checked_add(self, other: Money) -> Result<Money, MoneyError> {
        other.ensure_currency(self.currency)?;
        self.cents
            .checked_add(other.cents)
            .map(|cents| Money::new(cents, self.currency))
            .ok_or(MoneyError::Overflow)
    }

    pub fn checked_sub(self, other: Money) -> Result<Money, MoneyError> {
        other.ensure_currency(self.currency)?;
        self.cents
            .checked_sub(other.cents)
            .map(|cents| Money::new(cents, self.currency))
            .ok_or(MoneyError::Overflow)
    }

    pub fn checked_neg(self) -> Result<Money, MoneyError> {
        self.cents
            .checked_neg()
            .map(|cents| Money::new(cents, self.currency))
            .ok_or(MoneyError::Overflow)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", format_cents(self.cents), self.currency)
    }
}
