use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    Account, AccountId, Currency, LimitWindow, Money, MoneyError, Transaction, TransactionKind,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("statement period start {start} must be before end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("statement period of {days} days exceeds the maximum of {max} days")]
    RangeTooLong { days: i64, max: i64 },
}

/// Half-open statement period `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementPeriod {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Midnight of `start_date` in the reference offset
    pub start: DateTime<Utc>,
    /// Midnight of `end_date` in the reference offset
    pub end: DateTime<Utc>,
}

impl StatementPeriod {
    pub fn new(
        start_date: NaiveDate,
        end_date: NaiveDate,
        window: &LimitWindow,
        max_days: i64,
    ) -> Result<Self, PeriodError> {
        if start_date >= end_date {
            return Err(PeriodError::InvalidRange {
                start: start_date,
                end: end_date,
            });
        }
        let days = (end_date - start_date).num_days();
        if days > max_days {
            return Err(PeriodError::RangeTooLong {
                days,
                max: max_days,
            });
        }
        Ok(Self {
            start_date,
            end_date,
            start: window.start_of(start_date),
            end: window.start_of(end_date),
        })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// Statement numbers identify one account and one period.
pub fn statement_number(account_number: &str, period: &StatementPeriod) -> String {
    format!(
        "STMT{}{}{}",
        account_number,
        period.start_date.format("%Y%m%d"),
        period.end_date.format("%Y%m%d")
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub statement_number: String,
    pub account_id: AccountId,
    pub account_number: String,
    pub period: StatementPeriod,
    pub currency: Currency,

    pub opening_balance: Money,
    pub closing_balance: Money,

    pub total_deposits: Money,
    pub total_withdrawals: Money,
    pub total_transfers_in: Money,
    pub total_transfers_out: Money,
    pub total_fees: Money,
    pub total_interest: Money,
    pub net_change: Money,

    pub transaction_count: u32,
    pub deposits_count: u32,
    pub withdrawals_count: u32,

    pub generated_at: DateTime<Utc>,
}

impl Statement {
    /// Aggregate the completed records of `history` that touch `account` and
    /// fall inside `period`. `opening` is the replayed balance at `period.start`.
    pub fn aggregate(
        account: &Account,
        period: StatementPeriod,
        opening: Money,
        history: &[Transaction],
        generated_at: DateTime<Utc>,
    ) -> Result<Self, MoneyError> {
        let zero = Money::zero(account.currency);
        let mut statement = Self {
            statement_number: statement_number(&account.account_number, &period),
            account_id: account.id,
            account_number: account.account_number.clone(),
            period,
            currency: account.currency,
            opening_balance: opening.ensure_currency(account.currency)?,
            closing_balance: opening,
            total_deposits: zero,
            total_withdrawals: zero,
            total_transfers_in: zero,
            total_transfers_out: zero,
            total_fees: zero,
            total_interest: zero,
            net_change: zero,
            transaction_count: 0,
            deposits_count: 0,
            withdrawals_count: 0,
            generated_at,
        };

        for tx in history.iter().filter(|tx| {
            tx.is_completed() && tx.involves(account.id) && period.contains(tx.created_at)
        }) {
            statement.add(account.id, tx)?;
        }

        statement.net_change = statement
            .total_deposits
            .checked_add(statement.total_transfers_in)?
            .checked_add(statement.total_interest)?
            .checked_sub(statement.total_withdrawals)?
            .checked_sub(statement.total_transfers_out)?
            .checked_sub(statement.total_fees)?;
        statement.closing_balance = statement.opening_balance.checked_add(statement.net_change)?;
        Ok(statement)
    }

    fn add(&mut self, account: AccountId, tx: &Transaction) -> Result<(), MoneyError> {
        self.transaction_count += 1;

        // Reversals subtract from the bucket of the kind they compensate
        let amount = if tx.is_reversal() {
            tx.amount.checked_neg()?
        } else {
            tx.amount
        };

        let bucket = match tx.kind() {
            TransactionKind::Deposit | TransactionKind::Refund => {
                if !tx.is_reversal() {
                    self.deposits_count += 1;
                }
                &mut self.total_deposits
            }
            TransactionKind::Withdrawal | TransactionKind::Payment => {
                if !tx.is_reversal() {
                    self.withdrawals_count += 1;
                }
                &mut self.total_withdrawals
            }
            TransactionKind::Transfer => match tx.movement.route() {
                Some(route) if route.from() == account => &mut self.total_transfers_out,
                _ => &mut self.total_transfers_in,
            },
            TransactionKind::Fee => &mut self.total_fees,
            TransactionKind::Interest => &mut self.total_interest,
        };
        *bucket = bucket.checked_add(amount)?;

        if tx.movement.primary_account() == account && !tx.fee.is_zero() {
            self.total_fees = self.total_fees.checked_add(tx.fee)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    use super::*;
    use crate::domain::{AccountType, Movement};

    fn usd(cents: i64) -> Money {
        Money::new(cents, Currency::USD)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn account() -> Account {
        Account::new(
            "1234567890".into(),
            "021000021".into(),
            AccountType::Checking,
            Currency::USD,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    fn completed(movement: Movement, cents: i64, when: DateTime<Utc>) -> Transaction {
        Transaction::new(movement, usd(cents), when)
            .unwrap()
            .complete(when)
    }

    fn january() -> StatementPeriod {
        StatementPeriod::new(date(2024, 1, 1), date(2024, 2, 1), &LimitWindow::default(), 365)
            .unwrap()
    }

    #[test]
    fn test_period_validation() {
        let window = LimitWindow::default();
        assert_eq!(
            StatementPeriod::new(date(2024, 2, 1), date(2024, 1, 1), &window, 365),
            Err(PeriodError::InvalidRange {
                start: date(2024, 2, 1),
                end: date(2024, 1, 1)
            })
        );
        assert!(matches!(
            StatementPeriod::new(date(2024, 1, 1), date(2024, 1, 1), &window, 365),
            Err(PeriodError::InvalidRange { .. })
        ));
        // 2024 is a leap year: 366 days
        assert_eq!(
            StatementPeriod::new(date(2024, 1, 1), date(2025, 1, 1), &window, 365),
            Err(PeriodError::RangeTooLong { days: 366, max: 365 })
        );
        assert!(StatementPeriod::new(date(2023, 1, 1), date(2024, 1, 1), &window, 365).is_ok());
    }

    #[test]
    fn test_period_bounds_follow_offset() {
        let window = LimitWindow::from_offset_minutes(-300).unwrap();
        let period =
            StatementPeriod::new(date(2024, 1, 1), date(2024, 1, 2), &window, 365).unwrap();
        assert_eq!(period.start, Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap());
        assert_eq!(period.end, Utc.with_ymd_and_hms(2024, 1, 2, 5, 0, 0).unwrap());
    }

    #[test]
    fn test_statement_number() {
        assert_eq!(
            statement_number("1234567890", &january()),
            "STMT12345678902024010120240201"
        );
    }

    #[test]
    fn test_deposits_withdrawals_and_fees() {
        let acc = account();
        let period = january();
        let day = period.start + Duration::days(3);

        let history = vec![
            completed(Movement::Deposit { account: acc.id }, 20_000, day),
            completed(Movement::Withdrawal { account: acc.id }, 5_000, day),
            completed(Movement::Fee { account: acc.id }, 500, day),
        ];

        let opening = usd(1_000);
        let stmt = Statement::aggregate(&acc, period, opening, &history, day).unwrap();

        assert_eq!(stmt.total_deposits, usd(20_000));
        assert_eq!(stmt.total_withdrawals, usd(5_000));
        assert_eq!(stmt.total_fees, usd(500));
        assert_eq!(stmt.net_change, usd(14_500));
        assert_eq!(stmt.closing_balance, usd(15_500));
        assert_eq!(stmt.transaction_count, 3);
        assert_eq!(stmt.deposits_count, 1);
        assert_eq!(stmt.withdrawals_count, 1);
    }

    #[test]
    fn test_transfers_and_fee_fields() {
        let acc = account();
        let other = Uuid::new_v4();
        let period = january();
        let day = period.start + Duration::days(10);

        let outgoing = Transaction::new(Movement::transfer(acc.id, other).unwrap(), usd(3_000), day)
            .unwrap()
            .with_fee(usd(150))
            .unwrap()
            .complete(day);
        // fee on the other side's record is not ours
        let incoming = Transaction::new(Movement::transfer(other, acc.id).unwrap(), usd(1_000), day)
            .unwrap()
            .with_fee(usd(99))
            .unwrap()
            .complete(day);

        let stmt =
            Statement::aggregate(&acc, period, usd(0), &[outgoing, incoming], day).unwrap();
        assert_eq!(stmt.total_transfers_out, usd(3_000));
        assert_eq!(stmt.total_transfers_in, usd(1_000));
        assert_eq!(stmt.total_fees, usd(150));
        assert_eq!(stmt.net_change, usd(-2_150));
    }

    #[test]
    fn test_reversal_subtracts_from_original_bucket() {
        let acc = account();
        let period = january();
        let day = period.start + Duration::days(1);

        let deposit = completed(Movement::Deposit { account: acc.id }, 10_000, day);
        let reversal = deposit
            .create_reversal(day + Duration::hours(1))
            .unwrap()
            .complete(day + Duration::hours(1));

        let stmt = Statement::aggregate(&acc, period, usd(0), &[deposit, reversal], day).unwrap();
        assert_eq!(stmt.total_deposits, usd(0));
        assert_eq!(stmt.net_change, usd(0));
        assert_eq!(stmt.transaction_count, 2);
        assert_eq!(stmt.deposits_count, 1);
    }

    #[test]
    fn test_excludes_out_of_period_and_pending() {
        let acc = account();
        let period = january();

        let history = vec![
            completed(
                Movement::Deposit { account: acc.id },
                100,
                period.start - Duration::seconds(1),
            ),
            completed(Movement::Deposit { account: acc.id }, 200, period.start),
            completed(Movement::Deposit { account: acc.id }, 400, period.end),
            Transaction::new(Movement::Deposit { account: acc.id }, usd(800), period.start)
                .unwrap(),
            completed(Movement::Deposit { account: Uuid::new_v4() }, 1_600, period.start),
        ];

        let stmt = Statement::aggregate(&acc, period, usd(0), &history, period.end).unwrap();
        assert_eq!(stmt.total_deposits, usd(200));
        assert_eq!(stmt.transaction_count, 1);
    }
}
