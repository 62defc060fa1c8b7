use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};

use super::{
    Account, AccountId, Currency, Direction, Money, MoneyError, Transaction, TransactionKind,
};

/// Calendar used for daily limits and statement boundaries.
///
/// Days are cut at midnight of a fixed UTC offset taken from configuration,
/// never the host's local time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitWindow {
    offset: FixedOffset,
}

impl Default for LimitWindow {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }
}

/// Outcome of evaluating a limited movement against its daily ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitCheck {
    pub kind: TransactionKind,
    pub limit: Money,
    pub used: Money,
    pub requested: Money,
}

impl LimitCheck {
    /// True iff `used + requested > limit`.
    pub fn exceeded(&self) -> Result<bool, MoneyError> {
        let total = self.used.checked_add(self.requested)?;
        let limit = self.limit.ensure_currency(total.currency())?;
        Ok(total.cents() > limit.cents())
    }
}

impl LimitWindow {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Offset east of UTC in minutes; `None` when out of range (more than a day).
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(Self::new)
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Calendar date of `instant` in the reference offset.
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// Midnight at the start of `date` in the reference offset, as a UTC instant.
    pub fn start_of(&self, date: NaiveDate) -> DateTime<Utc> {
        let local_midnight = date.and_time(NaiveTime::MIN);
        (local_midnight - Duration::seconds(self.offset.local_minus_utc().into())).and_utc()
    }

    /// `[start, end)` of the calendar day containing `as_of`.
    pub fn day_bounds(&self, as_of: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start_of(self.date_of(as_of));
        (start, start + Duration::days(1))
    }

    /// Sum of completed, non-reversal `kind` movements debiting `account`
    /// during the calendar day containing `as_of`.
    pub fn daily_total(
        &self,
        history: &[Transaction],
        account: AccountId,
        kind: TransactionKind,
        as_of: DateTime<Utc>,
        currency: Currency,
    ) -> Result<Money, MoneyError> {
        let (start, end) = self.day_bounds(as_of);
        history
            .iter()
            .filter(|tx| tx.created_at >= start && tx.created_at < end)
            .filter(|tx| counts_toward_limit(tx, account, kind))
            .try_fold(Money::zero(currency), |total, tx| {
                total.checked_add(tx.amount)
            })
    }

    /// Evaluate a `kind` movement of `requested` on `account`. Returns `None`
    /// for kinds that are never limited.
    pub fn evaluate(
        &self,
        account: &Account,
        kind: TransactionKind,
        requested: Money,
        history: &[Transaction],
        as_of: DateTime<Utc>,
    ) -> Result<Option<LimitCheck>, MoneyError> {
        let Some(limit) = daily_limit(account, kind) else {
            return Ok(None);
        };
        let used = self.daily_total(history, account.id, kind, as_of, limit.currency())?;
        Ok(Some(LimitCheck {
            kind,
            limit,
            used,
            requested,
        }))
    }
}

/// Daily ceiling for `kind` on `account`. Only withdrawals and transfers are limited.
pub fn daily_limit(account: &Account, kind: TransactionKind) -> Option<Money> {
    match kind {
        TransactionKind::Withdrawal => Some(account.daily_withdrawal_limit),
        TransactionKind::Transfer => Some(account.daily_transfer_limit),
        _ => None,
    }
}

fn counts_toward_limit(tx: &Transaction, account: AccountId, kind: TransactionKind) -> bool {
    tx.is_completed()
        && !tx.is_reversal()
        && tx.kind() == kind
        && tx.movement.direction_for(account) == Some(Direction::Debit)
}
