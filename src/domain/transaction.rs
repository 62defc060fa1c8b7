use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{AccountId, Money, MoneyError};

/// Globally unique transaction identifier: `TXN` followed by 12 upper-case hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("TXN{}", hex[..12].to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
    Payment,
    Fee,
    Interest,
    Refund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Transfer => "transfer",
            TransactionKind::Payment => "payment",
            TransactionKind::Fee => "fee",
            TransactionKind::Interest => "interest",
            TransactionKind::Refund => "refund",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "deposit" => Some(TransactionKind::Deposit),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            "transfer" => Some(TransactionKind::Transfer),
            "payment" => Some(TransactionKind::Payment),
            "fee" => Some(TransactionKind::Fee),
            "interest" => Some(TransactionKind::Interest),
            "refund" => Some(TransactionKind::Refund),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Reversed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Reversed => "reversed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            "cancelled" => Some(TransactionStatus::Cancelled),
            "reversed" => Some(TransactionStatus::Reversed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MovementError {
    #[error("cannot transfer from account {0} to itself")]
    SelfTransfer(AccountId),

    #[error("{0} movements need a single account")]
    SingleAccountRequired(TransactionKind),

    #[error("transfers need a source and a destination account")]
    TransferAccountsRequired,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReversalError {
    #[error("transaction {0} is itself a reversal and cannot be reversed")]
    ReversalOfReversal(TransactionId),

    #[error("transaction {id} is {status}, only completed transactions can be reversed")]
    NotCompleted {
        id: TransactionId,
        status: TransactionStatus,
    },
}

/// Which way money moves for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn inverse(self) -> Self {
        match self {
            Direction::Credit => Direction::Debit,
            Direction::Debit => Direction::Credit,
        }
    }
}

/// Source and destination of a transfer. Always two distinct accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RouteParts")]
pub struct TransferRoute {
    from: AccountId,
    to: AccountId,
}

#[derive(Deserialize)]
struct RouteParts {
    from: AccountId,
    to: AccountId,
}

impl TryFrom<RouteParts> for TransferRoute {
    type Error = MovementError;

    fn try_from(parts: RouteParts) -> Result<Self, Self::Error> {
        TransferRoute::new(parts.from, parts.to)
    }
}

impl TransferRoute {
    pub fn new(from: AccountId, to: AccountId) -> Result<Self, MovementError> {
        if from == to {
            return Err(MovementError::SelfTransfer(from));
        }
        Ok(Self { from, to })
    }

    pub fn from(&self) -> AccountId {
        self.from
    }

    pub fn to(&self) -> AccountId {
        self.to
    }
}

/// What a transaction does, with exactly the account references its kind needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Movement {
    Deposit { account: AccountId },
    Withdrawal { account: AccountId },
    Transfer(TransferRoute),
    Payment { account: AccountId },
    Fee { account: AccountId },
    Interest { account: AccountId },
    Refund { account: AccountId },
}

impl Movement {
    pub fn single(kind: TransactionKind, account: AccountId) -> Result<Self, MovementError> {
        Ok(match kind {
            TransactionKind::Deposit => Movement::Deposit { account },
            TransactionKind::Withdrawal => Movement::Withdrawal { account },
            TransactionKind::Payment => Movement::Payment { account },
            TransactionKind::Fee => Movement::Fee { account },
            TransactionKind::Interest => Movement::Interest { account },
            TransactionKind::Refund => Movement::Refund { account },
            TransactionKind::Transfer => return Err(MovementError::TransferAccountsRequired),
        })
    }

    pub fn transfer(from: AccountId, to: AccountId) -> Result<Self, MovementError> {
        Ok(Movement::Transfer(TransferRoute::new(from, to)?))
    }

    /// Rebuild a movement from its flattened storage columns.
    pub fn from_parts(
        kind: TransactionKind,
        account: AccountId,
        from: Option<AccountId>,
        to: Option<AccountId>,
    ) -> Result<Self, MovementError> {
        match (kind, from, to) {
            (TransactionKind::Transfer, Some(from), Some(to)) => Movement::transfer(from, to),
            (TransactionKind::Transfer, _, _) => Err(MovementError::TransferAccountsRequired),
            (kind, None, None) => Movement::single(kind, account),
            (kind, _, _) => Err(MovementError::SingleAccountRequired(kind)),
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            Movement::Deposit { .. } => TransactionKind::Deposit,
            Movement::Withdrawal { .. } => TransactionKind::Withdrawal,
            Movement::Transfer(_) => TransactionKind::Transfer,
            Movement::Payment { .. } => TransactionKind::Payment,
            Movement::Fee { .. } => TransactionKind::Fee,
            Movement::Interest { .. } => TransactionKind::Interest,
            Movement::Refund { .. } => TransactionKind::Refund,
        }
    }

    /// The account the record belongs to; the source for transfers.
    pub fn primary_account(&self) -> AccountId {
        match self {
            Movement::Transfer(route) => route.from,
            Movement::Deposit { account }
            | Movement::Withdrawal { account }
            | Movement::Payment { account }
            | Movement::Fee { account }
            | Movement::Interest { account }
            | Movement::Refund { account } => *account,
        }
    }

    pub fn route(&self) -> Option<TransferRoute> {
        match self {
            Movement::Transfer(route) => Some(*route),
            _ => None,
        }
    }

    pub fn involves(&self, account: AccountId) -> bool {
        self.direction_for(account).is_some()
    }

    pub fn direction_for(&self, account: AccountId) -> Option<Direction> {
        match self {
            Movement::Transfer(route) if route.from == account => Some(Direction::Debit),
            Movement::Transfer(route) if route.to == account => Some(Direction::Credit),
            Movement::Transfer(_) => None,
            Movement::Deposit { account: a }
            | Movement::Interest { account: a }
            | Movement::Refund { account: a }
                if *a == account =>
            {
                Some(Direction::Credit)
            }
            Movement::Withdrawal { account: a }
            | Movement::Payment { account: a }
            | Movement::Fee { account: a }
                if *a == account =>
            {
                Some(Direction::Debit)
            }
            _ => None,
        }
    }
}

/// A single ledger fact. Completed transactions are never edited; corrections
/// are new transactions that point at the original through `reverses`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Monotonically increasing sequence number, assigned by the store
    pub sequence: i64,
    pub movement: Movement,
    pub status: TransactionStatus,
    /// Always positive
    pub amount: Money,
    /// Never negative, charged to the primary account
    pub fee: Money,
    pub description: Option<String>,
    /// External reference (teller slip, payment order number, etc.)
    pub reference: Option<String>,
    /// If this transaction is a reversal, points to the original transaction
    pub reverses: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a pending transaction. Sequence number is assigned by the store.
    pub fn new(
        movement: Movement,
        amount: Money,
        created_at: DateTime<Utc>,
    ) -> Result<Self, MoneyError> {
        let amount = amount.ensure_positive()?;
        Ok(Self {
            id: TransactionId::generate(),
            sequence: 0,
            movement,
            status: TransactionStatus::Pending,
            amount,
            fee: Money::zero(amount.currency()),
            description: None,
            reference: None,
            reverses: None,
            created_at,
            processed_at: None,
            settled_at: None,
        })
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.reference = reference;
        self
    }

    pub fn with_fee(mut self, fee: Money) -> Result<Self, MoneyError> {
        self.fee = fee.ensure_currency(self.amount.currency())?.ensure_non_negative()?;
        Ok(self)
    }

    pub fn with_reverses(mut self, original_id: TransactionId) -> Self {
        self.reverses = Some(original_id);
        self
    }

    /// Mark the transaction completed and processed at `at`.
    pub fn complete(mut self, at: DateTime<Utc>) -> Self {
        self.status = TransactionStatus::Completed;
        self.processed_at = Some(at);
        self
    }

    pub fn kind(&self) -> TransactionKind {
        self.movement.kind()
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransactionStatus::Completed
    }

    /// Returns true if this transaction is a reversal of another transaction
    pub fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }

    pub fn involves(&self, account: AccountId) -> bool {
        self.movement.involves(account)
    }

    /// Direction of this record for `account`, inverted for reversals.
    pub fn direction_for(&self, account: AccountId) -> Option<Direction> {
        let direction = self.movement.direction_for(account)?;
        Some(if self.is_reversal() {
            direction.inverse()
        } else {
            direction
        })
    }

    /// Signed change this transaction made to `account`'s balance.
    pub fn effect_on(&self, account: AccountId) -> Result<Money, MoneyError> {
        let zero = Money::zero(self.amount.currency());
        if !self.is_completed() {
            return Ok(zero);
        }

        let moved = match self.direction_for(account) {
            Some(Direction::Credit) => self.amount,
            Some(Direction::Debit) => self.amount.checked_neg()?,
            None => zero,
        };

        if self.movement.primary_account() == account {
            moved.checked_sub(self.fee)
        } else {
            Ok(moved)
        }
    }

    /// Build the compensating transaction for this one. It carries the same
    /// movement and amount; its effect is inverted through `reverses`.
    pub fn create_reversal(&self, at: DateTime<Utc>) -> Result<Self, ReversalError> {
        if self.is_reversal() {
            return Err(ReversalError::ReversalOfReversal(self.id.clone()));
        }
        if !self.is_completed() {
            return Err(ReversalError::NotCompleted {
                id: self.id.clone(),
                status: self.status,
            });
        }

        Ok(Self {
            id: TransactionId::generate(),
            sequence: 0,
            movement: self.movement,
            status: TransactionStatus::Pending,
            amount: self.amount,
            fee: Money::zero(self.amount.currency()),
            description: Some(format!(
                "Reversal of: {}",
                self.description.as_deref().unwrap_or("(no description)")
            )),
            reference: self.reference.clone(),
            reverses: Some(self.id.clone()),
            created_at: at,
            processed_at: None,
            settled_at: None,
        })
    }
}
