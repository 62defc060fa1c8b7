// Application layer - use cases and orchestration.
// The service owns the per-account exclusive scopes; storage only sees
// fully checked commits.

mod cursor;
pub mod error;
mod locks;
mod service;

pub use cursor::TransactionCursor;
pub use error::*;
pub use service::{LedgerService, OpenAccount};
