mod account;
mod clock;
mod ledger;
mod limits;
mod money;
mod statement;
mod transaction;

pub use account::*;
pub use clock::*;
pub use ledger::*;
pub use limits::*;
pub use money::*;
pub use statement::*;
pub use transaction::*;
