// Input/Output module for exporting ledger data

pub mod export;

pub use export::*;
