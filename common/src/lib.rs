//! WalletLedger Common Types
//!
//! This crate contains shared types used across the wallet ledger,
//! including identifiers, monetary amounts, the error taxonomy and
//! deadline handling.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
