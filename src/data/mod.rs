//! Data layer: quote store, indicator math, error taxonomy, retry policy

pub mod errors;
pub mod indicators;
pub mod quotes;
pub mod retry;

pub use errors::{DataError, DataResult};
pub use quotes::{QuoteBar, QuoteStore};
