//! Scriptable in-memory driver.
//!
//! Every address is a [`MockTarget`] whose failures are switched on and off by the test
//! and whose counters record what the connection did with it.

mod driver;
mod handle;
mod transaction;

pub use driver::*;
pub use handle::*;
pub use transaction::*;
