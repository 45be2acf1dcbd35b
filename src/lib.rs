//! Connection failover across ranked connectors and panic safe transactions on top of any
//! SQL driver implementing [`Driver`].

pub use standby_core::*;
