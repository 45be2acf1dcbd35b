mod configuration;
mod connection;
mod connector;
mod context;
mod driver;
mod error;
mod retry;
mod rotation;
mod state;
mod transaction;
mod value;

pub use ::anyhow::Context as ErrorContext;
pub use configuration::*;
pub use connection::*;
pub use connector::*;
pub use context::*;
pub use driver::*;
pub use error::*;
pub use retry::*;
pub use transaction::*;
pub use value::*;
pub use ::tokio_util::sync::CancellationToken;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
