use crate::{Connector, Result, RowLabeled, RowsAffected, TransactionOptions, Value};
use std::future::Future;

/// Entry point of a backend implementation: opens handles for connectors.
///
/// A failure that a fresh handle could fix must carry a [`crate::BadConnection`] among its
/// causes, every other failure is returned to the caller untouched.
pub trait Driver: Send + Sync + 'static {
    type Handle: Handle;

    /// Identifier matched against [`Connector::driver`].
    const NAME: &'static str;

    /// Open a handle to the target described by `connector`.
    ///
    /// Opening does not need to reach the backend: liveness is verified separately with
    /// [`Handle::ping`].
    fn open(&self, connector: &Connector) -> impl Future<Output = Result<Self::Handle>> + Send;
}

/// A driver level handle. It may pool physical connections internally.
pub trait Handle: Send + Sync + 'static {
    type Transaction: TransactionHandle<Statement = Self::Statement>;
    type Statement: Statement;

    fn ping(&self) -> impl Future<Output = Result<()>> + Send;

    /// Execute a statement and return the total number of rows affected.
    fn execute(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<RowsAffected>> + Send;

    /// Execute a query and return the rows.
    fn query(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<Vec<RowLabeled>>> + Send;

    fn prepare(&self, sql: &str) -> impl Future<Output = Result<Self::Statement>> + Send;

    /// Begin a transaction pinned to one physical connection of this handle.
    fn begin(
        &self,
        options: &TransactionOptions,
    ) -> impl Future<Output = Result<Self::Transaction>> + Send;

    fn close(&self) -> impl Future<Output = Result<()>> + Send;
}

/// A begun, not yet terminated transaction.
pub trait TransactionHandle: Send + 'static {
    type Statement: Statement;

    fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<RowsAffected>> + Send;

    fn query(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<Vec<RowLabeled>>> + Send;

    fn prepare(&mut self, sql: &str) -> impl Future<Output = Result<Self::Statement>> + Send;

    /// Transaction specific version of a statement prepared on the handle, running on
    /// this transaction's connection.
    fn statement(
        &mut self,
        statement: &Self::Statement,
    ) -> impl Future<Output = Result<Self::Statement>> + Send;

    fn commit(self) -> impl Future<Output = Result<()>> + Send;

    fn rollback(self) -> impl Future<Output = Result<()>> + Send;
}

/// A prepared statement. Executions are never retried on another connector.
///
/// Run it through [`crate::Connection::execute_statement`] or
/// [`crate::Transaction::execute_statement`] to have the caller's context apply.
pub trait Statement: Send + Sync + 'static {
    fn sql(&self) -> &str;

    fn execute(&self, params: &[Value]) -> impl Future<Output = Result<RowsAffected>> + Send;

    fn query(&self, params: &[Value]) -> impl Future<Output = Result<Vec<RowLabeled>>> + Send;
}
