use crate::{
    BadConnection, ConnectionBuilder, Connector, Context, Driver, Error, ErrorContext, Handle,
    Result, RetryPolicy, RowLabeled, RowsAffected, Value, driver::Statement,
    state::ConnectionState,
};
use std::{future::Future, time::Duration};

/// Default bound of a liveness check.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_millis(500);

/// Hook applied to every freshly opened handle, for example to tune the driver's pool.
pub type ConfigureFn<H> = Box<dyn Fn(&H) -> Result<()> + Send + Sync>;

/// A failover aware connection over a ranked list of connectors.
///
/// Single shot operations run on the live handle through the [`RetryPolicy`] chosen at
/// construction: with two or more connectors a bad connection makes the operation move to
/// the next reachable connector and run again. Every other failure is returned untouched.
///
/// Transactions are begun the same way, then stay pinned to the physical connection that
/// began them, see [`Connection::transact`].
pub struct Connection<D: Driver> {
    pub(crate) driver: D,
    pub(crate) connectors: Box<[Connector]>,
    pub(crate) configure: Option<ConfigureFn<D::Handle>>,
    pub(crate) ping_timeout: Duration,
    pub(crate) policy: RetryPolicy,
    pub(crate) state: ConnectionState<D::Handle>,
}

impl<D: Driver> Connection<D> {
    pub fn builder(driver: D) -> ConnectionBuilder<D> {
        ConnectionBuilder::new(driver)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// The configured connectors, in rank order.
    pub fn connectors(&self) -> &[Connector] {
        &self.connectors
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// Index of the most recently connected connector, `None` if none ever connected.
    pub async fn mru(&self) -> Option<usize> {
        self.state.mru().await
    }

    /// The connector currently serving the live handle.
    pub async fn current_connector(&self) -> Option<&Connector> {
        self.connectors.get(self.mru().await?)
    }

    pub(crate) async fn ping_handle(&self, ctx: &Context, handle: &D::Handle) -> Result<()> {
        let timeout = self.ping_timeout;
        ctx.run(async move {
            match tokio::time::timeout(timeout, handle.ping()).await {
                Ok(result) => result,
                Err(..) => Err(Error::new(BadConnection::new(format!(
                    "ping did not answer within {:?}",
                    timeout
                )))),
            }
        })
        .await
    }

    /// Verifies the backend is reachable, bounded by the ping timeout.
    ///
    /// A ping that does not answer in time counts as a bad connection.
    pub fn ping(&self, ctx: &Context) -> impl Future<Output = Result<()>> + Send {
        self.try_op(ctx, move |handle| async move { self.ping_handle(ctx, &handle).await })
    }

    /// Executes a statement returning the rows affected.
    pub fn execute(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<RowsAffected>> + Send {
        async move {
            self.try_op(ctx, |handle| async move { handle.execute(sql, params).await })
                .await
                .map_err(|e| {
                    let e = e.context(format!("While executing:\n{}", sql));
                    log::error!("{:#}", e);
                    e
                })
        }
    }

    /// Executes a query returning its rows.
    pub fn query(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<Vec<RowLabeled>>> + Send {
        async move {
            self.try_op(ctx, |handle| async move { handle.query(sql, params).await })
                .await
                .map_err(|e| {
                    let e = e.context(format!("While querying:\n{}", sql));
                    log::error!("{:#}", e);
                    e
                })
        }
    }

    /// Executes a query expected to return at most one row.
    pub fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<Option<RowLabeled>>> + Send {
        async move { Ok(self.query(ctx, sql, params).await?.into_iter().next()) }
    }

    /// Prepares a statement on the live handle.
    ///
    /// Only the preparation is retried; executions of the statement run on the handle
    /// that prepared it. If that handle is lost, prepare the statement again.
    pub fn prepare(
        &self,
        ctx: &Context,
        sql: &str,
    ) -> impl Future<Output = Result<<D::Handle as Handle>::Statement>> + Send {
        async move {
            self.try_op(ctx, |handle| async move { handle.prepare(sql).await })
                .await
                .with_context(|| format!("While preparing:\n{}", sql))
        }
    }

    /// Executes a prepared statement under `ctx`.
    ///
    /// Cancellation and the deadline apply as for every other operation. The statement is
    /// bound to the handle that prepared it, so a bad connection is returned, not retried.
    pub fn execute_statement(
        &self,
        ctx: &Context,
        statement: &<D::Handle as Handle>::Statement,
        params: &[Value],
    ) -> impl Future<Output = Result<RowsAffected>> + Send {
        async move {
            ctx.run(statement.execute(params)).await.map_err(|e| {
                let e = e.context(format!("While executing:\n{}", statement.sql()));
                log::error!("{:#}", e);
                e
            })
        }
    }

    /// Runs a prepared query under `ctx`, like [`Connection::execute_statement`].
    pub fn query_statement(
        &self,
        ctx: &Context,
        statement: &<D::Handle as Handle>::Statement,
        params: &[Value],
    ) -> impl Future<Output = Result<Vec<RowLabeled>>> + Send {
        async move {
            ctx.run(statement.query(params)).await.map_err(|e| {
                let e = e.context(format!("While querying:\n{}", statement.sql()));
                log::error!("{:#}", e);
                e
            })
        }
    }

    /// Replaces the live handle right away.
    ///
    /// With connectors this is a rotation pass starting after the most recently used one.
    /// With an injected handle there is nothing to rotate to, the handle is pinged instead.
    pub fn reconnect(&self, ctx: &Context) -> impl Future<Output = Result<()>> + Send {
        async move {
            if self.connectors.is_empty() {
                return self.ping(ctx).await;
            }
            let generation = self.state.generation().await;
            self.rotate_after(ctx, generation).await
        }
    }

    /// Closes the live handle. Closing an already closed connection does nothing.
    ///
    /// Once closed every operation fails with [`crate::Closed`].
    pub fn close(&self) -> impl Future<Output = Result<()>> + Send {
        async move {
            if let Some(handle) = self.state.close().await {
                handle.close().await.map_err(|e| {
                    let e = e.context("While closing the live handle");
                    log::error!("{:#}", e);
                    e
                })?;
            }
            Ok(())
        }
    }
}
