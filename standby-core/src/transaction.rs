use crate::{
    Connection, Context, Driver, Error, ErrorContext, Handle, Joined, Panicked, Result,
    RowLabeled, RowsAffected, Statement, TransactionError, TransactionHandle, TransactionPhase,
    Value, error::install_panic_hook,
};
use futures::FutureExt;
use std::{
    fmt::{self, Debug, Display, Formatter},
    future::Future,
    panic::AssertUnwindSafe,
    sync::Arc,
};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl Display for IsolationLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Options forwarded to [`Handle::begin`]. `None` isolation uses the backend default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

type TxHandle<D> = <<D as Driver>::Handle as Handle>::Transaction;
type TxStatement<D> = <<D as Driver>::Handle as Handle>::Statement;

struct Slot<D: Driver> {
    handle: Option<TxHandle<D>>,
    state: TransactionState,
}

/// A begun transaction, pinned to the physical connection that began it.
///
/// Obtained inside [`Connection::transact`]. Clones refer to the same transaction, the ones
/// still around after `transact` returned fail on use. Operations are never retried on
/// another connector.
pub struct Transaction<D: Driver> {
    name: Arc<str>,
    slot: Arc<Mutex<Slot<D>>>,
}

impl<D: Driver> Clone for Transaction<D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<D: Driver> Debug for Transaction<D> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<D: Driver> Transaction<D> {
    fn new(name: &str, handle: TxHandle<D>) -> Self {
        Self {
            name: name.into(),
            slot: Arc::new(Mutex::new(Slot {
                handle: Some(handle),
                state: TransactionState::Active,
            })),
        }
    }

    /// The diagnostic name given to [`Connection::transact`].
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> impl Future<Output = TransactionState> + Send {
        async move { self.slot.lock().await.state }
    }

    /// The transaction attached to `ctx` with [`Context::with_transaction`].
    pub fn from_context(ctx: &Context) -> Option<Self> {
        ctx.attached_transaction::<D>().cloned()
    }

    fn active<'a>(&self, slot: &'a mut Slot<D>) -> Result<&'a mut TxHandle<D>> {
        match slot.handle.as_mut() {
            Some(handle) => Ok(handle),
            None => Err(Error::msg(format!(
                "transaction `{}` is finished ({:?})",
                self.name, slot.state
            ))),
        }
    }

    pub fn execute(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<RowsAffected>> + Send {
        async move {
            let mut slot = self.slot.lock().await;
            let handle = self.active(&mut slot)?;
            ctx.run(handle.execute(sql, params))
                .await
                .with_context(|| {
                    format!("While executing in transaction `{}`:\n{}", self.name, sql)
                })
        }
    }

    pub fn query(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<Vec<RowLabeled>>> + Send {
        async move {
            let mut slot = self.slot.lock().await;
            let handle = self.active(&mut slot)?;
            ctx.run(handle.query(sql, params))
                .await
                .with_context(|| format!("While querying in transaction `{}`:\n{}", self.name, sql))
        }
    }

    pub fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Result<Option<RowLabeled>>> + Send {
        async move { Ok(self.query(ctx, sql, params).await?.into_iter().next()) }
    }

    pub fn prepare(
        &self,
        ctx: &Context,
        sql: &str,
    ) -> impl Future<Output = Result<TxStatement<D>>> + Send {
        async move {
            let mut slot = self.slot.lock().await;
            let handle = self.active(&mut slot)?;
            ctx.run(handle.prepare(sql))
                .await
                .with_context(|| {
                    format!("While preparing in transaction `{}`:\n{}", self.name, sql)
                })
        }
    }

    /// Rebinds a statement prepared on the connection to this transaction.
    ///
    /// The returned statement runs on the transaction's physical connection, the original
    /// one stays usable outside of it.
    pub fn statement(
        &self,
        ctx: &Context,
        statement: &TxStatement<D>,
    ) -> impl Future<Output = Result<TxStatement<D>>> + Send {
        async move {
            let mut slot = self.slot.lock().await;
            let handle = self.active(&mut slot)?;
            ctx.run(handle.statement(statement)).await.with_context(|| {
                format!(
                    "While binding to transaction `{}`:\n{}",
                    self.name,
                    statement.sql()
                )
            })
        }
    }

    /// Executes a statement obtained from [`Transaction::prepare`] or
    /// [`Transaction::statement`] under `ctx`.
    pub fn execute_statement(
        &self,
        ctx: &Context,
        statement: &TxStatement<D>,
        params: &[Value],
    ) -> impl Future<Output = Result<RowsAffected>> + Send {
        async move {
            let mut slot = self.slot.lock().await;
            self.active(&mut slot)?;
            ctx.run(statement.execute(params)).await.with_context(|| {
                format!(
                    "While executing in transaction `{}`:\n{}",
                    self.name,
                    statement.sql()
                )
            })
        }
    }

    pub fn query_statement(
        &self,
        ctx: &Context,
        statement: &TxStatement<D>,
        params: &[Value],
    ) -> impl Future<Output = Result<Vec<RowLabeled>>> + Send {
        async move {
            let mut slot = self.slot.lock().await;
            self.active(&mut slot)?;
            ctx.run(statement.query(params)).await.with_context(|| {
                format!(
                    "While querying in transaction `{}`:\n{}",
                    self.name,
                    statement.sql()
                )
            })
        }
    }

    /// A failed commit is terminal, the transaction counts as rolled back by the backend.
    pub(crate) async fn commit(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let handle = slot
            .handle
            .take()
            .ok_or_else(|| Error::msg("transaction already finished"))?;
        let result = handle.commit().await;
        slot.state = if result.is_ok() {
            TransactionState::Committed
        } else {
            TransactionState::RolledBack
        };
        result
    }

    /// Rolls back unless already finished, in which case nothing happens.
    pub(crate) async fn rollback(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let Some(handle) = slot.handle.take() else {
            return Ok(());
        };
        slot.state = TransactionState::RolledBack;
        handle.rollback().await
    }
}

/// Rolls the transaction back in the background when `transact` is dropped mid-work.
struct RollbackOnDrop<D: Driver>(Option<Transaction<D>>);

impl<D: Driver> RollbackOnDrop<D> {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl<D: Driver> Drop for RollbackOnDrop<D> {
    fn drop(&mut self) {
        let Some(transaction) = self.0.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = transaction.rollback().await {
                        log::error!(
                            "Could not roll back abandoned transaction `{}`: {:#}",
                            transaction.name,
                            e
                        );
                    }
                });
            }
            Err(..) => log::error!(
                "Transaction `{}` abandoned outside of a runtime, it will not be rolled back",
                transaction.name
            ),
        }
    }
}

impl<D: Driver> Connection<D> {
    /// Runs `work` inside a transaction and commits it if `work` succeeds.
    ///
    /// Beginning goes through the retry policy, so a bad connection at that point rotates
    /// like any other operation. From then on the transaction is pinned to its physical
    /// connection: nothing inside `work` is retried.
    ///
    /// If `work` returns an error or panics the transaction is rolled back exactly once and
    /// a [`TransactionError`] is returned, untagged for an error and tagged
    /// [`TransactionPhase::Panic`] (wrapping a [`Panicked`]) for a panic. A failing rollback
    /// is joined to that cause. A failing commit is returned tagged
    /// [`TransactionPhase::Commit`] and is not followed by a rollback. `name` only appears
    /// in errors and logs.
    ///
    /// `work` receives its own clone of the transaction:
    ///
    /// ```ignore
    /// connection
    ///     .transact(ctx, "insert", &Default::default(), |tx| async move {
    ///         tx.execute(ctx, "INSERT INTO t VALUES (1)", &[]).await
    ///     })
    ///     .await?;
    /// ```
    pub fn transact<T, F>(
        &self,
        ctx: &Context,
        name: &str,
        options: &TransactionOptions,
        work: impl FnOnce(Transaction<D>) -> F + Send,
    ) -> impl Future<Output = Result<T>> + Send
    where
        F: Future<Output = Result<T>> + Send,
        T: Send,
    {
        async move {
            log::debug!("Beginning transaction `{}`", name);
            let handle = self
                .try_op(ctx, |handle| async move { handle.begin(options).await })
                .await
                .map_err(|e| failed(name, Some(TransactionPhase::Begin), e))?;
            let transaction = Transaction::<D>::new(name, handle);
            let guard = RollbackOnDrop(Some(transaction.clone()));
            install_panic_hook();
            let unit = transaction.clone();
            let outcome = AssertUnwindSafe(async move { work(unit).await })
                .catch_unwind()
                .await;
            guard.disarm();
            self.conclude(name, transaction, outcome).await
        }
    }

    async fn conclude<T>(
        &self,
        name: &str,
        transaction: Transaction<D>,
        outcome: std::thread::Result<Result<T>>,
    ) -> Result<T> {
        let (phase, cause) = match outcome {
            Ok(Ok(value)) => {
                log::debug!("Committing transaction `{}`", name);
                return match transaction.commit().await {
                    Ok(()) => Ok(value),
                    Err(e) => Err(failed(name, Some(TransactionPhase::Commit), e)),
                };
            }
            Ok(Err(e)) => (None, e),
            Err(payload) => {
                let panicked = Panicked::from_payload(payload);
                log::debug!("Transaction `{}` panicked: {}", name, panicked);
                (Some(TransactionPhase::Panic), Error::new(panicked))
            }
        };
        log::debug!("Rolling back transaction `{}`", name);
        let cause = match transaction.rollback().await {
            Ok(()) => cause,
            Err(e) => Error::new(Joined::new([
                cause,
                Error::new(TransactionError::new(
                    name,
                    Some(TransactionPhase::Rollback),
                    e,
                )),
            ])),
        };
        Err(failed(name, phase, cause))
    }
}

fn failed(name: &str, phase: Option<TransactionPhase>, cause: Error) -> Error {
    let error = Error::new(TransactionError::new(name, phase, cause));
    log::error!("{:#}", error);
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_sql() {
        assert_eq!(IsolationLevel::Serializable.as_sql(), "SERIALIZABLE");
        assert_eq!(
            IsolationLevel::ReadUncommitted.to_string(),
            "READ UNCOMMITTED"
        );
        let options = TransactionOptions::default();
        assert_eq!(options.isolation, None);
        assert!(!options.read_only);
    }
}
