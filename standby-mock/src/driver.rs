use crate::MockHandle;
use standby_core::{
    BadConnection, Connector, Driver, Error, Result, TransactionOptions, Value,
};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

/// Driver whose handles live in memory. Clones share the same targets.
#[derive(Clone, Default)]
pub struct MockDriver {
    targets: Arc<Mutex<HashMap<String, Arc<MockTarget>>>>,
    attempts: Arc<Mutex<Vec<String>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The target reachable at `address`, created on first use.
    pub fn target(&self, address: &str) -> Arc<MockTarget> {
        lock(&self.targets)
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(MockTarget::new(address)))
            .clone()
    }

    /// Registers the target and returns a connector pointing at it.
    pub fn connector(&self, address: &str) -> Connector {
        self.target(address);
        Connector::new(Self::NAME, address)
    }

    /// An already opened handle to `address`, suitable for injection.
    pub fn handle(&self, address: &str) -> MockHandle {
        MockHandle::new(self.target(address))
    }

    /// Addresses passed to `open`, in call order.
    pub fn open_attempts(&self) -> Vec<String> {
        lock(&self.attempts).clone()
    }

    pub fn clear_open_attempts(&self) {
        lock(&self.attempts).clear();
    }
}

impl Driver for MockDriver {
    type Handle = MockHandle;

    const NAME: &'static str = "mock";

    async fn open(&self, connector: &Connector) -> Result<MockHandle> {
        if connector.driver() != Self::NAME {
            return Err(Error::msg(format!(
                "driver `{}` cannot open connector {}",
                Self::NAME,
                connector
            )));
        }
        lock(&self.attempts).push(connector.address().to_string());
        let target = lock(&self.targets).get(connector.address()).cloned();
        let Some(target) = target else {
            return Err(Error::msg(format!("unknown target `{}`", connector.address())));
        };
        target.opens.fetch_add(1, Ordering::Relaxed);
        if target.refuse_open.load(Ordering::Relaxed) {
            return Err(Error::msg(format!(
                "connection refused by `{}`",
                target.address
            )));
        }
        log::debug!("Opened mock handle to `{}`", target.address);
        Ok(MockHandle::new(target))
    }
}

/// Simulated backend reachable at one address.
///
/// The switches can be flipped at any time, also while a connection is using the target.
#[derive(Debug, Default)]
pub struct MockTarget {
    address: String,
    refuse_open: AtomicBool,
    refuse_ping: AtomicBool,
    ping_delay_ms: AtomicU64,
    broken: AtomicBool,
    break_next: AtomicUsize,
    reject_statements: AtomicBool,
    fail_commit: AtomicBool,
    fail_rollback: AtomicBool,
    fail_close: AtomicBool,
    last_options: Mutex<Option<TransactionOptions>>,
    statements: Mutex<Vec<String>>,
    opens: AtomicUsize,
    pings: AtomicUsize,
    executions: AtomicUsize,
    begins: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    closes: AtomicUsize,
}

impl MockTarget {
    fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            ..Default::default()
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Fail every `open` with a non retryable error.
    pub fn refuse_open(&self, value: bool) -> &Self {
        self.refuse_open.store(value, Ordering::Relaxed);
        self
    }

    /// Fail every ping with a bad connection.
    pub fn refuse_ping(&self, value: bool) -> &Self {
        self.refuse_ping.store(value, Ordering::Relaxed);
        self
    }

    /// Delay every ping, used to trigger the ping timeout.
    pub fn ping_delay(&self, delay: Duration) -> &Self {
        self.ping_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
        self
    }

    /// Fail every statement and begin with a bad connection.
    pub fn broken(&self, value: bool) -> &Self {
        self.broken.store(value, Ordering::Relaxed);
        self
    }

    /// Fail the next `count` statements or begins with a bad connection.
    pub fn break_next(&self, count: usize) -> &Self {
        self.break_next.store(count, Ordering::Relaxed);
        self
    }

    /// Fail every statement with a non retryable error.
    pub fn reject_statements(&self, value: bool) -> &Self {
        self.reject_statements.store(value, Ordering::Relaxed);
        self
    }

    pub fn fail_commit(&self, value: bool) -> &Self {
        self.fail_commit.store(value, Ordering::Relaxed);
        self
    }

    pub fn fail_rollback(&self, value: bool) -> &Self {
        self.fail_rollback.store(value, Ordering::Relaxed);
        self
    }

    /// Fail every close, after the handle is marked closed.
    pub fn fail_close(&self, value: bool) -> &Self {
        self.fail_close.store(value, Ordering::Relaxed);
        self
    }

    /// Options of the last transaction begun on this target.
    pub fn last_options(&self) -> Option<TransactionOptions> {
        *lock(&self.last_options)
    }

    /// Every statement that reached this target, in execution order.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    /// Handles opened.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }

    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::Relaxed)
    }

    /// Statements attempted, including the failed ones.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::Relaxed)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }

    pub(crate) fn closed(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::Relaxed);
        if self.fail_close.load(Ordering::Relaxed) {
            return Err(Error::msg(format!("`{}` failed to close", self.address)));
        }
        Ok(())
    }

    pub(crate) async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::Relaxed);
        let delay = self.ping_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.refuse_ping.load(Ordering::Relaxed) {
            return Err(BadConnection::new(format!("`{}` does not answer", self.address)).into());
        }
        Ok(())
    }

    /// Failure injected into the next link level call, if any.
    pub(crate) fn link(&self) -> Result<()> {
        let scheduled = self
            .break_next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1))
            .is_ok();
        if scheduled || self.broken.load(Ordering::Relaxed) {
            return Err(
                BadConnection::new(format!("connection to `{}` reset", self.address)).into(),
            );
        }
        Ok(())
    }

    pub(crate) fn statement(&self, sql: &str, params: &[Value]) -> Result<()> {
        self.executions.fetch_add(1, Ordering::Relaxed);
        self.link()?;
        if self.reject_statements.load(Ordering::Relaxed) {
            return Err(Error::msg(format!("syntax error at or near `{}`", sql)));
        }
        log::debug!(
            "`{}` runs `{}` with {} parameters",
            self.address,
            sql,
            params.len()
        );
        lock(&self.statements).push(sql.to_string());
        Ok(())
    }

    pub(crate) fn begin(&self, options: &TransactionOptions) -> Result<()> {
        self.begins.fetch_add(1, Ordering::Relaxed);
        self.link()?;
        *lock(&self.last_options) = Some(*options);
        Ok(())
    }

    pub(crate) fn commit(&self) -> Result<()> {
        self.commits.fetch_add(1, Ordering::Relaxed);
        if self.fail_commit.load(Ordering::Relaxed) {
            return Err(Error::msg(format!("`{}` lost the commit", self.address)));
        }
        Ok(())
    }

    pub(crate) fn rollback(&self) -> Result<()> {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
        if self.fail_rollback.load(Ordering::Relaxed) {
            return Err(Error::msg(format!("`{}` refused the rollback", self.address)));
        }
        Ok(())
    }
}
