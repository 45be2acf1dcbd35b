use crate::{MockTarget, MockTransaction};
use standby_core::{
    BadConnection, Handle, Result, RowLabeled, RowNames, RowsAffected, Statement,
    TransactionOptions, Value,
};
use std::sync::{
    Arc, LazyLock,
    atomic::{AtomicBool, Ordering},
};

static LABELS: LazyLock<RowNames> =
    LazyLock::new(|| ["address".to_string(), "sql".to_string()].into());

/// The row every mock query returns: the address that served it and the statement.
pub(crate) fn answer(address: &str, sql: &str) -> Vec<RowLabeled> {
    vec![RowLabeled::new(
        LABELS.clone(),
        [Value::from(address), Value::from(sql)].into(),
    )]
}

/// Handle to a [`MockTarget`].
#[derive(Debug)]
pub struct MockHandle {
    target: Arc<MockTarget>,
    closed: AtomicBool,
}

impl MockHandle {
    pub(crate) fn new(target: Arc<MockTarget>) -> Self {
        Self {
            target,
            closed: false.into(),
        }
    }

    pub fn target(&self) -> &Arc<MockTarget> {
        &self.target
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn usable(&self) -> Result<()> {
        if self.is_closed() {
            return Err(BadConnection::new("handle is closed").into());
        }
        Ok(())
    }
}

impl Handle for MockHandle {
    type Transaction = MockTransaction;
    type Statement = MockStatement;

    async fn ping(&self) -> Result<()> {
        self.usable()?;
        self.target.ping().await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<RowsAffected> {
        self.usable()?;
        self.target.statement(sql, params)?;
        Ok(RowsAffected {
            rows_affected: 1,
            last_affected_id: None,
        })
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<RowLabeled>> {
        self.usable()?;
        self.target.statement(sql, params)?;
        Ok(answer(self.target.address(), sql))
    }

    async fn prepare(&self, sql: &str) -> Result<MockStatement> {
        self.usable()?;
        self.target.link()?;
        Ok(MockStatement::new(sql, self.target.clone()))
    }

    async fn begin(&self, options: &TransactionOptions) -> Result<MockTransaction> {
        self.usable()?;
        self.target.begin(options)?;
        Ok(MockTransaction::new(self.target.clone()))
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::Relaxed) {
            self.target.closed()?;
        }
        Ok(())
    }
}

/// Statement prepared on a [`MockTarget`], executions reach that target only.
#[derive(Debug)]
pub struct MockStatement {
    sql: String,
    target: Arc<MockTarget>,
}

impl MockStatement {
    pub(crate) fn new(sql: &str, target: Arc<MockTarget>) -> Self {
        Self {
            sql: sql.to_string(),
            target,
        }
    }

    pub fn target(&self) -> &Arc<MockTarget> {
        &self.target
    }
}

impl Statement for MockStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    async fn execute(&self, params: &[Value]) -> Result<RowsAffected> {
        self.target.statement(&self.sql, params)?;
        Ok(RowsAffected {
            rows_affected: 1,
            last_affected_id: None,
        })
    }

    async fn query(&self, params: &[Value]) -> Result<Vec<RowLabeled>> {
        self.target.statement(&self.sql, params)?;
        Ok(answer(self.target.address(), &self.sql))
    }
}
