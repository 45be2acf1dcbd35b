use crate::{MockStatement, MockTarget, handle::answer};
use standby_core::{Result, RowLabeled, RowsAffected, Statement, TransactionHandle, Value};
use std::sync::Arc;

/// Transaction begun on a [`MockTarget`].
#[derive(Debug)]
pub struct MockTransaction {
    target: Arc<MockTarget>,
    statements: usize,
}

impl MockTransaction {
    pub(crate) fn new(target: Arc<MockTarget>) -> Self {
        Self {
            target,
            statements: 0,
        }
    }
}

impl TransactionHandle for MockTransaction {
    type Statement = MockStatement;

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<RowsAffected> {
        self.target.statement(sql, params)?;
        self.statements += 1;
        Ok(RowsAffected {
            rows_affected: 1,
            last_affected_id: Some(self.statements as i64),
        })
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<RowLabeled>> {
        self.target.statement(sql, params)?;
        self.statements += 1;
        Ok(answer(self.target.address(), sql))
    }

    async fn prepare(&mut self, sql: &str) -> Result<MockStatement> {
        self.target.link()?;
        Ok(MockStatement::new(sql, self.target.clone()))
    }

    async fn statement(&mut self, statement: &MockStatement) -> Result<MockStatement> {
        self.target.link()?;
        Ok(MockStatement::new(statement.sql(), self.target.clone()))
    }

    async fn commit(self) -> Result<()> {
        self.target.commit()
    }

    async fn rollback(self) -> Result<()> {
        self.target.rollback()
    }
}
