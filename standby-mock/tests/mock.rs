#[cfg(test)]
mod tests {
    use standby_core::{
        BadConnection, Connector, Driver, Handle, Statement, TransactionHandle,
        TransactionOptions, Value, find, is_bad_connection,
    };
    use standby_mock::MockDriver;
    use standby_tests::{execute_tests, init_logs};

    #[tokio::test]
    async fn mock() {
        init_logs();
        let driver = MockDriver::new();
        let reachable = driver.connector("primary");
        let unreachable = driver.connector("down");
        driver.target("down").refuse_open(true);
        execute_tests(driver, reachable, unreachable).await;
    }

    #[tokio::test]
    async fn scripted_failures() {
        init_logs();
        let driver = MockDriver::new();
        let target = driver.target("db");
        let handle = driver
            .open(&driver.connector("db"))
            .await
            .expect("Could not open the mock target");
        handle.ping().await.expect("Ping should succeed");

        target.break_next(1);
        let error = handle.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(is_bad_connection(&error));
        handle
            .execute("SELECT 1", &[])
            .await
            .expect("Only one failure was scheduled");

        target.reject_statements(true);
        let error = handle.query("SELEC 1", &[]).await.unwrap_err();
        assert!(!is_bad_connection(&error));
        target.reject_statements(false);

        target.refuse_ping(true);
        assert!(find::<BadConnection>(&handle.ping().await.unwrap_err()).is_some());

        target.fail_close(true);
        assert!(handle.close().await.is_err());
        handle.close().await.unwrap();
        assert_eq!(target.closes(), 1);
        assert!(is_bad_connection(
            &handle.execute("SELECT 1", &[]).await.unwrap_err()
        ));
        assert_eq!(target.opens(), 1);
        assert_eq!(target.executions(), 3);
    }

    #[tokio::test]
    async fn rows_and_statements() {
        let driver = MockDriver::new();
        let handle = driver.handle("replica");
        let rows = handle.query("SELECT name", &[Value::from(1)]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].get_column("address").and_then(Value::as_str),
            Some("replica")
        );
        let statement = handle.prepare("SELECT 2").await.unwrap();
        assert_eq!(statement.sql(), "SELECT 2");
        statement.execute(&[]).await.unwrap();
        assert_eq!(
            driver.target("replica").statements(),
            ["SELECT name", "SELECT 2"]
        );
    }

    #[tokio::test]
    async fn transactions() {
        let driver = MockDriver::new();
        let target = driver.target("db");
        let handle = driver.handle("db");
        let options = TransactionOptions {
            read_only: true,
            ..Default::default()
        };
        let mut transaction = handle.begin(&options).await.unwrap();
        assert_eq!(target.last_options(), Some(options));
        transaction.execute("INSERT 1", &[]).await.unwrap();
        let outside = driver.handle("other").prepare("SELECT 3").await.unwrap();
        let bound = transaction.statement(&outside).await.unwrap();
        assert_eq!(bound.sql(), "SELECT 3");
        assert_eq!(bound.target().address(), "db");
        transaction.commit().await.unwrap();

        target.fail_rollback(true);
        let transaction = handle.begin(&options).await.unwrap();
        assert!(transaction.rollback().await.is_err());
        assert_eq!((target.begins(), target.commits(), target.rollbacks()), (2, 1, 1));
    }

    #[tokio::test]
    async fn rejects_other_drivers() {
        let driver = MockDriver::new();
        driver.target("db");
        assert!(driver.open(&Connector::new("postgres", "db")).await.is_err());
        assert!(driver.open(&Connector::new("mock", "unknown")).await.is_err());
        assert_eq!(driver.open_attempts(), ["unknown"]);
    }
}
