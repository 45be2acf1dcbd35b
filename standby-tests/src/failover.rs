use standby::{Connection, ConnectionFailed, Connector, Context, Driver, RetryPolicy, find};

pub async fn failover<D: Driver + Clone>(driver: D, reachable: Connector, unreachable: Connector) {
    let ctx = Context::new();

    // Skips the unreachable connector
    let connection = Connection::builder(driver.clone())
        .with_connectors([unreachable.clone(), reachable.clone()])
        .connect(&ctx)
        .await
        .expect("Could not connect using the reachable connector");
    assert_eq!(connection.retry_policy(), RetryPolicy::RotateAndRetry);
    assert_eq!(connection.mru().await, Some(1));
    assert_eq!(connection.current_connector().await, Some(&reachable));
    connection
        .ping(&ctx)
        .await
        .expect("Could not ping the reachable connector");
    let row = connection
        .query_row(&ctx, "SELECT 1", &[])
        .await
        .expect("Could not query the reachable connector");
    assert!(row.is_some());
    connection.close().await.expect("Could not close");

    // Single connector
    let connection = Connection::builder(driver.clone())
        .with_connector(reachable.clone())
        .connect(&ctx)
        .await
        .expect("Could not connect using a single connector");
    assert_eq!(connection.retry_policy(), RetryPolicy::NoRetry);
    assert_eq!(connection.mru().await, Some(0));
    connection.close().await.expect("Could not close");

    // Nothing reachable
    let error = crate::silent_logs! {
        Connection::builder(driver)
            .with_connectors([unreachable.clone(), unreachable])
            .connect(&ctx)
            .await
            .err()
            .expect("Connected to an unreachable connector")
    };
    let failed = find::<ConnectionFailed>(&error).expect("Expected a ConnectionFailed error");
    assert_eq!(failed.attempts.len(), 1, "Duplicate connectors must be ignored");
}
