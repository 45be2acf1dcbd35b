use standby::{Closed, Connection, Connector, Context, Driver, Interrupted, find};

pub async fn lifecycle<D: Driver>(driver: D, reachable: Connector, unreachable: Connector) {
    let ctx = Context::new();
    let connection = Connection::builder(driver)
        .with_connectors([reachable, unreachable])
        .connect(&ctx)
        .await
        .expect("Could not connect");

    // Cancellation
    let cancelled = ctx.child();
    cancelled.cancel();
    let error = crate::silent_logs! {
        connection
            .execute(&cancelled, "SELECT 1", &[])
            .await
            .expect_err("A cancelled context must interrupt the operation")
    };
    assert_eq!(find::<Interrupted>(&error), Some(&Interrupted::Cancelled));
    assert_eq!(connection.mru().await, Some(0), "Cancellation must not rotate");

    // Close
    connection.close().await.expect("Could not close");
    connection.close().await.expect("Closing twice must succeed");
    let error = crate::silent_logs! {
        connection
            .execute(&ctx, "SELECT 1", &[])
            .await
            .expect_err("A closed connection must not run operations")
    };
    assert!(find::<Closed>(&error).is_some());
}
