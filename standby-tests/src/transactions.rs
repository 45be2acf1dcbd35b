use standby::{
    Connection, Connector, Context, Driver, Error, Panicked, TransactionOptions, TransactionPhase,
    TransactionState, find, transaction_phase,
};

pub async fn transactions<D: Driver>(driver: D, reachable: Connector) {
    let ctx = &Context::new();
    let connection = Connection::builder(driver)
        .with_connector(reachable)
        .connect(ctx)
        .await
        .expect("Could not connect");
    let options = TransactionOptions::default();

    // Commit
    let (value, transaction) = connection
        .transact(ctx, "commit", &options, |tx| async move {
            tx.execute(ctx, "SELECT 1", &[]).await?;
            Ok((42, tx))
        })
        .await
        .expect("Transaction should have committed");
    assert_eq!(value, 42);
    assert_eq!(transaction.name(), "commit");
    assert_eq!(transaction.state().await, TransactionState::Committed);
    assert!(
        transaction.execute(ctx, "SELECT 1", &[]).await.is_err(),
        "A finished transaction must not be usable"
    );

    // Error
    let mut leaked = None;
    let slot = &mut leaked;
    let error = crate::silent_logs! {
        connection
            .transact(ctx, "error", &options, |tx| async move {
                *slot = Some(tx);
                Err::<(), _>(Error::msg("unit of work failed"))
            })
            .await
            .expect_err("Transaction should have failed")
    };
    assert_eq!(transaction_phase(&error), Some(None));
    assert!(format!("{:#}", error).contains("unit of work failed"));
    let leaked = leaked.expect("The unit of work did not run");
    assert_eq!(leaked.state().await, TransactionState::RolledBack);

    // Panic
    let error = crate::silent_logs! {
        connection
            .transact(ctx, "panic", &options, |_tx| async move { panicking_work() })
            .await
            .expect_err("Transaction should have failed")
    };
    assert_eq!(transaction_phase(&error), Some(Some(TransactionPhase::Panic)));
    let panicked = find::<Panicked>(&error).expect("Expected the panic snapshot");
    assert_eq!(panicked.message, "unit of work panicked");

    // Statement prepared outside, run inside
    let statement = connection
        .prepare(ctx, "SELECT 3")
        .await
        .expect("Could not prepare");
    connection
        .transact(ctx, "statement", &options, |tx| async move {
            let bound = tx.statement(ctx, &statement).await?;
            tx.execute_statement(ctx, &bound, &[]).await
        })
        .await
        .expect("The rebound statement should run in the transaction");

    // Still usable afterwards
    connection
        .execute(ctx, "SELECT 1", &[])
        .await
        .expect("Connection should still work after a failed transaction");
    connection.close().await.expect("Could not close");
}

fn panicking_work() -> standby::Result<()> {
    panic!("unit of work panicked");
}
