mod failover;
mod lifecycle;
mod transactions;

use crate::{failover::failover, lifecycle::lifecycle, transactions::transactions};
use log::LevelFilter;
use standby::{Connector, Driver};
use std::env;

pub fn init_logs() {
    let mut logger = env_logger::builder();
    logger
        .is_test(true)
        .format_file(true)
        .format_line_number(true);
    if env::var("RUST_LOG").is_err() {
        logger.filter_level(LevelFilter::Warn);
    }
    let _ = logger.try_init();
}

/// Runs the driver agnostic suite.
///
/// `reachable` must point at a working backend, `unreachable` at a target the driver
/// cannot open or ping.
pub async fn execute_tests<D: Driver + Clone>(
    driver: D,
    reachable: Connector,
    unreachable: Connector,
) {
    failover(driver.clone(), reachable.clone(), unreachable.clone()).await;
    transactions(driver.clone(), reachable.clone()).await;
    lifecycle(driver, reachable, unreachable).await;
}

#[macro_export]
macro_rules! silent_logs {
    ($($code:tt)+) => {{
        let level = log::max_level();
        log::set_max_level(log::LevelFilter::Off);
        let result = { $($code)+ };
        log::set_max_level(level);
        result
    }};
}
