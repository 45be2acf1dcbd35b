use crate::{
    ConfigurationError, ConfigureFn, Connection, Connector, Context, DEFAULT_PING_TIMEOUT, Driver,
    Error, Result, RetryPolicy, state::ConnectionState,
};
use std::{env, time::Duration};

/// Assembles a [`Connection`].
///
/// A connection is configured either with one or more connectors or with an injected,
/// already configured handle, never both. The configuration hook is only available with
/// connectors. Setup errors are reported by [`ConnectionBuilder::connect`].
pub struct ConnectionBuilder<D: Driver> {
    driver: D,
    connectors: Vec<Connector>,
    handle: Option<D::Handle>,
    configure: Option<ConfigureFn<D::Handle>>,
    ping_timeout: Duration,
    error: Option<ConfigurationError>,
}

impl<D: Driver> ConnectionBuilder<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            connectors: Vec::new(),
            handle: None,
            configure: None,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            error: None,
        }
    }

    /// Adds a connector, ignored if already present.
    pub fn with_connector(mut self, connector: Connector) -> Self {
        if !self.connectors.contains(&connector) {
            self.connectors.push(connector);
        }
        self
    }

    /// Adds connectors in rank order, ignoring the ones already present.
    ///
    /// With two or more connectors an operation failing with a bad connection is retried
    /// on a new handle opened with the next connector.
    pub fn with_connectors(self, connectors: impl IntoIterator<Item = Connector>) -> Self {
        connectors
            .into_iter()
            .fold(self, |builder, connector| builder.with_connector(connector))
    }

    /// Uses an already configured handle, intended mainly for tests. No reconnection is
    /// ever attempted.
    pub fn with_handle(mut self, handle: D::Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Hook called on every newly connected handle, for example to size its pool.
    pub fn with_configuration(
        mut self,
        configure: impl Fn(&D::Handle) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.configure = Some(Box::new(configure));
        self
    }

    /// Bound of every liveness check, zero restores the default.
    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = if timeout.is_zero() {
            DEFAULT_PING_TIMEOUT
        } else {
            timeout
        };
        self
    }

    /// Reads `{PREFIX}_CONNECTORS` (comma separated `driver://` urls) and
    /// `{PREFIX}_PING_TIMEOUT_MS` when they are set.
    pub fn with_env(mut self, prefix: &str) -> Self {
        if let Ok(urls) = env::var(format!("{}_CONNECTORS", prefix)) {
            match Connector::from_url_list(&urls) {
                Ok(connectors) => self = self.with_connectors(connectors),
                Err(e) => self.fail(e),
            }
        }
        if let Ok(timeout) = env::var(format!("{}_PING_TIMEOUT_MS", prefix)) {
            match timeout.trim().parse::<i64>() {
                Ok(ms) if ms >= 0 => {
                    self = self.with_ping_timeout(Duration::from_millis(ms as u64))
                }
                _ => self.fail(Error::new(ConfigurationError::InvalidPingTimeout(timeout))),
            }
        }
        self
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(match error.downcast::<ConfigurationError>() {
                Ok(error) => error,
                Err(error) => ConfigurationError::Hook(error),
            });
        }
    }

    fn validate(&mut self) -> std::result::Result<(), ConfigurationError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        match (&self.handle, self.connectors.is_empty(), &self.configure) {
            (Some(..), false, _) => Err(ConfigurationError::HandleWithConnectors),
            (Some(..), true, Some(..)) => Err(ConfigurationError::HandleWithConfiguration),
            (None, true, _) => Err(ConfigurationError::NoConnectors),
            _ => Ok(()),
        }
    }

    /// Validates the configuration and establishes the first live handle.
    ///
    /// With connectors a rotation pass runs right away and its failure is returned. With
    /// an injected handle no connection attempt is made.
    pub async fn connect(mut self, ctx: &Context) -> Result<Connection<D>> {
        if let Err(e) = self.validate() {
            let error = Error::new(e);
            log::error!("{:#}", error);
            return Err(error);
        }
        let injected = self.handle.is_some();
        let connection = Connection {
            driver: self.driver,
            policy: RetryPolicy::for_connectors(self.connectors.len()),
            connectors: self.connectors.into(),
            configure: self.configure,
            ping_timeout: self.ping_timeout,
            state: ConnectionState::new(self.handle),
        };
        if !injected {
            if let Err(e) = connection.connect_any(ctx).await {
                if let Err(close) = connection.close().await {
                    log::debug!(
                        "Ignoring close error after a failed first connection: {:#}",
                        close
                    );
                }
                return Err(e);
            }
        }
        Ok(connection)
    }
}
