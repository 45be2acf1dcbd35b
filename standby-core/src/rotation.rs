use crate::{
    Closed, ConfigurationError, ConnectStep, Connection, ConnectionFailed, ConnectorError,
    Context, Driver, Error, Handle, Interrupted, Result, find,
};

/// Candidate indexes of one rotation pass: every connector once, starting just after
/// `mru` and wrapping around, or from the first connector if none was ever used.
pub(crate) fn rotation_order(mru: Option<usize>, len: usize) -> impl Iterator<Item = usize> {
    (0..len).map(move |i| match mru {
        Some(mru) => (mru + 1 + i) % len,
        None => i,
    })
}

impl<D: Driver> Connection<D> {
    /// Establishes a live handle using the first connector, in rotation order, that both
    /// opens and answers a ping.
    ///
    /// On success the new handle replaces the live one (which is then closed) and becomes
    /// the most recently used. If every connector fails the live handle and the most
    /// recently used index are left untouched and a [`ConnectionFailed`] is returned with
    /// one cause per attempt. Cancellation stops the pass immediately.
    pub(crate) async fn connect_any(&self, ctx: &Context) -> Result<()> {
        let connectors = self.connectors();
        let mut attempts = Vec::with_capacity(connectors.len());
        for candidate in rotation_order(self.state.mru().await, connectors.len()) {
            let connector = &connectors[candidate];
            log::debug!("Trying connector {}", connector);
            let handle = match ctx.run(self.driver().open(connector)).await {
                Ok(handle) => handle,
                Err(e) if find::<Interrupted>(&e).is_some() => return Err(e),
                Err(e) => {
                    attempts.push(ConnectorError {
                        connector: connector.clone(),
                        step: ConnectStep::Open,
                        source: e,
                    });
                    continue;
                }
            };
            if let Err(e) = self.ping_handle(ctx, &handle).await {
                // A handle that opened but does not answer is discarded, not leaked
                if let Err(e) = handle.close().await {
                    log::debug!("Ignoring close error of a discarded handle: {:#}", e);
                }
                if find::<Interrupted>(&e).is_some() {
                    return Err(e);
                }
                attempts.push(ConnectorError {
                    connector: connector.clone(),
                    step: ConnectStep::Ping,
                    source: e,
                });
                continue;
            }
            let (handle, previous) = match self.state.install(handle, candidate).await {
                Ok(installed) => installed,
                Err(handle) => {
                    if let Err(e) = handle.close().await {
                        log::debug!(
                            "Ignoring close error of a handle opened after close: {:#}",
                            e
                        );
                    }
                    return Err(Closed.into());
                }
            };
            log::debug!("Connected using connector {}", connector);
            if let Some(previous) = previous {
                if let Err(e) = previous.close().await {
                    log::debug!("Ignoring close error of the replaced handle: {:#}", e);
                }
            }
            if let Some(configure) = &self.configure {
                configure(handle.as_ref()).map_err(|e| {
                    let error = Error::new(ConfigurationError::Hook(e));
                    log::error!("{:#}", error);
                    error
                })?;
            }
            return Ok(());
        }
        let error = Error::new(ConnectionFailed { attempts });
        log::error!("{:#}", error);
        Err(error)
    }
}
