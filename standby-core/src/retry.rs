use crate::{
    BadConnection, Connection, Context, Driver, Error, Joined, Result, is_bad_connection,
};
use std::{future::Future, sync::Arc};

/// How operations react to a bad connection, chosen once when the connection is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Run the operation once and return its outcome as is. Used with a single connector
    /// or an injected handle, where reconnecting cannot change the outcome.
    NoRetry,
    /// On a bad connection rotate to the next reachable connector and replay the operation.
    RotateAndRetry,
}

impl RetryPolicy {
    pub(crate) fn for_connectors(count: usize) -> Self {
        if count > 1 {
            RetryPolicy::RotateAndRetry
        } else {
            RetryPolicy::NoRetry
        }
    }
}

impl<D: Driver> Connection<D> {
    /// Runs `op` against the live handle according to the retry policy.
    ///
    /// `op` receives its own reference to the handle, so the future it returns owns
    /// everything it borrows from the connection.
    pub(crate) async fn try_op<T, F>(
        &self,
        ctx: &Context,
        op: impl Fn(Arc<D::Handle>) -> F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.policy {
            RetryPolicy::NoRetry => {
                let lease = self.state.lease().await?;
                match lease.handle {
                    Some(handle) => ctx.run(op(handle)).await,
                    None => Err(BadConnection::new("no live handle").into()),
                }
            }
            RetryPolicy::RotateAndRetry => self.try_rotating(ctx, op).await,
        }
    }

    /// Replays `op` on a new handle every time it fails with a bad connection.
    ///
    /// Any other error is returned after the first attempt. Each call rotates at most once
    /// per configured connector; when a rotation fails the operation error is returned
    /// joined with the [`crate::ConnectionFailed`] of the rotation.
    async fn try_rotating<T, F>(
        &self,
        ctx: &Context,
        op: impl Fn(Arc<D::Handle>) -> F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let mut rotations = 0;
        loop {
            let lease = self.state.lease().await?;
            let result = match &lease.handle {
                Some(handle) => ctx.run(op(handle.clone())).await,
                None => Err(BadConnection::new("no live handle").into()),
            };
            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) if !is_bad_connection(&e) => return Err(e),
                Err(e) => e,
            };
            if rotations == self.connectors.len() {
                log::error!(
                    "Giving up after rotating through every connector: {:#}",
                    error
                );
                return Err(error);
            }
            rotations += 1;
            log::warn!("{:#}, rotating to the next connector", error);
            if let Err(e) = self.rotate_after(ctx, lease.generation).await {
                return Err(Error::new(Joined::new([error, e])));
            }
        }
    }

    /// Replaces the live handle unless a concurrent caller already replaced the one seen
    /// at `generation`.
    pub(crate) async fn rotate_after(&self, ctx: &Context, generation: u64) -> Result<()> {
        let _rotation = ctx.run(async { Ok(self.state.rotation().await) }).await?;
        if self.state.lease().await?.generation != generation {
            log::debug!("Live handle already replaced by a concurrent rotation");
            return Ok(());
        }
        self.connect_any(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::RetryPolicy;

    #[test]
    fn policy_from_connector_count() {
        assert_eq!(RetryPolicy::for_connectors(0), RetryPolicy::NoRetry);
        assert_eq!(RetryPolicy::for_connectors(1), RetryPolicy::NoRetry);
        assert_eq!(RetryPolicy::for_connectors(2), RetryPolicy::RotateAndRetry);
        assert_eq!(RetryPolicy::for_connectors(5), RetryPolicy::RotateAndRetry);
    }
}
