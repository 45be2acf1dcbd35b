use crate::{Driver, Interrupted, Result, Transaction};
use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    future::{Future, pending},
    sync::Arc,
    time::Duration,
};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Cancellation, deadline and transaction scope passed down to every operation.
///
/// Cloning is cheap: clones share the cancellation token. Derived contexts (`child`,
/// `with_timeout`, `with_transaction`) never affect the context they come from.
#[derive(Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    transaction: Option<Arc<dyn Any + Send + Sync>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context cancelled together with `token`.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            ..Default::default()
        }
    }

    /// Context cancelled when this one is, that can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            ..self.clone()
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// The earliest deadline wins.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            deadline: Some(self.deadline.map_or(deadline, |v| v.min(deadline))),
            ..self.clone()
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drives `future` until it completes, the context is cancelled or the deadline passes.
    ///
    /// On cancellation or expiry the future is dropped and an [`Interrupted`] error is
    /// returned.
    pub async fn run<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled.into());
        }
        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled.into()),
            _ = deadline => Err(Interrupted::DeadlineExceeded.into()),
            result = future => result,
        }
    }

    /// Derived context carrying `transaction`, see [`Transaction::from_context`].
    pub fn with_transaction<D: Driver>(&self, transaction: &Transaction<D>) -> Self {
        Self {
            transaction: Some(Arc::new(transaction.clone())),
            ..self.clone()
        }
    }

    pub(crate) fn attached_transaction<D: Driver>(&self) -> Option<&Transaction<D>> {
        self.transaction.as_ref()?.downcast_ref()
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.token.is_cancelled())
            .field("deadline", &self.deadline)
            .field("transaction", &self.transaction.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn runs_to_completion() {
        let ctx = Context::new();
        assert_eq!(ctx.run(async { Ok(5) }).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let ctx = Context::new();
        ctx.cancel();
        let error = ctx.run(async { Ok(()) }).await.unwrap_err();
        assert_eq!(
            error.downcast_ref::<Interrupted>(),
            Some(&Interrupted::Cancelled)
        );
    }

    #[tokio::test]
    async fn child_follows_parent() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn deadline_interrupts() {
        let ctx = Context::new().with_timeout(Duration::from_millis(10));
        let error = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Error>(())
            })
            .await
            .unwrap_err();
        assert_eq!(
            error.downcast_ref::<Interrupted>(),
            Some(&Interrupted::DeadlineExceeded)
        );
    }

    #[test]
    fn earliest_deadline_wins() {
        let now = Instant::now();
        let ctx = Context::new().with_deadline(now + Duration::from_secs(1));
        let shorter = ctx.with_deadline(now + Duration::from_millis(5));
        let longer = ctx.with_timeout(Duration::from_secs(60));
        assert_eq!(shorter.deadline(), Some(now + Duration::from_millis(5)));
        assert_eq!(longer.deadline(), Some(now + Duration::from_secs(1)));
    }
}
