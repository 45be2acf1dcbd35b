//! Error taxonomy.
//!
//! Operations return [`crate::Result`], an `anyhow` result. The types below are the
//! structured causes carried inside it; recover them with [`find`] (which also looks
//! inside [`Joined`] and [`ConnectionFailed`]) or with `anyhow::Error::downcast_ref`.

use crate::{Connector, Error};
use std::{
    any::Any,
    backtrace::Backtrace,
    borrow::Cow,
    cell::RefCell,
    error::Error as StdError,
    fmt::{self, Display, Formatter, Write},
    panic,
    sync::Once,
};
use thiserror::Error;

/// Signal that the physical link to the backend is unusable and must be replaced.
///
/// Drivers return it (usually wrapped with some context) for failures that a fresh
/// handle could fix. It is the only error that triggers a connector rotation.
#[derive(Debug, Error)]
#[error("bad connection: {reason}")]
pub struct BadConnection {
    pub reason: Cow<'static, str>,
}

impl BadConnection {
    pub fn new(reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The caller's context was cancelled or its deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// The connection was explicitly closed.
#[derive(Debug, Clone, Copy, Error)]
#[error("connection is closed")]
pub struct Closed;

/// Invalid setup combination or a failing post-connect hook.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("configuration error: cannot use connectors together with an injected handle")]
    HandleWithConnectors,
    #[error("configuration error: cannot use a configuration hook together with an injected handle")]
    HandleWithConfiguration,
    #[error("configuration error: no connectors configured and no handle injected")]
    NoConnectors,
    #[error("configuration error: ping timeout must be greater than or equal to zero, got `{0}`")]
    InvalidPingTimeout(String),
    #[error("configuration error: invalid connector `{url}`")]
    InvalidConnector {
        url: String,
        #[source]
        source: Error,
    },
    #[error("configuration error: configuration hook failed")]
    Hook(#[source] Error),
}

/// Step of a connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    Open,
    Ping,
}

impl Display for ConnectStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectStep::Open => "open",
            ConnectStep::Ping => "ping",
        })
    }
}

/// Failure of a single connector during a rotation pass.
#[derive(Debug, Error)]
#[error("unable to connect: {connector}: {step}")]
pub struct ConnectorError {
    pub connector: Connector,
    pub step: ConnectStep,
    #[source]
    pub source: Error,
}

/// Every connector was tried and none produced a live handle.
///
/// Holds one [`ConnectorError`] per attempt, in attempt order.
#[derive(Debug, Error)]
#[error("connection failed: {}", render_attempts(.attempts))]
pub struct ConnectionFailed {
    pub attempts: Vec<ConnectorError>,
}

/// Phase of a transaction that produced a [`TransactionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionPhase {
    Begin,
    Commit,
    Rollback,
    Panic,
}

impl Display for TransactionPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionPhase::Begin => "begin",
            TransactionPhase::Commit => "commit",
            TransactionPhase::Rollback => "rollback",
            TransactionPhase::Panic => "panic",
        })
    }
}

/// Failure of a named transaction.
///
/// `phase` is `None` when the unit of work itself returned the error.
#[derive(Debug, Error)]
#[error("transaction `{name}`{}", .phase.map(|p| format!(": {p}")).unwrap_or_default())]
pub struct TransactionError {
    pub name: String,
    pub phase: Option<TransactionPhase>,
    #[source]
    pub source: Error,
}

impl TransactionError {
    pub fn new(name: impl Into<String>, phase: Option<TransactionPhase>, source: Error) -> Self {
        Self {
            name: name.into(),
            phase,
            source,
        }
    }
}

/// Snapshot of a panic raised inside a unit of work.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Panicked {
    pub message: String,
    /// Rendered backtrace of the point where the panic was raised.
    pub backtrace: String,
}

impl Panicked {
    /// Captures the panic payload together with the backtrace recorded by the panic hook.
    ///
    /// Without a recorded backtrace (the hook was replaced, or the payload comes from
    /// elsewhere) the backtrace of the recovery point is used.
    pub fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "panic with a non string payload".to_string()
        };
        let backtrace = PANIC_BACKTRACE
            .with(|v| v.borrow_mut().take())
            .unwrap_or_else(|| Backtrace::force_capture().to_string());
        Self { message, backtrace }
    }
}

thread_local! {
    // The last panic raised on this thread, the one `catch_unwind` just stopped
    static PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chains a panic hook recording the backtrace of every panic before unwinding starts.
/// The previous hook still runs afterwards.
pub(crate) fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let backtrace = Backtrace::force_capture().to_string();
            // Not accessible while the thread local is being destroyed
            let _ = PANIC_BACKTRACE.try_with(|v| {
                if let Ok(mut v) = v.try_borrow_mut() {
                    *v = Some(backtrace);
                }
            });
            previous(info);
        }));
    });
}

/// Several errors reported together, the first one being the primary failure.
#[derive(Debug, Error)]
#[error("{}", render_joined(.0))]
pub struct Joined(Vec<Error>);

impl Joined {
    pub fn new(errors: impl IntoIterator<Item = Error>) -> Self {
        Self(errors.into_iter().collect())
    }
    pub fn errors(&self) -> &[Error] {
        &self.0
    }
}

fn render_chain(out: &mut String, error: &(dyn StdError + 'static)) {
    let _ = write!(out, "{}", error);
    let mut source = error.source();
    while let Some(error) = source {
        let _ = write!(out, ": {}", error);
        source = error.source();
    }
}

fn render_attempts(attempts: &[ConnectorError]) -> String {
    let mut out = String::new();
    for (i, attempt) in attempts.iter().enumerate() {
        if i > 0 {
            out.push_str("; ");
        }
        render_chain(&mut out, attempt);
    }
    out
}

fn render_joined(errors: &[Error]) -> String {
    let mut out = String::new();
    for (i, error) in errors.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = write!(out, "{:#}", error);
    }
    out
}

/// Finds the first error of type `E` in the causes of `error`, descending into every
/// branch of [`Joined`] and every attempt of [`ConnectionFailed`].
pub fn find<E: StdError + 'static>(error: &Error) -> Option<&E> {
    find_in(&**error)
}

fn find_in<'a, E: StdError + 'static>(error: &'a (dyn StdError + 'static)) -> Option<&'a E> {
    let mut current = Some(error);
    while let Some(error) = current {
        if let Some(found) = error.downcast_ref::<E>() {
            return Some(found);
        }
        if let Some(joined) = error.downcast_ref::<Joined>() {
            return joined.errors().iter().find_map(|e| find_in::<E>(&**e));
        }
        if let Some(failed) = error.downcast_ref::<ConnectionFailed>() {
            return failed.attempts.iter().find_map(|e| find_in::<E>(e));
        }
        current = error.source();
    }
    None
}

/// Whether `error` is eligible for a reconnect and retry.
///
/// Cancellation and deadline expiry never are, even when a [`BadConnection`] is also present.
pub fn is_bad_connection(error: &Error) -> bool {
    find::<Interrupted>(error).is_none() && find::<BadConnection>(error).is_some()
}

/// The phase of the outermost [`TransactionError`] in `error`, if any.
pub fn transaction_phase(error: &Error) -> Option<Option<TransactionPhase>> {
    find::<TransactionError>(error).map(|e| e.phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn bad_connection_through_context() {
        let error = Error::new(BadConnection::new("reset by peer")).context("While executing");
        assert!(is_bad_connection(&error));
        assert!(!is_bad_connection(&Error::msg("syntax error")));
    }

    #[test]
    fn interrupted_is_never_bad() {
        let error = Error::new(Joined::new([
            Error::new(BadConnection::new("reset")),
            Error::new(Interrupted::Cancelled),
        ]));
        assert!(!is_bad_connection(&error));
    }

    #[test]
    fn transaction_error_display() {
        let error = TransactionError::new("load", None, Error::msg("boom"));
        assert_eq!(error.to_string(), "transaction `load`");
        assert_eq!(format!("{:#}", Error::new(error)), "transaction `load`: boom");
        let error = TransactionError::new(
            "load",
            Some(TransactionPhase::Commit),
            Error::msg("lost"),
        );
        assert_eq!(
            format!("{:#}", Error::new(error)),
            "transaction `load`: commit: lost"
        );
    }

    #[test]
    fn connection_failed_lists_attempts() {
        let failed = ConnectionFailed {
            attempts: vec![
                ConnectorError {
                    connector: Connector::new("mock", "a"),
                    step: ConnectStep::Open,
                    source: Error::msg("refused"),
                },
                ConnectorError {
                    connector: Connector::new("mock", "b"),
                    step: ConnectStep::Ping,
                    source: Error::new(BadConnection::new("timeout")),
                },
            ],
        };
        let rendered = failed.to_string();
        assert!(rendered.contains("mock:a: open: refused"), "{rendered}");
        assert!(
            rendered.contains("mock:b: ping: bad connection: timeout"),
            "{rendered}"
        );
        let error = Error::new(failed);
        assert!(find::<BadConnection>(&error).is_some());
    }

    #[test]
    fn find_in_joined() {
        let error = Error::new(Joined::new([
            Error::new(TransactionError::new("t", None, Error::msg("work"))),
            Error::new(TransactionError::new(
                "t",
                Some(TransactionPhase::Rollback),
                Error::msg("rollback"),
            )),
        ]));
        assert_eq!(transaction_phase(&error), Some(None));
        let joined = error.downcast_ref::<Joined>().unwrap();
        assert_eq!(joined.errors().len(), 2);
    }

    #[inline(never)]
    fn faulting_step(values: &[i32]) -> i32 {
        if values.is_empty() {
            panic!("nothing to read");
        }
        values[0]
    }

    #[test]
    fn panic_backtrace_from_raise_point() {
        install_panic_hook();
        let payload = std::panic::catch_unwind(|| faulting_step(&[])).unwrap_err();
        let panicked = Panicked::from_payload(payload);
        assert_eq!(panicked.message, "nothing to read");
        assert!(
            panicked.backtrace.contains("faulting_step"),
            "{}",
            panicked.backtrace
        );
    }

    #[test]
    fn panic_payload() {
        let panicked = Panicked::from_payload(Box::new("oh no"));
        assert_eq!(panicked.message, "oh no");
        let panicked = Panicked::from_payload(Box::new(String::from("formatted 3")));
        assert_eq!(panicked.to_string(), "formatted 3");
        let panicked = Panicked::from_payload(Box::new(42));
        assert_eq!(panicked.message, "panic with a non string payload");
    }
}
