//! One-shot settlement with ordered callbacks.
//!
//! A [`Deferred`] starts out pending and settles exactly once, either
//! fulfilled with a value or rejected with an error. Handlers registered
//! before settlement run in registration order when it happens; handlers
//! registered afterwards run immediately against the stored outcome.
//!
//! ```
//! use zhttp::Deferred;
//!
//! let deferred: Deferred<u32, String> = Deferred::new();
//! deferred.callback(|value| assert_eq!(*value, 7));
//!
//! assert!(deferred.succeed(7));
//! assert!(!deferred.fail("too late".into()));
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::DebugLiteral;

type Handler<T> = Box<dyn FnOnce(&T) + Send + 'static>;

/// Settlement state of a [`Deferred`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Not yet settled.
    Pending,

    /// Settled with a value.
    Fulfilled,

    /// Settled with an error.
    Rejected,
}

/// The stored outcome of a settled [`Deferred`].
#[derive(Debug)]
pub enum Outcome<T, E> {
    /// The success value.
    Fulfilled(T),

    /// The failure value.
    Rejected(E),
}

impl<T, E> Outcome<T, E> {
    /// The status corresponding to this outcome.
    pub fn status(&self) -> Status {
        match self {
            Outcome::Fulfilled(_) => Status::Fulfilled,
            Outcome::Rejected(_) => Status::Rejected,
        }
    }
}

struct Inner<T, E> {
    outcome: Option<Arc<Outcome<T, E>>>,
    callbacks: Vec<Handler<T>>,
    errbacks: Vec<Handler<E>>,
}

/// A single-settlement container with success and failure handler lists.
///
/// Cloning a `Deferred` produces another handle onto the same settlement.
pub struct Deferred<T, E> {
    inner: Arc<Mutex<Inner<T, E>>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> Default for Deferred<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        let status = inner
            .outcome
            .as_ref()
            .map_or(Status::Pending, |outcome| outcome.status());
        f.debug_struct("Deferred")
            .field("status", &status)
            .field("callbacks", &DebugLiteral(inner.callbacks.len()))
            .field("errbacks", &DebugLiteral(inner.errbacks.len()))
            .finish()
    }
}

impl<T, E> Deferred<T, E>
where
    T: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Create a new, pending `Deferred`.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                outcome: None,
                callbacks: Vec::new(),
                errbacks: Vec::new(),
            })),
        }
    }

    /// Register a success handler.
    ///
    /// If the deferred is already fulfilled the handler runs immediately on
    /// the calling thread. If it was rejected the handler is dropped.
    pub fn callback<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        match inner.outcome.clone() {
            None => inner.callbacks.push(Box::new(handler)),
            Some(outcome) => {
                drop(inner);
                if let Outcome::Fulfilled(value) = &*outcome {
                    handler(value);
                }
            }
        }
        self
    }

    /// Register a failure handler.
    ///
    /// If the deferred is already rejected the handler runs immediately on
    /// the calling thread. If it was fulfilled the handler is dropped.
    pub fn errback<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&E) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        match inner.outcome.clone() {
            None => inner.errbacks.push(Box::new(handler)),
            Some(outcome) => {
                drop(inner);
                if let Outcome::Rejected(error) = &*outcome {
                    handler(error);
                }
            }
        }
        self
    }

    /// Fulfil the deferred with `value`.
    ///
    /// Returns `false` (and drops `value`) if the deferred had already
    /// settled.
    pub fn succeed(&self, value: T) -> bool {
        self.settle(Outcome::Fulfilled(value))
    }

    /// Reject the deferred with `error`.
    ///
    /// Returns `false` (and drops `error`) if the deferred had already
    /// settled.
    pub fn fail(&self, error: E) -> bool {
        self.settle(Outcome::Rejected(error))
    }

    fn settle(&self, outcome: Outcome<T, E>) -> bool {
        let outcome = Arc::new(outcome);
        let (callbacks, errbacks) = {
            let mut inner = self.inner.lock();
            if inner.outcome.is_some() {
                return false;
            }
            inner.outcome = Some(outcome.clone());
            (
                std::mem::take(&mut inner.callbacks),
                std::mem::take(&mut inner.errbacks),
            )
        };

        match &*outcome {
            Outcome::Fulfilled(value) => {
                for handler in callbacks {
                    handler(value);
                }
            }
            Outcome::Rejected(error) => {
                for handler in errbacks {
                    handler(error);
                }
            }
        }
        true
    }

    /// Current settlement status.
    pub fn status(&self) -> Status {
        self.inner
            .lock()
            .outcome
            .as_ref()
            .map_or(Status::Pending, |outcome| outcome.status())
    }

    /// Whether the deferred has settled either way.
    pub fn is_settled(&self) -> bool {
        self.inner.lock().outcome.is_some()
    }

    /// The stored outcome, once settled.
    pub fn outcome(&self) -> Option<Arc<Outcome<T, E>>> {
        self.inner.lock().outcome.clone()
    }

    /// Wait for settlement and return a copy of the outcome.
    pub async fn wait(&self) -> Result<T, E>
    where
        T: Clone,
        E: Clone,
    {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let on_error = tx.clone();

        self.callback(move |value: &T| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(Ok(value.clone()));
            }
        });
        self.errback(move |error: &E| {
            if let Some(tx) = on_error.lock().take() {
                let _ = tx.send(Err(error.clone()));
            }
        });

        match rx.await {
            Ok(outcome) => outcome,
            // The handlers live inside `self`, so the sender can only go away
            // once settlement has dropped the opposite handler list.
            Err(_) => std::future::pending().await,
        }
    }
}
