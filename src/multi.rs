//! Wait for a set of named requests.
//!
//! ```no_run
//! # async fn run() -> Result<(), zhttp::Error> {
//! use zhttp::{Context, MultiRequest, RequestOptions};
//!
//! let context = Context::new();
//! let connection = context.connection("http://127.0.0.1:8080/", Default::default())?;
//!
//! let multi: MultiRequest<&str> = MultiRequest::new();
//! multi.add_client("a", &connection.get(RequestOptions::new())).unwrap();
//! multi.add_client("b", &connection.post(RequestOptions::new())).unwrap();
//!
//! let responses = multi.wait().await;
//! println!("{} succeeded, {} failed", responses.callback.len(), responses.errback.len());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::client::{Error, HttpClient, Response};
use crate::deferred::Deferred;

/// A name was added to a [`MultiRequest`] twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Duplicate Multi key")]
pub struct DuplicateKey;

/// Outcomes recorded so far, by name.
#[derive(Debug, Clone)]
pub struct Responses<K, T, E> {
    /// Members that succeeded.
    pub callback: HashMap<K, T>,

    /// Members that failed.
    pub errback: HashMap<K, E>,
}

impl<K, T, E> Default for Responses<K, T, E> {
    fn default() -> Self {
        Self {
            callback: HashMap::new(),
            errback: HashMap::new(),
        }
    }
}

impl<K, T, E> Responses<K, T, E> {
    fn len(&self) -> usize {
        self.callback.len() + self.errback.len()
    }
}

/// Aggregates named [`Deferred`]s and settles once every one of them has.
///
/// The aggregate always succeeds, whatever the mix of member outcomes. It
/// settles at the moment the last outstanding member settles; a multi that
/// never had a member added reports [`MultiRequest::is_finished`] but does
/// not settle.
pub struct MultiRequest<K, T = Response, E = Error> {
    inner: Arc<MultiShared<K, T, E>>,
}

struct MultiShared<K, T, E> {
    state: Mutex<MultiState<K, T, E>>,
    deferred: Deferred<Responses<K, T, E>, Infallible>,
}

struct MultiState<K, T, E> {
    requests: HashMap<K, Deferred<T, E>>,
    responses: Responses<K, T, E>,
}

impl<K, T, E> Clone for MultiRequest<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, T, E> fmt::Debug for MultiRequest<K, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MultiRequest")
            .field("requests", &state.requests.len())
            .field("callback", &state.responses.callback.len())
            .field("errback", &state.responses.errback.len())
            .finish()
    }
}

impl<K, T, E> Default for MultiRequest<K, T, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T, E> MultiRequest<K, T, E>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// An empty aggregate.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MultiShared {
                state: Mutex::new(MultiState {
                    requests: HashMap::new(),
                    responses: Responses::default(),
                }),
                deferred: Deferred::new(),
            }),
        }
    }

    /// Track `deferred` under `name`.
    ///
    /// Fails without tracking anything when `name` is already present. A
    /// deferred that has already settled is recorded immediately.
    pub fn add(&self, name: K, deferred: &Deferred<T, E>) -> Result<(), DuplicateKey> {
        {
            let mut state = self.inner.state.lock();
            if state.requests.contains_key(&name) {
                return Err(DuplicateKey);
            }
            state.requests.insert(name.clone(), deferred.clone());
        }

        let shared = self.inner.clone();
        let key = name.clone();
        deferred.callback(move |value: &T| {
            shared.state.lock().responses.callback.insert(key, value.clone());
            shared.check_progress();
        });

        let shared = self.inner.clone();
        deferred.errback(move |error: &E| {
            shared.state.lock().responses.errback.insert(name, error.clone());
            shared.check_progress();
        });
        Ok(())
    }

    /// Outcomes recorded so far.
    pub fn responses(&self) -> Responses<K, T, E> {
        self.inner.state.lock().responses.clone()
    }

    /// Every tracked deferred, by name.
    pub fn requests(&self) -> HashMap<K, Deferred<T, E>> {
        self.inner.state.lock().requests.clone()
    }

    /// Whether every tracked deferred has settled. True when nothing was
    /// added.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Run `handler` with all outcomes once every member has settled.
    pub fn callback<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&Responses<K, T, E>) + Send + 'static,
    {
        self.inner.deferred.callback(handler);
        self
    }

    /// Wait until every member has settled.
    pub async fn wait(&self) -> Responses<K, T, E> {
        match self.inner.deferred.wait().await {
            Ok(responses) => responses,
            Err(never) => match never {},
        }
    }

    /// The aggregate's own deferred.
    pub fn deferred(&self) -> &Deferred<Responses<K, T, E>, Infallible> {
        &self.inner.deferred
    }
}

impl<K> MultiRequest<K, Response, Error>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Track an HTTP request under `name`.
    pub fn add_client(&self, name: K, client: &HttpClient) -> Result<(), DuplicateKey> {
        self.add(name, client.deferred())
    }
}

impl<K, T, E> MultiShared<K, T, E>
where
    K: Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn is_finished(&self) -> bool {
        let state = self.state.lock();
        state.responses.len() == state.requests.len()
    }

    fn check_progress(&self) {
        let snapshot = {
            let state = self.state.lock();
            if state.responses.len() != state.requests.len() {
                return;
            }
            state.responses.clone()
        };

        if self.deferred.succeed(snapshot) {
            tracing::trace!("all requests settled");
        }
    }
}
