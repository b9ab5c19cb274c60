//! Table of in-flight fetches keyed by resource key.
//!
//! The check for an existing flight and the registration of a new one happen
//! in one critical section, so concurrent callers for the same key can never
//! both start a fetch. Each flight runs as its own spawned task; callers wait
//! on a [`Shared`] handle to the task's outcome, so dropping a waiter never
//! aborts the fetch for the others.

use std::collections::HashMap;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::FetchError;

/// Shared outcome of one flight.
pub type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

/// A caller's handle on a flight it joined or started. Awaiting it yields
/// the flight's shared outcome.
pub struct Joined<V> {
    outcome: SharedFetch<V>,
    cancel: CancellationToken,
}

impl<V> Joined<V> {
    /// Whether the flight was cancelled, before or after it settled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token of the flight, for checking cancellation after awaiting.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl<V: Clone> IntoFuture for Joined<V> {
    type Output = Result<V, FetchError>;
    type IntoFuture = SharedFetch<V>;

    fn into_future(self) -> Self::IntoFuture {
        self.outcome
    }
}

struct Flight<V> {
    id: u64,
    outcome: SharedFetch<V>,
    cancel: CancellationToken,
}

type Flights<V> = Arc<Mutex<HashMap<String, Flight<V>>>>;

/// Deduplicating table of in-flight fetches.
pub struct InFlightTable<V> {
    flights: Flights<V>,
    next_id: AtomicU64,
}

impl<V> fmt::Debug for InFlightTable<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightTable")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl<V> Default for InFlightTable<V> {
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<V> InFlightTable<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the flight registered under `key`, or start `operation` as a new
    /// flight when there is none.
    ///
    /// `operation` receives the flight's cancellation token; it should stop
    /// early once the token fires and must not write anything derived from a
    /// cancelled fetch. The entry removes itself when the flight's task
    /// ends, whether it succeeds, fails or panics.
    pub fn join_or_start<F, Fut>(&self, key: &str, operation: F) -> Joined<V>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
    {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = flights.get(key) {
            debug!(key, "Joining in-flight fetch");
            return Joined {
                outcome: flight.outcome.clone(),
                cancel: flight.cancel.clone(),
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let work = operation(cancel.clone());
        let registry = Arc::clone(&self.flights);
        let owned_key = key.to_owned();

        let task = tokio::spawn(async move {
            let _deregister = Deregister {
                flights: registry,
                key: owned_key,
                id,
            };
            work.await
        });
        let outcome: SharedFetch<V> = async move {
            task.await
                .unwrap_or_else(|err| Err(FetchError::Aborted(err.to_string())))
        }
        .boxed()
        .shared();

        let flight = Flight {
            id,
            outcome: outcome.clone(),
            cancel: cancel.clone(),
        };
        if let Some(stale) = flights.insert(key.to_owned(), flight) {
            warn!(key, stale_id = stale.id, "Replacing duplicate in-flight registration");
            stale.cancel.cancel();
        }
        drop(flights);

        debug!(key, id, "Started fetch");
        Joined { outcome, cancel }
    }

    /// Signal cancellation to the flight under `key` and forget it.
    ///
    /// Returns whether a flight was registered. Waiters already holding the
    /// outcome still receive whatever the flight settles with.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self
            .flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        removed.is_some_and(|flight| {
            flight.cancel.cancel();
            true
        })
    }

    /// Cancel and forget every flight. Returns how many were registered.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Flight<V>> = self
            .flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, flight)| flight)
            .collect();
        for flight in &drained {
            flight.cancel.cancel();
        }
        drained.len()
    }
}

impl<V> InFlightTable<V> {
    /// Whether a flight is registered under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of registered flights.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no flight is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes a flight's entry when its task ends, including by panic.
struct Deregister<V> {
    flights: Flights<V>,
    key: String,
    id: u64,
}

impl<V> Drop for Deregister<V> {
    fn drop(&mut self) {
        remove_if_current(&self.flights, &self.key, self.id);
    }
}

fn remove_if_current<V>(flights: &Flights<V>, key: &str, id: u64) {
    let mut flights = flights.lock().unwrap_or_else(PoisonError::into_inner);
    if flights.get(key).is_some_and(|flight| flight.id == id) {
        flights.remove(key);
    }
}
