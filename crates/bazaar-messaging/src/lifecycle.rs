//! Request lifecycle: stale-response guards, timeouts, cancellation, the
//! single retry policy, and single-flight coalescing.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::BackendError;
use crate::error::MessagingError;

/// Identifier of one request issued from a [`RequestSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Monotonic request counter for one logical slot (e.g. "the open thread").
///
/// Each new request supersedes all earlier ones; a response is committed
/// only if its id is still the latest issued.
#[derive(Debug, Default)]
pub struct RequestSlot {
    latest: AtomicU64,
}

impl RequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> RequestId {
        RequestId(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, id: RequestId) -> bool {
        self.latest.load(Ordering::SeqCst) == id.0
    }

    /// Supersede every outstanding request without issuing a new one.
    pub fn invalidate(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }
}

/// Bound a backend round trip. Expiry is reported as `NetworkTimeout`,
/// distinct from anything the server said.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, MessagingError>
where
    F: Future<Output = Result<T, MessagingError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(MessagingError::NetworkTimeout(limit)),
    }
}

/// A single backend call under the request timeout, with the backend's
/// error classified.
pub(crate) async fn timed<T, F>(limit: Duration, call: F) -> Result<T, MessagingError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    with_timeout(limit, async { call.await.map_err(MessagingError::from) }).await
}

/// Race `fut` against `token`. Cancellation drops the future (and with it
/// any I/O it was driving) and yields `Aborted`.
pub async fn abortable<T, F>(token: &CancellationToken, fut: F) -> Result<T, MessagingError>
where
    F: Future<Output = Result<T, MessagingError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(MessagingError::Aborted),
        result = fut => result,
    }
}

/// Run `op`; if it fails with a retryable error, wait `delay` and run it
/// exactly once more. Used only for the initial thread load.
pub async fn retry_once<T, F, Fut>(delay: Duration, what: &str, mut op: F) -> Result<T, MessagingError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MessagingError>>,
{
    match op().await {
        Err(err) if err.is_retryable() => {
            warn!("{} failed ({}), retrying in {:?}", what, err, delay);
            tokio::time::sleep(delay).await;
            op().await
        }
        other => other,
    }
}

type SharedLoad<V> = Shared<BoxFuture<'static, Result<V, MessagingError>>>;

struct Flight<V: Clone> {
    id: u64,
    waiters: usize,
    load: SharedLoad<V>,
}

/// Coalesces concurrent loads of the same key into one underlying call.
///
/// A flight lives only while someone is awaiting it: when the last waiter
/// finishes or gives up, the entry is removed, so a later call always starts
/// fresh instead of replaying an old result.
///
/// Flights are numbered in start order. A caller passes a [`mark`] taken
/// once everything its result must cover is in place, and only joins a
/// flight started at or after that mark; an older flight may have read
/// before the caller was ready, so it gets a load of its own.
///
/// [`mark`]: SingleFlight::mark
pub struct SingleFlight<K, V: Clone> {
    flights: Arc<Mutex<HashMap<K, Flight<V>>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V>
where
    V: Clone,
{
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number of the next flight to start.
    pub fn mark(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Await the in-flight load for `key` if it started at or after `since`,
    /// otherwise start one with `start`.
    pub async fn run<F>(&self, key: K, since: u64, start: F) -> Result<V, MessagingError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<V, MessagingError>>,
    {
        let (id, load) = {
            let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            let joined = flights.get_mut(&key).filter(|flight| flight.id >= since).map(|flight| {
                flight.waiters += 1;
                (flight.id, flight.load.clone())
            });
            match joined {
                Some(joined) => {
                    debug!("Joining in-flight load for {:?}", key);
                    joined
                }
                None => {
                    if flights.contains_key(&key) {
                        debug!("In-flight load for {:?} predates this caller, starting another", key);
                    }
                    // Earlier waiters keep their handle; the entry now tracks the new flight
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    let load = start().shared();
                    flights.insert(
                        key.clone(),
                        Flight {
                            id,
                            waiters: 1,
                            load: load.clone(),
                        },
                    );
                    (id, load)
                }
            }
        };

        let _waiter = Waiter {
            flights: self.flights.clone(),
            key,
            id,
        };
        load.await
    }

    pub fn in_flight(&self, key: &K) -> bool {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

/// Releases one waiter on drop, including when the awaiting future is
/// cancelled mid-flight.
struct Waiter<K: Eq + Hash, V: Clone> {
    flights: Arc<Mutex<HashMap<K, Flight<V>>>>,
    key: K,
    id: u64,
}

impl<K: Eq + Hash, V: Clone> Drop for Waiter<K, V> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(flight) = flights.get_mut(&self.key) {
            if flight.id != self.id {
                return;
            }
            flight.waiters -= 1;
            if flight.waiters == 0 {
                flights.remove(&self.key);
            }
        }
    }
}
