//! In-flight fetch registry used for request coalescing.
//!
//! Each fetch runs in its own spawned task so it finishes even if every
//! caller stops waiting. The task's output is wrapped in a
//! [`Shared`] future; the registry keeps one clone per key and hands further
//! clones to joiners. The slot is removed when the task ends, whatever the
//! outcome.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::debug;

use super::lock;
use crate::{PunchclockError, Result};

/// A fetch that any number of callers can await.
pub(crate) type SharedFetch<V> = Shared<BoxFuture<'static, Result<V>>>;

struct Slot {
    id: u64,
    // Always a `SharedFetch<V>` for the `V` the fetch was started with.
    fetch: Box<dyn Any + Send + Sync>,
}

#[derive(Default)]
struct Slots {
    next_id: u64,
    by_key: HashMap<String, Slot>,
}

/// How a `get_or_fetch` call was satisfied.
pub(crate) enum Flight<V> {
    /// A value landed in the cache while we were looking.
    Ready(V),
    /// Joined a fetch someone else started.
    Joined(SharedFetch<V>),
    /// Started a new fetch.
    Started(SharedFetch<V>),
}

impl<V: Clone> Flight<V> {
    pub(crate) async fn outcome(self) -> Result<V> {
        match self {
            Flight::Ready(value) => Ok(value),
            Flight::Joined(fetch) | Flight::Started(fetch) => fetch.await,
        }
    }
}

/// Identifies one registered fetch.
///
/// Handed to the fetch task so it can check, before populating the cache,
/// that nobody cleared the registry in the meantime.
#[derive(Clone)]
pub(crate) struct Ticket {
    slots: Option<Arc<Mutex<Slots>>>,
    key: String,
    id: u64,
}

impl Ticket {
    /// Whether this fetch still owns its key's slot.
    ///
    /// Unregistered fetches (see [`PendingRegistry::join_or_start`]) are
    /// always current.
    pub(crate) fn is_current(&self) -> bool {
        match &self.slots {
            Some(slots) => lock(slots)
                .by_key
                .get(&self.key)
                .is_some_and(|slot| slot.id == self.id),
            None => true,
        }
    }
}

/// Removes the ticket's slot when the fetch task finishes or unwinds.
struct Deregister(Ticket);

impl Drop for Deregister {
    fn drop(&mut self) {
        if let Some(slots) = &self.0.slots {
            let mut slots = lock(slots);
            if slots
                .by_key
                .get(&self.0.key)
                .is_some_and(|slot| slot.id == self.0.id)
            {
                slots.by_key.remove(&self.0.key);
            }
        }
    }
}

/// Key → in-flight fetch. At most one slot per key.
#[derive(Clone, Default)]
pub(crate) struct PendingRegistry {
    slots: Arc<Mutex<Slots>>,
}

impl PendingRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of fetches in flight.
    pub(crate) fn len(&self) -> usize {
        lock(&self.slots).by_key.len()
    }

    /// Forget every in-flight fetch.
    ///
    /// Running tasks still complete and deliver to their joiners, but they
    /// no longer populate the cache.
    pub(crate) fn clear(&self) {
        lock(&self.slots).by_key.clear();
    }

    /// Forget the in-flight fetches whose key matches `pred`. Returns how
    /// many were forgotten.
    ///
    /// As with [`clear`](Self::clear), those fetches still deliver to their
    /// callers but do not populate the cache, so an invalidation cannot be
    /// undone by a fetch that started before it.
    pub(crate) fn forget(&self, pred: impl Fn(&str) -> bool) -> usize {
        let mut slots = lock(&self.slots);
        let before = slots.by_key.len();
        slots.by_key.retain(|key, _| !pred(key));
        before - slots.by_key.len()
    }

    /// Join the fetch in flight for `key`, or start one.
    ///
    /// With the registry locked, `recheck` is consulted before starting: a
    /// fetch that completed between the caller's cache miss and this call
    /// has already populated the cache (tasks store before deregistering),
    /// so the value is returned instead of fetching again.
    ///
    /// `make` builds the task body from a [`Ticket`]. It runs under the
    /// registry lock and must not block.
    ///
    /// If the key's in-flight fetch produces a different value type, the
    /// caller cannot join it; a separate, unregistered fetch is started.
    pub(crate) fn join_or_start<V, R, M, Fut>(&self, key: &str, recheck: R, make: M) -> Flight<V>
    where
        V: Clone + Send + Sync + 'static,
        R: FnOnce() -> Option<V>,
        M: FnOnce(Ticket) -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut slots = lock(&self.slots);

        if let Some(slot) = slots.by_key.get(key) {
            if let Some(fetch) = slot.fetch.downcast_ref::<SharedFetch<V>>() {
                return Flight::Joined(fetch.clone());
            }
            drop(slots);
            debug!(key, "in-flight fetch has a different value type, fetching separately");
            let ticket = Ticket {
                slots: None,
                key: key.to_string(),
                id: 0,
            };
            return Flight::Started(spawn_shared(ticket.clone(), make(ticket)));
        }

        if let Some(value) = recheck() {
            return Flight::Ready(value);
        }

        slots.next_id += 1;
        let ticket = Ticket {
            slots: Some(Arc::clone(&self.slots)),
            key: key.to_string(),
            id: slots.next_id,
        };
        let task = make(ticket.clone());
        let fetch = spawn_shared(ticket.clone(), task);
        slots.by_key.insert(
            key.to_string(),
            Slot {
                id: ticket.id,
                fetch: Box::new(fetch.clone()),
            },
        );
        Flight::Started(fetch)
    }
}

/// Spawn `task` and expose its result as a shared future.
///
/// The slot is released by the task itself, after `task` (which stores the
/// value) has finished, so a caller never sees neither the slot nor the
/// stored value.
fn spawn_shared<V, Fut>(ticket: Ticket, task: Fut) -> SharedFetch<V>
where
    V: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<V>> + Send + 'static,
{
    let key = ticket.key.clone();
    let guard = Deregister(ticket);
    let handle = tokio::spawn(async move {
        let _guard = guard;
        task.await
    });

    async move {
        match handle.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(PunchclockError::FetchAborted(key)),
        }
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn second_caller_joins_first_fetch() {
        let registry = PendingRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let start = |calls: Arc<AtomicUsize>| {
            move |_ticket: Ticket| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, PunchclockError>(42u32)
            }
        };

        let a = registry.join_or_start("k", || None, start(Arc::clone(&calls)));
        let b = registry.join_or_start("k", || None, start(Arc::clone(&calls)));
        assert!(matches!(a, Flight::Started(_)));
        assert!(matches!(b, Flight::Joined(_)));
        assert_eq!(registry.len(), 1);

        let (a, b) = tokio::join!(a.outcome(), b.outcome());
        assert_eq!(a.unwrap(), 42);
        assert_eq!(b.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn slot_removed_after_failure() {
        let registry = PendingRegistry::new();
        let flight = registry.join_or_start("k", || None, |_ticket| async {
            Err::<u32, _>(PunchclockError::NotFound("x".into()))
        });
        assert!(flight.outcome().await.is_err());
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn recheck_short_circuits() {
        let registry = PendingRegistry::new();
        let fetched = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fetched);
        let flight = registry.join_or_start("k", || Some(7u32), move |_ticket| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(0u32)
        });
        assert!(matches!(flight, Flight::Ready(7)));
        assert_eq!(registry.len(), 0);
        assert_eq!(fetched.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mismatched_type_fetches_separately() {
        let registry = PendingRegistry::new();
        let a = registry.join_or_start("k", || None, |_ticket| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(1u32)
        });
        let b = registry.join_or_start("k", || None, |ticket: Ticket| async move {
            assert!(ticket.is_current());
            Ok("text".to_string())
        });
        assert!(matches!(b, Flight::Started(_)));
        assert_eq!(b.outcome().await.unwrap(), "text");
        assert_eq!(a.outcome().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cleared_ticket_is_not_current() {
        let registry = PendingRegistry::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let flight = registry.join_or_start("k", || None, |ticket: Ticket| async move {
            let _ = rx.await;
            Ok(ticket.is_current())
        });
        registry.clear();
        assert_eq!(registry.len(), 0);
        let _ = tx.send(());
        assert!(!flight.outcome().await.unwrap());
    }

    #[tokio::test]
    async fn forget_orphans_only_matching_keys() {
        let registry = PendingRegistry::new();
        let (tx, rx) = tokio::sync::watch::channel(false);

        let start = |mut rx: tokio::sync::watch::Receiver<bool>| {
            move |ticket: Ticket| async move {
                let _ = rx.wait_for(|go| *go).await;
                Ok(ticket.is_current())
            }
        };
        let running = registry.join_or_start("running:ws1:u1", || None, start(rx.clone()));
        let other = registry.join_or_start("running:ws2:u1", || None, start(rx.clone()));
        let tags = registry.join_or_start("tags:ws1", || None, start(rx));
        assert_eq!(registry.len(), 3);

        assert_eq!(registry.forget(|key| key.contains("running:ws1:")), 1);
        assert_eq!(registry.len(), 2);

        let _ = tx.send(true);
        assert!(!running.outcome().await.unwrap());
        assert!(other.outcome().await.unwrap());
        assert!(tags.outcome().await.unwrap());
    }

    #[tokio::test]
    async fn forgotten_key_starts_a_fresh_fetch() {
        let registry = PendingRegistry::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let first = registry.join_or_start("k", || None, |_ticket| async move {
            let _ = rx.await;
            Ok(1u32)
        });
        registry.forget(|key| key == "k");

        let second = registry.join_or_start("k", || None, |_ticket| async { Ok(2u32) });
        assert!(matches!(second, Flight::Started(_)));
        assert_eq!(second.outcome().await.unwrap(), 2);

        let _ = tx.send(());
        assert_eq!(first.outcome().await.unwrap(), 1);
    }
}
