//! Stale-marking bridge between inbound changes and the client data cache.
//!
//! Nothing here refetches. A key is flagged stale and the next read through
//! the REST layer goes to the network.

use std::collections::BTreeMap;
use std::sync::Arc;

use ledgerline_proto::{ClientId, ProjectId, QueryKey, TaskId};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace};

const STALE_CHANNEL_CAPACITY: usize = 256;

/// Seam to whatever owns cached query results.
pub trait QueryCache: Send + Sync + 'static {
    /// Marks `key` and every key it prefixes stale. Returns `false` when
    /// nothing changed.
    fn invalidate(&self, key: &QueryKey) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Fresh,
    Stale,
}

/// In-process query cache bookkeeping.
///
/// Only keys a view has actually fetched are tracked. Invalidating one flips
/// it and every tracked key it prefixes to stale and announces each of them
/// on a broadcast channel. A key nobody fetched is announced but not stored,
/// since its next read has to hit the server anyway.
pub struct QueryStore {
    entries: Mutex<BTreeMap<QueryKey, Freshness>>,
    stale_tx: broadcast::Sender<QueryKey>,
}

impl QueryStore {
    pub fn new() -> Self {
        let (stale_tx, _) = broadcast::channel(STALE_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(BTreeMap::new()),
            stale_tx,
        }
    }

    /// Records a completed fetch; the key is fresh until invalidated.
    pub fn record_fetch(&self, key: QueryKey) {
        self.entries.lock().insert(key, Freshness::Fresh);
    }

    /// True when the next read of `key` has to hit the server.
    pub fn needs_fetch(&self, key: &QueryKey) -> bool {
        !matches!(self.entries.lock().get(key), Some(Freshness::Fresh))
    }

    /// True only for a tracked key that was invalidated since its last fetch.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        matches!(self.entries.lock().get(key), Some(Freshness::Stale))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
        self.stale_tx.subscribe()
    }

    fn announce(&self, key: QueryKey) {
        // no receivers is fine: nobody is rendering that query
        let _ = self.stale_tx.send(key);
    }
}

impl Default for QueryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache for QueryStore {
    fn invalidate(&self, key: &QueryKey) -> bool {
        let (tracked, newly_stale) = {
            let mut entries = self.entries.lock();
            let tracked = entries.contains_key(key);
            // keys sharing a prefix sort contiguously, starting at the prefix
            let newly_stale: Vec<QueryKey> = entries
                .range_mut(key.clone()..)
                .take_while(|(candidate, _)| candidate.starts_with(key))
                .filter(|(_, freshness)| **freshness == Freshness::Fresh)
                .map(|(candidate, freshness)| {
                    *freshness = Freshness::Stale;
                    candidate.clone()
                })
                .collect();
            (tracked, newly_stale)
        };

        if !tracked {
            self.announce(key.clone());
        }
        let changed = !newly_stale.is_empty();
        for stale in newly_stale {
            self.announce(stale);
        }
        changed
    }
}

/// Cache double that records every invalidation call.
#[derive(Debug, Default, Clone)]
pub struct RecordingCache {
    calls: Arc<Mutex<Vec<QueryKey>>>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<QueryKey> {
        self.calls.lock().clone()
    }

    pub fn count(&self, key: &QueryKey) -> usize {
        self.calls.lock().iter().filter(|call| *call == key).count()
    }
}

impl QueryCache for RecordingCache {
    fn invalidate(&self, key: &QueryKey) -> bool {
        self.calls.lock().push(key.clone());
        true
    }
}

/// Maps "this entity changed" to the query keys the REST layer reads it by.
///
/// Shared by the router (remote changes) and the broadcaster (local ones) so
/// both sides name queries the same way.
#[derive(Clone)]
pub struct Invalidator {
    cache: Arc<dyn QueryCache>,
}

impl Invalidator {
    pub fn new(cache: Arc<dyn QueryCache>) -> Self {
        Self { cache }
    }

    pub fn task_changed(&self, task: TaskId, project: Option<ProjectId>) {
        self.mark(QueryKey::tasks());
        self.mark(QueryKey::task(task));
        if let Some(project) = project {
            self.mark(QueryKey::project(project));
        }
    }

    pub fn milestone_changed(&self, project: ProjectId) {
        self.mark(QueryKey::project(project));
        self.mark(QueryKey::project_milestones(project));
    }

    pub fn chat_received(&self) {
        self.mark(QueryKey::messages());
    }

    pub fn project_changed(&self, project: ProjectId) {
        self.mark(QueryKey::projects());
        self.mark(QueryKey::project(project));
    }

    pub fn document_uploaded(&self, project: Option<ProjectId>) {
        self.mark(QueryKey::documents());
        if let Some(project) = project {
            self.mark(QueryKey::project(project));
        }
    }

    pub fn client_changed(&self, client: ClientId) {
        self.mark(QueryKey::clients());
        self.mark(QueryKey::client(client));
    }

    fn mark(&self, key: QueryKey) {
        if self.cache.invalidate(&key) {
            debug!(target: "ledgerline.sync", key = %key, "query marked stale");
        } else {
            trace!(target: "ledgerline.sync", key = %key, "query already stale");
        }
    }
}
