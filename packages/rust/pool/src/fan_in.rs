//! Key-scoped fan-in: detect when every member of a group has completed and
//! submit exactly one aggregation task for it.
//!
//! Group lifecycle is `UNSEEN -> ACTIVE -> REDUCED`. A group is created lazily
//! by the first member to arrive, using double-checked locking: a read-only
//! lookup first, then the creation lock and a re-check before inserting. The
//! creation lock serializes only that race; member recording uses the group's
//! own lock, and no path ever holds two group locks at once.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use versebatch_shared::{Result, VersebatchError};

use crate::sink::OutputSink;
use crate::worker::WorkerPool;

/// Second-stage operation run once per completed group.
pub trait Aggregator<K, V>: Send + Sync + 'static {
    type Output: Send + 'static;

    /// Combine a group's member values, ordered by member index.
    fn aggregate(
        &self,
        key: K,
        members: Vec<V>,
    ) -> impl Future<Output = Result<Self::Output>> + Send;
}

/// Aggregation output delivered to the sink, one per group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupResult<K, O> {
    pub key: K,
    pub output: O,
}

/// What recording one member did to its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberOutcome {
    /// Recorded; the group is still waiting for members.
    Pending { received: usize, total: usize },
    /// This member completed the group and its aggregation was submitted.
    Reduced,
    /// The index was already recorded; the value was dropped.
    Duplicate,
    /// The group was already reduced; the value was dropped.
    AlreadyReduced,
}

struct Group<V> {
    total: usize,
    state: Mutex<GroupState<V>>,
}

struct GroupState<V> {
    members: BTreeMap<usize, V>,
    reduced: bool,
}

/// Groups member results by key and submits one aggregation per full group.
///
/// Owned by the pipeline that drives it and shared by reference (`Arc`) with
/// the continuations that feed it.
pub struct FanInCoordinator<K, V, A, S> {
    pool: WorkerPool,
    aggregator: Arc<A>,
    sink: Arc<S>,
    groups: RwLock<HashMap<K, Arc<Group<V>>>>,
    /// Guards group creation only, never member recording.
    creation_lock: Mutex<()>,
}

impl<K, V, A, S> FanInCoordinator<K, V, A, S>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
    V: Send + 'static,
    A: Aggregator<K, V>,
    S: OutputSink<GroupResult<K, A::Output>> + 'static,
{
    pub fn new(pool: WorkerPool, aggregator: A, sink: Arc<S>) -> Self {
        Self {
            pool,
            aggregator: Arc::new(aggregator),
            sink,
            groups: RwLock::new(HashMap::new()),
            creation_lock: Mutex::new(()),
        }
    }

    /// Record member `index` of group `key`, whose size is `total`.
    ///
    /// The completeness check and the flip to reduced happen under the same
    /// lock as the insertion, so exactly one caller observes completion.
    pub async fn on_member(
        &self,
        key: K,
        index: usize,
        total: usize,
        value: V,
    ) -> Result<MemberOutcome> {
        if total == 0 {
            return Err(VersebatchError::config(format!(
                "group '{key}' has no members to wait for"
            )));
        }
        if index >= total {
            return Err(VersebatchError::validation(format!(
                "member index {index} out of range for group '{key}' of {total}"
            )));
        }

        let group = self.group(&key, total).await?;
        if group.total != total {
            return Err(VersebatchError::config(format!(
                "group '{key}' was created with {} members but a member reported {total}",
                group.total
            )));
        }

        let mut state = group.state.lock().await;

        if state.reduced {
            warn!(%key, index, "member arrived after group was reduced");
            return Ok(MemberOutcome::AlreadyReduced);
        }
        if state.members.contains_key(&index) {
            warn!(%key, index, "duplicate member ignored");
            return Ok(MemberOutcome::Duplicate);
        }

        state.members.insert(index, value);
        let received = state.members.len();
        debug!(%key, index, received, total, "member recorded");

        // Indices are unique and below `total`, so a full count means every
        // index in [0, total) is present.
        if received < total {
            return Ok(MemberOutcome::Pending { received, total });
        }

        state.reduced = true;
        let members: Vec<V> = std::mem::take(&mut state.members).into_values().collect();
        self.submit_aggregation(key, members);

        Ok(MemberOutcome::Reduced)
    }

    /// Number of groups seen so far.
    pub fn group_count(&self) -> usize {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Keys of groups that never completed, e.g. for end-of-run diagnostics.
    pub async fn unreduced_groups(&self) -> Vec<K> {
        let groups: Vec<(K, Arc<Group<V>>)> = self
            .groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, g)| (k.clone(), Arc::clone(g)))
            .collect();

        let mut unreduced = Vec::new();
        for (key, group) in groups {
            if !group.state.lock().await.reduced {
                unreduced.push(key);
            }
        }
        unreduced
    }

    fn lookup(&self, key: &K) -> Option<Arc<Group<V>>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    async fn group(&self, key: &K, total: usize) -> Result<Arc<Group<V>>> {
        // Fast path: no creation lock once the group exists.
        if let Some(group) = self.lookup(key) {
            return Ok(group);
        }

        let _creating = self.creation_lock.lock().await;

        // Correctness comes from this re-check under the creation lock.
        if let Some(group) = self.lookup(key) {
            return Ok(group);
        }

        let group = Arc::new(Group {
            total,
            state: Mutex::new(GroupState {
                members: BTreeMap::new(),
                reduced: false,
            }),
        });
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), Arc::clone(&group));
        debug!(%key, total, "group created");

        Ok(group)
    }

    fn submit_aggregation(&self, key: K, members: Vec<V>) {
        info!(%key, members = members.len(), "group complete, submitting aggregation");

        let aggregator = Arc::clone(&self.aggregator);
        let sink = Arc::clone(&self.sink);
        let task_key = key.clone();

        self.pool.submit(
            async move { aggregator.aggregate(task_key, members).await },
            move |output| async move {
                match output {
                    Some(output) => sink.emit(GroupResult { key, output }),
                    None => {
                        warn!(%key, "aggregation produced no result");
                        Ok(())
                    }
                }
            },
        );
    }
}
