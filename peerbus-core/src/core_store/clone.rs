/*
    CloneStore - local replica of a remote master

    State machine:

        Disconnected --Snapshot--> Connected --master lost--> Disconnected

    A clone starts disconnected; its disconnection begins at creation time.
    While disconnected it re-sends Sync every resync interval. All time
    windows are measured from the start of the current disconnection:

        - stale:  elapsed > stale_interval, queries fail with Stale
        - buffer: elapsed <= mutation_buffer_interval, mutations are queued
                  and replayed in order on the next Snapshot; after the
                  window closes queued mutations are discarded and new ones
                  are dropped

    A negative stale interval means never stale. A non-positive mutation
    buffer interval disables buffering.
*/

use super::protocol::{Change, Mutation};
use super::query::{QueryOutcome, StoreQuery};
use crate::core_transport::NodeId;
use crate::core_wire::Data;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

pub const DEFAULT_RESYNC_INTERVAL: f64 = 10.0;
pub const DEFAULT_STALE_INTERVAL: f64 = 300.0;
pub const DEFAULT_MUTATION_BUFFER_INTERVAL: f64 = 120.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CloneOptions {
    pub resync_interval: Duration,
    /// `None` never goes stale
    pub stale_interval: Option<Duration>,
    /// `None` drops mutations while disconnected
    pub mutation_buffer_interval: Option<Duration>,
}

impl CloneOptions {
    /// Build options from seconds, applying the sign conventions for the
    /// stale and buffer intervals
    pub fn from_secs(resync: f64, stale: f64, mutation_buffer: f64) -> Self {
        Self {
            resync_interval: Duration::from_secs_f64(resync.max(0.0)),
            stale_interval: (stale >= 0.0).then(|| Duration::from_secs_f64(stale)),
            mutation_buffer_interval: (mutation_buffer > 0.0)
                .then(|| Duration::from_secs_f64(mutation_buffer)),
        }
    }
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self::from_secs(
            DEFAULT_RESYNC_INTERVAL,
            DEFAULT_STALE_INTERVAL,
            DEFAULT_MUTATION_BUFFER_INTERVAL,
        )
    }
}

/// What happened to a mutation issued locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Applied to the local master
    Applied,
    /// Forwarded to the master
    Sent,
    /// Queued for replay on reconnection
    Buffered,
    /// Discarded
    Dropped,
}

#[derive(Debug)]
pub struct CloneStore {
    name: String,
    options: CloneOptions,
    cache: BTreeMap<Data, Data>,
    master: Option<NodeId>,
    connected: bool,
    disconnected_since: f64,
    next_resync: f64,
    buffer: VecDeque<Mutation>,
}

impl CloneStore {
    pub fn new(name: impl Into<String>, options: CloneOptions, now: f64) -> Self {
        let next_resync = now + options.resync_interval.as_secs_f64();
        Self {
            name: name.into(),
            options,
            cache: BTreeMap::new(),
            master: None,
            connected: false,
            disconnected_since: now,
            next_resync,
            buffer: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &CloneOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn master(&self) -> Option<&NodeId> {
        self.master.as_ref()
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn entries(&self) -> Vec<(Data, Data)> {
        self.cache
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn disconnected_for(&self, now: f64) -> f64 {
        now - self.disconnected_since
    }

    pub fn is_stale(&self, now: f64) -> bool {
        !self.connected
            && self
                .options
                .stale_interval
                .is_some_and(|s| self.disconnected_for(now) > s.as_secs_f64())
    }

    fn within_buffer_window(&self, now: f64) -> bool {
        self.options
            .mutation_buffer_interval
            .is_some_and(|w| self.disconnected_for(now) <= w.as_secs_f64())
    }

    pub fn submit(&mut self, mutation: Mutation, now: f64) -> Delivery {
        if self.connected {
            return Delivery::Sent;
        }
        if self.within_buffer_window(now) {
            self.buffer.push_back(mutation);
            Delivery::Buffered
        } else {
            self.buffer.clear();
            Delivery::Dropped
        }
    }

    /// Discard queued mutations once the buffer window has closed. Returns
    /// the number discarded.
    pub fn expire_buffer(&mut self, now: f64) -> usize {
        if self.connected || self.buffer.is_empty() || self.within_buffer_window(now) {
            return 0;
        }
        let n = self.buffer.len();
        self.buffer.clear();
        n
    }

    /// Whether a Sync should be sent now; schedules the next attempt
    pub fn resync_due(&mut self, now: f64) -> bool {
        if self.connected || now < self.next_resync {
            return false;
        }
        self.next_resync = now + self.options.resync_interval.as_secs_f64();
        true
    }

    /// Force a Sync on the next opportunity, e.g. after a new peering
    pub fn request_resync(&mut self, now: f64) {
        if !self.connected {
            self.next_resync = now;
        }
    }

    /// Replace the cache with the master's content. Returns the buffered
    /// mutations to replay, in issue order, and the changes to mirror.
    pub fn on_snapshot(
        &mut self,
        master: NodeId,
        entries: Vec<(Data, Data)>,
    ) -> (Vec<Mutation>, Vec<Change>) {
        self.cache = entries.into_iter().collect();
        self.master = Some(master);
        self.connected = true;

        let replay = self.buffer.drain(..).collect();
        let mut changes = vec![Change::Clear];
        changes.extend(self.cache.iter().map(|(k, v)| Change::Put {
            key: k.clone(),
            value: v.clone(),
        }));
        (replay, changes)
    }

    /// Apply changes broadcast by the master. Returns false if they were
    /// ignored because they did not come from this clone's master.
    pub fn on_applied(&mut self, master: &NodeId, changes: &[Change]) -> bool {
        if !self.connected || self.master.as_ref() != Some(master) {
            return false;
        }
        for change in changes {
            match change {
                Change::Put { key, value } => {
                    self.cache.insert(key.clone(), value.clone());
                }
                Change::Erase { key } => {
                    self.cache.remove(key);
                }
                Change::Clear => self.cache.clear(),
            }
        }
        true
    }

    /// Mark the clone disconnected if `node` is its master
    pub fn on_peer_lost(&mut self, node: &NodeId, now: f64) -> bool {
        if !self.connected || self.master.as_ref() != Some(node) {
            return false;
        }
        self.connected = false;
        self.disconnected_since = now;
        self.next_resync = now + self.options.resync_interval.as_secs_f64();
        true
    }

    pub fn query(&self, query: &StoreQuery, now: f64) -> QueryOutcome {
        if self.is_stale(now) {
            return QueryOutcome::Stale;
        }
        match query {
            StoreQuery::Get(key) => match self.cache.get(key) {
                Some(v) => QueryOutcome::Success(v.clone()),
                None => QueryOutcome::NoSuchKey,
            },
            StoreQuery::Exists(key) => {
                QueryOutcome::Success(Data::Boolean(self.cache.contains_key(key)))
            }
            StoreQuery::Keys => QueryOutcome::Success(Data::Set(self.cache.keys().cloned().collect())),
        }
    }
}
