/*
    StoreRegistry - sole owner of every data store on this node

    Responsibilities:
    - Creating master and clone stores under unique names
    - Resolving weak StoreHandles (name + instance key) on every use
    - Running the replication protocol on the reserved store topics
    - Mirroring store content into forwarded host tables
    - Answering queries into a per-store mailbox that the manager drains on
      its next poll

    Inputs:
        - Store API calls from the manager
        - Store topic messages decoded by the dispatch router
        - Peer status changes and timer runs

    Outputs:
        - Publishes on <name>/data/master and <name>/data/clone
        - Host table updates
        - StoreResponse values for the pending query tracker
*/

use super::backend::{open_backend, BackendOptions, BackendType};
use super::clone::{CloneOptions, CloneStore, Delivery};
use super::errors::{StoreError, StoreResult};
use super::handle::{StoreHandle, StoreKey};
use super::master::MasterStore;
use super::protocol::{Change, Mutation, StoreCommand, StoreUpdate};
use super::query::{QueryOutcome, RequestId, StoreQuery};
use crate::core_host::{TableRef, Val};
use crate::core_transport::{NodeId, Transport};
use crate::core_wire::{val_to_data, Data, StoreTopic, Topic};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug)]
pub enum StoreRole {
    Master(MasterStore),
    Clone(CloneStore),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Master,
    Clone,
}

#[derive(Debug)]
struct StoreEntry {
    key: StoreKey,
    role: StoreRole,
    next_request: RequestId,
    responses: VecDeque<(RequestId, QueryOutcome)>,
}

impl StoreEntry {
    fn new(role: StoreRole) -> Self {
        Self {
            key: StoreKey::next(),
            role,
            next_request: 1,
            responses: VecDeque::new(),
        }
    }
}

/// Answer to a store query, ready for its callback
#[derive(Debug, Clone, PartialEq)]
pub struct StoreResponse {
    pub handle: StoreHandle,
    pub request_id: RequestId,
    pub outcome: QueryOutcome,
}

/// An edit made to a forwarded host table
#[derive(Debug, Clone, PartialEq)]
pub enum TableEdit {
    Insert { key: Val, value: Option<Val> },
    Remove { key: Val },
    Clear,
}

pub struct StoreRegistry {
    node: NodeId,
    stores: BTreeMap<String, StoreEntry>,
    forwarded: HashMap<String, TableRef>,
    sqlite_dir: Option<PathBuf>,
}

impl StoreRegistry {
    pub fn new(node: NodeId, sqlite_dir: Option<PathBuf>) -> Self {
        Self {
            node,
            stores: BTreeMap::new(),
            forwarded: HashMap::new(),
            sqlite_dir,
        }
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    pub fn make_master(
        &mut self,
        name: &str,
        backend: BackendType,
        options: &BackendOptions,
        transport: &mut dyn Transport,
    ) -> StoreResult<StoreHandle> {
        if self.stores.contains_key(name) {
            error!(store = name, "store already exists");
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        let backend = open_backend(name, backend, options, self.sqlite_dir.as_deref())?;
        transport.subscribe(Topic::store_master(name).as_str())?;

        let master = MasterStore::new(name, backend);
        let initial = master.entries()?;
        let entry = StoreEntry::new(StoreRole::Master(master));
        let handle = StoreHandle::new(name, entry.key);
        self.stores.insert(name.to_string(), entry);

        mirror_entries(&self.forwarded, name, &initial);
        info!(store = name, "created master store");
        Ok(handle)
    }

    pub fn make_clone(
        &mut self,
        name: &str,
        options: CloneOptions,
        transport: &mut dyn Transport,
        now: f64,
    ) -> StoreResult<StoreHandle> {
        if self.stores.contains_key(name) {
            error!(store = name, "store already exists");
            return Err(StoreError::AlreadyExists(name.to_string()));
        }
        transport.subscribe(Topic::store_clone(name).as_str())?;
        let sync = StoreCommand::Sync { clone: self.node };
        transport.publish(&Topic::store_master(name), sync.into_data())?;

        let entry = StoreEntry::new(StoreRole::Clone(CloneStore::new(name, options, now)));
        let handle = StoreHandle::new(name, entry.key);
        self.stores.insert(name.to_string(), entry);
        info!(store = name, "created clone store");
        Ok(handle)
    }

    pub fn lookup(&self, name: &str) -> Option<StoreHandle> {
        self.stores
            .get(name)
            .map(|entry| StoreHandle::new(name, entry.key))
    }

    pub fn role(&self, handle: &StoreHandle) -> StoreResult<RoleKind> {
        Ok(match self.resolve(handle)?.role {
            StoreRole::Master(_) => RoleKind::Master,
            StoreRole::Clone(_) => RoleKind::Clone,
        })
    }

    /// Clone connection state, `None` for masters
    pub fn clone_connected(&self, handle: &StoreHandle) -> StoreResult<Option<bool>> {
        Ok(match &self.resolve(handle)?.role {
            StoreRole::Master(_) => None,
            StoreRole::Clone(c) => Some(c.is_connected()),
        })
    }

    fn resolve(&self, handle: &StoreHandle) -> StoreResult<&StoreEntry> {
        match self.stores.get(handle.name()) {
            Some(entry) if entry.key == handle.key() => Ok(entry),
            _ => Err(StoreError::Closed(handle.to_string())),
        }
    }

    fn resolve_mut(&mut self, handle: &StoreHandle) -> StoreResult<&mut StoreEntry> {
        resolve_in(&mut self.stores, handle)
    }

    /// Remove a store and its table binding. Returns the instance key so
    /// the caller can cancel queries that were still waiting on it.
    pub fn close(&mut self, name: &str, transport: &mut dyn Transport) -> Option<StoreKey> {
        let entry = self.stores.remove(name)?;
        let topic = match entry.role {
            StoreRole::Master(_) => Topic::store_master(name),
            StoreRole::Clone(_) => Topic::store_clone(name),
        };
        if let Err(e) = transport.unsubscribe(topic.as_str()) {
            debug!(store = name, error = %e, "failed to unsubscribe store topic");
        }
        self.forwarded.remove(name);
        info!(store = name, "closed store");
        Some(entry.key)
    }

    pub fn clear(&mut self, transport: &mut dyn Transport) -> Vec<StoreKey> {
        let names: Vec<String> = self.stores.keys().cloned().collect();
        let mut keys = Vec::with_capacity(names.len());
        for name in &names {
            if let Some(key) = self.close(name, transport) {
                keys.push(key);
            }
        }
        keys
    }

    pub fn add_forwarded(&mut self, name: &str, table: TableRef) -> StoreResult<()> {
        if self.forwarded.contains_key(name) {
            error!(store = name, "store is already forwarded to a table");
            return Err(StoreError::AlreadyForwarded(name.to_string()));
        }
        self.forwarded.insert(name.to_string(), table);

        if let Some(entry) = self.stores.get(name) {
            let entries = match &entry.role {
                StoreRole::Master(m) => m.entries()?,
                StoreRole::Clone(c) => c.entries(),
            };
            mirror_entries(&self.forwarded, name, &entries);
        }
        Ok(())
    }

    pub fn forwarded_table(&self, name: &str) -> Option<TableRef> {
        self.forwarded.get(name).cloned()
    }

    pub fn mutate(
        &mut self,
        handle: &StoreHandle,
        mutation: Mutation,
        transport: &mut dyn Transport,
        now: f64,
    ) -> StoreResult<Delivery> {
        let node = self.node;
        let entry = resolve_in(&mut self.stores, handle)?;
        let name = handle.name();

        match &mut entry.role {
            StoreRole::Master(master) => {
                let changes = master.apply(&mutation, now)?;
                mirror_changes(&self.forwarded, name, &changes);
                if !changes.is_empty() {
                    let update = StoreUpdate::Applied {
                        master: node,
                        changes,
                    };
                    transport.publish(&Topic::store_clone(name), update.into_data())?;
                }
                Ok(Delivery::Applied)
            }
            StoreRole::Clone(clone) => {
                let delivery = clone.submit(mutation.clone(), now);
                match delivery {
                    Delivery::Sent => {
                        let command = StoreCommand::Mutate {
                            origin: node,
                            mutation,
                        };
                        transport.publish(&Topic::store_master(name), command.into_data())?;
                    }
                    Delivery::Buffered => {
                        debug!(store = name, buffered = clone.buffered(), "buffered clone mutation");
                    }
                    Delivery::Dropped => {
                        debug!(store = name, "dropped clone mutation while disconnected");
                    }
                    Delivery::Applied => {}
                }
                Ok(delivery)
            }
        }
    }

    /// Apply an edit made to a forwarded table to its store
    pub fn forward_table_edit(
        &mut self,
        name: &str,
        edit: TableEdit,
        transport: &mut dyn Transport,
        now: f64,
    ) -> StoreResult<Delivery> {
        if !self.forwarded.contains_key(name) {
            return Err(StoreError::NotForwarded(name.to_string()));
        }
        let handle = self
            .lookup(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;

        let mutation = match edit {
            TableEdit::Insert { key, value } => Mutation::Put {
                key: val_to_data(&key)?,
                value: match value {
                    Some(v) => val_to_data(&v)?,
                    None => Data::None,
                },
                expiry: None,
            },
            TableEdit::Remove { key } => Mutation::Erase {
                key: val_to_data(&key)?,
            },
            TableEdit::Clear => Mutation::Clear,
        };
        self.mutate(&handle, mutation, transport, now)
    }

    /// Reserve the store's next request id, skipping ids `is_taken` rejects
    pub fn allocate_request(
        &mut self,
        handle: &StoreHandle,
        mut is_taken: impl FnMut(RequestId) -> bool,
    ) -> StoreResult<RequestId> {
        let entry = self.resolve_mut(handle)?;
        loop {
            let request_id = entry.next_request;
            entry.next_request = entry.next_request.wrapping_add(1).max(1);
            if !is_taken(request_id) {
                return Ok(request_id);
            }
            trace!(store = handle.name(), request_id, "request id in use, skipping");
        }
    }

    /// Answer a query into the store's mailbox under `request_id`. The
    /// answer is handed out by the next `take_responses`.
    pub fn answer(
        &mut self,
        handle: &StoreHandle,
        request_id: RequestId,
        query: &StoreQuery,
        now: f64,
    ) -> StoreResult<()> {
        let entry = self.resolve_mut(handle)?;
        let outcome = match &entry.role {
            StoreRole::Master(m) => m.query(query),
            StoreRole::Clone(c) => c.query(query, now),
        };
        entry.responses.push_back((request_id, outcome));
        Ok(())
    }

    pub fn take_responses(&mut self) -> Vec<StoreResponse> {
        let mut responses = Vec::new();
        for (name, entry) in self.stores.iter_mut() {
            for (request_id, outcome) in entry.responses.drain(..) {
                responses.push(StoreResponse {
                    handle: StoreHandle::new(name.clone(), entry.key),
                    request_id,
                    outcome,
                });
            }
        }
        responses
    }

    /// Handle a message received on a reserved store topic
    pub fn handle_message(
        &mut self,
        topic: StoreTopic<'_>,
        data: Data,
        transport: &mut dyn Transport,
        now: f64,
    ) {
        let name = topic.store_name();
        let result = match topic {
            StoreTopic::Master(_) => match StoreCommand::from_data(data) {
                Ok(command) => self.handle_command(name, command, transport, now),
                Err(e) => {
                    debug!(store = name, error = %e, "dropping undecodable store command");
                    return;
                }
            },
            StoreTopic::Clone(_) => match StoreUpdate::from_data(data) {
                Ok(update) => self.handle_update(name, update, transport),
                Err(e) => {
                    debug!(store = name, error = %e, "dropping undecodable store update");
                    return;
                }
            },
        };
        if let Err(e) = result {
            warn!(store = name, error = %e, "failed to process store message");
        }
    }

    fn handle_command(
        &mut self,
        name: &str,
        command: StoreCommand,
        transport: &mut dyn Transport,
        now: f64,
    ) -> StoreResult<()> {
        let node = self.node;
        let Some(StoreEntry {
            role: StoreRole::Master(master),
            ..
        }) = self.stores.get_mut(name)
        else {
            debug!(store = name, "store command for a store we are not master of");
            return Ok(());
        };

        match command {
            StoreCommand::Sync { clone } => {
                let snapshot = StoreUpdate::Snapshot {
                    master: node,
                    target: clone,
                    entries: master.entries()?,
                };
                debug!(store = name, %clone, "sending snapshot");
                transport.publish(&Topic::store_clone(name), snapshot.into_data())?;
            }
            StoreCommand::Mutate { origin, mutation } => {
                let changes = master.apply(&mutation, now)?;
                mirror_changes(&self.forwarded, name, &changes);
                if !changes.is_empty() {
                    debug!(store = name, %origin, "applied remote mutation");
                    let update = StoreUpdate::Applied {
                        master: node,
                        changes,
                    };
                    transport.publish(&Topic::store_clone(name), update.into_data())?;
                }
            }
        }
        Ok(())
    }

    fn handle_update(
        &mut self,
        name: &str,
        update: StoreUpdate,
        transport: &mut dyn Transport,
    ) -> StoreResult<()> {
        let node = self.node;
        let Some(StoreEntry {
            role: StoreRole::Clone(clone),
            ..
        }) = self.stores.get_mut(name)
        else {
            debug!(store = name, "store update for a store we do not clone");
            return Ok(());
        };

        match update {
            StoreUpdate::Snapshot {
                master,
                target,
                entries,
            } => {
                if target != node {
                    return Ok(());
                }
                let (replay, changes) = clone.on_snapshot(master, entries);
                info!(store = name, %master, entries = clone.len(), replayed = replay.len(), "clone synchronized");
                mirror_changes(&self.forwarded, name, &changes);
                for mutation in replay {
                    let command = StoreCommand::Mutate {
                        origin: node,
                        mutation,
                    };
                    transport.publish(&Topic::store_master(name), command.into_data())?;
                }
            }
            StoreUpdate::Applied { master, changes } => {
                if clone.on_applied(&master, &changes) {
                    mirror_changes(&self.forwarded, name, &changes);
                }
            }
            StoreUpdate::Expired { master, keys } => {
                let changes: Vec<Change> = keys.into_iter().map(|key| Change::Erase { key }).collect();
                if clone.on_applied(&master, &changes) {
                    mirror_changes(&self.forwarded, name, &changes);
                }
            }
        }
        Ok(())
    }

    /// A peer went away; clones of its stores become disconnected
    pub fn on_peer_lost(&mut self, peer: &NodeId, now: f64) {
        for (name, entry) in self.stores.iter_mut() {
            if let StoreRole::Clone(clone) = &mut entry.role {
                if clone.on_peer_lost(peer, now) {
                    info!(store = %name, %peer, "clone lost its master");
                }
            }
        }
    }

    /// A new peering may lead to the master; disconnected clones ask again
    pub fn on_peer_added(&mut self, now: f64) {
        for entry in self.stores.values_mut() {
            if let StoreRole::Clone(clone) = &mut entry.role {
                clone.request_resync(now);
            }
        }
    }

    /// Expire master entries, resync disconnected clones and drop closed
    /// mutation buffers
    pub fn run_timers(&mut self, transport: &mut dyn Transport, now: f64) {
        let node = self.node;
        for (name, entry) in self.stores.iter_mut() {
            match &mut entry.role {
                StoreRole::Master(master) => {
                    let expired = match master.expire(now) {
                        Ok(keys) => keys,
                        Err(e) => {
                            warn!(store = %name, error = %e, "store expiry failed");
                            continue;
                        }
                    };
                    if expired.is_empty() {
                        continue;
                    }
                    debug!(store = %name, count = expired.len(), "expired store entries");
                    let changes: Vec<Change> = expired
                        .iter()
                        .map(|key| Change::Erase { key: key.clone() })
                        .collect();
                    mirror_changes(&self.forwarded, name, &changes);
                    let update = StoreUpdate::Expired {
                        master: node,
                        keys: expired,
                    };
                    if let Err(e) = transport.publish(&Topic::store_clone(name), update.into_data()) {
                        warn!(store = %name, error = %e, "failed to announce expired entries");
                    }
                }
                StoreRole::Clone(clone) => {
                    let dropped = clone.expire_buffer(now);
                    if dropped > 0 {
                        debug!(store = %name, dropped, "discarded buffered clone mutations");
                    }
                    if clone.resync_due(now) {
                        let sync = StoreCommand::Sync { clone: node };
                        if let Err(e) = transport.publish(&Topic::store_master(name), sync.into_data()) {
                            warn!(store = %name, error = %e, "failed to send clone resync");
                        }
                    }
                }
            }
        }
    }
}

fn resolve_in<'a>(
    stores: &'a mut BTreeMap<String, StoreEntry>,
    handle: &StoreHandle,
) -> StoreResult<&'a mut StoreEntry> {
    match stores.get_mut(handle.name()) {
        Some(entry) if entry.key == handle.key() => Ok(entry),
        _ => Err(StoreError::Closed(handle.to_string())),
    }
}

fn with_table(forwarded: &HashMap<String, TableRef>, name: &str, f: impl FnOnce(&TableRef)) {
    if let Some(table) = forwarded.get(name) {
        f(table);
    }
}

/// Copy store entries into the bound table
fn mirror_entries(forwarded: &HashMap<String, TableRef>, name: &str, entries: &[(Data, Data)]) {
    with_table(forwarded, name, |table| {
        let Ok(mut table) = table.try_borrow_mut() else {
            warn!(store = name, "forwarded table is borrowed, skipping update");
            return;
        };
        for (key, value) in entries {
            if let Err(e) = table.apply_data(key, value) {
                warn!(store = name, %key, error = %e, "cannot mirror store entry into table");
            }
        }
    });
}

fn mirror_changes(forwarded: &HashMap<String, TableRef>, name: &str, changes: &[Change]) {
    with_table(forwarded, name, |table| {
        let Ok(mut table) = table.try_borrow_mut() else {
            warn!(store = name, "forwarded table is borrowed, skipping update");
            return;
        };
        for change in changes {
            match change {
                Change::Put { key, value } => {
                    if let Err(e) = table.apply_data(key, value) {
                        warn!(store = name, %key, error = %e, "cannot mirror store entry into table");
                    }
                }
                Change::Erase { key } => table.remove_data(key),
                Change::Clear => table.clear(),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_host::{HostTable, Type};
    use crate::core_transport::MeshNetwork;

    fn put(k: &str, v: u64) -> Mutation {
        Mutation::Put {
            key: Data::from(k),
            value: Data::Count(v),
            expiry: None,
        }
    }

    #[test]
    fn test_duplicate_master_keeps_first() {
        let network = MeshNetwork::new();
        let mut transport = network.endpoint();
        let mut registry = StoreRegistry::new(transport.node_id(), None);

        let first = registry
            .make_master("x", BackendType::Memory, &BackendOptions::default(), &mut transport)
            .unwrap();
        let second =
            registry.make_master("x", BackendType::Memory, &BackendOptions::default(), &mut transport);
        assert!(matches!(second, Err(StoreError::AlreadyExists(_))));
        assert_eq!(registry.lookup("x"), Some(first.clone()));
        assert_eq!(registry.role(&first).unwrap(), RoleKind::Master);
    }

    #[test]
    fn test_stale_handle_after_recreate() {
        let network = MeshNetwork::new();
        let mut transport = network.endpoint();
        let mut registry = StoreRegistry::new(transport.node_id(), None);
        let opts = BackendOptions::default();

        let old = registry.make_master("x", BackendType::Memory, &opts, &mut transport).unwrap();
        assert_eq!(registry.close("x", &mut transport), Some(old.key()));
        let new = registry.make_master("x", BackendType::Memory, &opts, &mut transport).unwrap();

        assert!(matches!(
            registry.mutate(&old, put("a", 1), &mut transport, 0.0),
            Err(StoreError::Closed(_))
        ));
        assert_eq!(
            registry.mutate(&new, put("a", 1), &mut transport, 0.0).unwrap(),
            Delivery::Applied
        );
    }

    #[test]
    fn test_query_answers_in_mailbox() {
        let network = MeshNetwork::new();
        let mut transport = network.endpoint();
        let mut registry = StoreRegistry::new(transport.node_id(), None);
        let handle = registry
            .make_master("x", BackendType::Memory, &BackendOptions::default(), &mut transport)
            .unwrap();
        registry.mutate(&handle, put("a", 1), &mut transport, 0.0).unwrap();

        let id1 = registry.allocate_request(&handle, |_| false).unwrap();
        let id2 = registry.allocate_request(&handle, |_| false).unwrap();
        assert_ne!(id1, id2);
        registry.answer(&handle, id1, &StoreQuery::Get(Data::from("a")), 0.0).unwrap();
        registry.answer(&handle, id2, &StoreQuery::Get(Data::from("b")), 0.0).unwrap();

        let responses = registry.take_responses();
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].outcome, QueryOutcome::Success(Data::Count(1)));
        assert_eq!(responses[1].outcome, QueryOutcome::NoSuchKey);
        assert!(registry.take_responses().is_empty());
    }

    #[test]
    fn test_allocate_skips_taken_ids() {
        let network = MeshNetwork::new();
        let mut transport = network.endpoint();
        let mut registry = StoreRegistry::new(transport.node_id(), None);
        let handle = registry
            .make_master("x", BackendType::Memory, &BackendOptions::default(), &mut transport)
            .unwrap();

        let id = registry.allocate_request(&handle, |id| id <= 2).unwrap();
        assert_eq!(id, 3);
        assert_eq!(registry.allocate_request(&handle, |_| false).unwrap(), 4);
    }

    #[test]
    fn test_forwarded_table_mirrors_master() {
        let network = MeshNetwork::new();
        let mut transport = network.endpoint();
        let mut registry = StoreRegistry::new(transport.node_id(), None);
        let table = HostTable::new(Type::String, Type::Count).shared();

        registry.add_forwarded("x", table.clone()).unwrap();
        assert!(matches!(
            registry.add_forwarded("x", table.clone()),
            Err(StoreError::AlreadyForwarded(_))
        ));

        let handle = registry
            .make_master("x", BackendType::Memory, &BackendOptions::default(), &mut transport)
            .unwrap();
        registry.mutate(&handle, put("a", 1), &mut transport, 0.0).unwrap();
        assert_eq!(table.borrow().len(), 1);

        registry
            .forward_table_edit("x", TableEdit::Remove { key: Val::from("a") }, &mut transport, 0.0)
            .unwrap();
        assert!(table.borrow().is_empty());

        registry.close("x", &mut transport);
        assert!(registry.forwarded_table("x").is_none());
    }

    #[test]
    fn test_table_edit_requires_binding() {
        let network = MeshNetwork::new();
        let mut transport = network.endpoint();
        let mut registry = StoreRegistry::new(transport.node_id(), None);
        registry
            .make_master("x", BackendType::Memory, &BackendOptions::default(), &mut transport)
            .unwrap();

        let result = registry.forward_table_edit("x", TableEdit::Clear, &mut transport, 0.0);
        assert!(matches!(result, Err(StoreError::NotForwarded(_))));
    }
}
