//! Data store management and queries
//!
//! Thin layer over the store registry that adds the manager's clock, the
//! query deadline and the pending query tracker. Queries are answered on
//! the next `process()`, never from inside the call that issued them.

use super::errors::ManagerResult;
use super::manager::Manager;
use crate::core_host::{Host, TableRef};
use crate::core_store::{
    BackendOptions, BackendType, CloneOptions, Delivery, Mutation, QueryCallback, RequestId,
    RoleKind, StoreHandle, StoreQuery, TableEdit,
};
use crate::core_transport::Transport;
use crate::core_wire::Data;
use std::time::Duration;
use tracing::debug;

impl<T: Transport, H: Host> Manager<T, H> {
    pub fn make_master(
        &mut self,
        name: &str,
        backend: BackendType,
        options: &BackendOptions,
    ) -> ManagerResult<StoreHandle> {
        Ok(self
            .stores
            .make_master(name, backend, options, &mut self.transport)?)
    }

    pub fn make_clone(&mut self, name: &str, options: CloneOptions) -> ManagerResult<StoreHandle> {
        let now = self.now();
        Ok(self
            .stores
            .make_clone(name, options, &mut self.transport, now)?)
    }

    /// Clone options from the `stores` configuration section
    pub fn default_clone_options(&self) -> CloneOptions {
        self.config.stores.clone_options()
    }

    pub fn lookup_store(&self, name: &str) -> Option<StoreHandle> {
        self.stores.lookup(name)
    }

    pub fn store_role(&self, handle: &StoreHandle) -> ManagerResult<RoleKind> {
        Ok(self.stores.role(handle)?)
    }

    /// Whether a clone is synchronized with its master; `None` for masters
    pub fn clone_connected(&self, handle: &StoreHandle) -> ManagerResult<Option<bool>> {
        Ok(self.stores.clone_connected(handle)?)
    }

    /// Close a store. Its pending queries are cancelled before this returns.
    pub fn close_store(&mut self, name: &str) -> bool {
        match self.stores.close(name, &mut self.transport) {
            Some(key) => {
                let cancelled = self.pending.cancel_store(key);
                debug!(store = name, cancelled, "store closed");
                true
            }
            None => false,
        }
    }

    /// Bind a host table to a store name
    pub fn add_forwarded_store(&mut self, name: &str, table: TableRef) -> ManagerResult<()> {
        Ok(self.stores.add_forwarded(name, table)?)
    }

    pub fn forwarded_table(&self, name: &str) -> Option<TableRef> {
        self.stores.forwarded_table(name)
    }

    /// Cancel every pending query, then close every store
    pub fn clear_stores(&mut self) -> usize {
        let cancelled = self.pending.cancel_all();
        let closed = self.stores.clear(&mut self.transport).len();
        debug!(cancelled, closed, "cleared stores");
        closed
    }

    /// Register the callback for a query; it fires once with the answer, a
    /// timeout after `manager.query_timeout`, or a cancellation
    pub fn track_store_query(
        &mut self,
        handle: &StoreHandle,
        request_id: RequestId,
        callback: QueryCallback,
    ) -> ManagerResult<()> {
        self.stores.role(handle)?;
        let deadline = self.now() + self.config.manager.query_timeout.as_secs_f64();
        self.pending.track(handle, request_id, deadline, callback)?;
        Ok(())
    }

    /// Time out overdue queries. Returns how many were timed out.
    pub fn flush_pending_queries(&mut self) -> usize {
        let now = self.now();
        self.pending.expire(now)
    }

    /// Insert or replace `key`. An expiry is relative to the manager clock.
    pub fn store_put(
        &mut self,
        handle: &StoreHandle,
        key: Data,
        value: Data,
        expiry: Option<Duration>,
    ) -> ManagerResult<Delivery> {
        let mutation = Mutation::Put {
            key,
            value,
            expiry: expiry.map(|e| e.as_secs_f64()),
        };
        self.mutate(handle, mutation)
    }

    pub fn store_erase(&mut self, handle: &StoreHandle, key: Data) -> ManagerResult<Delivery> {
        self.mutate(handle, Mutation::Erase { key })
    }

    pub fn store_clear(&mut self, handle: &StoreHandle) -> ManagerResult<Delivery> {
        self.mutate(handle, Mutation::Clear)
    }

    /// Add `by` to a numeric value; a missing key counts as zero
    pub fn store_increment(
        &mut self,
        handle: &StoreHandle,
        key: Data,
        by: Data,
    ) -> ManagerResult<Delivery> {
        self.mutate(handle, Mutation::Increment { key, by })
    }

    fn mutate(&mut self, handle: &StoreHandle, mutation: Mutation) -> ManagerResult<Delivery> {
        let now = self.now();
        Ok(self
            .stores
            .mutate(handle, mutation, &mut self.transport, now)?)
    }

    /// Apply an edit made on a forwarded host table to its store
    pub fn forward_table_edit(&mut self, name: &str, edit: TableEdit) -> ManagerResult<Delivery> {
        let now = self.now();
        Ok(self
            .stores
            .forward_table_edit(name, edit, &mut self.transport, now)?)
    }

    pub fn store_get(
        &mut self,
        handle: &StoreHandle,
        key: Data,
        callback: QueryCallback,
    ) -> ManagerResult<RequestId> {
        self.query(handle, StoreQuery::Get(key), callback)
    }

    pub fn store_exists(
        &mut self,
        handle: &StoreHandle,
        key: Data,
        callback: QueryCallback,
    ) -> ManagerResult<RequestId> {
        self.query(handle, StoreQuery::Exists(key), callback)
    }

    pub fn store_keys(
        &mut self,
        handle: &StoreHandle,
        callback: QueryCallback,
    ) -> ManagerResult<RequestId> {
        self.query(handle, StoreQuery::Keys, callback)
    }

    fn query(
        &mut self,
        handle: &StoreHandle,
        query: StoreQuery,
        callback: QueryCallback,
    ) -> ManagerResult<RequestId> {
        let now = self.now();
        let key = handle.key();
        let pending = &self.pending;
        let request_id = self
            .stores
            .allocate_request(handle, |id| pending.is_pending(key, id))?;
        self.track_store_query(handle, request_id, callback)?;
        self.stores.answer(handle, request_id, &query, now)?;
        Ok(request_id)
    }
}
