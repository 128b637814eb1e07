/*
    PendingQueries - outstanding store queries awaiting an answer

    A query is keyed by (request id, store key). Request ids are only
    unique within one store, so the store key is part of the identity.

    Every tracked callback is invoked exactly once:
        - with the answer, when the store responds
        - with Timeout, when the deadline passes before an answer
        - with Cancelled, when its store is closed or all stores are cleared

    Inputs:
        - track(handle, request id, callback, deadline)
        - complete(store key, request id, outcome) from store responses
        - expire(now) from the manager's timer run

    Outputs:
        - Callback invocations
*/

use super::handle::{StoreHandle, StoreKey};
use crate::core_wire::Data;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error};

/// Per-store request identifier
pub type RequestId = u64;

/// A read against a store
#[derive(Debug, Clone, PartialEq)]
pub enum StoreQuery {
    Get(Data),
    Exists(Data),
    Keys,
}

/// Result delivered to a query callback
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Success(Data),
    NoSuchKey,
    /// The clone has been disconnected from its master for too long
    Stale,
    Timeout,
    Cancelled,
    Failed(String),
}

impl QueryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, QueryOutcome::Success(_))
    }
}

pub type QueryCallback = Box<dyn FnOnce(QueryOutcome)>;

/// Callback that forwards the outcome into a oneshot channel
pub fn oneshot_callback() -> (QueryCallback, oneshot::Receiver<QueryOutcome>) {
    let (tx, rx) = oneshot::channel();
    let callback: QueryCallback = Box::new(move |outcome: QueryOutcome| {
        let _ = tx.send(outcome);
    });
    (callback, rx)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("query {request_id} on store {store} is already pending")]
    Duplicate { store: String, request_id: RequestId },
}

struct PendingQuery {
    store: String,
    deadline: f64,
    callback: QueryCallback,
}

#[derive(Default)]
pub struct PendingQueries {
    queries: HashMap<(RequestId, StoreKey), PendingQuery>,
}

impl PendingQueries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(
        &mut self,
        handle: &StoreHandle,
        request_id: RequestId,
        deadline: f64,
        callback: QueryCallback,
    ) -> Result<(), QueryError> {
        let key = (request_id, handle.key());
        if self.queries.contains_key(&key) {
            error!(store = handle.name(), request_id, "duplicate pending store query");
            return Err(QueryError::Duplicate {
                store: handle.name().to_string(),
                request_id,
            });
        }
        self.queries.insert(
            key,
            PendingQuery {
                store: handle.name().to_string(),
                deadline,
                callback,
            },
        );
        Ok(())
    }

    /// Hand a response to its callback. Returns false if nothing was waiting.
    pub fn complete(&mut self, store: StoreKey, request_id: RequestId, outcome: QueryOutcome) -> bool {
        match self.queries.remove(&(request_id, store)) {
            Some(pending) => {
                (pending.callback)(outcome);
                true
            }
            None => {
                debug!(request_id, "response for unknown store query");
                false
            }
        }
    }

    /// Time out every query whose deadline is at or before `now`
    pub fn expire(&mut self, now: f64) -> usize {
        let mut overdue: Vec<(RequestId, StoreKey)> = self
            .queries
            .iter()
            .filter(|(_, q)| q.deadline <= now)
            .map(|(k, _)| *k)
            .collect();
        overdue.sort();
        self.finish(overdue, QueryOutcome::Timeout)
    }

    pub fn cancel_store(&mut self, store: StoreKey) -> usize {
        let mut keys: Vec<_> = self.queries.keys().filter(|k| k.1 == store).copied().collect();
        keys.sort();
        self.finish(keys, QueryOutcome::Cancelled)
    }

    pub fn cancel_all(&mut self) -> usize {
        let mut keys: Vec<_> = self.queries.keys().copied().collect();
        keys.sort();
        self.finish(keys, QueryOutcome::Cancelled)
    }

    fn finish(&mut self, keys: Vec<(RequestId, StoreKey)>, outcome: QueryOutcome) -> usize {
        let mut n = 0;
        for key in keys {
            if let Some(pending) = self.queries.remove(&key) {
                debug!(store = %pending.store, request_id = key.0, ?outcome, "store query finished without answer");
                (pending.callback)(outcome.clone());
                n += 1;
            }
        }
        n
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn is_pending(&self, store: StoreKey, request_id: RequestId) -> bool {
        self.queries.contains_key(&(request_id, store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<QueryOutcome>>>, impl Fn() -> QueryCallback) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let make = move || {
            let s = s.clone();
            Box::new(move |o: QueryOutcome| s.borrow_mut().push(o)) as QueryCallback
        };
        (seen, make)
    }

    #[test]
    fn test_complete_invokes_once() {
        let (seen, cb) = recorder();
        let handle = StoreHandle::new("s", StoreKey::next());
        let mut pending = PendingQueries::new();

        pending.track(&handle, 1, 10.0, cb()).unwrap();
        assert!(pending.complete(handle.key(), 1, QueryOutcome::NoSuchKey));
        assert!(!pending.complete(handle.key(), 1, QueryOutcome::NoSuchKey));
        assert_eq!(*seen.borrow(), vec![QueryOutcome::NoSuchKey]);
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let (seen, cb) = recorder();
        let handle = StoreHandle::new("s", StoreKey::next());
        let mut pending = PendingQueries::new();

        pending.track(&handle, 7, 10.0, cb()).unwrap();
        let err = pending.track(&handle, 7, 10.0, cb()).unwrap_err();
        assert_eq!(
            err,
            QueryError::Duplicate {
                store: "s".into(),
                request_id: 7
            }
        );
        assert_eq!(pending.len(), 1);

        pending.cancel_all();
        assert_eq!(*seen.borrow(), vec![QueryOutcome::Cancelled]);
    }

    #[test]
    fn test_same_id_on_different_stores() {
        let (_seen, cb) = recorder();
        let a = StoreHandle::new("a", StoreKey::next());
        let b = StoreHandle::new("b", StoreKey::next());
        let mut pending = PendingQueries::new();

        pending.track(&a, 1, 10.0, cb()).unwrap();
        pending.track(&b, 1, 10.0, cb()).unwrap();
        assert_eq!(pending.cancel_store(a.key()), 1);
        assert!(pending.is_pending(b.key(), 1));
    }

    #[test]
    fn test_expire() {
        let (seen, cb) = recorder();
        let handle = StoreHandle::new("s", StoreKey::next());
        let mut pending = PendingQueries::new();

        pending.track(&handle, 1, 5.0, cb()).unwrap();
        pending.track(&handle, 2, 50.0, cb()).unwrap();
        assert_eq!(pending.expire(4.9), 0);
        assert_eq!(pending.expire(5.0), 1);
        assert_eq!(*seen.borrow(), vec![QueryOutcome::Timeout]);
        assert!(pending.is_pending(handle.key(), 2));
    }

    #[tokio::test]
    async fn test_oneshot_callback() {
        let (callback, rx) = oneshot_callback();
        callback(QueryOutcome::Success(Data::Count(1)));
        assert_eq!(rx.await.unwrap(), QueryOutcome::Success(Data::Count(1)));
    }
}
