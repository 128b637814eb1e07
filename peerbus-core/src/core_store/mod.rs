//! Replicated key-value data stores
//!
//! A store is either a master (authoritative, backed by a storage backend)
//! or a clone (cached replica of a master elsewhere). The
//! [`StoreRegistry`] owns all of them; everything else holds a
//! [`StoreHandle`].

pub mod backend;
pub mod clone;
pub mod errors;
pub mod handle;
pub mod master;
pub mod protocol;
pub mod query;
pub mod registry;

pub use backend::{Backend, BackendOptions, BackendType};
pub use clone::{CloneOptions, CloneStore, Delivery};
pub use errors::{StoreError, StoreResult};
pub use handle::{StoreHandle, StoreKey};
pub use master::MasterStore;
pub use protocol::{Change, Mutation, StoreCommand, StoreUpdate};
pub use query::{
    oneshot_callback, PendingQueries, QueryCallback, QueryError, QueryOutcome, RequestId,
    StoreQuery,
};
pub use registry::{RoleKind, StoreRegistry, StoreResponse, TableEdit};
