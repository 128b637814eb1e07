use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_STORE_KEY: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one store instance. A store that is closed
/// and created again under the same name gets a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreKey(u64);

impl StoreKey {
    pub(crate) fn next() -> Self {
        Self(NEXT_STORE_KEY.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Weak reference to a store owned by the registry. It is resolved by
/// name and key on every use and never keeps the store alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreHandle {
    name: String,
    key: StoreKey,
}

impl StoreHandle {
    pub(crate) fn new(name: impl Into<String>, key: StoreKey) -> Self {
        Self {
            name: name.into(),
            key,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> StoreKey {
        self.key
    }
}

impl fmt::Display for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.key.0)
    }
}
