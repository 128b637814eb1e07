//! Master store: authoritative content on top of a storage backend

use super::backend::Backend;
use super::errors::{StoreError, StoreResult};
use super::protocol::{add_numeric, zero_like, Change, Mutation};
use super::query::{QueryOutcome, StoreQuery};
use crate::core_wire::Data;
use std::fmt;
use tracing::warn;

pub struct MasterStore {
    name: String,
    backend: Box<dyn Backend>,
}

impl fmt::Debug for MasterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterStore").field("name", &self.name).finish()
    }
}

impl MasterStore {
    pub fn new(name: impl Into<String>, backend: Box<dyn Backend>) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply a mutation and return its effect. An erase of a missing key
    /// has no effect.
    pub fn apply(&mut self, mutation: &Mutation, now: f64) -> StoreResult<Vec<Change>> {
        match mutation {
            Mutation::Put { key, value, expiry } => {
                let expires_at = expiry.map(|e| now + e);
                self.backend.put(key.clone(), value.clone(), expires_at)?;
                Ok(vec![Change::Put {
                    key: key.clone(),
                    value: value.clone(),
                }])
            }
            Mutation::Erase { key } => {
                if self.backend.erase(key)? {
                    Ok(vec![Change::Erase { key: key.clone() }])
                } else {
                    Ok(Vec::new())
                }
            }
            Mutation::Clear => {
                self.backend.clear()?;
                Ok(vec![Change::Clear])
            }
            Mutation::Increment { key, by } => {
                let current = self.backend.get(key)?.unwrap_or_else(|| zero_like(by));
                let value = add_numeric(&current, by).ok_or_else(|| {
                    StoreError::Type(format!(
                        "cannot add {} to {} in store {}",
                        by.type_name(),
                        current.type_name(),
                        self.name
                    ))
                })?;
                self.backend.put(key.clone(), value.clone(), None)?;
                Ok(vec![Change::Put {
                    key: key.clone(),
                    value,
                }])
            }
        }
    }

    pub fn query(&self, query: &StoreQuery) -> QueryOutcome {
        let result = match query {
            StoreQuery::Get(key) => self.backend.get(key).map(|v| match v {
                Some(v) => QueryOutcome::Success(v),
                None => QueryOutcome::NoSuchKey,
            }),
            StoreQuery::Exists(key) => self
                .backend
                .get(key)
                .map(|v| QueryOutcome::Success(Data::Boolean(v.is_some()))),
            StoreQuery::Keys => self
                .backend
                .keys()
                .map(|keys| QueryOutcome::Success(Data::Set(keys.into_iter().collect()))),
        };
        result.unwrap_or_else(|e| {
            warn!(store = %self.name, error = %e, "store query failed");
            QueryOutcome::Failed(e.to_string())
        })
    }

    pub fn entries(&self) -> StoreResult<Vec<(Data, Data)>> {
        self.backend.entries()
    }

    pub fn expire(&mut self, now: f64) -> StoreResult<Vec<Data>> {
        self.backend.expire(now)
    }

    pub fn len(&self) -> StoreResult<usize> {
        self.backend.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::backend::MemoryBackend;

    fn master() -> MasterStore {
        MasterStore::new("test", Box::new(MemoryBackend::new()))
    }

    #[test]
    fn test_put_and_get() {
        let mut m = master();
        let changes = m
            .apply(
                &Mutation::Put {
                    key: Data::from("a"),
                    value: Data::Count(1),
                    expiry: None,
                },
                0.0,
            )
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(
            m.query(&StoreQuery::Get(Data::from("a"))),
            QueryOutcome::Success(Data::Count(1))
        );
        assert_eq!(m.query(&StoreQuery::Get(Data::from("b"))), QueryOutcome::NoSuchKey);
        assert_eq!(
            m.query(&StoreQuery::Exists(Data::from("a"))),
            QueryOutcome::Success(Data::Boolean(true))
        );
    }

    #[test]
    fn test_erase_missing_has_no_effect() {
        let mut m = master();
        let changes = m.apply(&Mutation::Erase { key: Data::from("x") }, 0.0).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_increment() {
        let mut m = master();
        let inc = Mutation::Increment {
            key: Data::from("hits"),
            by: Data::Count(2),
        };
        m.apply(&inc, 0.0).unwrap();
        m.apply(&inc, 0.0).unwrap();
        assert_eq!(
            m.query(&StoreQuery::Get(Data::from("hits"))),
            QueryOutcome::Success(Data::Count(4))
        );

        m.apply(
            &Mutation::Put {
                key: Data::from("name"),
                value: Data::from("x"),
                expiry: None,
            },
            0.0,
        )
        .unwrap();
        let err = m
            .apply(
                &Mutation::Increment {
                    key: Data::from("name"),
                    by: Data::Count(1),
                },
                0.0,
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Type(_)));
    }

    #[test]
    fn test_relative_expiry() {
        let mut m = master();
        m.apply(
            &Mutation::Put {
                key: Data::from("tmp"),
                value: Data::Count(1),
                expiry: Some(10.0),
            },
            100.0,
        )
        .unwrap();
        assert!(m.expire(109.0).unwrap().is_empty());
        assert_eq!(m.expire(110.0).unwrap(), vec![Data::from("tmp")]);
    }
}
