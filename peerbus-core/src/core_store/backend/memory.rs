use super::Backend;
use crate::core_store::errors::StoreResult;
use crate::core_wire::Data;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: BTreeMap<Data, (Data, Option<f64>)>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Backend for MemoryBackend {
    fn put(&mut self, key: Data, value: Data, expiry: Option<f64>) -> StoreResult<()> {
        self.entries.insert(key, (value, expiry));
        Ok(())
    }

    fn get(&self, key: &Data) -> StoreResult<Option<Data>> {
        Ok(self.entries.get(key).map(|(v, _)| v.clone()))
    }

    fn erase(&mut self, key: &Data) -> StoreResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    fn clear(&mut self) -> StoreResult<()> {
        self.entries.clear();
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<Data>> {
        Ok(self.entries.keys().cloned().collect())
    }

    fn entries(&self) -> StoreResult<Vec<(Data, Data)>> {
        Ok(self
            .entries
            .iter()
            .map(|(k, (v, _))| (k.clone(), v.clone()))
            .collect())
    }

    fn expire(&mut self, now: f64) -> StoreResult<Vec<Data>> {
        let expired: Vec<Data> = self
            .entries
            .iter()
            .filter(|(_, (_, expiry))| expiry.is_some_and(|t| t <= now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        Ok(expired)
    }

    fn len(&self) -> StoreResult<usize> {
        Ok(self.entries.len())
    }
}
