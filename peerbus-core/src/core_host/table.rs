//! Host tables that a data store can be mirrored into

use super::value::{Type, Val};
use crate::core_wire::{data_to_val, val_to_data, CodecResult, Data};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Shared handle to a host table. The manager is single threaded.
pub type TableRef = Rc<RefCell<HostTable>>;

#[derive(Debug, Clone, PartialEq)]
pub struct TableEntry {
    pub key: Val,
    pub value: Option<Val>,
}

/// A host table (or set, when it has no value type) indexed by the wire
/// form of its keys
#[derive(Debug, Clone)]
pub struct HostTable {
    key_type: Type,
    value_type: Option<Type>,
    entries: BTreeMap<Data, TableEntry>,
}

impl HostTable {
    pub fn new(key_type: Type, value_type: Type) -> Self {
        Self {
            key_type,
            value_type: Some(value_type),
            entries: BTreeMap::new(),
        }
    }

    pub fn new_set(key_type: Type) -> Self {
        Self {
            key_type,
            value_type: None,
            entries: BTreeMap::new(),
        }
    }

    pub fn shared(self) -> TableRef {
        Rc::new(RefCell::new(self))
    }

    pub fn key_type(&self) -> &Type {
        &self.key_type
    }

    pub fn value_type(&self) -> Option<&Type> {
        self.value_type.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.value_type.is_none()
    }

    pub fn insert(&mut self, key: Val, value: Option<Val>) -> CodecResult<()> {
        let index = val_to_data(&key)?;
        self.entries.insert(index, TableEntry { key, value });
        Ok(())
    }

    pub fn get(&self, key: &Val) -> Option<&TableEntry> {
        let index = val_to_data(key).ok()?;
        self.entries.get(&index)
    }

    pub fn get_data(&self, key: &Data) -> Option<&TableEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &Val) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &Val) -> Option<TableEntry> {
        let index = val_to_data(key).ok()?;
        self.entries.remove(&index)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableEntry> {
        self.entries.values()
    }

    /// Mirror a store entry into the table, converting with the table's types
    pub(crate) fn apply_data(&mut self, key: &Data, value: &Data) -> CodecResult<()> {
        let key_val = data_to_val(key, &self.key_type)?;
        let value_val = match &self.value_type {
            Some(ty) => Some(data_to_val(value, ty)?),
            None => None,
        };
        self.entries.insert(
            key.clone(),
            TableEntry {
                key: key_val,
                value: value_val,
            },
        );
        Ok(())
    }

    pub(crate) fn remove_data(&mut self, key: &Data) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut table = HostTable::new(Type::String, Type::Count);
        table.insert(Val::from("a"), Some(Val::Count(1))).unwrap();

        let entry = table.get(&Val::from("a")).unwrap();
        assert_eq!(entry.value, Some(Val::Count(1)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_apply_data_converts() {
        let mut table = HostTable::new(Type::String, Type::Count);
        table.apply_data(&Data::from("k"), &Data::Count(7)).unwrap();
        assert_eq!(
            table.get(&Val::from("k")).and_then(|e| e.value.clone()),
            Some(Val::Count(7))
        );

        assert!(table.apply_data(&Data::from("k"), &Data::from("bad")).is_err());
        table.remove_data(&Data::from("k"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_set_ignores_values() {
        let mut set = HostTable::new_set(Type::Count);
        set.apply_data(&Data::Count(1), &Data::None).unwrap();
        assert!(set.is_set());
        assert!(set.contains(&Val::Count(1)));
    }
}
