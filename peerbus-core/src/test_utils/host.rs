//! A host that records everything the manager asks of it

use crate::core_host::{Diagnostic, EventSignature, Host, Identifier, Type, Val};
use crate::core_manager::{
    endpoint_info_type, ERROR_CODE_ENUM, ERROR_EVENT, PEER_ADDED_EVENT, PEER_LOST_EVENT,
    PEER_REMOVED_EVENT,
};
use crate::core_wire::{LogCreate, LogWrite};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct RecordingHost {
    events: HashMap<String, EventSignature>,
    identifiers: HashMap<String, Identifier>,
    raised: Vec<(String, Vec<Val>)>,
    diagnostics: Vec<Diagnostic>,
    log_writers: Vec<LogCreate>,
    log_writes: Vec<LogWrite>,
    reject_log_writers: bool,
}

impl RecordingHost {
    /// A host that knows the `Comm::*` status events
    pub fn new() -> Self {
        let mut host = Self::default();
        let peer_params = vec![endpoint_info_type(), Type::String];
        for event in [PEER_ADDED_EVENT, PEER_REMOVED_EVENT, PEER_LOST_EVENT] {
            host.define_event(event, peer_params.clone());
        }
        host.define_event(
            ERROR_EVENT,
            vec![Type::Enum(ERROR_CODE_ENUM.to_string()), Type::String],
        );
        host
    }

    /// A host without any predefined events
    pub fn bare() -> Self {
        Self::default()
    }

    pub fn define_event(&mut self, name: &str, params: Vec<Type>) {
        self.events
            .insert(name.to_string(), EventSignature::new(name, params));
    }

    pub fn define_identifier(&mut self, name: &str, ty: Type, value: Option<Val>) {
        self.identifiers
            .insert(name.to_string(), Identifier { ty, value });
    }

    pub fn reject_log_writers(&mut self) {
        self.reject_log_writers = true;
    }

    /// Argument lists of every raise of `name`, oldest first
    pub fn raised(&self, name: &str) -> Vec<Vec<Val>> {
        self.raised
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, args)| args.clone())
            .collect()
    }

    pub fn raised_count(&self) -> usize {
        self.raised.len()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn identifier(&self, name: &str) -> Option<&Val> {
        self.identifiers.get(name).and_then(|i| i.value.as_ref())
    }

    pub fn log_writers(&self) -> &[LogCreate] {
        &self.log_writers
    }

    pub fn log_writes(&self) -> &[LogWrite] {
        &self.log_writes
    }
}

impl Host for RecordingHost {
    fn lookup_event(&self, name: &str) -> Option<EventSignature> {
        self.events.get(name).cloned()
    }

    fn raise_event(&mut self, name: &str, args: Vec<Val>) {
        self.raised.push((name.to_string(), args));
    }

    fn lookup_identifier(&self, name: &str) -> Option<Identifier> {
        self.identifiers.get(name).cloned()
    }

    fn update_identifier(&mut self, name: &str, value: Val) {
        if let Some(identifier) = self.identifiers.get_mut(name) {
            identifier.value = Some(value);
        }
    }

    fn create_log_writer(&mut self, create: &LogCreate) -> bool {
        if self.reject_log_writers {
            return false;
        }
        self.log_writers.push(create.clone());
        true
    }

    fn write_log(&mut self, write: &LogWrite) -> bool {
        self.log_writes.push(write.clone());
        true
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_knows_comm_events() {
        let host = RecordingHost::new();
        let sig = host.lookup_event(PEER_ADDED_EVENT).unwrap();
        assert_eq!(sig.params.len(), 2);
        assert!(RecordingHost::bare().lookup_event(ERROR_EVENT).is_none());
    }

    #[test]
    fn test_update_only_known_identifiers() {
        let mut host = RecordingHost::bare();
        host.define_identifier("x", Type::Count, None);
        host.update_identifier("x", Val::Count(3));
        host.update_identifier("y", Val::Count(4));
        assert_eq!(host.identifier("x"), Some(&Val::Count(3)));
        assert_eq!(host.identifier("y"), None);
    }
}
