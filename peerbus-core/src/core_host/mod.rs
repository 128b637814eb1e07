//! Host engine interface
//!
//! The manager never owns the event engine. Everything it needs from it
//! (event signatures, raising events, identifiers, log writers and
//! diagnostics) goes through the [`Host`] trait.

pub mod table;
pub mod value;

pub use table::{HostTable, TableEntry, TableRef};
pub use value::{RecordField, Type, Val};

use crate::core_wire::{LogCreate, LogWrite};
use std::fmt;

/// Parameter list of an event known to the host
#[derive(Debug, Clone, PartialEq)]
pub struct EventSignature {
    pub name: String,
    pub params: Vec<Type>,
}

impl EventSignature {
    pub fn new(name: impl Into<String>, params: Vec<Type>) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// Script location a manager call originated from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
}

impl CallSite {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A problem reported back to the host, attributed to a call site when the
/// failing call came from a script
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub call_site: Option<CallSite>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.call_site {
            Some(site) => write!(f, "{}: {}", site, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Identifier as seen by the host
#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub ty: Type,
    pub value: Option<Val>,
}

pub trait Host {
    fn lookup_event(&self, name: &str) -> Option<EventSignature>;

    /// Queue an event for the host's event loop
    fn raise_event(&mut self, name: &str, args: Vec<Val>);

    fn lookup_identifier(&self, name: &str) -> Option<Identifier>;

    fn update_identifier(&mut self, name: &str, value: Val);

    /// Returns false if the host has no writer for the stream
    fn create_log_writer(&mut self, create: &LogCreate) -> bool;

    /// Returns false if the record was rejected
    fn write_log(&mut self, write: &LogWrite) -> bool;

    fn report(&mut self, diagnostic: Diagnostic);
}
