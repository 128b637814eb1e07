//! Host value and type model

use crate::core_wire::Protocol;
use std::fmt;
use std::net::IpAddr;

/// Declared type of a host value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Bool,
    Count,
    Int,
    Double,
    String,
    Addr,
    Subnet,
    Port,
    Time,
    Interval,
    Enum(String),
    Vector(Box<Type>),
    Set(Box<Type>),
    Table(Box<Type>, Box<Type>),
    Record(Vec<RecordField>),
    /// Accepts any value; conversion infers the host value from the data
    Any,
    Event,
    Func,
    Opaque(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordField {
    pub name: String,
    pub ty: Type,
    pub optional: bool,
}

impl RecordField {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: false,
        }
    }

    pub fn optional(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            optional: true,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Bool => f.write_str("bool"),
            Type::Count => f.write_str("count"),
            Type::Int => f.write_str("int"),
            Type::Double => f.write_str("double"),
            Type::String => f.write_str("string"),
            Type::Addr => f.write_str("addr"),
            Type::Subnet => f.write_str("subnet"),
            Type::Port => f.write_str("port"),
            Type::Time => f.write_str("time"),
            Type::Interval => f.write_str("interval"),
            Type::Enum(name) => write!(f, "enum {}", name),
            Type::Vector(inner) => write!(f, "vector of {}", inner),
            Type::Set(inner) => write!(f, "set[{}]", inner),
            Type::Table(k, v) => write!(f, "table[{}] of {}", k, v),
            Type::Record(fields) => {
                f.write_str("record {")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                    if field.optional {
                        f.write_str(" &optional")?;
                    }
                }
                f.write_str("}")
            }
            Type::Any => f.write_str("any"),
            Type::Event => f.write_str("event"),
            Type::Func => f.write_str("func"),
            Type::Opaque(name) => write!(f, "opaque of {}", name),
        }
    }
}

/// A host value
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Bool(bool),
    Count(u64),
    Int(i64),
    Double(f64),
    String(String),
    Addr(IpAddr),
    Subnet(IpAddr, u8),
    Port(u16, Protocol),
    Time(f64),
    Interval(f64),
    Enum { type_name: String, name: String },
    Vector(Vec<Val>),
    Set(Vec<Val>),
    Table(Vec<(Val, Val)>),
    /// Field values in declaration order; `None` for unset optional fields
    Record(Vec<Option<Val>>),
    /// Reference to an event handler by name
    Event(String),
    Func(String),
    Opaque(String),
}

impl Val {
    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Bool(_) => "bool",
            Val::Count(_) => "count",
            Val::Int(_) => "int",
            Val::Double(_) => "double",
            Val::String(_) => "string",
            Val::Addr(_) => "addr",
            Val::Subnet(..) => "subnet",
            Val::Port(..) => "port",
            Val::Time(_) => "time",
            Val::Interval(_) => "interval",
            Val::Enum { .. } => "enum",
            Val::Vector(_) => "vector",
            Val::Set(_) => "set",
            Val::Table(_) => "table",
            Val::Record(_) => "record",
            Val::Event(_) => "event",
            Val::Func(_) => "func",
            Val::Opaque(_) => "opaque",
        }
    }

    /// Whether this value can be assigned to a slot of type `ty`
    pub fn conforms_to(&self, ty: &Type) -> bool {
        match (self, ty) {
            (_, Type::Any) => true,
            (Val::Bool(_), Type::Bool)
            | (Val::Count(_), Type::Count)
            | (Val::Int(_), Type::Int)
            | (Val::Double(_), Type::Double)
            | (Val::String(_), Type::String)
            | (Val::Addr(_), Type::Addr)
            | (Val::Subnet(..), Type::Subnet)
            | (Val::Port(..), Type::Port)
            | (Val::Time(_), Type::Time)
            | (Val::Interval(_), Type::Interval)
            | (Val::Event(_), Type::Event)
            | (Val::Func(_), Type::Func) => true,
            (Val::Enum { type_name, .. }, Type::Enum(expected)) => type_name == expected,
            (Val::Opaque(kind), Type::Opaque(expected)) => kind == expected,
            (Val::Vector(items), Type::Vector(inner)) => items.iter().all(|v| v.conforms_to(inner)),
            (Val::Set(items), Type::Set(inner)) => items.iter().all(|v| v.conforms_to(inner)),
            (Val::Table(entries), Type::Table(kt, vt)) => entries
                .iter()
                .all(|(k, v)| k.conforms_to(kt) && v.conforms_to(vt)),
            (Val::Record(values), Type::Record(fields)) => {
                values.len() == fields.len()
                    && values.iter().zip(fields).all(|(value, field)| match value {
                        Some(v) => v.conforms_to(&field.ty),
                        None => field.optional,
                    })
            }
            _ => false,
        }
    }
}

impl From<&str> for Val {
    fn from(s: &str) -> Self {
        Val::String(s.to_string())
    }
}

impl From<u64> for Val {
    fn from(c: u64) -> Self {
        Val::Count(c)
    }
}

impl From<i64> for Val {
    fn from(i: i64) -> Self {
        Val::Int(i)
    }
}

impl From<bool> for Val {
    fn from(b: bool) -> Self {
        Val::Bool(b)
    }
}
