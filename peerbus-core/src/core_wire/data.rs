//! Transport data model
//!
//! `Data` is the value representation every message on the wire is built
//! from. It is totally ordered and hashable (floating point values compare
//! by their IEEE-754 total order) so it can be used as a store key.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

/// Transport protocol of a port value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Unknown,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
            Protocol::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A value in the transport's data model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Data {
    None,
    Boolean(bool),
    Count(u64),
    Integer(i64),
    Real(f64),
    String(String),
    Address(IpAddr),
    Subnet { network: IpAddr, length: u8 },
    Port { number: u16, protocol: Protocol },
    /// Seconds since the Unix epoch
    Timestamp(f64),
    /// Duration in seconds
    Timespan(f64),
    EnumValue(String),
    Set(BTreeSet<Data>),
    #[serde(with = "table_pairs")]
    Table(BTreeMap<Data, Data>),
    Vector(Vec<Data>),
}

impl Data {
    /// Human readable name of the variant, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Data::None => "none",
            Data::Boolean(_) => "boolean",
            Data::Count(_) => "count",
            Data::Integer(_) => "integer",
            Data::Real(_) => "real",
            Data::String(_) => "string",
            Data::Address(_) => "address",
            Data::Subnet { .. } => "subnet",
            Data::Port { .. } => "port",
            Data::Timestamp(_) => "timestamp",
            Data::Timespan(_) => "timespan",
            Data::EnumValue(_) => "enum",
            Data::Set(_) => "set",
            Data::Table(_) => "table",
            Data::Vector(_) => "vector",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Data::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Data::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_count(&self) -> Option<u64> {
        match self {
            Data::Count(c) => Some(*c),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Data::None => 0,
            Data::Boolean(_) => 1,
            Data::Count(_) => 2,
            Data::Integer(_) => 3,
            Data::Real(_) => 4,
            Data::String(_) => 5,
            Data::Address(_) => 6,
            Data::Subnet { .. } => 7,
            Data::Port { .. } => 8,
            Data::Timestamp(_) => 9,
            Data::Timespan(_) => 10,
            Data::EnumValue(_) => 11,
            Data::Set(_) => 12,
            Data::Table(_) => 13,
            Data::Vector(_) => 14,
        }
    }
}

impl Ord for Data {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Data::None, Data::None) => Ordering::Equal,
            (Data::Boolean(a), Data::Boolean(b)) => a.cmp(b),
            (Data::Count(a), Data::Count(b)) => a.cmp(b),
            (Data::Integer(a), Data::Integer(b)) => a.cmp(b),
            (Data::Real(a), Data::Real(b)) => a.total_cmp(b),
            (Data::String(a), Data::String(b)) => a.cmp(b),
            (Data::Address(a), Data::Address(b)) => a.cmp(b),
            (
                Data::Subnet { network: n1, length: l1 },
                Data::Subnet { network: n2, length: l2 },
            ) => (n1, l1).cmp(&(n2, l2)),
            (
                Data::Port { number: n1, protocol: p1 },
                Data::Port { number: n2, protocol: p2 },
            ) => (n1, p1).cmp(&(n2, p2)),
            (Data::Timestamp(a), Data::Timestamp(b)) => a.total_cmp(b),
            (Data::Timespan(a), Data::Timespan(b)) => a.total_cmp(b),
            (Data::EnumValue(a), Data::EnumValue(b)) => a.cmp(b),
            (Data::Set(a), Data::Set(b)) => a.cmp(b),
            (Data::Table(a), Data::Table(b)) => a.cmp(b),
            (Data::Vector(a), Data::Vector(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Data {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Data {}

impl Hash for Data {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Data::None => {}
            Data::Boolean(b) => b.hash(state),
            Data::Count(c) => c.hash(state),
            Data::Integer(i) => i.hash(state),
            Data::Real(r) | Data::Timestamp(r) | Data::Timespan(r) => r.to_bits().hash(state),
            Data::String(s) | Data::EnumValue(s) => s.hash(state),
            Data::Address(a) => a.hash(state),
            Data::Subnet { network, length } => {
                network.hash(state);
                length.hash(state);
            }
            Data::Port { number, protocol } => {
                number.hash(state);
                protocol.hash(state);
            }
            Data::Set(s) => s.hash(state),
            Data::Table(t) => t.hash(state),
            Data::Vector(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Data::None => f.write_str("nil"),
            Data::Boolean(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            Data::Count(c) => write!(f, "{}", c),
            Data::Integer(i) => write!(f, "{}", i),
            Data::Real(r) => write!(f, "{}", r),
            Data::String(s) => write!(f, "{}", s),
            Data::Address(a) => write!(f, "{}", a),
            Data::Subnet { network, length } => write!(f, "{}/{}", network, length),
            Data::Port { number, protocol } => write!(f, "{}/{}", number, protocol),
            Data::Timestamp(t) => write!(f, "{:.6}", t),
            Data::Timespan(t) => write!(f, "{}s", t),
            Data::EnumValue(e) => write!(f, "{}", e),
            Data::Set(s) => {
                f.write_str("{")?;
                for (i, item) in s.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("}")
            }
            Data::Table(t) => {
                f.write_str("{")?;
                for (i, (k, v)) in t.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} -> {}", k, v)?;
                }
                f.write_str("}")
            }
            Data::Vector(v) => {
                f.write_str("(")?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl From<bool> for Data {
    fn from(b: bool) -> Self {
        Data::Boolean(b)
    }
}

impl From<u64> for Data {
    fn from(c: u64) -> Self {
        Data::Count(c)
    }
}

impl From<i64> for Data {
    fn from(i: i64) -> Self {
        Data::Integer(i)
    }
}

impl From<f64> for Data {
    fn from(r: f64) -> Self {
        Data::Real(r)
    }
}

impl From<&str> for Data {
    fn from(s: &str) -> Self {
        Data::String(s.to_string())
    }
}

impl From<String> for Data {
    fn from(s: String) -> Self {
        Data::String(s)
    }
}

impl From<Vec<Data>> for Data {
    fn from(v: Vec<Data>) -> Self {
        Data::Vector(v)
    }
}

/// Tables are serialized as a list of pairs; JSON object keys must be strings.
mod table_pairs {
    use super::Data;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        table: &BTreeMap<Data, Data>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let pairs: Vec<(&Data, &Data)> = table.iter().collect();
        pairs.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<Data, Data>, D::Error> {
        let pairs: Vec<(Data, Data)> = Vec::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}
