/*
    Store replication protocol

    Each store uses two reserved topics:

        <name>/data/master   clone -> master   StoreCommand
        <name>/data/clone    master -> clones  StoreUpdate

    A clone asks for the full content with Sync, the master answers with a
    Snapshot addressed to that clone. Mutations issued at a clone travel to
    the master as Mutate and come back to every clone as Applied, carrying
    the resulting changes rather than the mutation itself. Entries removed
    by expiry are announced as Expired.

    Encoding: ( Count(PROTOCOL_VERSION), String(kind), fields... )
*/

use crate::core_transport::NodeId;
use crate::core_wire::message::Fields;
use crate::core_wire::{CodecError, CodecResult, Data, PROTOCOL_VERSION};

/// A write to a store
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    /// `expiry` is relative to the time the master applies the write
    Put {
        key: Data,
        value: Data,
        expiry: Option<f64>,
    },
    Erase {
        key: Data,
    },
    Clear,
    /// Add `by` to a numeric value, treating a missing key as zero
    Increment {
        key: Data,
        by: Data,
    },
}

/// Effect of an applied mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Put { key: Data, value: Data },
    Erase { key: Data },
    Clear,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    Sync { clone: NodeId },
    Mutate { origin: NodeId, mutation: Mutation },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreUpdate {
    Snapshot {
        master: NodeId,
        target: NodeId,
        entries: Vec<(Data, Data)>,
    },
    Applied {
        master: NodeId,
        changes: Vec<Change>,
    },
    Expired {
        master: NodeId,
        keys: Vec<Data>,
    },
}

/// Add two numeric values of the same kind
pub fn add_numeric(current: &Data, by: &Data) -> Option<Data> {
    match (current, by) {
        (Data::Count(a), Data::Count(b)) => a.checked_add(*b).map(Data::Count),
        (Data::Count(a), Data::Integer(b)) => {
            let sum = i128::from(*a) + i128::from(*b);
            u64::try_from(sum).ok().map(Data::Count)
        }
        (Data::Integer(a), Data::Integer(b)) => a.checked_add(*b).map(Data::Integer),
        (Data::Real(a), Data::Real(b)) => Some(Data::Real(a + b)),
        (Data::Timespan(a), Data::Timespan(b)) => Some(Data::Timespan(a + b)),
        (Data::Timestamp(a), Data::Timespan(b)) => Some(Data::Timestamp(a + b)),
        _ => None,
    }
}

/// Zero value of the same kind as `by`, used when incrementing a missing key
pub fn zero_like(by: &Data) -> Data {
    match by {
        Data::Integer(_) => Data::Integer(0),
        Data::Real(_) => Data::Real(0.0),
        Data::Timespan(_) => Data::Timespan(0.0),
        _ => Data::Count(0),
    }
}

fn node_to_data(node: &NodeId) -> Data {
    Data::String(node.to_string())
}

fn node_from(fields: &mut Fields) -> CodecResult<NodeId> {
    let s = fields.string()?;
    NodeId::parse(&s).ok_or_else(|| CodecError::malformed(format!("invalid node id '{}'", s)))
}

fn envelope(kind: &str, mut fields: Vec<Data>) -> Data {
    let mut parts = vec![Data::Count(PROTOCOL_VERSION), Data::String(kind.to_string())];
    parts.append(&mut fields);
    Data::Vector(parts)
}

fn open(data: Data) -> CodecResult<(String, Fields)> {
    let mut fields = Fields::new(data, "store message")?;
    let version = fields.count()?;
    if version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let kind = fields.string()?;
    Ok((kind, fields))
}

impl Mutation {
    pub fn key(&self) -> Option<&Data> {
        match self {
            Mutation::Put { key, .. } | Mutation::Erase { key } | Mutation::Increment { key, .. } => {
                Some(key)
            }
            Mutation::Clear => None,
        }
    }

    fn to_data(&self) -> Data {
        let parts = match self {
            Mutation::Put { key, value, expiry } => vec![
                Data::from("put"),
                key.clone(),
                value.clone(),
                expiry.map(Data::Timespan).unwrap_or(Data::None),
            ],
            Mutation::Erase { key } => vec![Data::from("erase"), key.clone()],
            Mutation::Clear => vec![Data::from("clear")],
            Mutation::Increment { key, by } => vec![Data::from("increment"), key.clone(), by.clone()],
        };
        Data::Vector(parts)
    }

    fn from_data(data: Data) -> CodecResult<Self> {
        let mut fields = Fields::new(data, "mutation")?;
        let kind = fields.string()?;
        let mutation = match kind.as_str() {
            "put" => {
                let key = fields.next()?;
                let value = fields.next()?;
                let expiry = match fields.next()? {
                    Data::None => None,
                    Data::Timespan(t) => Some(t),
                    other => return Err(CodecError::mismatch("timespan", other.type_name())),
                };
                Mutation::Put { key, value, expiry }
            }
            "erase" => Mutation::Erase { key: fields.next()? },
            "clear" => Mutation::Clear,
            "increment" => Mutation::Increment {
                key: fields.next()?,
                by: fields.next()?,
            },
            other => return Err(CodecError::malformed(format!("unknown mutation '{}'", other))),
        };
        fields.finish()?;
        Ok(mutation)
    }
}

impl Change {
    fn to_data(&self) -> Data {
        match self {
            Change::Put { key, value } => {
                Data::Vector(vec![Data::from("put"), key.clone(), value.clone()])
            }
            Change::Erase { key } => Data::Vector(vec![Data::from("erase"), key.clone()]),
            Change::Clear => Data::Vector(vec![Data::from("clear")]),
        }
    }

    fn from_data(data: Data) -> CodecResult<Self> {
        let mut fields = Fields::new(data, "change")?;
        let change = match fields.string()?.as_str() {
            "put" => Change::Put {
                key: fields.next()?,
                value: fields.next()?,
            },
            "erase" => Change::Erase { key: fields.next()? },
            "clear" => Change::Clear,
            other => return Err(CodecError::malformed(format!("unknown change '{}'", other))),
        };
        fields.finish()?;
        Ok(change)
    }
}

impl StoreCommand {
    pub fn into_data(self) -> Data {
        match self {
            StoreCommand::Sync { clone } => envelope("sync", vec![node_to_data(&clone)]),
            StoreCommand::Mutate { origin, mutation } => {
                envelope("mutate", vec![node_to_data(&origin), mutation.to_data()])
            }
        }
    }

    pub fn from_data(data: Data) -> CodecResult<Self> {
        let (kind, mut fields) = open(data)?;
        let command = match kind.as_str() {
            "sync" => StoreCommand::Sync {
                clone: node_from(&mut fields)?,
            },
            "mutate" => StoreCommand::Mutate {
                origin: node_from(&mut fields)?,
                mutation: Mutation::from_data(fields.next()?)?,
            },
            other => return Err(CodecError::malformed(format!("unknown store command '{}'", other))),
        };
        fields.finish()?;
        Ok(command)
    }
}

impl StoreUpdate {
    pub fn master(&self) -> &NodeId {
        match self {
            StoreUpdate::Snapshot { master, .. }
            | StoreUpdate::Applied { master, .. }
            | StoreUpdate::Expired { master, .. } => master,
        }
    }

    pub fn into_data(self) -> Data {
        match self {
            StoreUpdate::Snapshot {
                master,
                target,
                entries,
            } => envelope(
                "snapshot",
                vec![
                    node_to_data(&master),
                    node_to_data(&target),
                    Data::Vector(
                        entries
                            .into_iter()
                            .map(|(k, v)| Data::Vector(vec![k, v]))
                            .collect(),
                    ),
                ],
            ),
            StoreUpdate::Applied { master, changes } => envelope(
                "applied",
                vec![
                    node_to_data(&master),
                    Data::Vector(changes.iter().map(Change::to_data).collect()),
                ],
            ),
            StoreUpdate::Expired { master, keys } => {
                envelope("expired", vec![node_to_data(&master), Data::Vector(keys)])
            }
        }
    }

    pub fn from_data(data: Data) -> CodecResult<Self> {
        let (kind, mut fields) = open(data)?;
        let update = match kind.as_str() {
            "snapshot" => {
                let master = node_from(&mut fields)?;
                let target = node_from(&mut fields)?;
                let entries = fields
                    .vector()?
                    .into_iter()
                    .map(|pair| {
                        let mut pair = Fields::new(pair, "snapshot entry")?;
                        let k = pair.next()?;
                        let v = pair.next()?;
                        pair.finish()?;
                        Ok((k, v))
                    })
                    .collect::<CodecResult<_>>()?;
                StoreUpdate::Snapshot {
                    master,
                    target,
                    entries,
                }
            }
            "applied" => StoreUpdate::Applied {
                master: node_from(&mut fields)?,
                changes: fields
                    .vector()?
                    .into_iter()
                    .map(Change::from_data)
                    .collect::<CodecResult<_>>()?,
            },
            "expired" => StoreUpdate::Expired {
                master: node_from(&mut fields)?,
                keys: fields.vector()?,
            },
            other => return Err(CodecError::malformed(format!("unknown store update '{}'", other))),
        };
        fields.finish()?;
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_decoding() {
        let origin = NodeId::random();
        let cmd = StoreCommand::Mutate {
            origin,
            mutation: Mutation::Put {
                key: Data::from("k"),
                value: Data::Count(1),
                expiry: Some(30.0),
            },
        };
        assert_eq!(StoreCommand::from_data(cmd.clone().into_data()).unwrap(), cmd);
    }

    #[test]
    fn test_update_decoding() {
        let master = NodeId::random();
        let update = StoreUpdate::Snapshot {
            master,
            target: NodeId::random(),
            entries: vec![(Data::from("a"), Data::Integer(1))],
        };
        assert_eq!(StoreUpdate::from_data(update.clone().into_data()).unwrap(), update);

        let applied = StoreUpdate::Applied {
            master,
            changes: vec![Change::Erase { key: Data::from("a") }, Change::Clear],
        };
        let decoded = StoreUpdate::from_data(applied.clone().into_data()).unwrap();
        assert_eq!(decoded.master(), &master);
        assert_eq!(decoded, applied);
    }

    #[test]
    fn test_rejects_application_messages() {
        let data = Data::Vector(vec![Data::Count(PROTOCOL_VERSION), Data::Count(1), Data::Vector(vec![])]);
        assert!(StoreCommand::from_data(data).is_err());
    }

    #[test]
    fn test_add_numeric() {
        assert_eq!(add_numeric(&Data::Count(1), &Data::Count(2)), Some(Data::Count(3)));
        assert_eq!(add_numeric(&Data::Count(1), &Data::Integer(-2)), None);
        assert_eq!(add_numeric(&Data::Count(5), &Data::Integer(-2)), Some(Data::Count(3)));
        assert_eq!(add_numeric(&Data::from("x"), &Data::Count(1)), None);
        assert_eq!(zero_like(&Data::Integer(4)), Data::Integer(0));
    }
}
