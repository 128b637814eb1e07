/*
    Wire messages - versioned encoding of application messages into Data

    Every message travels as a three element vector:

        ( Count(PROTOCOL_VERSION), Count(message type), Vector(content) )

    Inputs:
        - Message values built by the manager (events, log traffic,
          identifier snapshots, batches of log writes)
        - Data received from the transport

    Outputs:
        - Data ready to publish
        - Decoded Message values, or a CodecError for anything that does
          not follow the layout above
*/

use super::data::Data;
use super::error::{CodecError, CodecResult};
use crate::core_host::{RecordField, Type};
use std::collections::BTreeMap;
use tracing::debug;

pub const PROTOCOL_VERSION: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum MessageType {
    Event = 1,
    LogCreate = 2,
    LogWrite = 3,
    IdentifierUpdate = 4,
    Batch = 5,
}

impl MessageType {
    pub fn from_tag(tag: u64) -> CodecResult<Self> {
        match tag {
            1 => Ok(MessageType::Event),
            2 => Ok(MessageType::LogCreate),
            3 => Ok(MessageType::LogWrite),
            4 => Ok(MessageType::IdentifierUpdate),
            5 => Ok(MessageType::Batch),
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub args: Vec<Data>,
}

/// Writer parameters announced with a log-create message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriterInfo {
    pub path: String,
    pub rotation_interval: Option<f64>,
    pub config: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogField {
    pub name: String,
    pub ty: Type,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogCreate {
    pub stream: String,
    pub writer: String,
    pub info: WriterInfo,
    pub fields: Vec<LogField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogWrite {
    pub stream: String,
    pub writer: String,
    pub path: String,
    pub values: Vec<Data>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentifierUpdate {
    pub name: String,
    pub value: Data,
}

/// Application message, decoded once at the dispatch boundary
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Event(Event),
    LogCreate(LogCreate),
    LogWrite(LogWrite),
    IdentifierUpdate(IdentifierUpdate),
    Batch(Vec<Message>),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Event(_) => MessageType::Event,
            Message::LogCreate(_) => MessageType::LogCreate,
            Message::LogWrite(_) => MessageType::LogWrite,
            Message::IdentifierUpdate(_) => MessageType::IdentifierUpdate,
            Message::Batch(_) => MessageType::Batch,
        }
    }

    pub fn into_data(self) -> Data {
        let tag = self.message_type();
        let content = match self {
            Message::Event(ev) => vec![Data::String(ev.name), Data::Vector(ev.args)],
            Message::LogCreate(lc) => vec![
                Data::EnumValue(lc.stream),
                Data::EnumValue(lc.writer),
                writer_info_to_data(lc.info),
                Data::Vector(lc.fields.into_iter().map(field_to_data).collect()),
            ],
            Message::LogWrite(lw) => vec![
                Data::EnumValue(lw.stream),
                Data::EnumValue(lw.writer),
                Data::String(lw.path),
                Data::Vector(lw.values),
            ],
            Message::IdentifierUpdate(iu) => vec![Data::String(iu.name), iu.value],
            Message::Batch(messages) => messages.into_iter().map(Message::into_data).collect(),
        };
        envelope(tag, content)
    }

    pub fn from_data(data: Data) -> CodecResult<Self> {
        let mut envelope = Fields::new(data, "envelope")?;
        let version = envelope.count()?;
        if version != PROTOCOL_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let tag = MessageType::from_tag(envelope.count()?)?;
        let content = envelope.next()?;
        envelope.finish()?;

        let mut fields = Fields::new(content, "content")?;
        let message = match tag {
            MessageType::Event => {
                let name = fields.string()?;
                let args = fields.vector()?;
                Message::Event(Event { name, args })
            }
            MessageType::LogCreate => {
                let stream = fields.enum_value()?;
                let writer = fields.enum_value()?;
                let info = writer_info_from_data(fields.next()?)?;
                let fields_data = fields.vector()?;
                let log_fields = fields_data
                    .into_iter()
                    .map(field_from_data)
                    .collect::<CodecResult<_>>()?;
                Message::LogCreate(LogCreate {
                    stream,
                    writer,
                    info,
                    fields: log_fields,
                })
            }
            MessageType::LogWrite => Message::LogWrite(LogWrite {
                stream: fields.enum_value()?,
                writer: fields.enum_value()?,
                path: fields.string()?,
                values: fields.vector()?,
            }),
            MessageType::IdentifierUpdate => Message::IdentifierUpdate(IdentifierUpdate {
                name: fields.string()?,
                value: fields.next()?,
            }),
            MessageType::Batch => {
                let mut messages = Vec::new();
                for (i, item) in fields.items.by_ref().enumerate() {
                    match Message::from_data(item) {
                        Ok(message) => messages.push(message),
                        Err(e) => debug!(item = i, error = %e, "skipping undecodable batch item"),
                    }
                }
                Message::Batch(messages)
            }
        };
        fields.finish()?;
        Ok(message)
    }
}

/// Wrap already encoded messages into a single batch message
pub fn batch_data(encoded: Vec<Data>) -> Data {
    envelope(MessageType::Batch, encoded)
}

fn envelope(tag: MessageType, content: Vec<Data>) -> Data {
    Data::Vector(vec![
        Data::Count(PROTOCOL_VERSION),
        Data::Count(tag as u64),
        Data::Vector(content),
    ])
}

/// Cursor over the elements of an encoded vector
pub(crate) struct Fields {
    items: std::vec::IntoIter<Data>,
    what: &'static str,
}

impl Fields {
    pub(crate) fn new(data: Data, what: &'static str) -> CodecResult<Self> {
        match data {
            Data::Vector(items) => Ok(Self {
                items: items.into_iter(),
                what,
            }),
            other => Err(CodecError::malformed(format!(
                "{} must be a vector, got {}",
                what,
                other.type_name()
            ))),
        }
    }

    pub(crate) fn next(&mut self) -> CodecResult<Data> {
        self.items
            .next()
            .ok_or_else(|| CodecError::malformed(format!("{} is truncated", self.what)))
    }

    pub(crate) fn count(&mut self) -> CodecResult<u64> {
        match self.next()? {
            Data::Count(c) => Ok(c),
            other => Err(CodecError::mismatch("count", other.type_name())),
        }
    }

    pub(crate) fn string(&mut self) -> CodecResult<String> {
        match self.next()? {
            Data::String(s) => Ok(s),
            other => Err(CodecError::mismatch("string", other.type_name())),
        }
    }

    pub(crate) fn enum_value(&mut self) -> CodecResult<String> {
        match self.next()? {
            Data::EnumValue(s) => Ok(s),
            other => Err(CodecError::mismatch("enum", other.type_name())),
        }
    }

    pub(crate) fn vector(&mut self) -> CodecResult<Vec<Data>> {
        match self.next()? {
            Data::Vector(v) => Ok(v),
            other => Err(CodecError::mismatch("vector", other.type_name())),
        }
    }

    /// Elements not consumed yet
    pub(crate) fn rest(self) -> Vec<Data> {
        self.items.collect()
    }

    pub(crate) fn finish(mut self) -> CodecResult<()> {
        match self.items.next() {
            None => Ok(()),
            Some(_) => Err(CodecError::malformed(format!(
                "{} has trailing elements",
                self.what
            ))),
        }
    }
}

fn writer_info_to_data(info: WriterInfo) -> Data {
    Data::Vector(vec![
        Data::String(info.path),
        info.rotation_interval.map(Data::Timespan).unwrap_or(Data::None),
        Data::Table(
            info.config
                .into_iter()
                .map(|(k, v)| (Data::String(k), Data::String(v)))
                .collect(),
        ),
    ])
}

fn writer_info_from_data(data: Data) -> CodecResult<WriterInfo> {
    let mut fields = Fields::new(data, "writer info")?;
    let path = fields.string()?;
    let rotation_interval = match fields.next()? {
        Data::None => None,
        Data::Timespan(t) => Some(t),
        other => return Err(CodecError::mismatch("timespan", other.type_name())),
    };
    let config = match fields.next()? {
        Data::Table(entries) => entries
            .into_iter()
            .map(|(k, v)| match (k, v) {
                (Data::String(k), Data::String(v)) => Ok((k, v)),
                _ => Err(CodecError::malformed("writer config must map strings to strings")),
            })
            .collect::<CodecResult<_>>()?,
        other => return Err(CodecError::mismatch("table", other.type_name())),
    };
    fields.finish()?;
    Ok(WriterInfo {
        path,
        rotation_interval,
        config,
    })
}

fn field_to_data(field: LogField) -> Data {
    Data::Vector(vec![
        Data::String(field.name),
        type_to_data(&field.ty),
        Data::Boolean(field.optional),
    ])
}

fn field_from_data(data: Data) -> CodecResult<LogField> {
    let mut fields = Fields::new(data, "log field")?;
    let name = fields.string()?;
    let ty = type_from_data(fields.next()?)?;
    let optional = match fields.next()? {
        Data::Boolean(b) => b,
        other => return Err(CodecError::mismatch("boolean", other.type_name())),
    };
    fields.finish()?;
    Ok(LogField { name, ty, optional })
}

const TYPE_TAGS: [&str; 19] = [
    "bool", "count", "int", "double", "string", "addr", "subnet", "port", "time", "interval",
    "enum", "vector", "set", "table", "record", "any", "event", "func", "opaque",
];

/// Types are encoded as `(name, params...)`
pub(crate) fn type_to_data(ty: &Type) -> Data {
    let tag = |name: &str| Data::String(name.to_string());
    let parts = match ty {
        Type::Bool => vec![tag("bool")],
        Type::Count => vec![tag("count")],
        Type::Int => vec![tag("int")],
        Type::Double => vec![tag("double")],
        Type::String => vec![tag("string")],
        Type::Addr => vec![tag("addr")],
        Type::Subnet => vec![tag("subnet")],
        Type::Port => vec![tag("port")],
        Type::Time => vec![tag("time")],
        Type::Interval => vec![tag("interval")],
        Type::Enum(name) => vec![tag("enum"), Data::String(name.clone())],
        Type::Vector(inner) => vec![tag("vector"), type_to_data(inner)],
        Type::Set(inner) => vec![tag("set"), type_to_data(inner)],
        Type::Table(k, v) => vec![tag("table"), type_to_data(k), type_to_data(v)],
        Type::Record(fields) => {
            let mut parts = vec![tag("record")];
            parts.extend(fields.iter().map(|f| {
                Data::Vector(vec![
                    Data::String(f.name.clone()),
                    type_to_data(&f.ty),
                    Data::Boolean(f.optional),
                ])
            }));
            parts
        }
        Type::Any => vec![tag("any")],
        Type::Event => vec![tag("event")],
        Type::Func => vec![tag("func")],
        Type::Opaque(name) => vec![tag("opaque"), Data::String(name.clone())],
    };
    Data::Vector(parts)
}

pub(crate) fn type_from_data(data: Data) -> CodecResult<Type> {
    let mut parts = Fields::new(data, "type")?;
    let name = parts.string()?;
    if !TYPE_TAGS.contains(&name.as_str()) {
        return Err(CodecError::malformed(format!("unknown type '{}'", name)));
    }

    let ty = match name.as_str() {
        "bool" => Type::Bool,
        "count" => Type::Count,
        "int" => Type::Int,
        "double" => Type::Double,
        "string" => Type::String,
        "addr" => Type::Addr,
        "subnet" => Type::Subnet,
        "port" => Type::Port,
        "time" => Type::Time,
        "interval" => Type::Interval,
        "enum" => Type::Enum(parts.string()?),
        "vector" => Type::Vector(Box::new(type_from_data(parts.next()?)?)),
        "set" => Type::Set(Box::new(type_from_data(parts.next()?)?)),
        "table" => {
            let k = type_from_data(parts.next()?)?;
            let v = type_from_data(parts.next()?)?;
            Type::Table(Box::new(k), Box::new(v))
        }
        "record" => {
            let mut fields = Vec::new();
            while let Some(item) = parts.items.next() {
                let field = field_from_data(item)?;
                fields.push(RecordField {
                    name: field.name,
                    ty: field.ty,
                    optional: field.optional,
                });
            }
            Type::Record(fields)
        }
        "any" => Type::Any,
        "event" => Type::Event,
        "func" => Type::Func,
        _ => Type::Opaque(parts.string()?),
    };
    parts.finish()?;
    Ok(ty)
}
