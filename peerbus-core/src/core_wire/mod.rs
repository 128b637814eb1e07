//! Wire adapter
//!
//! The transport data model, topics, the versioned application message
//! codec and the conversion between host values and transport data.

pub mod convert;
pub mod data;
pub mod error;
pub mod message;
pub mod topic;

pub use convert::{data_to_val, val_to_data};
pub use data::{Data, Protocol};
pub use error::{CodecError, CodecResult};
pub use message::{
    batch_data, Event, IdentifierUpdate, LogCreate, LogField, LogWrite, Message, MessageType,
    WriterInfo, PROTOCOL_VERSION,
};
pub use topic::{StoreTopic, Topic, DEFAULT_LOG_TOPIC_PREFIX, STORE_CLONE_SUFFIX, STORE_MASTER_SUFFIX};
