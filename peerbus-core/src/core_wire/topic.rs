//! Topics and the reserved store namespace

use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix of the topic a master store listens on
pub const STORE_MASTER_SUFFIX: &str = "/data/master";

/// Suffix of the topic clone stores listen on
pub const STORE_CLONE_SUFFIX: &str = "/data/clone";

/// Default prefix for log topics, followed by the stream name
pub const DEFAULT_LOG_TOPIC_PREFIX: &str = "peerbus/logs/";

/// Hierarchical publish/subscribe address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Topic(String);

/// Which side of a store's replication channel a topic addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreTopic<'a> {
    Master(&'a str),
    Clone(&'a str),
}

impl StoreTopic<'_> {
    pub fn store_name(&self) -> &str {
        match self {
            StoreTopic::Master(name) | StoreTopic::Clone(name) => name,
        }
    }
}

impl Topic {
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Literal prefix match. The empty prefix matches every topic.
    pub fn matches(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    pub fn store_master(store: &str) -> Self {
        Self(format!("{}{}", store, STORE_MASTER_SUFFIX))
    }

    pub fn store_clone(store: &str) -> Self {
        Self(format!("{}{}", store, STORE_CLONE_SUFFIX))
    }

    /// Classify a topic in the reserved store namespace
    pub fn store_topic(&self) -> Option<StoreTopic<'_>> {
        if let Some(name) = self.0.strip_suffix(STORE_MASTER_SUFFIX) {
            if !name.is_empty() {
                return Some(StoreTopic::Master(name));
            }
        }
        if let Some(name) = self.0.strip_suffix(STORE_CLONE_SUFFIX) {
            if !name.is_empty() {
                return Some(StoreTopic::Clone(name));
            }
        }
        None
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Topic {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_matching() {
        let topic = Topic::new("site/events/conn");
        assert!(topic.matches("site/"));
        assert!(topic.matches(""));
        assert!(topic.matches("site/events/conn"));
        assert!(!topic.matches("site/events/conn/extra"));
        assert!(!topic.matches("other"));
    }

    #[test]
    fn test_store_topics() {
        let master = Topic::store_master("users");
        assert_eq!(master.as_str(), "users/data/master");
        assert_eq!(master.store_topic(), Some(StoreTopic::Master("users")));

        let clone = Topic::store_clone("a/b");
        assert_eq!(clone.store_topic(), Some(StoreTopic::Clone("a/b")));
        assert_eq!(clone.store_topic().map(|t| t.store_name().to_string()), Some("a/b".into()));
    }

    #[test]
    fn test_non_store_topic() {
        assert_eq!(Topic::new("/data/master").store_topic(), None);
        assert_eq!(Topic::new("users/data").store_topic(), None);
    }
}
