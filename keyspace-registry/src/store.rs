//! Key-value store abstraction
//!
//! The registries only ever talk to the coordination store through these
//! traits, so any backend offering put/get/prefix-range/delete can be plugged
//! in. [`EtcdConnector`](crate::EtcdConnector) talks to a real etcd cluster and
//! [`MemoryConnector`](crate::MemoryConnector) keeps everything in process.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// A single stored entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Full key
    pub key: String,

    /// Raw value bytes
    pub value: Vec<u8>,

    /// Store revision of the last write to this key
    pub mod_revision: i64,
}

impl KeyValue {
    /// Value as UTF-8 text, lossily converted
    pub fn value_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

/// Handle to a key-value store.
///
/// A handle is released when dropped.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Write `value` under `key`, overwriting any previous value
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Read a single key
    async fn get(&self, key: &str) -> Result<Option<KeyValue>>;

    /// Read every key starting with `prefix`, in ascending key order
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Delete a key, returning how many entries were removed (0 if absent)
    async fn delete(&self, key: &str) -> Result<u64>;

    /// Write `value` only if the key is still at the expected revision.
    ///
    /// `None` requires the key to be absent. Returns `false` without writing
    /// when the comparison fails.
    async fn put_if_revision(&self, key: &str, expected: Option<i64>, value: &[u8])
    -> Result<bool>;
}

/// Opens store handles.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Dial the given endpoints, giving up after `dial_timeout`
    async fn connect(&self, endpoints: &[String], dial_timeout: Duration)
    -> Result<Box<dyn KvStore>>;
}

/// Compute the exclusive end of a prefix range.
///
/// Increments the last byte that is not `0xff` and truncates after it. An
/// all-`0xff` (or empty) prefix yields `[0]`, meaning "to the end of the keyspace".
pub fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    vec![0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_range_end() {
        assert_eq!(prefix_range_end(b"/services/api/"), b"/services/api0".to_vec());
        assert_eq!(prefix_range_end(b"a\xff"), b"b".to_vec());
        assert_eq!(prefix_range_end(b"\xff\xff"), vec![0]);
        assert_eq!(prefix_range_end(b""), vec![0]);
    }

    #[test]
    fn test_value_str() {
        let kv = KeyValue {
            key: "/services/api/10.0.0.1:80".to_string(),
            value: b"1700000000".to_vec(),
            mod_revision: 3,
        };
        assert_eq!(kv.value_str(), "1700000000");
    }
}
