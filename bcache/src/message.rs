//! Gossip payload: a peer identifier plus a key -> entry mapping, and its
//! JSON wire form.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::entry::Entry;
use crate::error::CodecError;

/// Unique identifier of a peer in the cluster.
pub type PeerId = u64;

/// An `Entry` paired with the key it belongs to, as it appears on the wire
/// inside `Message::entries`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct KeyedEntry {
    #[serde(default, rename = "Key")]
    pub key: String,
    #[serde(default, rename = "Val")]
    pub value: String,
    #[serde(default, rename = "Expired")]
    pub expired: i64,
    #[serde(default, rename = "Deleted")]
    pub deleted: i64,
}

impl KeyedEntry {
    pub fn new(key: impl Into<String>, entry: Entry) -> Self {
        Self {
            key: key.into(),
            value: entry.value,
            expired: entry.expired,
            deleted: entry.deleted,
        }
    }

    pub fn entry(&self) -> Entry {
        Entry::new(self.value.clone(), self.expired, self.deleted)
    }
}

/// The unit of gossip encoding and merge: a snapshot (full or partial) of
/// one peer's cache contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Message {
    #[serde(default, rename = "PeerID")]
    pub peer_id: PeerId,
    #[serde(default, rename = "Entries")]
    pub entries: HashMap<String, KeyedEntry>,
}

impl Message {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            entries: HashMap::new(),
        }
    }

    pub fn from_entries(peer_id: PeerId, entries: HashMap<String, KeyedEntry>) -> Self {
        Self { peer_id, entries }
    }

    /// A message carrying exactly one key/entry pair, as originated by a
    /// local Set or Delete.
    pub fn single(peer_id: PeerId, key: impl Into<String>, entry: Entry) -> Self {
        let key = key.into();
        let mut entries = HashMap::with_capacity(1);
        entries.insert(key.clone(), KeyedEntry::new(key, entry));
        Self { peer_id, entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to the self-describing JSON wire form.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    /// Decode from the JSON wire form. Tolerant of unknown fields; missing
    /// fields default to zero values.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(buf).map_err(CodecError::Decode)
    }
}
