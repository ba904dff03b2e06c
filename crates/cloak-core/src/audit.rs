//! Accountability log.
//!
//! Append-only record of every frame this node sent or received, including
//! frames whose signature did not verify and sends whose socket write
//! failed. Audits replay this record, so nothing is ever edited or removed
//! individually: the only removal is a full [`AccountabilityLog::clear`] at a
//! round boundary.

use bytes::Bytes;
use cloak_proto::Frame;
use serde::{Deserialize, Serialize};

use crate::{
    error::{NetworkError, Result},
    types::NodeId,
};

/// Direction of a logged frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Authored locally and written to a peer
    Send,
    /// Received from a peer
    Recv,
}

/// One logged frame. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Whether we sent or received this frame
    pub direction: Direction,
    /// Peer the frame was sent to or received from
    pub node_id: NodeId,
    /// Payload bytes
    pub payload: Bytes,
    /// Signature bytes
    pub signature: Bytes,
    /// Signature verified (always true for sends)
    pub valid: bool,
    /// Socket write failure for a send, if any
    pub write_error: Option<String>,
}

impl LogEntry {
    /// Entry for a frame written to `node_id`.
    pub fn sent(node_id: NodeId, frame: Frame) -> Self {
        Self {
            direction: Direction::Send,
            node_id,
            payload: frame.payload,
            signature: frame.signature,
            valid: true,
            write_error: None,
        }
    }

    /// Entry for a frame whose write to `node_id` failed.
    pub fn send_failed(node_id: NodeId, frame: Frame, error: &std::io::Error) -> Self {
        Self { write_error: Some(error.to_string()), ..Self::sent(node_id, frame) }
    }

    /// Entry for a frame received from `node_id`.
    pub fn received(node_id: NodeId, frame: Frame, valid: bool) -> Self {
        Self {
            direction: Direction::Recv,
            node_id,
            payload: frame.payload,
            signature: frame.signature,
            valid,
            write_error: None,
        }
    }

    /// Whether this is a send whose write failed.
    pub fn is_failed_send(&self) -> bool {
        self.direction == Direction::Send && self.write_error.is_some()
    }
}

/// Counters over the current log contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    /// Sends that were written
    pub sent: usize,
    /// Sends whose write failed
    pub failed_sends: usize,
    /// Received frames that verified
    pub received_valid: usize,
    /// Received frames that did not verify
    pub received_invalid: usize,
}

impl LogStats {
    fn count(entries: &[LogEntry]) -> Self {
        entries.iter().fold(Self::default(), |mut stats, entry| {
            match (entry.direction, entry.valid, entry.write_error.is_some()) {
                (Direction::Send, _, false) => stats.sent += 1,
                (Direction::Send, _, true) => stats.failed_sends += 1,
                (Direction::Recv, true, _) => stats.received_valid += 1,
                (Direction::Recv, false, _) => stats.received_invalid += 1,
            }
            stats
        })
    }
}

/// Append-only ordered log of [`LogEntry`].
#[derive(Debug, Clone, Default)]
pub struct AccountabilityLog {
    entries: Vec<LogEntry>,
}

impl AccountabilityLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and return its index.
    pub fn append(&mut self, entry: LogEntry) -> usize {
        self.entries.push(entry);
        self.entries.len() - 1
    }

    /// Entry at `index`.
    pub fn get(&self, index: usize) -> Option<&LogEntry> {
        self.entries.get(index)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Discard every entry.
    ///
    /// Outstanding ready-queue indices become meaningless; the owner must
    /// clear its queue in the same step.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Owned copy of the current contents.
    pub fn snapshot(&self) -> LogSnapshot {
        LogSnapshot { entries: self.entries.clone() }
    }

    /// Count entries by kind.
    pub fn stats(&self) -> LogStats {
        LogStats::count(&self.entries)
    }
}

/// Point-in-time copy of the log, as returned by `get_log`.
///
/// Not live: later appends and clears do not show up here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSnapshot {
    entries: Vec<LogEntry>,
}

impl LogSnapshot {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`.
    pub fn get(&self, index: usize) -> Option<&LogEntry> {
        self.entries.get(index)
    }

    /// Entries in log order.
    pub fn iter(&self) -> std::slice::Iter<'_, LogEntry> {
        self.entries.iter()
    }

    /// Entries exchanged with `node`, in log order.
    pub fn entries_for(&self, node: NodeId) -> impl Iterator<Item = &LogEntry> + '_ {
        self.entries.iter().filter(move |entry| entry.node_id == node)
    }

    /// Count entries by kind.
    pub fn stats(&self) -> LogStats {
        LogStats::count(&self.entries)
    }

    /// Entries as a slice.
    pub fn as_slice(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Serialize to CBOR for export to an auditor.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| NetworkError::Export(e.to_string()))?;
        Ok(buf)
    }

    /// Parse a snapshot previously produced by [`Self::to_cbor`].
    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes).map_err(|e| NetworkError::Export(e.to_string()))
    }
}

impl<'a> IntoIterator for &'a LogSnapshot {
    type Item = &'a LogEntry;
    type IntoIter = std::slice::Iter<'a, LogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
