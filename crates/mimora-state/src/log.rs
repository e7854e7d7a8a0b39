//! # Verification Audit Log
//!
//! Every provider callback matched to a request is appended here, whatever
//! its effect on the state machine. The log is an ordered list of typed
//! entries; it becomes JSON only at the storage boundary, in this shape:
//!
//! ```json
//! {
//!   "verifications": [
//!     {"type": "aadhaar", "status": "success", "timestamp": "...", "data": {...}}
//!   ],
//!   "last_update": { "...": "most recent raw payload, verbatim" }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One recorded callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationEntry {
    /// Verification type as reported, lowercased.
    #[serde(rename = "type")]
    pub verification_type: String,
    /// Outcome status as reported, lowercased.
    pub status: String,
    /// When the callback was received.
    pub timestamp: DateTime<Utc>,
    /// Provider-supplied verification details.
    #[serde(default)]
    pub data: Value,
}

/// Append-only log of callbacks for one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationLog {
    /// Entries in arrival order.
    #[serde(default)]
    pub verifications: Vec<VerificationEntry>,
    /// The most recent raw payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<Value>,
}

impl VerificationLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry and remember the raw payload it came from.
    pub fn record(&mut self, entry: VerificationEntry, raw_payload: Value) {
        self.verifications.push(entry);
        self.last_update = Some(raw_payload);
    }

    /// Number of recorded callbacks.
    pub fn len(&self) -> usize {
        self.verifications.len()
    }

    /// Whether no callback has been recorded.
    pub fn is_empty(&self) -> bool {
        self.verifications.is_empty()
    }

    /// The most recently recorded entry.
    pub fn latest(&self) -> Option<&VerificationEntry> {
        self.verifications.last()
    }
}
