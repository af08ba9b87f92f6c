//! Message identifiers and summary records.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::flags::Flags;

/// Stable message identifier, unique within one mailbox for its lifetime.
///
/// Assigned at first observation of a message and never reused. In the
/// Maildir layout the uid is the base filename before the `:2,` marker;
/// in the numbered layout it is the decimal file name. Both are covered
/// by a string, which also lets a uid be derived from an incoming file's
/// own name during import.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Uid(String);

impl Uid {
    pub fn new(s: impl Into<String>) -> Self {
        Uid(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of a decimal uid, if it is one.
    ///
    /// Counter-generated uids and numbered-layout uids are decimal; the
    /// summary uses this to keep its counter above every observed value.
    pub fn as_number(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.0)
    }
}

impl From<&str> for Uid {
    fn from(s: &str) -> Self {
        Uid(s.to_string())
    }
}

impl From<String> for Uid {
    fn from(s: String) -> Self {
        Uid(s)
    }
}

/// One entry per message known to the summary.
///
/// All records are kept in memory; at a few hundred bytes per entry a
/// 100k-message mailbox stays in the tens of megabytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Stable identifier (see [`Uid`]).
    pub uid: Uid,

    /// Current flag state. The summary is the source of truth for flags
    /// until a commit writes them back to the physical message.
    pub flags: Flags,

    /// When the message was received. Derived from the identifier where it
    /// embeds a timestamp, otherwise from the `Date:` header or file
    /// metadata. Used only for ordering, never for identity.
    pub date_received: DateTime<Utc>,

    /// Mailbox-relative path of the physical message, e.g. `cur/<name>`
    /// or a bare decimal name. The one field that legitimately changes
    /// across a reconciliation pass.
    pub location: String,

    /// Size of the message file in bytes.
    pub size: u64,

    /// Decoded subject line.
    pub subject: String,

    /// Sender (first `From:` header address).
    pub from: String,

    /// The `Message-ID` header value, if present.
    pub message_id: String,
}

impl MessageRecord {
    /// Absolute path of the physical message under `mailbox`.
    pub fn path_in(&self, mailbox: &Path) -> PathBuf {
        mailbox.join(&self.location)
    }
}
