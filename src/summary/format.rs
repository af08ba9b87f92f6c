//! Binary summary file format.
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │ HEADER (128 bytes, fixed)            │
//! │  magic: [u8; 8] = b"MAILKEEP"        │
//! │  version: u32                        │
//! │  flags: u32                          │
//! │  message_count: u64                  │
//! │  unseen_count: u64                   │
//! │  next_uid: u64                       │
//! │  entries_sha256: [u8; 32]            │
//! │  (padding to 128 bytes)              │
//! ├──────────────────────────────────────┤
//! │ ENTRIES (variable)                   │
//! │  bincode-serialized                  │
//! │  Vec<MessageRecord>                  │
//! └──────────────────────────────────────┘
//! ```
//!
//! The counts live in the fixed header so metadata queries (total,
//! unread) never have to deserialize the entries.

/// Magic bytes identifying a mailkeep summary file.
pub const MAGIC: &[u8; 8] = b"MAILKEEP";

/// Current summary format version.
pub const VERSION: u32 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 128;

/// Serializable summary header.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct SummaryHeader {
    /// Magic bytes (must equal [`MAGIC`]).
    pub magic: [u8; 8],
    /// Format version (must equal [`VERSION`]).
    pub version: u32,
    /// Reserved flags (currently unused).
    pub flags: u32,
    /// Number of records in the summary.
    pub message_count: u64,
    /// Number of records without the seen flag.
    pub unseen_count: u64,
    /// Next value of the uid counter.
    pub next_uid: u64,
    /// SHA-256 of the serialized entry bytes.
    pub entries_sha256: [u8; 32],
}

impl SummaryHeader {
    /// Validate that the header is well-formed and matches the current
    /// format.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.magic != *MAGIC {
            return Err("Invalid magic bytes".into());
        }
        if self.version != VERSION {
            return Err(format!(
                "Incompatible version: expected {VERSION}, found {}",
                self.version
            ));
        }
        Ok(())
    }
}
