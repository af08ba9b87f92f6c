//! Core data model: message flags, identifiers, records, and the
//! flag-in-filename codec used by the Maildir layout.

pub mod filename;
pub mod flags;
pub mod record;
