//! Flag-in-filename codec for the Maildir layout.
//!
//! Message state lives directly in the file name: `<uid>:2,<flags>`, with
//! one character per set flag. Characters are emitted in a fixed ASCII
//! order so two encodings of the same flag set are byte-identical, which
//! makes "does the filename match the flags" a plain string comparison.

use super::flags::Flags;

/// Marker separating the uid from the flag characters.
pub const FLAG_MARKER: &str = ":2,";

/// Flag characters in canonical (ASCII-sorted) emission order.
const FLAG_CHARS: &[(char, Flags)] = &[
    ('D', Flags::DRAFT),
    ('F', Flags::FLAGGED),
    ('R', Flags::ANSWERED),
    ('S', Flags::SEEN),
    ('T', Flags::DELETED),
];

/// Encode a uid and flag set into a canonical filename.
///
/// Only standard flag bits are represented; bookkeeping bits are ignored.
pub fn encode(uid: &str, flags: Flags) -> String {
    let mut name = String::with_capacity(uid.len() + FLAG_MARKER.len() + FLAG_CHARS.len());
    name.push_str(uid);
    name.push_str(FLAG_MARKER);
    for (c, bit) in FLAG_CHARS {
        if flags.contains(*bit) {
            name.push(*c);
        }
    }
    name
}

/// Decode the flag suffix of `name` on top of `existing`.
///
/// Returns the merged flags and whether any new bit was set. Unrecognized
/// characters are ignored for forward compatibility; a name with no
/// `:2,` marker decodes to "no change".
///
/// Decoding only ever *adds* bits: a flag present in `existing` but absent
/// from the filename is kept. Clearing is driven by rewriting the filename
/// through [`encode`], not by decode removing bits.
pub fn decode(name: &str, existing: Flags) -> (Flags, bool) {
    let mut flags = existing;
    if let Some(idx) = name.rfind(FLAG_MARKER) {
        for c in name[idx + FLAG_MARKER.len()..].chars() {
            for (fc, bit) in FLAG_CHARS {
                if c == *fc {
                    flags.insert(*bit);
                }
            }
        }
    }
    (flags, flags != existing)
}

/// The uid portion of a Maildir filename: everything before the last
/// `:2,` marker, or the whole name when no marker is present.
pub fn uid_of(name: &str) -> &str {
    match name.rfind(FLAG_MARKER) {
        Some(idx) => &name[..idx],
        None => name,
    }
}
