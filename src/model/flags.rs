//! Message flag bitset.
//!
//! The low bits mirror the standard mailbox flags; the high bits are
//! internal bookkeeping used by the reconciler and never exposed to
//! callers as message state.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// A set of message flags.
#[derive(Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags(u32);

impl Flags {
    /// The message has been read.
    pub const SEEN: Flags = Flags(1 << 0);
    /// The message has been replied to.
    pub const ANSWERED: Flags = Flags(1 << 1);
    /// The message is marked for attention.
    pub const FLAGGED: Flags = Flags(1 << 2);
    /// The message is marked for deletion (removed on expunge).
    pub const DELETED: Flags = Flags(1 << 3);
    /// The message is an unfinished draft.
    pub const DRAFT: Flags = Flags(1 << 4);

    /// The record's flags differ from what its physical file encodes;
    /// the next commit must rewrite the file. Persisted, so a failed
    /// rewrite is retried even after a restart.
    pub const NEEDS_REWRITE: Flags = Flags(1 << 16);
    /// The record has not yet been matched to a physical message during
    /// the current scan. Transient; masked out of the persisted summary.
    pub const SCAN_PENDING: Flags = Flags(1 << 17);

    /// All standard message-state bits.
    pub const STANDARD: Flags =
        Flags(Self::SEEN.0 | Self::ANSWERED.0 | Self::FLAGGED.0 | Self::DELETED.0 | Self::DRAFT.0);

    /// Bits that survive a summary save.
    pub const PERSISTED: Flags = Flags(!Self::SCAN_PENDING.0);

    /// The empty flag set.
    pub const fn empty() -> Flags {
        Flags(0)
    }

    /// Raw bit representation.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Construct from raw bits.
    pub const fn from_bits(bits: u32) -> Flags {
        Flags(bits)
    }

    /// True if every bit of `other` is set in `self`.
    pub const fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if any bit of `other` is set in `self`.
    pub const fn intersects(self, other: Flags) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set the given bits.
    pub fn insert(&mut self, other: Flags) {
        self.0 |= other.0;
    }

    /// Clear the given bits.
    pub fn remove(&mut self, other: Flags) {
        self.0 &= !other.0;
    }

    /// Set or clear `mask` depending on `value`. Returns true if the
    /// flag set actually changed.
    pub fn set(&mut self, mask: Flags, value: bool) -> bool {
        let before = self.0;
        if value {
            self.insert(mask);
        } else {
            self.remove(mask);
        }
        self.0 != before
    }

    /// The flags restricted to the given mask.
    pub const fn masked(self, mask: Flags) -> Flags {
        Flags(self.0 & mask.0)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: &[(Flags, &str)] = &[
            (Flags::SEEN, "SEEN"),
            (Flags::ANSWERED, "ANSWERED"),
            (Flags::FLAGGED, "FLAGGED"),
            (Flags::DELETED, "DELETED"),
            (Flags::DRAFT, "DRAFT"),
            (Flags::NEEDS_REWRITE, "NEEDS_REWRITE"),
            (Flags::SCAN_PENDING, "SCAN_PENDING"),
        ];
        let mut first = true;
        write!(f, "Flags(")?;
        for (bit, name) in NAMES {
            if self.contains(*bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "∅")?;
        }
        write!(f, ")")
    }
}

/// Parse a human flag name ("seen", "answered", ...) into its bit.
///
/// Used by the CLI; internal bits are deliberately not accepted.
pub fn parse_flag_name(name: &str) -> Option<Flags> {
    match name.to_ascii_lowercase().as_str() {
        "seen" => Some(Flags::SEEN),
        "answered" | "replied" => Some(Flags::ANSWERED),
        "flagged" => Some(Flags::FLAGGED),
        "deleted" => Some(Flags::DELETED),
        "draft" => Some(Flags::DRAFT),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_reports_change() {
        let mut f = Flags::empty();
        assert!(f.set(Flags::SEEN, true));
        assert!(!f.set(Flags::SEEN, true));
        assert!(f.set(Flags::SEEN, false));
        assert!(f.is_empty());
    }

    #[test]
    fn persisted_mask_drops_scan_pending() {
        let mut f = Flags::SEEN | Flags::NEEDS_REWRITE | Flags::SCAN_PENDING;
        f = f.masked(Flags::PERSISTED);
        assert!(f.contains(Flags::SEEN));
        assert!(f.contains(Flags::NEEDS_REWRITE));
        assert!(!f.contains(Flags::SCAN_PENDING));
    }

    #[test]
    fn parse_names() {
        assert_eq!(parse_flag_name("Seen"), Some(Flags::SEEN));
        assert_eq!(parse_flag_name("replied"), Some(Flags::ANSWERED));
        assert_eq!(parse_flag_name("needs_rewrite"), None);
    }
}
