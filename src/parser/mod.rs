//! Message parsing: header-only envelope extraction for the summary.

pub mod envelope;
