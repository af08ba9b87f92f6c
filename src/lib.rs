//! `mailkeep` — a local mailbox consistency engine.
//!
//! Keeps a persisted, queryable message index (the "summary") in sync
//! with a flat-file mailbox directory shared by multiple independent
//! processes, coordinating through filesystem primitives only: a
//! three-mechanism advisory folder lock, a reconciliation pass over the
//! directory tree, and flag state carried in filenames or message
//! headers depending on the layout.

pub mod config;
pub mod error;
pub mod folder;
pub mod lock;
pub mod model;
pub mod parser;
pub mod reconcile;
pub mod summary;
