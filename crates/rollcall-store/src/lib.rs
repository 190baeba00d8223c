//! rollcall-store: SQLite persistence for rollcall.
//!
//! Holds the catalog of enrolled identities (the snapshot the matcher reads)
//! and the attendance log (where match decisions end up).

pub mod db;
pub mod error;
mod migrations;

pub use db::{AttendanceRecord, CatalogSnapshot, RecordOutcome, Store};
pub use error::{Result, StoreError};
