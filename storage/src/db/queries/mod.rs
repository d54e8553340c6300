//! Query text builders.
//!
//! Kept separate from the CRUD layer so the statements can be unit-tested
//! as strings without touching a database.

pub mod fingerprint;
pub mod graph;
pub mod track;
