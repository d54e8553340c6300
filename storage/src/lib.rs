//! Durable storage for the kindred engine.
//!
//! Tracks, fingerprints and the similarity graph live in an embedded
//! SurrealDB database; the `.25d` sidecar cache lives next to the audio
//! files themselves. Everything that crosses this crate's boundary is an
//! owned value type — no live transactions or lazy handles escape.

pub mod db;
pub mod errors;
pub mod sidecar;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
