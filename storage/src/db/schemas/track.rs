#![allow(clippy::module_name_repetitions)]

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use surrealdb::sql::{Id, Thing};

pub type TrackId = Thing;

pub const TABLE_NAME: &str = "track";

/// Schema statements for the track table.
pub const DEFINE_TABLE: &str = "\
DEFINE TABLE IF NOT EXISTS track SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS path ON track TYPE string;
DEFINE FIELD IF NOT EXISTS duration_secs ON track TYPE float;
DEFINE FIELD IF NOT EXISTS sample_rate ON track TYPE int;
DEFINE INDEX IF NOT EXISTS track_path_unique_index ON track FIELDS path UNIQUE;";

/// A track in the library, as far as the fingerprinting core is concerned:
/// a stable integer id, where the audio lives, and basic stream facts.
/// Everything else about a song (tags, artwork, ...) belongs to other
/// layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Record id; the record key is the track's stable integer id.
    pub id: TrackId,
    pub path: PathBuf,
    pub duration_secs: f64,
    pub sample_rate: u32,
}

impl Track {
    #[must_use]
    pub fn make_id(track_id: i64) -> TrackId {
        Thing::from((TABLE_NAME, Id::Number(track_id)))
    }

    /// The stable integer key of this track.
    #[must_use]
    pub fn key(&self) -> i64 {
        match &self.id.id {
            Id::Number(n) => *n,
            other => {
                // Non-numeric ids never enter through this crate's API.
                debug_assert!(false, "non-numeric track id {other:?}");
                -1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_key_round_trip() {
        let track = Track {
            id: Track::make_id(42),
            path: PathBuf::from("/music/track.flac"),
            duration_secs: 180.,
            sample_rate: 44_100,
        };
        assert_eq!(track.key(), 42);
        assert_eq!(track.id.tb, TABLE_NAME);
    }
}
