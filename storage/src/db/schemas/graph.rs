#![allow(clippy::module_name_repetitions)]

use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

pub type EdgeId = Thing;

pub const TABLE_NAME: &str = "similarity_edge";

/// Schema statements for the persisted K-NN graph.
pub const DEFINE_TABLE: &str = "\
DEFINE TABLE IF NOT EXISTS similarity_edge SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS track_id ON similarity_edge TYPE int;
DEFINE FIELD IF NOT EXISTS similar_track_id ON similarity_edge TYPE int;
DEFINE FIELD IF NOT EXISTS distance ON similarity_edge TYPE float;
DEFINE FIELD IF NOT EXISTS similarity_score ON similarity_edge TYPE float;
DEFINE FIELD IF NOT EXISTS rank ON similarity_edge TYPE int;
DEFINE INDEX IF NOT EXISTS similarity_edge_track_id_index ON similarity_edge FIELDS track_id;";

/// One directed edge of the similarity graph: `similar_track_id` is the
/// `rank`-th nearest neighbor of `track_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimilarityEdge {
    /// Assigned by the database on insert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<EdgeId>,
    pub track_id: i64,
    pub similar_track_id: i64,
    pub distance: f64,
    pub similarity_score: f64,
    /// 1-based, dense per source track: 1 is the closest neighbor.
    pub rank: u32,
}

impl SimilarityEdge {
    #[must_use]
    pub const fn new(
        track_id: i64,
        similar_track_id: i64,
        distance: f64,
        similarity_score: f64,
        rank: u32,
    ) -> Self {
        Self {
            id: None,
            track_id,
            similar_track_id,
            distance,
            similarity_score,
            rank,
        }
    }
}
