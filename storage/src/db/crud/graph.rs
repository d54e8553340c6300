//! CRUD operations for the persisted similarity graph.

use serde::Deserialize;
use surrealdb::{Connection, Surreal};
use tracing::instrument;

use crate::{
    db::{
        queries,
        schemas::graph::{SimilarityEdge, TABLE_NAME},
    },
    errors::StorageResult,
};

/// min/avg/max over all stored edge distances.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DistanceStats {
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl SimilarityEdge {
    /// Insert a batch of edges; returns how many were stored.
    #[instrument(skip(db, edges))]
    pub async fn insert_batch<C: Connection>(
        db: &Surreal<C>,
        edges: Vec<Self>,
    ) -> StorageResult<usize> {
        if edges.is_empty() {
            return Ok(0);
        }
        let created: Vec<Self> = db.insert(TABLE_NAME).content(edges).await?;
        Ok(created.len())
    }

    /// One source track's outgoing edges, rank ascending.
    #[instrument(skip(db))]
    pub async fn neighbors<C: Connection>(
        db: &Surreal<C>,
        track_id: i64,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Self>> {
        Ok(db
            .query(queries::graph::neighbors(limit))
            .bind(("track_id", track_id))
            .await?
            .take(0)?)
    }

    /// Remove one source track's outgoing edges.
    #[instrument(skip(db))]
    pub async fn delete_for_track<C: Connection>(
        db: &Surreal<C>,
        track_id: i64,
    ) -> StorageResult<()> {
        db.query(queries::graph::delete_for_track())
            .bind(("track_id", track_id))
            .await?;
        Ok(())
    }

    /// Remove every edge; returns how many there were.
    #[instrument(skip(db))]
    pub async fn clear<C: Connection>(db: &Surreal<C>) -> StorageResult<usize> {
        let count = Self::count_edges(db).await?;
        let _: Vec<Self> = db.delete(TABLE_NAME).await?;
        Ok(count)
    }

    #[instrument(skip(db))]
    pub async fn count_edges<C: Connection>(db: &Surreal<C>) -> StorageResult<usize> {
        let count: Option<i64> = db.query(queries::graph::count_edges()).await?.take(0)?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count.unwrap_or(0).max(0) as usize)
    }

    /// Number of distinct source tracks that have outgoing edges.
    #[instrument(skip(db))]
    pub async fn count_sources<C: Connection>(db: &Surreal<C>) -> StorageResult<usize> {
        let count: Option<i64> = db.query(queries::graph::count_sources()).await?.take(0)?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count.unwrap_or(0).max(0) as usize)
    }

    /// min/avg/max over all stored distances, `None` fields when the graph
    /// is empty.
    #[instrument(skip(db))]
    pub async fn distance_stats<C: Connection>(
        db: &Surreal<C>,
    ) -> StorageResult<DistanceStats> {
        let stats: Option<DistanceStats> = db
            .query(queries::graph::distance_stats())
            .await?
            .take(0)?;
        Ok(stats.unwrap_or(DistanceStats {
            avg: None,
            min: None,
            max: None,
        }))
    }
}
