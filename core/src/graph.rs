//! Builds and maintains the persisted K-NN similarity graph.
//!
//! The graph trades a one-time build for instant neighbor queries: every
//! source track stores its k nearest neighbors with a dense rank. Edges do
//! not self-invalidate; re-fingerprinted tracks need an explicit
//! `update_graph`.

use std::time::Instant;

use kindred_storage::db::schemas::fingerprint::FingerprintRow;
use kindred_storage::db::schemas::graph::SimilarityEdge;
use log::{debug, info, warn};
use serde::Serialize;
use surrealdb::{Connection, Surreal};

use crate::errors::CoreResult;
use crate::similarity::SimilarityEngine;

pub const DEFAULT_K: usize = 10;
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Statistics about a graph build (or the stored graph).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GraphStats {
    pub total_tracks: usize,
    pub total_edges: usize,
    pub k_neighbors: usize,
    pub avg_distance: f64,
    pub min_distance: f64,
    pub max_distance: f64,
    pub build_time_seconds: f64,
}

pub struct KnnGraphBuilder<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> KnnGraphBuilder<C> {
    #[must_use]
    pub const fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    /// Build the complete graph: k edges per fingerprinted track,
    /// committed in batches of `batch_size` source tracks.
    ///
    /// # Errors
    ///
    /// Propagates repository errors; requires a fitted `similarity`.
    pub async fn build_graph(
        &self,
        similarity: &SimilarityEngine<C>,
        k: usize,
        batch_size: usize,
        clear_existing: bool,
    ) -> CoreResult<GraphStats> {
        info!("building K-NN similarity graph (k={k})");
        let started = Instant::now();

        if clear_existing {
            debug!("clearing existing similarity graph");
            SimilarityEdge::clear(&self.db).await?;
        }

        let rows = FingerprintRow::get_all(&self.db, None, 0).await?;
        let total_tracks = rows.len();
        if total_tracks == 0 {
            warn!("no fingerprints found, cannot build graph");
            return Ok(GraphStats {
                total_tracks: 0,
                total_edges: 0,
                k_neighbors: k,
                avg_distance: 0.,
                min_distance: 0.,
                max_distance: 0.,
                build_time_seconds: 0.,
            });
        }

        let mut total_edges = 0usize;
        let mut distance_sum = 0.;
        let mut min_distance = f64::INFINITY;
        let mut max_distance: f64 = 0.;

        for (batch_index, batch) in rows.chunks(batch_size.max(1)).enumerate() {
            let mut edges = Vec::new();
            for row in batch {
                let results = similarity.find_similar(row.track_id, k, true).await?;
                for (rank, result) in results.iter().enumerate() {
                    edges.push(SimilarityEdge::new(
                        row.track_id,
                        result.track_id,
                        result.distance,
                        result.similarity_score,
                        rank as u32 + 1,
                    ));
                    distance_sum += result.distance;
                    min_distance = min_distance.min(result.distance);
                    max_distance = max_distance.max(result.distance);
                }
            }
            total_edges += SimilarityEdge::insert_batch(&self.db, edges).await?;
            debug!(
                "graph progress: {}/{total_tracks} tracks",
                (batch_index * batch_size + batch.len()).min(total_tracks)
            );
        }

        let stats = GraphStats {
            total_tracks,
            total_edges,
            k_neighbors: k,
            avg_distance: if total_edges > 0 {
                distance_sum / total_edges as f64
            } else {
                0.
            },
            min_distance: if total_edges > 0 { min_distance } else { 0. },
            max_distance,
            build_time_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            "graph built in {:.1}s: {total_tracks} tracks, {total_edges} edges",
            stats.build_time_seconds
        );
        Ok(stats)
    }

    /// Rebuild the outgoing edges of specific tracks (the path taken when
    /// tracks are added or re-fingerprinted). Returns the edge count
    /// written.
    ///
    /// # Errors
    ///
    /// Propagates repository errors; requires a fitted `similarity`.
    pub async fn update_graph(
        &self,
        similarity: &SimilarityEngine<C>,
        track_ids: &[i64],
        k: usize,
    ) -> CoreResult<usize> {
        info!("updating K-NN graph for {} tracks", track_ids.len());

        let mut edges_written = 0usize;
        for &track_id in track_ids {
            SimilarityEdge::delete_for_track(&self.db, track_id).await?;

            let results = similarity.find_similar(track_id, k, true).await?;
            let edges: Vec<SimilarityEdge> = results
                .iter()
                .enumerate()
                .map(|(rank, result)| {
                    SimilarityEdge::new(
                        track_id,
                        result.track_id,
                        result.distance,
                        result.similarity_score,
                        rank as u32 + 1,
                    )
                })
                .collect();
            edges_written += SimilarityEdge::insert_batch(&self.db, edges).await?;
        }
        Ok(edges_written)
    }

    /// Pre-computed neighbors for one source track, rank ascending.
    ///
    /// # Errors
    ///
    /// Propagates repository errors.
    pub async fn get_neighbors(
        &self,
        track_id: i64,
        limit: Option<usize>,
    ) -> CoreResult<Vec<SimilarityEdge>> {
        Ok(SimilarityEdge::neighbors(&self.db, track_id, limit).await?)
    }

    /// Remove every edge; returns how many there were.
    ///
    /// # Errors
    ///
    /// Propagates repository errors.
    pub async fn clear_graph(&self) -> CoreResult<usize> {
        let count = SimilarityEdge::clear(&self.db).await?;
        info!("cleared {count} edges from similarity graph");
        Ok(count)
    }

    /// Statistics of the graph as stored; `None` when it is empty.
    ///
    /// # Errors
    ///
    /// Propagates repository errors.
    pub async fn graph_stats(&self) -> CoreResult<Option<GraphStats>> {
        let total_edges = SimilarityEdge::count_edges(&self.db).await?;
        if total_edges == 0 {
            return Ok(None);
        }
        let total_tracks = SimilarityEdge::count_sources(&self.db).await?;
        let distances = SimilarityEdge::distance_stats(&self.db).await?;

        Ok(Some(GraphStats {
            total_tracks,
            total_edges,
            k_neighbors: if total_tracks > 0 {
                total_edges / total_tracks
            } else {
                0
            },
            avg_distance: distances.avg.unwrap_or(0.),
            min_distance: distances.min.unwrap_or(0.),
            max_distance: distances.max.unwrap_or(0.),
            // Not tracked for a graph loaded from storage.
            build_time_seconds: 0.,
        }))
    }
}
