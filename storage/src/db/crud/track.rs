//! CRUD operations for the track table.
//!
//! This is the ingestion hook: external code inserts track rows, and from
//! that moment the track is eligible for fingerprint claiming.

use std::path::PathBuf;

use surrealdb::{Connection, Surreal};
use tracing::instrument;

use crate::{
    db::{queries, schemas::track::Track},
    errors::StorageResult,
};

impl Track {
    /// Insert a track with a caller-chosen stable integer id.
    ///
    /// Returns `None` when a track with this id (or path) already exists.
    #[instrument(skip(db))]
    pub async fn create<C: Connection>(
        db: &Surreal<C>,
        track_id: i64,
        path: PathBuf,
        duration_secs: f64,
        sample_rate: u32,
    ) -> StorageResult<Option<Self>> {
        let track = Self {
            id: Self::make_id(track_id),
            path,
            duration_secs,
            sample_rate,
        };
        let created: Result<Option<Self>, surrealdb::Error> = db
            .create(surrealdb::RecordId::from_inner(track.id.clone()))
            .content(track)
            .await;
        match created {
            Ok(created) => Ok(created),
            Err(e) if is_conflict(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(db))]
    pub async fn read<C: Connection>(
        db: &Surreal<C>,
        track_id: i64,
    ) -> StorageResult<Option<Self>> {
        Ok(db
            .select(surrealdb::RecordId::from_inner(Self::make_id(track_id)))
            .await?)
    }

    #[instrument(skip(db))]
    pub async fn read_all<C: Connection>(db: &Surreal<C>) -> StorageResult<Vec<Self>> {
        Ok(db.query(queries::track::read_all()).await?.take(0)?)
    }

    #[instrument(skip(db))]
    pub async fn delete<C: Connection>(
        db: &Surreal<C>,
        track_id: i64,
    ) -> StorageResult<Option<Self>> {
        Ok(db
            .delete(surrealdb::RecordId::from_inner(Self::make_id(track_id)))
            .await?)
    }

    #[instrument(skip(db))]
    pub async fn count<C: Connection>(db: &Surreal<C>) -> StorageResult<usize> {
        let count: Option<i64> = db.query(queries::track::count()).await?.take(0)?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count.unwrap_or(0).max(0) as usize)
    }
}

/// Record-exists and unique-index violations both mean "this row is
/// already taken".
pub(crate) fn is_conflict(e: &surrealdb::Error) -> bool {
    let message = e.to_string();
    message.contains("already exists") || message.contains("already contains")
}
