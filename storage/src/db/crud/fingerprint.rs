//! CRUD operations for the fingerprint table.
//!
//! The fingerprint table is the single source of truth for fingerprint
//! presence, and its UNIQUE `track_id` index is the arbiter that lets many
//! workers claim tracks without ever processing one twice.

use kindred_analysis::Fingerprint;
use surrealdb::{Connection, Surreal};
use tracing::instrument;

use crate::{
    db::{
        crud::track::is_conflict,
        queries::{self, fingerprint::DimensionRange},
        schemas::{fingerprint::FingerprintRow, track::Track},
    },
    errors::StorageResult,
};

impl FingerprintRow {
    /// Atomic insert-or-replace of all 25 fields for one track.
    ///
    /// Concurrent upserts on the same `track_id` serialize inside the
    /// store; no partial update is ever observable.
    #[instrument(skip(db, fingerprint))]
    pub async fn upsert<C: Connection>(
        db: &Surreal<C>,
        track_id: i64,
        fingerprint: &Fingerprint,
    ) -> StorageResult<Option<Self>> {
        let row = Self::completed(track_id, fingerprint);
        Ok(db
            .upsert(surrealdb::RecordId::from_inner(row.id.clone()))
            .content(row)
            .await?)
    }

    #[instrument(skip(db))]
    pub async fn get_by_track_id<C: Connection>(
        db: &Surreal<C>,
        track_id: i64,
    ) -> StorageResult<Option<Self>> {
        Ok(db
            .select(surrealdb::RecordId::from_inner(Self::make_id(track_id)))
            .await?)
    }

    /// Completed rows in track-id order. Callers fitting the normalizer on
    /// a large library are expected to paginate.
    #[instrument(skip(db))]
    pub async fn get_all<C: Connection>(
        db: &Surreal<C>,
        limit: Option<usize>,
        offset: usize,
    ) -> StorageResult<Vec<Self>> {
        Ok(db
            .query(queries::fingerprint::read_all(limit, offset))
            .await?
            .take(0)?)
    }

    /// Completed rows matching a conjunction of per-dimension closed
    /// intervals (original scale). Unknown dimension names are skipped; if
    /// none survive, this returns an empty list.
    #[instrument(skip(db, ranges))]
    pub async fn get_by_multi_dimension_range<C: Connection>(
        db: &Surreal<C>,
        ranges: &[DimensionRange],
        limit: Option<usize>,
    ) -> StorageResult<Vec<Self>> {
        let Some((query, bindings)) =
            queries::fingerprint::multi_dimension_range(ranges, limit)
        else {
            return Ok(vec![]);
        };

        let mut request = db.query(query);
        for (name, value) in bindings {
            request = request.bind((name, value));
        }
        Ok(request.await?.take(0)?)
    }

    /// Single-dimension convenience form of
    /// [`get_by_multi_dimension_range`](Self::get_by_multi_dimension_range).
    #[instrument(skip(db))]
    pub async fn get_by_dimension_range<C: Connection>(
        db: &Surreal<C>,
        dimension: &str,
        min: f64,
        max: f64,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Self>> {
        Self::get_by_multi_dimension_range(
            db,
            &[DimensionRange::new(dimension, min, max)],
            limit,
        )
        .await
    }

    /// Tracks that have no fingerprint row at all, detached from any
    /// transaction.
    #[instrument(skip(db))]
    pub async fn get_missing_fingerprints<C: Connection>(
        db: &Surreal<C>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<Track>> {
        Ok(db
            .query(queries::fingerprint::missing_fingerprints(limit))
            .await?
            .take(0)?)
    }

    /// Atomically claim the next track without a fingerprint row.
    ///
    /// Finds a candidate, then tries to create a pending placeholder row
    /// keyed by the track id. If another worker created one first, the
    /// uniqueness conflict makes this return `None` and the caller simply
    /// retries; `None` with no eligible track means the library is
    /// drained. This placeholder insert is load-bearing: do not replace it
    /// with a get-then-insert.
    #[instrument(skip(db))]
    pub async fn claim_next_unfingerprinted_track<C: Connection>(
        db: &Surreal<C>,
    ) -> StorageResult<Option<Track>> {
        let candidate: Option<Track> = db
            .query(queries::fingerprint::missing_fingerprints(Some(1)))
            .await?
            .take(0)?;
        let Some(track) = candidate else {
            return Ok(None);
        };

        let placeholder = Self::placeholder(track.key());
        let created: Result<Option<Self>, surrealdb::Error> = db
            .create(surrealdb::RecordId::from_inner(placeholder.id.clone()))
            .content(placeholder)
            .await;
        match created {
            Ok(Some(_)) => {
                tracing::debug!("track {} claimed", track.key());
                Ok(Some(track))
            }
            Ok(None) => Ok(None),
            Err(e) if is_conflict(&e) => {
                tracing::debug!("track {} already claimed", track.key());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(db))]
    pub async fn exists<C: Connection>(db: &Surreal<C>, track_id: i64) -> StorageResult<bool> {
        Ok(Self::get_by_track_id(db, track_id).await?.is_some())
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

    /// Number of completed fingerprints.
    #[instrument(skip(db))]
    pub async fn count<C: Connection>(db: &Surreal<C>) -> StorageResult<usize> {
        let count: Option<i64> = db
            .query(queries::fingerprint::count())
            .await?
            .take(0)?;
        #[allow(clippy::cast_sign_loss)]
        Ok(count.unwrap_or(0).max(0) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_database;
    use crate::test_utils::{arb_fingerprint, create_track};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_upsert_then_get() -> anyhow::Result<()> {
        let db = init_test_database().await?;
        create_track(&db, 1).await?;

        let fingerprint = arb_fingerprint(1);
        let row = FingerprintRow::upsert(&db, 1, &fingerprint)
            .await?
            .expect("upserted");
        assert!(row.is_complete());
        assert_eq!(row.fingerprint(), fingerprint);

        let read = FingerprintRow::get_by_track_id(&db, 1).await?.unwrap();
        assert_eq!(read, row);

        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_overwrites_all_fields() -> anyhow::Result<()> {
        let db = init_test_database().await?;
        create_track(&db, 1).await?;

        FingerprintRow::upsert(&db, 1, &arb_fingerprint(1)).await?;
        let second = arb_fingerprint(2);
        FingerprintRow::upsert(&db, 1, &second).await?;

        let read = FingerprintRow::get_by_track_id(&db, 1).await?.unwrap();
        assert_eq!(read.fingerprint(), second);
        assert_eq!(FingerprintRow::count(&db).await?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_completes_a_pending_claim() -> anyhow::Result<()> {
        let db = init_test_database().await?;
        create_track(&db, 1).await?;

        let claimed = FingerprintRow::claim_next_unfingerprinted_track(&db).await?;
        assert_eq!(claimed.map(|t| t.key()), Some(1));

        // The claim is visible as a pending row, not a completed one.
        let row = FingerprintRow::get_by_track_id(&db, 1).await?.unwrap();
        assert!(!row.is_complete());
        assert_eq!(FingerprintRow::count(&db).await?, 0);

        FingerprintRow::upsert(&db, 1, &arb_fingerprint(1)).await?;
        let row = FingerprintRow::get_by_track_id(&db, 1).await?.unwrap();
        assert!(row.is_complete());
        assert_eq!(FingerprintRow::count(&db).await?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_claim_drains_library_without_duplicates() -> anyhow::Result<()> {
        let db = init_test_database().await?;
        for id in 1..=5 {
            create_track(&db, id).await?;
        }

        let mut claimed = HashSet::new();
        while let Some(track) = FingerprintRow::claim_next_unfingerprinted_track(&db).await? {
            assert!(claimed.insert(track.key()), "duplicate claim {}", track.key());
        }
        assert_eq!(claimed.len(), 5);

        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_collide() -> anyhow::Result<()> {
        let db = init_test_database().await?;
        for id in 1..=20 {
            create_track(&db, id).await?;
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    match FingerprintRow::claim_next_unfingerprinted_track(&db).await {
                        Ok(Some(track)) => mine.push(track.key()),
                        Ok(None) => {
                            // A conflict and a drained library look the same;
                            // check whether anything is actually left.
                            match FingerprintRow::get_missing_fingerprints(&db, Some(1)).await {
                                Ok(remaining) if remaining.is_empty() => break,
                                Ok(_) => continue,
                                Err(_) => break,
                            }
                        }
                        Err(_) => break,
                    }
                }
                mine
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await?);
        }
        let distinct: HashSet<i64> = all.iter().copied().collect();
        assert_eq!(distinct.len(), all.len(), "a track was claimed twice");
        assert_eq!(distinct.len(), 20);

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_fingerprints_excludes_claimed() -> anyhow::Result<()> {
        let db = init_test_database().await?;
        create_track(&db, 1).await?;
        create_track(&db, 2).await?;

        let missing = FingerprintRow::get_missing_fingerprints(&db, None).await?;
        assert_eq!(missing.len(), 2);

        FingerprintRow::claim_next_unfingerprinted_track(&db).await?;
        let missing = FingerprintRow::get_missing_fingerprints(&db, None).await?;
        assert_eq!(missing.len(), 1);

        FingerprintRow::upsert(&db, 2, &arb_fingerprint(2)).await?;
        let missing = FingerprintRow::get_missing_fingerprints(&db, None).await?;
        assert!(missing.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_get_all_skips_pending_rows() -> anyhow::Result<()> {
        let db = init_test_database().await?;
        for id in 1..=3 {
            create_track(&db, id).await?;
        }
        FingerprintRow::upsert(&db, 1, &arb_fingerprint(1)).await?;
        FingerprintRow::upsert(&db, 3, &arb_fingerprint(3)).await?;
        FingerprintRow::claim_next_unfingerprinted_track(&db).await?; // claims 2

        let all = FingerprintRow::get_all(&db, None, 0).await?;
        let ids: Vec<i64> = all.iter().map(|r| r.track_id).collect();
        assert_eq!(ids, vec![1, 3]);

        Ok(())
    }

    #[tokio::test]
    async fn test_get_all_pagination() -> anyhow::Result<()> {
        let db = init_test_database().await?;
        for id in 1..=10 {
            create_track(&db, id).await?;
            FingerprintRow::upsert(&db, id, &arb_fingerprint(id as u64)).await?;
        }

        let page = FingerprintRow::get_all(&db, Some(4), 4).await?;
        let ids: Vec<i64> = page.iter().map(|r| r.track_id).collect();
        assert_eq!(ids, vec![5, 6, 7, 8]);

        Ok(())
    }

    #[tokio::test]
    async fn test_multi_dimension_range_filter() -> anyhow::Result<()> {
        let db = init_test_database().await?;
        for id in 1..=5 {
            create_track(&db, id).await?;
            let mut fingerprint = arb_fingerprint(id as u64);
            fingerprint.lufs = -10. - id as f64; // -11 .. -15
            fingerprint.tempo_bpm = 100. + 10. * id as f64; // 110 .. 150
            FingerprintRow::upsert(&db, id, &fingerprint).await?;
        }

        let ranges = vec![
            DimensionRange::new("lufs", -13.5, -10.),
            DimensionRange::new("tempo_bpm", 115., 145.),
        ];
        let rows =
            FingerprintRow::get_by_multi_dimension_range(&db, &ranges, None).await?;
        let mut ids: Vec<i64> = rows.iter().map(|r| r.track_id).collect();
        ids.sort_unstable();
        // lufs in range for 1..=3, tempo in range for 2..=4
        assert_eq!(ids, vec![2, 3]);

        Ok(())
    }

    #[tokio::test]
    async fn test_exists_and_delete() -> anyhow::Result<()> {
        let db = init_test_database().await?;
        create_track(&db, 1).await?;

        assert!(!FingerprintRow::exists(&db, 1).await?);
        FingerprintRow::upsert(&db, 1, &arb_fingerprint(1)).await?;
        assert!(FingerprintRow::exists(&db, 1).await?);

        FingerprintRow::delete(&db, 1).await?;
        assert!(!FingerprintRow::exists(&db, 1).await?);

        Ok(())
    }
}
