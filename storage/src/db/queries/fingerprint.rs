use kindred_analysis::dimension_names;
use log::warn;

use crate::db::schemas;

/// A closed interval constraint on one named dimension, in original
/// (non-normalized) scale.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionRange {
    pub dimension: String,
    pub min: f64,
    pub max: f64,
}

impl DimensionRange {
    #[must_use]
    pub fn new(dimension: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            dimension: dimension.into(),
            min,
            max,
        }
    }
}

/// Query to read all completed fingerprints in track-id order, optionally
/// paginated.
///
/// Compiles to:
/// ```sql, ignore
/// SELECT * FROM fingerprint WHERE status = 'complete' ORDER BY track_id LIMIT $limit START $offset
/// ```
#[must_use]
pub fn read_all(limit: Option<usize>, offset: usize) -> String {
    let mut query = format!(
        "SELECT * FROM {} WHERE status = 'complete' ORDER BY track_id",
        schemas::fingerprint::TABLE_NAME
    );
    if let Some(limit) = limit {
        query.push_str(&format!(" LIMIT {limit} START {offset}"));
    }
    query
}

/// Query to find tracks that have no fingerprint row at all (claimed
/// tracks have a pending row and are therefore not returned).
///
/// Compiles to:
/// ```sql, ignore
/// SELECT * FROM track WHERE record::id(id) NOT IN (SELECT VALUE track_id FROM fingerprint) ORDER BY id LIMIT $limit
/// ```
#[must_use]
pub fn missing_fingerprints(limit: Option<usize>) -> String {
    let mut query = format!(
        "SELECT * FROM {track} WHERE record::id(id) NOT IN \
         (SELECT VALUE track_id FROM {fingerprint}) ORDER BY id",
        track = schemas::track::TABLE_NAME,
        fingerprint = schemas::fingerprint::TABLE_NAME,
    );
    if let Some(limit) = limit {
        query.push_str(&format!(" LIMIT {limit}"));
    }
    query
}

/// Query for the conjunction of per-dimension closed intervals, used by
/// the similarity pre-filter. Returns `None` when no valid dimension
/// survives (unknown names are skipped with a warning, like every other
/// lookup by dimension name).
///
/// Compiles to (for lufs + tempo_bpm):
/// ```sql, ignore
/// SELECT * FROM fingerprint WHERE status = 'complete'
///     AND lufs >= $lufs_min AND lufs <= $lufs_max
///     AND tempo_bpm >= $tempo_bpm_min AND tempo_bpm <= $tempo_bpm_max
///     LIMIT $limit
/// ```
/// with the interval endpoints bound as `<dimension>_min` / `<dimension>_max`.
#[must_use]
pub fn multi_dimension_range(
    ranges: &[DimensionRange],
    limit: Option<usize>,
) -> Option<(String, Vec<(String, f64)>)> {
    let valid_names = dimension_names();

    let mut clauses = String::new();
    let mut bindings = Vec::new();
    for range in ranges {
        if !valid_names.contains(&range.dimension.as_str()) {
            warn!("invalid dimension {:?}, skipping", range.dimension);
            continue;
        }
        let name = &range.dimension;
        clauses.push_str(&format!(
            " AND {name} >= ${name}_min AND {name} <= ${name}_max"
        ));
        bindings.push((format!("{name}_min"), range.min));
        bindings.push((format!("{name}_max"), range.max));
    }
    if bindings.is_empty() {
        warn!("no valid dimension ranges provided");
        return None;
    }

    let mut query = format!(
        "SELECT * FROM {} WHERE status = 'complete'{clauses}",
        schemas::fingerprint::TABLE_NAME
    );
    if let Some(limit) = limit {
        query.push_str(&format!(" LIMIT {limit}"));
    }
    Some((query, bindings))
}

/// Query to count completed fingerprints.
///
/// Compiles to:
/// ```sql, ignore
/// RETURN array::len((SELECT VALUE id FROM fingerprint WHERE status = 'complete'))
/// ```
#[must_use]
pub fn count() -> String {
    format!(
        "RETURN array::len((SELECT VALUE id FROM {} WHERE status = 'complete'))",
        schemas::fingerprint::TABLE_NAME
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_all_pagination() {
        assert_eq!(
            read_all(None, 0),
            "SELECT * FROM fingerprint WHERE status = 'complete' ORDER BY track_id"
        );
        assert_eq!(
            read_all(Some(100), 200),
            "SELECT * FROM fingerprint WHERE status = 'complete' ORDER BY track_id LIMIT 100 START 200"
        );
    }

    #[test]
    fn test_missing_fingerprints() {
        assert_eq!(
            missing_fingerprints(Some(5)),
            "SELECT * FROM track WHERE record::id(id) NOT IN \
             (SELECT VALUE track_id FROM fingerprint) ORDER BY id LIMIT 5"
        );
    }

    #[test]
    fn test_multi_dimension_range_builds_bindings() {
        let ranges = vec![
            DimensionRange::new("lufs", -20., -10.),
            DimensionRange::new("tempo_bpm", 100., 140.),
        ];
        let (query, bindings) = multi_dimension_range(&ranges, Some(50)).unwrap();
        assert!(query.contains("lufs >= $lufs_min"));
        assert!(query.contains("tempo_bpm <= $tempo_bpm_max"));
        assert!(query.ends_with("LIMIT 50"));
        assert_eq!(bindings.len(), 4);
        assert_eq!(bindings[0], ("lufs_min".to_string(), -20.));
    }

    #[test]
    fn test_unknown_dimensions_are_skipped() {
        let ranges = vec![
            DimensionRange::new("no_such_dimension", 0., 1.),
            DimensionRange::new("crest_db", 6., 10.),
        ];
        let (query, bindings) = multi_dimension_range(&ranges, None).unwrap();
        assert!(!query.contains("no_such_dimension"));
        assert_eq!(bindings.len(), 2);
    }

    #[test]
    fn test_all_invalid_ranges_yield_none() {
        let ranges = vec![DimensionRange::new("bogus", 0., 1.)];
        assert!(multi_dimension_range(&ranges, None).is_none());
    }
}
