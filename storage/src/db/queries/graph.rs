use crate::db::schemas;

/// Query to read one source track's edges, closest first.
///
/// Compiles to:
/// ```sql, ignore
/// SELECT * FROM similarity_edge WHERE track_id = $track_id ORDER BY rank ASC LIMIT $limit
/// ```
#[must_use]
pub fn neighbors(limit: Option<usize>) -> String {
    let mut query = format!(
        "SELECT * FROM {} WHERE track_id = $track_id ORDER BY rank ASC",
        schemas::graph::TABLE_NAME
    );
    if let Some(limit) = limit {
        query.push_str(&format!(" LIMIT {limit}"));
    }
    query
}

/// Query to remove one source track's outgoing edges.
///
/// Compiles to:
/// ```sql, ignore
/// DELETE similarity_edge WHERE track_id = $track_id
/// ```
#[must_use]
pub fn delete_for_track() -> String {
    format!(
        "DELETE {} WHERE track_id = $track_id",
        schemas::graph::TABLE_NAME
    )
}

/// Query to count all edges.
///
/// Compiles to:
/// ```sql, ignore
/// RETURN array::len((SELECT VALUE id FROM similarity_edge))
/// ```
#[must_use]
pub fn count_edges() -> String {
    format!(
        "RETURN array::len((SELECT VALUE id FROM {}))",
        schemas::graph::TABLE_NAME
    )
}

/// Query to count distinct source tracks.
///
/// Compiles to:
/// ```sql, ignore
/// RETURN array::len(array::distinct((SELECT VALUE track_id FROM similarity_edge)))
/// ```
#[must_use]
pub fn count_sources() -> String {
    format!(
        "RETURN array::len(array::distinct((SELECT VALUE track_id FROM {})))",
        schemas::graph::TABLE_NAME
    )
}

/// Query for min/avg/max of the stored distances.
///
/// Compiles to:
/// ```sql, ignore
/// RETURN {
///     avg: math::mean((SELECT VALUE distance FROM similarity_edge)),
///     min: math::min((SELECT VALUE distance FROM similarity_edge)),
///     max: math::max((SELECT VALUE distance FROM similarity_edge))
/// }
/// ```
#[must_use]
pub fn distance_stats() -> String {
    let table = schemas::graph::TABLE_NAME;
    format!(
        "RETURN {{ avg: math::mean((SELECT VALUE distance FROM {table})), \
         min: math::min((SELECT VALUE distance FROM {table})), \
         max: math::max((SELECT VALUE distance FROM {table})) }}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_neighbors() {
        assert_eq!(
            neighbors(Some(10)),
            "SELECT * FROM similarity_edge WHERE track_id = $track_id ORDER BY rank ASC LIMIT 10"
        );
        assert_eq!(
            neighbors(None),
            "SELECT * FROM similarity_edge WHERE track_id = $track_id ORDER BY rank ASC"
        );
    }

    #[test]
    fn test_delete_for_track() {
        assert_eq!(
            delete_for_track(),
            "DELETE similarity_edge WHERE track_id = $track_id"
        );
    }
}
