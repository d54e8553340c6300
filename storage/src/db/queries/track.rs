use crate::db::schemas;

/// Query to read all tracks in id order.
///
/// Compiles to:
/// ```sql, ignore
/// SELECT * FROM track ORDER BY id
/// ```
#[must_use]
pub fn read_all() -> String {
    format!("SELECT * FROM {} ORDER BY id", schemas::track::TABLE_NAME)
}

/// Query to count tracks.
///
/// Compiles to:
/// ```sql, ignore
/// RETURN array::len((SELECT VALUE id FROM track))
/// ```
#[must_use]
pub fn count() -> String {
    format!(
        "RETURN array::len((SELECT VALUE id FROM {}))",
        schemas::track::TABLE_NAME
    )
}
