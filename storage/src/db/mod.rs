//! Embedded database setup.
//!
//! Production opens a SurrealKV store on disk; tests run against the
//! in-memory engine with the same schema.

#[cfg(any(test, feature = "db"))]
pub mod crud;
#[cfg(any(test, feature = "db"))]
pub mod queries;
#[cfg(any(test, feature = "db"))]
pub mod schemas;

#[cfg(any(test, feature = "db"))]
use std::path::Path;

#[cfg(any(test, feature = "db"))]
use surrealdb::{
    engine::local::{Db, Mem, SurrealKV},
    Surreal,
};

#[cfg(any(test, feature = "db"))]
use crate::errors::StorageResult;

#[cfg(any(test, feature = "db"))]
const NAMESPACE: &str = "kindred";
#[cfg(any(test, feature = "db"))]
const DATABASE: &str = "library";

/// Open (or create) the on-disk database and register the schema.
///
/// # Errors
///
/// This function will return an error if the store cannot be opened or the
/// schema statements fail.
#[cfg(any(test, feature = "db"))]
pub async fn init_database(path: impl AsRef<Path>) -> StorageResult<Surreal<Db>> {
    let db = Surreal::new::<SurrealKV>(path.as_ref().to_path_buf()).await?;
    db.use_ns(NAMESPACE).use_db(DATABASE).await?;
    register_tables(&db).await?;
    log::info!("database ready at {}", path.as_ref().display());
    Ok(db)
}

/// Initialize an in-memory database with the same tables as the main
/// database. This is useful for testing queries and mutations.
///
/// # Errors
///
/// This function will return an error if the database cannot be initialized.
#[cfg(any(test, feature = "db"))]
pub async fn init_test_database() -> StorageResult<Surreal<Db>> {
    let db = Surreal::new::<Mem>(()).await?;
    db.use_ns("test").use_db("test").await?;
    register_tables(&db).await?;
    Ok(db)
}

/// Define all tables, fields and indexes. Idempotent: every statement is
/// `IF NOT EXISTS`, so running it against an existing database is safe.
#[cfg(any(test, feature = "db"))]
pub async fn register_tables<C: surrealdb::Connection>(
    db: &Surreal<C>,
) -> StorageResult<()> {
    db.query(schemas::track::DEFINE_TABLE).await?;
    db.query(schemas::fingerprint::define_table()).await?;
    db.query(schemas::graph::DEFINE_TABLE).await?;
    Ok(())
}
