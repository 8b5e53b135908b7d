use db::{Database, DbConfig, DbError};

/// A fresh in-memory database with the schema applied.
///
/// Every `mem://` connection is its own datastore, so tests don't share state.
pub async fn setup_db() -> Result<Database, DbError> {
    db::init(&DbConfig::memory().with_database("test")).await
}
