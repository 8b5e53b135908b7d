//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    // Job records
    db.query(JOB_SCHEMA).await?.check()?;

    // Key-value entries (batch state, handler checkpoints)
    db.query(KV_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema.
///
/// Schemaless so that arbitrary webhook bodies and config snapshots survive
/// untouched.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

-- ULID string, lexicographic order is submission order
DEFINE INDEX IF NOT EXISTS job_order ON job FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
DEFINE INDEX IF NOT EXISTS job_path ON job FIELDS routing.job_path;
"#;

/// Key-value table schema.
const KV_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS kv SCHEMALESS;

DEFINE INDEX IF NOT EXISTS kv_key ON kv FIELDS key UNIQUE;
"#;
