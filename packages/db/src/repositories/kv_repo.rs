//! Key-value entries in the primary store.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Database, DbError};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct KvEntry {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

impl KvEntry {
    pub(crate) fn new(key: &str, value: Value) -> Self {
        Self {
            key: key.to_string(),
            value,
            updated_at: Utc::now(),
        }
    }
}

/// Typed access to the `kv` table.
#[derive(Clone)]
pub struct KvRepository {
    db: Database,
}

impl KvRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Read and decode the value stored under `key`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, DbError> {
        let entry: Option<KvEntry> = self.db.select(("kv", key.to_string())).await?;
        match entry {
            Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace the value stored under `key`.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), DbError> {
        let entry = KvEntry::new(key, serde_json::to_value(value)?);
        let _: Option<KvEntry> = self
            .db
            .upsert(("kv", key.to_string()))
            .content(entry)
            .await?;
        Ok(())
    }

    /// Remove `key`. Returns whether an entry existed.
    pub async fn delete(&self, key: &str) -> Result<bool, DbError> {
        let removed: Option<KvEntry> = self.db.delete(("kv", key.to_string())).await?;
        Ok(removed.is_some())
    }

    /// All entries whose key starts with `prefix`, ordered by key.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Value)>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM kv WHERE string::starts_with(key, $prefix) ORDER BY key ASC")
            .bind(("prefix", prefix.to_string()))
            .await?;

        let entries: Vec<KvEntry> = result.take(0)?;
        Ok(entries.into_iter().map(|e| (e.key, e.value)).collect())
    }

    /// Remove every entry whose key starts with `prefix`.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<(), DbError> {
        self.db
            .query("DELETE kv WHERE string::starts_with(key, $prefix)")
            .bind(("prefix", prefix.to_string()))
            .await?
            .check()?;
        Ok(())
    }
}
