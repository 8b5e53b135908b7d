#![allow(dead_code)]

use std::error::Error;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{
    BatchConfig, BatchHandler, BatchSummary, HandlerFuture, JobContext, JobHandlerRegistry, Page,
    QueueActorArgs, QueueClient, QueueConfig,
};
use db::{Database, DbConfig, DbError};
use hookq_core::{JobData, JobId, JobRecord};
use serde_json::{Value, json};
use storage::{Storage, StorageConfig, StorageError};

/// A fresh in-memory database with the schema applied.
pub async fn setup_db() -> Result<Database, DbError> {
    db::init(&DbConfig::memory().with_database("test")).await
}

pub async fn memory_storage() -> Result<Storage, StorageError> {
    Storage::new(StorageConfig::memory()).await
}

/// Actor names are process-wide, so every test queue gets its own key.
pub fn queue_config(prefix: &str) -> QueueConfig {
    QueueConfig::default().with_deployment_key(format!("{prefix}-{}", ulid::Ulid::new()))
}

pub fn args(db: Database, storage: Storage, handlers: JobHandlerRegistry, prefix: &str) -> QueueActorArgs {
    QueueActorArgs::new(db, storage, handlers).with_config(queue_config(prefix))
}

pub fn job(job_path: &str, payload: Value) -> JobData {
    JobData::new("shop-1.example", job_path, "orders/create", payload)
}

/// A payload whose serialized form is roughly `kb` kilobytes.
pub fn payload_of_kb(kb: usize) -> Value {
    json!({ "note": "x".repeat(kb * 1024) })
}

/// Poll `check` until it yields a value or five seconds pass.
pub async fn wait_for<T, F, Fut>(mut check: F) -> Result<T, Box<dyn Error>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Box<dyn Error>>>,
{
    for _ in 0..500 {
        if let Some(value) = check().await? {
            return Ok(value);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Err("condition not reached in time".into())
}

/// Wait until the job leaves `pending`.
pub async fn wait_terminal(queue: &QueueClient, job_id: JobId) -> Result<JobRecord, Box<dyn Error>> {
    wait_for(|| async move {
        let record = queue.get_job_status(job_id).await?;
        Ok::<_, Box<dyn Error>>(record.filter(|r| r.status.is_terminal()))
    })
    .await
}

/// Batch handler over the numbers `1..=total`, `page_size` per page.
///
/// Cursors are the offset of the page. Records every processed item and
/// every fetched cursor, and checkpoints the last finished batch number.
#[derive(Clone)]
pub struct Counting {
    pub job_path: String,
    pub total: u64,
    pub page_size: u64,
    /// Item whose processing fails.
    pub fail_at: Option<u64>,
    pub processed: Arc<Mutex<Vec<u64>>>,
    pub cursors: Arc<Mutex<Vec<Option<u64>>>>,
    pub summaries: Arc<Mutex<Vec<(u32, Option<u32>, usize)>>>,
}

impl Counting {
    pub fn new(job_path: &str, total: u64, page_size: u64) -> Self {
        Self {
            job_path: job_path.to_string(),
            total,
            page_size,
            fail_at: None,
            processed: Arc::new(Mutex::new(Vec::new())),
            cursors: Arc::new(Mutex::new(Vec::new())),
            summaries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_at(mut self, item: u64) -> Self {
        self.fail_at = Some(item);
        self
    }

    pub fn processed(&self) -> Vec<u64> {
        self.processed.lock().unwrap().clone()
    }

    pub fn cursors(&self) -> Vec<Option<u64>> {
        self.cursors.lock().unwrap().clone()
    }

    pub fn summaries(&self) -> Vec<(u32, Option<u32>, usize)> {
        self.summaries.lock().unwrap().clone()
    }
}

impl BatchHandler for Counting {
    fn job_path(&self) -> &str {
        &self.job_path
    }

    fn fetch_page(&self, _ctx: Arc<JobContext>, cursor: Option<Value>) -> HandlerFuture<Page> {
        let offset = cursor.as_ref().and_then(Value::as_u64);
        self.cursors.lock().unwrap().push(offset);

        let start = offset.unwrap_or(0);
        let end = (start + self.page_size).min(self.total);
        let items = (start + 1..=end).map(|n| json!(n)).collect();
        let next = (end < self.total).then(|| json!(end));
        let page = Page::new(items, next).with_total(self.total);
        Box::pin(async move { Ok(page) })
    }

    fn on_batch_item(&self, _ctx: Arc<JobContext>, item: Value) -> HandlerFuture<Value> {
        let processed = self.processed.clone();
        let fail_at = self.fail_at;
        Box::pin(async move {
            let n = item.as_u64().ok_or("item is not a number")?;
            if fail_at == Some(n) {
                return Err(format!("item {n} rejected"));
            }
            processed.lock().unwrap().push(n);
            Ok(json!(n * 2))
        })
    }

    fn on_batch_complete(&self, ctx: Arc<JobContext>, summary: BatchSummary) -> HandlerFuture<()> {
        self.summaries.lock().unwrap().push((
            summary.batch_number,
            summary.total_batches,
            summary.results.len(),
        ));
        Box::pin(async move {
            ctx.durable_state()?
                .set("last_batch", &summary.batch_number)
                .await
                .map_err(|e| e.to_string())
        })
    }
}

pub fn batch_config(max_items: usize) -> BatchConfig {
    BatchConfig::default()
        .with_max_items(max_items)
        .with_wake_up_delay(Duration::from_millis(10))
}
