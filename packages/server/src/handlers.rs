//! Demo handlers compiled into the `hookq` binary.

use std::sync::Arc;

use actors::{
    BatchHandler, BatchSummary, HandlerFuture, JobContext, JobHandlerRegistry, Page, job_handler,
};
use hookq_core::JobResult;
use serde_json::{Value, json};

const DEFAULT_PAGE_SIZE: u64 = 10;

pub fn demo_registry() -> JobHandlerRegistry {
    let mut handlers = JobHandlerRegistry::new();

    handlers.register(job_handler!("hello-world", |ctx| {
        tracing::info!("Hello from {} ({})", ctx.tenant, ctx.topic);
        Ok(JobResult::with_output(
            format!("hello {}", ctx.tenant),
            json!({ "topic": ctx.topic }),
        ))
    }));

    handlers.register(job_handler!("fail", |ctx| {
        Err(format!("intentional failure for {}", ctx.tenant))
    }));

    handlers.register_batch(CountBatch);
    handlers
}

/// Walks the numbers `1..=payload.count`, `payload.page_size` per page.
struct CountBatch;

impl CountBatch {
    fn bounds(payload: &Value) -> (u64, u64) {
        let count = payload.get("count").and_then(Value::as_u64).unwrap_or(0);
        let page_size = payload
            .get("page_size")
            .and_then(Value::as_u64)
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        (count, page_size)
    }
}

impl BatchHandler for CountBatch {
    fn job_path(&self) -> &str {
        "demo/count"
    }

    fn fetch_page(&self, ctx: Arc<JobContext>, cursor: Option<Value>) -> HandlerFuture<Page> {
        let (count, page_size) = Self::bounds(&ctx.payload);
        let start = cursor.as_ref().and_then(Value::as_u64).unwrap_or(0);
        let end = (start + page_size).min(count);
        let items = (start + 1..=end).map(|n| json!(n)).collect();
        let next = (end < count).then(|| json!(end));
        Box::pin(async move { Ok(Page::new(items, next).with_total(count)) })
    }

    fn on_batch_item(&self, _ctx: Arc<JobContext>, item: Value) -> HandlerFuture<Value> {
        Box::pin(async move {
            let n = item.as_u64().ok_or("item is not a number")?;
            Ok(json!(n * n))
        })
    }

    fn on_batch_complete(&self, ctx: Arc<JobContext>, summary: BatchSummary) -> HandlerFuture<()> {
        Box::pin(async move {
            let sum: u64 = summary.results.iter().filter_map(Value::as_u64).sum();
            tracing::info!(
                "Job {} finished batch {}/{}: sum of squares {}",
                ctx.job_id,
                summary.batch_number,
                summary.total_batches.map_or("?".to_string(), |t| t.to_string()),
                sum
            );

            let state = ctx.durable_state()?;
            let running: u64 = state
                .get("sum")
                .await
                .map_err(|e| e.to_string())?
                .unwrap_or(0);
            state.set("sum", &(running + sum)).await.map_err(|e| e.to_string())
        })
    }
}
