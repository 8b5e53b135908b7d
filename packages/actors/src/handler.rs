//! Job handler traits and registry.
//!
//! Handlers are registered statically at startup under their logical job
//! path. A path maps either to a plain [`JobHandler`] (one `process` call per
//! job) or to a [`BatchHandler`] that walks a paginated collection item by
//! item across as many quanta as it needs.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use hookq_core::JobResult;
use serde_json::Value;

use crate::context::JobContext;

/// Result type for job handlers. The error string is recorded on the job.
pub type HandlerResult<T = JobResult> = Result<T, String>;

/// Future type for async job handlers.
pub type HandlerFuture<T = JobResult> = Pin<Box<dyn Future<Output = HandlerResult<T>> + Send>>;

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a specific path are processed.
pub trait JobHandler: Send + Sync + 'static {
    /// The job path this handler processes.
    fn job_path(&self) -> &str;

    /// Process a job and return the result.
    fn process(&self, ctx: Arc<JobContext>) -> HandlerFuture;
}

/// One page of a batch handler's collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Cursor of the following page. `None` ends the collection.
    pub next: Option<Value>,
    /// Collection size, when the source reports it.
    pub total_count: Option<u64>,
}

impl Page {
    pub fn new(items: Vec<Value>, next: Option<Value>) -> Self {
        Self {
            items,
            next,
            total_count: None,
        }
    }

    pub fn with_total(mut self, total_count: u64) -> Self {
        self.total_count = Some(total_count);
        self
    }
}

/// Results of one finished page, handed to [`BatchHandler::on_batch_complete`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub results: Vec<Value>,
    /// 1-based page number.
    pub batch_number: u32,
    pub total_batches: Option<u32>,
}

/// Handler that processes a paginated collection item by item.
///
/// Progress is checkpointed between items, so `fetch_page` must return the
/// same items for the same cursor when a page is resumed part-way through.
pub trait BatchHandler: Send + Sync + 'static {
    fn job_path(&self) -> &str;

    /// Cursor of the first page. `None` means the start of the collection.
    fn start_cursor(&self, _ctx: &JobContext) -> Option<Value> {
        None
    }

    fn fetch_page(&self, ctx: Arc<JobContext>, cursor: Option<Value>) -> HandlerFuture<Page>;

    fn on_batch_item(&self, ctx: Arc<JobContext>, item: Value) -> HandlerFuture<Value>;

    /// Called once per finished page.
    fn on_batch_complete(&self, _ctx: Arc<JobContext>, _summary: BatchSummary) -> HandlerFuture<()> {
        Box::pin(async { Ok(()) })
    }
}

/// What a job path resolves to.
#[derive(Clone)]
pub enum ResolvedHandler {
    Process(Arc<dyn JobHandler>),
    Batch(Arc<dyn BatchHandler>),
}

impl ResolvedHandler {
    pub fn is_batch(&self) -> bool {
        matches!(self, ResolvedHandler::Batch(_))
    }
}

/// Registry for job handlers.
///
/// Maps job paths to their handlers for dynamic dispatch.
#[derive(Default, Clone)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, ResolvedHandler>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a job path, replacing any previous one.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        let job_path = handler.job_path().to_string();
        self.handlers
            .insert(job_path, ResolvedHandler::Process(Arc::new(handler)));
    }

    /// Register a batch handler for a job path, replacing any previous one.
    pub fn register_batch<H: BatchHandler>(&mut self, handler: H) {
        let job_path = handler.job_path().to_string();
        self.handlers
            .insert(job_path, ResolvedHandler::Batch(Arc::new(handler)));
    }

    pub fn resolve(&self, job_path: &str) -> Option<ResolvedHandler> {
        self.handlers.get(job_path).cloned()
    }

    /// Check if a handler exists for a job path.
    pub fn has_handler(&self, job_path: &str) -> bool {
        self.handlers.contains_key(job_path)
    }

    /// List all registered job paths.
    pub fn job_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        paths.sort_unstable();
        paths
    }
}

/// Run a handler future, turning a panic into a handler failure.
pub(crate) async fn guarded<T>(future: HandlerFuture<T>) -> HandlerResult<T> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(format!("handler panicked: {message}"))
        }
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(Arc<JobContext>) -> HandlerFuture + Send + Sync + 'static,
{
    job_path: String,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Arc<JobContext>) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(job_path: impl Into<String>, handler: F) -> Self {
        Self {
            job_path: job_path.into(),
            handler,
        }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(Arc<JobContext>) -> HandlerFuture + Send + Sync + 'static,
{
    fn job_path(&self) -> &str {
        &self.job_path
    }

    fn process(&self, ctx: Arc<JobContext>) -> HandlerFuture {
        (self.handler)(ctx)
    }
}

/// Helper macro for creating job handlers from async blocks.
///
/// ```ignore
/// registry.register(job_handler!("hello-world", |ctx| {
///     Ok(JobResult::new(format!("hello {}", ctx.tenant)))
/// }));
/// ```
#[macro_export]
macro_rules! job_handler {
    ($job_path:expr, |$ctx:ident| $body:expr) => {
        $crate::FnHandler::new(
            $job_path,
            |$ctx: ::std::sync::Arc<$crate::JobContext>| -> $crate::HandlerFuture {
                Box::pin(async move { $body })
            },
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl JobHandler for Noop {
        fn job_path(&self) -> &str {
            "noop"
        }

        fn process(&self, _ctx: Arc<JobContext>) -> HandlerFuture {
            Box::pin(async { Ok(JobResult::new("noop")) })
        }
    }

    struct Pages;

    impl BatchHandler for Pages {
        fn job_path(&self) -> &str {
            "pages"
        }

        fn fetch_page(&self, _ctx: Arc<JobContext>, _cursor: Option<Value>) -> HandlerFuture<Page> {
            Box::pin(async { Ok(Page::default()) })
        }

        fn on_batch_item(&self, _ctx: Arc<JobContext>, item: Value) -> HandlerFuture<Value> {
            Box::pin(async move { Ok(item) })
        }
    }

    #[test]
    fn registry_resolves_by_capability() {
        let mut registry = JobHandlerRegistry::new();
        registry.register(Noop);
        registry.register_batch(Pages);

        assert!(matches!(registry.resolve("noop"), Some(ResolvedHandler::Process(_))));
        assert!(registry.resolve("pages").is_some_and(|h| h.is_batch()));
        assert!(registry.resolve("missing").is_none());
        assert!(!registry.has_handler("missing"));
        assert_eq!(registry.job_paths(), vec!["noop", "pages"]);
    }

    fn explode() -> HandlerResult<()> {
        panic!("boom")
    }

    #[tokio::test]
    async fn panics_become_failures() {
        let failing: HandlerFuture<()> = Box::pin(async { explode() });
        let result = guarded(failing).await;
        assert_eq!(result, Err("handler panicked: boom".to_string()));

        let ok: HandlerFuture<u8> = Box::pin(async { Ok(7) });
        assert_eq!(guarded(ok).await, Ok(7));
    }
}
