//! Actor system for the webhook job queue.
//!
//! This crate provides the Ractor-based queue actor that owns one
//! deployment's jobs, along with everything it drives.
//!
//! # Architecture
//!
//! - `QueueActor` - Tiers and persists submissions, drains them FIFO
//! - `JobHandlerRegistry` - Maps job paths to compiled-in handlers
//! - `BatchEngine` - Runs batch handlers one quantum at a time
//! - `WakeUpScheduler` - Re-invokes the actor after a batch yields
//!
//! # Usage
//!
//! ```ignore
//! use actors::{JobHandlerRegistry, QueueActorArgs, start_queue};
//!
//! let (queue, _handle) = start_queue(QueueActorArgs::new(db, storage, handlers)).await?;
//! let job_id = queue.submit(job).await?;
//! ```

mod batch;
mod client;
mod config;
mod context;
mod error;
mod handler;
mod messages;
mod queue_actor;
pub mod registry;
mod tiering;
mod wakeup;

pub use client::{QueueClient, start_queue};
pub use config::{BatchConfig, DEFAULT_DEPLOYMENT_KEY, QueueConfig, Secrets};
pub use context::{ApiClient, ApiError, ApiFuture, ClientFactory, DurableState, JobContext, NoApiClients};
pub use error::QueueError;
pub use handler::{
    BatchHandler, BatchSummary, FnHandler, HandlerFuture, HandlerResult, JobHandler,
    JobHandlerRegistry, Page, ResolvedHandler,
};
pub use messages::QueueMessage;
pub use queue_actor::{QueueActor, QueueActorArgs, QueueActorState};
pub use registry::{QueueDirectory, global_directory};
pub use tiering::PayloadTiering;
pub use wakeup::{ExternalWakeUp, TimerWakeUp, WakeUpCallback, WakeUpScheduler};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};
