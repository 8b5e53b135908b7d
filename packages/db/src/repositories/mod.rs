//! Repository implementations for database operations.

mod batch_repo;
mod job_repo;
mod kv_repo;

pub use batch_repo::BatchStateRepository;
pub use job_repo::JobRepository;
pub use kv_repo::KvRepository;
