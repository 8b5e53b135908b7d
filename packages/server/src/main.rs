//! `hookq` - runs one queue deployment and feeds it JSON-lines job
//! submissions from stdin.

use actors::{QueueActorArgs, QueueClient, QueueConfig, Secrets, global_directory, start_queue};
use db::DbConfig;
use hookq_core::JobData;
use storage::Storage;
use tokio::io::{AsyncBufReadExt, BufReader};

mod handlers;

/// Environment prefix for secrets handed to handler contexts.
const SECRETS_PREFIX: &str = "HOOKQ_SECRET_";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = QueueConfig::from_env()?;
    let key = config.deployment_key.clone();
    tracing::info!("Starting hookq deployment {}", key);

    let db = db::init(&DbConfig::from_env(&key)).await?;
    let storage = Storage::from_env(&key).await?;
    tracing::info!("Blob store: {}", storage.kind_str());

    let secrets = Secrets::from_env_prefix(SECRETS_PREFIX);
    tracing::info!("Loaded {} secret(s)", secrets.names().count());

    let args = QueueActorArgs::new(db, storage, handlers::demo_registry())
        .with_config(config)
        .with_secrets(secrets);
    let (queue, handle) = start_queue(args).await?;
    global_directory().register(&key, queue.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => ingest(&queue, &line).await,
                None => {
                    tracing::info!("stdin closed, waiting for ctrl-c");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Stopping hookq deployment {}", key);
    global_directory().unregister(&key);
    queue.shutdown()?;
    handle.await?;
    Ok(())
}

/// Submit one line of input. Bad lines are logged and skipped.
async fn ingest(queue: &QueueClient, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let job: JobData = match serde_json::from_str(line) {
        Ok(job) => job,
        Err(e) => {
            tracing::warn!("Skipping malformed job line: {}", e);
            return;
        }
    };

    match queue.submit(job).await {
        Ok(job_id) => println!("{}", serde_json::json!({ "job_id": job_id })),
        Err(e) => tracing::error!("Submission rejected: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_named_without_the_prefix() {
        let secrets = Secrets::from_vars(
            SECRETS_PREFIX,
            [("HOOKQ_SECRET_API_TOKEN".to_string(), "token".to_string())],
        );
        assert_eq!(secrets.get("API_TOKEN"), Some("token"));
        assert_eq!(secrets.names().collect::<Vec<_>>(), vec!["API_TOKEN"]);
    }
}
