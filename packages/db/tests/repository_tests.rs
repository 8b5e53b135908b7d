#![allow(clippy::disallowed_methods)]

mod common;

use hookq_core::{
    BatchProcessorState, BatchStatus, JobData, JobId, JobRecord, JobResult, JobStatus,
};
use serde_json::{Value, json};
use std::error::Error;

use db::repositories::{BatchStateRepository, JobRepository, KvRepository};

fn record(path: &str, body: Value) -> JobRecord {
    let (routing, body) = JobData::new("shop.example", path, "orders/create", body).into_parts();
    JobRecord::inline(JobId::new(), routing, body, 0.5)
}

#[tokio::test]
async fn job_records_round_trip_and_reads_are_stable() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);

    let job = record("hello-world", json!({"order": {"id": 42, "tags": ["a", "b"]}}));
    let created = jobs.create(&job).await?;
    assert_eq!(created.id, job.id);

    let first = jobs.get(job.id).await?.ok_or("missing job")?;
    let second = jobs.get(job.id).await?.ok_or("missing job")?;
    assert_eq!(first, second);
    assert_eq!(first.payload, job.payload);
    assert_eq!(first.routing, job.routing);
    assert_eq!(first.status, JobStatus::Pending);

    assert!(jobs.get(JobId::new()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn terminal_transition_happens_once() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);

    let job = jobs.create(&record("hello-world", json!({}))).await?;

    let completed = jobs
        .mark_completed(job.id, &JobResult::new("done"))
        .await?
        .ok_or("transition rejected")?;
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.result, Some(JobResult::new("done")));

    let second = jobs.mark_failed(job.id, "too late").await?;
    assert!(second.is_none());

    let stored = jobs.get(job.id).await?.ok_or("missing job")?;
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.error.is_none());
    Ok(())
}

#[tokio::test]
async fn listing_orders_by_submission() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);

    let mut ids = ulid::Generator::new();
    let mut created = Vec::new();
    for n in 0..4 {
        let mut job = record("hello-world", json!({ "n": n }));
        job.id = JobId(ids.generate()?);
        created.push(jobs.create(&job).await?.id);
    }
    jobs.mark_failed(created[1], "boom").await?;

    let pending: Vec<JobId> = jobs.list_pending().await?.into_iter().map(|j| j.id).collect();
    assert_eq!(pending, vec![created[0], created[2], created[3]]);

    let recent: Vec<JobId> = jobs.list_recent(2).await?.into_iter().map(|j| j.id).collect();
    assert_eq!(recent, vec![created[3], created[2]]);

    // Limits beyond i64 saturate instead of wrapping negative.
    let everything = jobs.list_recent(usize::MAX).await?;
    assert_eq!(everything.len(), 4);
    Ok(())
}

#[tokio::test]
async fn stats_aggregate_status_and_payload_size() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db);

    let a = jobs.create(&record("a", json!({}))).await?;
    let b = jobs.create(&record("b", json!({}))).await?;
    jobs.create(&record("c", json!({}))).await?;
    jobs.mark_completed(a.id, &JobResult::new("ok")).await?;
    jobs.mark_failed(b.id, "bad").await?;

    let stats = jobs.stats().await?;
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
    assert!((stats.total_payload_kb - 1.5).abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
async fn kv_entries_support_prefix_listing() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let kv = KvRepository::new(db);

    kv.set("checkpoint:job-1:page", &json!("cursor-2")).await?;
    kv.set("checkpoint:job-1:seen", &json!(17)).await?;
    kv.set("checkpoint:job-2:page", &json!(null)).await?;

    let seen: Option<u32> = kv.get("checkpoint:job-1:seen").await?;
    assert_eq!(seen, Some(17));

    let listed = kv.list_prefix("checkpoint:job-1:").await?;
    let keys: Vec<&str> = listed.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["checkpoint:job-1:page", "checkpoint:job-1:seen"]);

    assert!(kv.delete("checkpoint:job-1:seen").await?);
    assert!(!kv.delete("checkpoint:job-1:seen").await?);

    kv.delete_prefix("checkpoint:job-1:").await?;
    assert!(kv.list_prefix("checkpoint:job-1:").await?.is_empty());
    assert_eq!(kv.list_prefix("checkpoint:").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn batch_completion_clears_checkpoint_and_completes_job() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db.clone());
    let batches = BatchStateRepository::new(db);

    let job = jobs.create(&record("export", json!({}))).await?;
    let mut state = BatchProcessorState::new(job.id, "export", Some(json!("page-1")));
    state.record_item(json!({"ok": true}));
    batches.save(&state).await?;

    let loaded = batches.active().await?.ok_or("missing state")?;
    assert_eq!(loaded.job_id, job.id);
    assert_eq!(loaded.cursor, state.cursor);
    assert_eq!(loaded.completed_count, 1);

    let done = batches
        .complete(&loaded, &JobResult::new("processed 1 items"))
        .await?
        .ok_or("missing job")?;
    assert_eq!(done.status, JobStatus::Completed);
    assert!(batches.load().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn batch_failure_is_retained_but_inactive() -> Result<(), Box<dyn Error>> {
    let db = common::setup_db().await?;
    let jobs = JobRepository::new(db.clone());
    let batches = BatchStateRepository::new(db);

    let job = jobs.create(&record("export", json!({}))).await?;
    let mut state = BatchProcessorState::new(job.id, "export", None);
    batches.save(&state).await?;

    state.mark_failed("page fetch returned 502");
    let failed = batches.fail(&state).await?.ok_or("missing job")?;
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("page fetch returned 502"));

    assert!(batches.active().await?.is_none());
    let retained = batches.load().await?.ok_or("state not retained")?;
    assert_eq!(retained.status, BatchStatus::Failed);
    assert_eq!(retained.job_id, job.id);
    Ok(())
}
