//! End-to-end tests for the worker surface: router + service + admission +
//! executor pool over the in-memory store and a scripted backend.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{chat_request, record, ScriptedBackend, TestWorker};
use domain_jobs::{CreateJobResponse, FinishReason, JobEvents, JobStatus, WorkerStats};
use http_body_util::BodyExt;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

async fn json_body<T: serde::de::DeserializeOwned>(body: Body) -> T {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_job(worker: &TestWorker) -> (StatusCode, Option<CreateJobResponse>) {
    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&chat_request()).unwrap()))
        .unwrap();

    let response = worker.app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    if status == StatusCode::OK {
        (status, Some(json_body(response.into_body()).await))
    } else {
        (status, None)
    }
}

async fn fetch_events(worker: &TestWorker, id: Uuid, from_seq: i64) -> JobEvents {
    let request = Request::builder()
        .uri(format!("/jobs/{}/events?from_seq={}", id, from_seq))
        .body(Body::empty())
        .unwrap();
    let response = worker.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response.into_body()).await
}

/// Poll the events endpoint until the job is terminal, like the gateway does.
async fn poll_until_terminal(worker: &TestWorker, id: Uuid) -> JobEvents {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let events = fetch_events(worker, id, -1).await;
            if events.status.is_terminal() {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not reach a terminal status in time")
}

/// S1: three backend records stream through as three dense chunks, the last
/// one carrying `done` + `finish_reason=stop`.
#[tokio::test]
async fn test_happy_path_streams_dense_chunks() {
    let backend = ScriptedBackend::with_records(vec![
        record("Hel", false, None),
        record("lo", false, None),
        record("", true, Some("stop")),
    ]);
    let worker = TestWorker::spawn(2, backend);

    let (status, created) = create_job(&worker).await;
    assert_eq!(status, StatusCode::OK);
    let created = created.unwrap();
    assert_eq!(created.status, JobStatus::Queued);

    let events = poll_until_terminal(&worker, created.job_id).await;
    assert_eq!(events.status, JobStatus::Completed);

    let seqs: Vec<u64> = events.chunks.iter().map(|c| c.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);

    let deltas: Vec<&str> = events.chunks.iter().map(|c| c.delta.as_str()).collect();
    assert_eq!(deltas, vec!["Hel", "lo", ""]);

    // Exactly one done chunk, and it is the last.
    let done_positions: Vec<usize> = events
        .chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.done)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(done_positions, vec![events.chunks.len() - 1]);
    assert_eq!(
        events.chunks.last().unwrap().finish_reason,
        Some(FinishReason::Stop)
    );

    worker.shutdown().await;
}

/// Cursor contract: `from_seq=N` never returns a chunk with `seq <= N`.
#[tokio::test]
async fn test_from_seq_cursor_excludes_earlier_chunks() {
    let backend = ScriptedBackend::with_records(vec![
        record("a", false, None),
        record("b", false, None),
        record("", true, Some("stop")),
    ]);
    let worker = TestWorker::spawn(1, backend);

    let (_, created) = create_job(&worker).await;
    let created = created.unwrap();
    poll_until_terminal(&worker, created.job_id).await;

    for cursor in -1..=3 {
        let events = fetch_events(&worker, created.job_id, cursor).await;
        assert!(
            events.chunks.iter().all(|c| c.seq as i64 > cursor),
            "cursor {} leaked an earlier chunk",
            cursor
        );
    }

    let tail = fetch_events(&worker, created.job_id, 2).await;
    assert_eq!(tail.chunks.len(), 1);
    assert_eq!(tail.chunks[0].seq, 3);

    worker.shutdown().await;
}

/// S3: with concurrency 2, five simultaneous jobs yield 2 running, 2 queued,
/// and 1 rejected with the overload envelope.
#[tokio::test]
async fn test_overload_rejects_the_fifth_job() {
    let worker = TestWorker::spawn(2, ScriptedBackend::hanging());

    let mut accepted = 0;
    let mut rejected_bodies = Vec::new();
    for _ in 0..5 {
        let request = Request::builder()
            .method("POST")
            .uri("/jobs")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&chat_request()).unwrap()))
            .unwrap();
        let response = worker.app.clone().oneshot(request).await.unwrap();
        match response.status() {
            StatusCode::OK => accepted += 1,
            StatusCode::TOO_MANY_REQUESTS => {
                let body: serde_json::Value = json_body(response.into_body()).await;
                rejected_bodies.push(body);
            }
            other => panic!("unexpected status {}", other),
        }
    }

    assert_eq!(accepted, 4);
    assert_eq!(rejected_bodies.len(), 1);
    assert_eq!(rejected_bodies[0]["error"]["code"], "rate_limit_exceeded");
    assert_eq!(rejected_bodies[0]["error"]["type"], "server_error");

    // Both executors pick up a job; the two others wait in the queue.
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let response = worker
                .app
                .clone()
                .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
                .await
                .unwrap();
            let stats: WorkerStats = json_body(response.into_body()).await;
            if stats.active == 2 && stats.queued == 2 {
                assert_eq!(stats.capacity, 2);
                assert_eq!(stats.max_queue, 4);
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stats never settled at 2 running / 2 queued");
}

/// S4: cancelling mid-stream appends a terminal chunk with
/// `error="cancelled"` within one record latency and flips the status.
#[tokio::test]
async fn test_cancel_mid_stream() {
    let mut records = Vec::new();
    for i in 0..50 {
        records.push(record(&format!("tok{} ", i), false, None));
    }
    records.push(record("", true, Some("stop")));
    let backend = ScriptedBackend::with_records(records).delayed(Duration::from_millis(25));
    let worker = TestWorker::spawn(1, backend);

    let (_, created) = create_job(&worker).await;
    let created = created.unwrap();

    // Wait for the first chunk to land.
    let seen = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let events = fetch_events(&worker, created.job_id, -1).await;
            if !events.chunks.is_empty() {
                return events.chunks.len();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let cancel = Request::builder()
        .method("POST")
        .uri(format!("/jobs/{}/cancel", created.job_id))
        .body(Body::empty())
        .unwrap();
    let response = worker.app.clone().oneshot(cancel).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The status flips immediately; the terminal chunk follows within one
    // record latency. Wait for the chunk, not just the status.
    let events = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let events = fetch_events(&worker, created.job_id, -1).await;
            if events.chunks.last().is_some_and(|c| c.done) {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("terminal chunk never appeared");
    assert_eq!(events.status, JobStatus::Cancelled);

    let last = events.chunks.last().unwrap();
    assert!(last.done);
    assert_eq!(last.error.as_deref(), Some("cancelled"));
    assert_eq!(last.finish_reason, Some(FinishReason::Error));

    // Cancel is monotonic: nothing but the terminal chunk follows it. A
    // couple of records may land between our last read and the cancel
    // taking effect, but nowhere near the 51 the script would produce.
    assert!(events.chunks.len() <= seen + 4);
    for chunk in &events.chunks[..events.chunks.len() - 1] {
        assert!(chunk.error.is_none());
    }
}

/// S5: a single terminal record with `done_reason="length"` surfaces as
/// `finish_reason=length`.
#[tokio::test]
async fn test_length_stop() {
    let backend = ScriptedBackend::with_records(vec![record("AAAA", true, Some("length"))]);
    let worker = TestWorker::spawn(1, backend);

    let (_, created) = create_job(&worker).await;
    let created = created.unwrap();

    let events = poll_until_terminal(&worker, created.job_id).await;
    assert_eq!(events.status, JobStatus::Completed);
    assert_eq!(events.chunks.len(), 1);

    let only = &events.chunks[0];
    assert_eq!(only.delta, "AAAA");
    assert!(only.done);
    assert_eq!(only.finish_reason, Some(FinishReason::Length));

    worker.shutdown().await;
}

#[tokio::test]
async fn test_events_unknown_job_is_404() {
    let worker = TestWorker::spawn(1, ScriptedBackend::default());

    let request = Request::builder()
        .uri(format!("/jobs/{}/events?from_seq=-1", Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let response = worker.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    worker.shutdown().await;
}

#[tokio::test]
async fn test_create_job_with_empty_messages_is_400() {
    let worker = TestWorker::spawn(1, ScriptedBackend::default());

    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({"model": "llama3.2", "messages": []}).to_string(),
        ))
        .unwrap();
    let response = worker.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    worker.shutdown().await;
}

#[tokio::test]
async fn test_status_endpoint_reports_lifecycle_fields() {
    let backend = ScriptedBackend::with_records(vec![record("hi", true, Some("stop"))]);
    let worker = TestWorker::spawn(1, backend);

    let (_, created) = create_job(&worker).await;
    let created = created.unwrap();
    poll_until_terminal(&worker, created.job_id).await;

    let request = Request::builder()
        .uri(format!("/jobs/{}/status", created.job_id))
        .body(Body::empty())
        .unwrap();
    let response = worker.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status: serde_json::Value = json_body(response.into_body()).await;
    assert_eq!(status["status"], "completed");
    assert!(status["completed_at"].is_string());
    assert!(status.get("error").is_none());

    worker.shutdown().await;
}
