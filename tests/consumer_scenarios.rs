//! # Consumer Scenarios
//!
//! End-to-end runs of the default consumers over the in-memory queue:
//! enqueue a request, let the consume loop route it, then inspect what the
//! consumers published and how the transport settled each delivery.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::{json, Value};

use common::{backend, published, start_judge_queue, wait_until, MockProcessor};
use judge_queue::consumers::{Consumer, PackageConsumer};
use judge_queue::messaging::{EnvelopeCodec, RawEnvelope};

#[tokio::test]
async fn test_package_is_validated_and_correlated() {
    let processor = MockProcessor::new();
    let transport = start_judge_queue(processor.clone(), 2).await;

    transport
        .enqueue(
            RawEnvelope::new("package")
                .with_id("pkg-1")
                .with_payload(json!({
                    "package_id": "p1",
                    "package_url": "https://packages/p1.zip"
                })),
        )
        .await
        .unwrap();

    // The result envelope has no consumer of its own and is discarded
    wait_until(|| transport.stats().acked == 1 && transport.stats().discarded == 1).await;

    let results = published(&transport, "package.validated");
    assert_eq!(results.len(), 1);
    let result = &results[0].payload;
    assert_eq!(result["status"], "accepted");
    assert_eq!(result["correlationId"], "pkg-1");
    assert_eq!(result["package_id"], "p1");
    assert_eq!(result["problem_id"], "problem-p1");
    assert_eq!(result["problemDir"], "/srv/problems/p1");

    assert_eq!(processor.package_calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.stats().requeued, 0);
    transport.close().await;
}

#[tokio::test]
async fn test_flattened_package_message_is_accepted() {
    let processor = MockProcessor::new();
    let transport = start_judge_queue(processor.clone(), 1).await;

    transport
        .enqueue(
            RawEnvelope::new("package")
                .with_field("package_id", json!("p2"))
                .with_field("package_url", json!("https://packages/p2.zip")),
        )
        .await
        .unwrap();

    wait_until(|| published(&transport, "package.validated").len() == 1).await;
    let result = &published(&transport, "package.validated")[0];
    assert_eq!(result.payload["package_id"], "p2");
    transport.close().await;
}

#[tokio::test]
async fn test_failed_build_publishes_failure_and_requeues() {
    let processor = MockProcessor::failing_builds("docker daemon unreachable");
    let transport = start_judge_queue(processor.clone(), 1).await;

    transport
        .enqueue(
            RawEnvelope::new("build.request")
                .with_id("build-1")
                .with_payload(json!({"problem_id": "42"})),
        )
        .await
        .unwrap();

    wait_until(|| transport.stats().dropped == 1).await;

    let failures = published(&transport, "build.failed");
    assert!(!failures.is_empty());
    let failure = &failures[0].payload;
    assert_eq!(failure["status"], "failed");
    assert_eq!(failure["correlationId"], "build-1");
    assert_eq!(failure["problem_id"], "42");
    assert_eq!(failure["errors"], json!(["docker daemon unreachable"]));

    assert!(published(&transport, "build.completed").is_empty());
    assert_eq!(transport.stats().acked, 0);
    transport.close().await;
}

#[tokio::test]
async fn test_retry_budget_requeues_then_drops() {
    let processor = MockProcessor::failing_builds("out of disk");
    let transport = start_judge_queue(processor.clone(), 1).await;

    transport
        .enqueue(
            RawEnvelope::new("build.request")
                .with_id("build-2")
                .with_max_retries(3)
                .with_payload(json!({"problem_id": "7"})),
        )
        .await
        .unwrap();

    wait_until(|| transport.stats().dropped == 1).await;

    // Original publish plus one republish per retry
    let attempts: Vec<u32> = published(&transport, "build.request")
        .iter()
        .map(|envelope| envelope.retries)
        .collect();
    assert_eq!(attempts, vec![0, 1, 2, 3]);
    assert!(published(&transport, "build.request")
        .iter()
        .all(|envelope| envelope.id == "build-2"));

    let stats = transport.stats();
    assert_eq!(stats.requeued, 3);
    assert_eq!(stats.dropped, 1);
    assert_eq!(processor.build_calls.load(Ordering::SeqCst), 4);
    assert_eq!(published(&transport, "build.failed").len(), 4);

    // Nothing is redelivered after the drop
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(processor.build_calls.load(Ordering::SeqCst), 4);
    transport.close().await;
}

#[tokio::test]
async fn test_invalid_package_never_reaches_processor() {
    let processor = MockProcessor::new();
    let transport = start_judge_queue(processor.clone(), 1).await;

    let request = RawEnvelope::new("package")
        .with_max_retries(1)
        .with_payload(json!({}));
    let envelope = EnvelopeCodec::default().normalize(request.clone()).unwrap();
    let validation = PackageConsumer::new(processor.clone(), Arc::new(transport.clone()))
        .validate(&envelope);
    assert!(!validation.valid);
    assert_eq!(validation.errors, vec!["package_id is required"]);

    transport.enqueue(request).await.unwrap();
    wait_until(|| transport.stats().dropped == 1).await;

    assert_eq!(processor.calls(), 0);
    assert!(published(&transport, "package.validated").is_empty());
    let stats = transport.stats();
    assert_eq!(stats.requeued, 1);
    assert_eq!(stats.acked, 0);
    transport.close().await;
}

#[tokio::test]
async fn test_unmatched_type_is_discarded() {
    let processor = MockProcessor::new();
    let transport = start_judge_queue(processor.clone(), 1).await;

    transport
        .enqueue(RawEnvelope::new("foo.bar").with_payload(json!({"x": 1})))
        .await
        .unwrap();

    wait_until(|| transport.stats().discarded == 1).await;

    assert_eq!(processor.calls(), 0);
    assert_eq!(backend(&transport).published().len(), 1);
    assert_eq!(backend(&transport).unacked_count(), 0);
    let stats = transport.stats();
    assert_eq!(stats.acked, 0);
    assert_eq!(stats.requeued, 0);
    assert_eq!(stats.dropped, 0);
    transport.close().await;
}

#[tokio::test]
async fn test_build_reports_requested_stages_only() {
    let processor = MockProcessor::new();
    let transport = start_judge_queue(processor.clone(), 1).await;

    transport
        .enqueue(
            RawEnvelope::new("build.request")
                .with_id("build-3")
                .with_payload(json!({"problem_id": "9", "target_stages": ["eval"]})),
        )
        .await
        .unwrap();

    wait_until(|| published(&transport, "build.completed").len() == 1).await;

    let result = &published(&transport, "build.completed")[0].payload;
    assert_eq!(result["status"], "completed");
    assert_eq!(result["correlationId"], "build-3");
    assert_eq!(
        result["images"]["checker"],
        json!({"eval_stage": {"tag": "judge/9-checker-eval"}})
    );
    transport.close().await;
}

#[tokio::test]
async fn test_submission_result_carries_verdict() {
    let processor = MockProcessor::new();
    let transport = start_judge_queue(processor.clone(), 1).await;

    transport
        .enqueue(RawEnvelope::new("submission").with_id("sub-1").with_payload(json!({
            "submission_id": "s1",
            "problem_id": "42",
            "language": "cpp",
            "source": "int main() {}"
        })))
        .await
        .unwrap();

    wait_until(|| published(&transport, "submission.result").len() == 1).await;

    let result = &published(&transport, "submission.result")[0].payload;
    assert_eq!(result["verdict"], "AC");
    assert_eq!(result["submission_id"], "s1");
    assert_eq!(result["correlationId"], "sub-1");
    assert_eq!(result["status"], "completed");
    transport.close().await;
}

#[tokio::test]
async fn test_hook_exit_code_is_reported_not_retried() {
    let processor = MockProcessor::new();
    *processor.hook_exit_code.lock() = 2;
    let transport = start_judge_queue(processor.clone(), 1).await;

    transport
        .enqueue(RawEnvelope::new("hooks.execute").with_payload(json!({
            "problem_id": "42",
            "hook": "generate_tests",
            "args": {"seed": 7}
        })))
        .await
        .unwrap();

    wait_until(|| published(&transport, "hooks.result").len() == 1).await;
    wait_until(|| transport.stats().acked == 1).await;

    let result = &published(&transport, "hooks.result")[0].payload;
    assert_eq!(result["exit_code"], 2);
    assert_eq!(result["output"], "ran generate_tests");
    assert_eq!(transport.stats().requeued, 0);
    assert_eq!(processor.hook_calls.load(Ordering::SeqCst), 1);
    transport.close().await;
}

#[tokio::test]
async fn test_status_reports_free_workers() {
    let processor = MockProcessor::new();
    let transport = start_judge_queue(processor, 4).await;

    transport
        .enqueue(RawEnvelope::new("status").with_id("ping"))
        .await
        .unwrap();

    wait_until(|| published(&transport, "judge.status").len() == 1).await;

    let report = &published(&transport, "judge.status")[0].payload;
    assert_eq!(report["status"], "online");
    assert_eq!(report["service"], "judge");
    assert_eq!(report["correlationId"], "ping");
    // The status consumer itself holds one slot while reporting
    assert_eq!(report["workers_free"], 3);
    assert!(matches!(report["features"], Value::Array(_)));
    transport.close().await;
}
