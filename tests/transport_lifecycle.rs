//! # Transport Lifecycle Tests
//!
//! Drives `QueueTransport` directly with hand-written handlers to check
//! settlement, routing order and shutdown over the in-memory backend.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use common::{backend, published, wait_until};
use judge_queue::config::TransportConfig;
use judge_queue::messaging::service::MessagingService;
use judge_queue::messaging::{
    handler_fn, MessagingError, QueueTransport, RawEnvelope, RoutePattern, Settlement,
};

fn transport(prefetch: u16) -> QueueTransport {
    QueueTransport::in_memory(TransportConfig {
        prefetch: Some(prefetch),
        ..TransportConfig::default()
    })
}

#[tokio::test]
async fn test_first_settlement_wins() {
    let transport = transport(1);
    let outcomes = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&outcomes);

    transport
        .register_handler(
            "package",
            handler_fn(move |_, context| {
                let recorded = Arc::clone(&recorded);
                async move {
                    let first = context.ack().await;
                    let second = context.ack().await;
                    let late_nack = context.nack(MessagingError::processing("late")).await;
                    recorded.lock().extend([first, second, late_nack]);
                    assert_eq!(context.settlement(), Some(Settlement::Acked));
                    Err(MessagingError::processing("returned after ack"))
                }
            }),
        )
        .unwrap();
    transport.start().await.unwrap();
    transport.enqueue(RawEnvelope::new("package")).await.unwrap();

    wait_until(|| outcomes.lock().len() == 3).await;
    wait_until(|| transport.stats().processing == 0).await;

    assert_eq!(*outcomes.lock(), vec![true, false, false]);
    let stats = transport.stats();
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.requeued, 0);
    assert_eq!(stats.dropped, 0);
    assert_eq!(backend(&transport).unacked_count(), 0);
    transport.close().await;
}

#[tokio::test]
async fn test_first_registered_route_wins() {
    let transport = transport(1);
    let hits = Arc::new(Mutex::new(Vec::new()));

    let routes = [
        ("hooks.*", "glob"),
        ("hooks.", "prefix"),
        ("hooks.execute", "exact"),
    ];
    for (pattern, label) in routes {
        let hits = Arc::clone(&hits);
        transport
            .register_handler(
                pattern,
                handler_fn(move |envelope, _| {
                    hits.lock().push((label, envelope.message_type));
                    async { Ok(()) }
                }),
            )
            .unwrap();
    }
    transport.start().await.unwrap();

    transport.enqueue(RawEnvelope::new("hooks.execute")).await.unwrap();
    transport.enqueue(RawEnvelope::new("hooksexecute")).await.unwrap();

    wait_until(|| transport.stats().acked == 1 && transport.stats().discarded == 1).await;
    assert_eq!(*hits.lock(), vec![("glob", "hooks.execute".to_string())]);
    transport.close().await;
}

#[tokio::test]
async fn test_regex_route() {
    let transport = transport(1);
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);

    transport
        .register_route(
            RoutePattern::regex(r"^submission(\.result)?$").unwrap(),
            handler_fn(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
        )
        .unwrap();
    transport.start().await.unwrap();

    for message_type in ["submission", "submission.result", "submission.other"] {
        transport.enqueue(RawEnvelope::new(message_type)).await.unwrap();
    }

    wait_until(|| transport.stats().acked == 2 && transport.stats().discarded == 1).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
    transport.close().await;
}

#[tokio::test]
async fn test_undecodable_delivery_is_discarded() {
    let transport = transport(1);
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    transport
        .register_handler(
            "*",
            handler_fn(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
        )
        .unwrap();
    transport.start().await.unwrap();

    let provider = backend(&transport);
    provider.publish("package", b"not json".to_vec()).await.unwrap();
    provider.publish("package", b"[1, 2, 3]".to_vec()).await.unwrap();

    wait_until(|| transport.stats().discarded == 2).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(provider.unacked_count(), 0);
    transport.close().await;
}

#[tokio::test]
async fn test_flattened_wire_message_reaches_handler_with_payload() {
    let transport = transport(1);
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&payloads);
    transport
        .register_handler(
            "x",
            handler_fn(move |envelope, context| {
                recorded.lock().push(envelope.payload.clone());
                async move {
                    context.ack().await;
                    Ok(())
                }
            }),
        )
        .unwrap();
    transport.start().await.unwrap();

    backend(&transport)
        .publish("x", br#"{"type": "x", "a": 1, "b": 2}"#.to_vec())
        .await
        .unwrap();

    wait_until(|| transport.stats().acked == 1).await;
    let payload = payloads.lock()[0].clone();
    assert_eq!(serde_json::Value::Object(payload), json!({"a": 1, "b": 2}));
    transport.close().await;
}

#[tokio::test]
async fn test_handler_can_publish_follow_up_events() {
    let transport = transport(2);
    let publisher = transport.clone();
    transport
        .register_handler(
            "build.request",
            handler_fn(move |envelope, context| {
                let publisher = publisher.clone();
                async move {
                    publisher
                        .enqueue(
                            RawEnvelope::new("build.completed")
                                .with_payload(json!({"correlationId": envelope.id})),
                        )
                        .await?;
                    context.ack().await;
                    Ok(())
                }
            }),
        )
        .unwrap();
    transport.start().await.unwrap();

    let id = transport
        .enqueue(RawEnvelope::new("build.request"))
        .await
        .unwrap();

    wait_until(|| transport.stats().discarded == 1).await;
    let completed = published(&transport, "build.completed");
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].payload["correlationId"], json!(id));
    transport.close().await;
}

#[tokio::test]
async fn test_close_stops_consuming() {
    let transport = transport(1);
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    transport
        .register_handler(
            "status",
            handler_fn(move |_, _| {
                seen.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
        )
        .unwrap();
    transport.start().await.unwrap();
    transport.enqueue(RawEnvelope::new("status")).await.unwrap();
    wait_until(|| transport.stats().acked == 1).await;

    transport.close().await;
    assert!(!transport.is_started());
    assert!(!transport.provider().is_connected());

    // Enqueue reconnects, but nothing consumes until the next start
    transport.enqueue(RawEnvelope::new("status")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(transport.stats().queued, 1);
}

#[tokio::test]
async fn test_transport_restarts_after_delivery_stream_ends() {
    let transport = transport(1);
    transport
        .register_handler("status", handler_fn(|_, _| async { Ok(()) }))
        .unwrap();
    transport.start().await.unwrap();

    // Losing the connection ends the delivery stream under the consume loop
    transport.provider().close().await;
    wait_until(|| !transport.is_started()).await;

    transport
        .register_handler("package", handler_fn(|_, _| async { Ok(()) }))
        .unwrap();
    transport.start().await.unwrap();
    assert!(transport.is_started());

    transport.enqueue(RawEnvelope::new("status")).await.unwrap();
    transport.enqueue(RawEnvelope::new("package")).await.unwrap();
    wait_until(|| transport.stats().acked == 2).await;
    transport.close().await;
}

#[tokio::test]
async fn test_failed_republish_releases_original_for_redelivery() {
    let transport = transport(1);
    let invocations = Arc::new(AtomicUsize::new(0));
    let redelivered = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&invocations);
    let retries = Arc::clone(&redelivered);
    let handler_transport = transport.clone();
    transport
        .register_handler(
            "build.request",
            handler_fn(move |envelope, context| {
                let attempt = seen.fetch_add(1, Ordering::SeqCst);
                retries.lock().push(envelope.retries);
                let handler_transport = handler_transport.clone();
                async move {
                    if attempt == 0 {
                        backend(&handler_transport).reject_publishes(1);
                        return Err(MessagingError::processing("first attempt fails"));
                    }
                    context.ack().await;
                    Ok(())
                }
            }),
        )
        .unwrap();
    transport.start().await.unwrap();
    transport
        .enqueue(RawEnvelope::new("build.request").with_max_retries(3))
        .await
        .unwrap();

    wait_until(|| transport.stats().acked == 1).await;

    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    // The released original comes back unchanged, not as the bumped copy
    assert_eq!(*redelivered.lock(), vec![0, 0]);
    let stats = transport.stats();
    assert_eq!(stats.requeued, 0);
    assert_eq!(stats.dropped, 0);
    let provider = backend(&transport);
    assert_eq!(provider.unacked_count(), 0);
    assert_eq!(provider.counters().total_released, 1);
    transport.close().await;
}

#[tokio::test]
async fn test_backlog_drains_when_failing_handlers_republish() {
    const MESSAGES: u64 = 20;
    let transport = transport(1);
    let publisher = transport.clone();
    transport
        .register_handler(
            "build.request",
            handler_fn(move |envelope, _| {
                let publisher = publisher.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    publisher
                        .enqueue(
                            RawEnvelope::new("build.failed")
                                .with_payload(json!({"correlationId": envelope.id})),
                        )
                        .await?;
                    Err(MessagingError::processing("build failed"))
                }
            }),
        )
        .unwrap();

    for _ in 0..MESSAGES {
        transport
            .enqueue(RawEnvelope::new("build.request").with_max_retries(2))
            .await
            .unwrap();
    }
    transport.start().await.unwrap();

    // Each request runs three times: two requeues, then a drop
    wait_until(|| transport.stats().dropped == MESSAGES).await;
    wait_until(|| transport.stats().discarded == MESSAGES * 3).await;
    let stats = transport.stats();
    assert_eq!(stats.requeued, MESSAGES * 2);
    assert_eq!(stats.queued, 0);
    assert_eq!(backend(&transport).unacked_count(), 0);
    transport.close().await;
}
