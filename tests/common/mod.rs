//! Shared fixtures for the integration tests: a scripted processor and an
//! in-memory transport with the default consumers attached.

#![allow(dead_code)]

pub mod strategies;

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use judge_queue::config::{ServiceInfo, TransportConfig};
use judge_queue::consumers::{
    BuiltImages, ContainerImages, ConsumerRegistry, HookOutcome, HookRequest, Processor,
    StageImage, SubmissionOutcome, SubmissionRequest, SubmittedPackage,
};
use judge_queue::messaging::service::InMemoryMessagingService;
use judge_queue::messaging::{Envelope, Payload, QueueTransport};

/// Processor whose calls are counted and whose failures are scripted
#[derive(Debug, Default)]
pub struct MockProcessor {
    pub package_calls: AtomicUsize,
    pub build_calls: AtomicUsize,
    pub submission_calls: AtomicUsize,
    pub hook_calls: AtomicUsize,
    pub fail_builds: Mutex<Option<String>>,
    pub hook_exit_code: Mutex<i32>,
}

impl MockProcessor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_builds(message: &str) -> Arc<Self> {
        let processor = Self::default();
        *processor.fail_builds.lock() = Some(message.to_string());
        Arc::new(processor)
    }

    pub fn calls(&self) -> usize {
        self.package_calls.load(Ordering::SeqCst)
            + self.build_calls.load(Ordering::SeqCst)
            + self.submission_calls.load(Ordering::SeqCst)
            + self.hook_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for MockProcessor {
    async fn submit_problem_package(&self, data: &Payload) -> anyhow::Result<SubmittedPackage> {
        self.package_calls.fetch_add(1, Ordering::SeqCst);
        let package_id = data
            .get("package_id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        Ok(SubmittedPackage {
            problem_id: format!("problem-{package_id}"),
            problem_dir: PathBuf::from(format!("/srv/problems/{package_id}")),
        })
    }

    async fn build_problem_images(&self, problem_id: &str) -> anyhow::Result<BuiltImages> {
        self.build_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_builds.lock().clone() {
            anyhow::bail!(message);
        }

        let mut images = BuiltImages::new();
        images.insert(
            "checker".to_string(),
            ContainerImages {
                eval_stage: Some(StageImage {
                    tag: format!("judge/{problem_id}-checker-eval"),
                }),
                build_stage: Some(StageImage {
                    tag: format!("judge/{problem_id}-checker-build"),
                }),
            },
        );
        Ok(images)
    }

    async fn evaluate_submission(
        &self,
        submission: &SubmissionRequest,
    ) -> anyhow::Result<SubmissionOutcome> {
        self.submission_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SubmissionOutcome {
            verdict: if submission.source.contains("wrong") {
                "WA".to_string()
            } else {
                "AC".to_string()
            },
            score: Some(100.0),
            details: Payload::new(),
        })
    }

    async fn execute_hook(&self, request: &HookRequest) -> anyhow::Result<HookOutcome> {
        self.hook_calls.fetch_add(1, Ordering::SeqCst);
        Ok(HookOutcome {
            exit_code: *self.hook_exit_code.lock(),
            output: format!("ran {}", request.hook),
        })
    }
}

/// Started in-memory transport with the default consumers attached
pub async fn start_judge_queue(processor: Arc<MockProcessor>, prefetch: u16) -> QueueTransport {
    let transport = QueueTransport::in_memory(TransportConfig {
        prefetch: Some(prefetch),
        ..TransportConfig::default()
    });
    let mut registry = ConsumerRegistry::new(processor, transport.clone(), ServiceInfo::default());
    registry.register_defaults().expect("default consumers register");
    registry
        .attach_to_queue(&transport)
        .expect("consumers attach before start");
    transport.start().await.expect("transport starts");
    transport
}

pub fn backend(transport: &QueueTransport) -> &InMemoryMessagingService {
    transport
        .provider()
        .as_in_memory()
        .expect("in-memory provider")
}

/// Envelopes of `message_type` published so far
pub fn published(transport: &QueueTransport, message_type: &str) -> Vec<Envelope> {
    backend(transport).published_of_type(message_type)
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
