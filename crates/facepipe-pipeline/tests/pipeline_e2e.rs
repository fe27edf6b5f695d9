mod common;

use common::*;
use facepipe_pipeline::{
    run_subscriber, Destination, MemoryQueue, Outcome, PipelineError, SpoolPublisher, SpoolQueue, StageResult,
    SubscriberConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn detect_message(request_id: &str, filename: &str, encoded: &str) -> Vec<u8> {
    json!({"encoded": encoded, "request_id": request_id, "filename": filename})
        .to_string()
        .into_bytes()
}

fn parse(body: &str) -> Value {
    serde_json::from_str(body).unwrap()
}

/// Run a detection message through both stages with in-memory queues and
/// return everything published to the response destinations.
fn run_both_stages(
    message: &[u8],
    extractor: Arc<FixedExtractor>,
    gallery: Arc<facepipe_core::Gallery>,
) -> Vec<Value> {
    let work = tempfile::tempdir().unwrap();
    let stage1_out = MemoryQueue::new();
    let stage2_out = MemoryQueue::new();

    let detect = detect_orchestrator(Arc::new(BrightnessDetector), Arc::new(stage1_out.clone()), work.path());
    let recognize = recognize_orchestrator(extractor, gallery, Arc::new(stage2_out.clone()), work.path());

    assert!(detect.handle(message).is_settled());
    for forwarded in stage1_out.published_to(Destination::NextStage).unwrap() {
        assert!(recognize.handle(forwarded.as_bytes()).is_settled());
    }

    assert_eq!(leftovers(work.path()), 0);

    let mut responses: Vec<Value> = stage1_out
        .published_to(Destination::Response)
        .unwrap()
        .iter()
        .map(|b| parse(b))
        .collect();
    responses.extend(stage2_out.published_to(Destination::Response).unwrap().iter().map(|b| parse(b)));
    responses
}

#[test]
fn test_black_pixel_yields_no_face() {
    let extractor = FixedExtractor::new(vec![1.0, 0.0, 0.0]);
    let responses = run_both_stages(
        &detect_message("r1", "a.jpg", &black_pixel()),
        extractor.clone(),
        gallery(&[("alice", vec![1.0, 0.0, 0.0])]),
    );

    assert_eq!(responses, vec![json!({"request_id": "r1", "result": "No-Face", "filename": "a.jpg"})]);
    assert_eq!(extractor.calls(), 0, "recognition must not run without a face");
}

#[test]
fn test_face_is_identified_as_nearest_identity() {
    let e1 = vec![0.2, 0.9, 0.1];
    let e2 = vec![0.9, 0.1, 0.4];
    let probe = vec![0.25, 0.85, 0.1];

    let responses = run_both_stages(
        &detect_message("r1", "a.jpg", &face_image()),
        FixedExtractor::new(probe),
        gallery(&[("alice", e1), ("bob", e2)]),
    );

    assert_eq!(responses, vec![json!({"request_id": "r1", "result": "alice"})]);
}

#[test]
fn test_exact_gallery_member_matches() {
    let members = [
        ("ann", vec![1.0, 0.0, 0.0]),
        ("ben", vec![0.0, 1.0, 0.0]),
        ("cat", vec![0.0, 0.0, 1.0]),
    ];
    let responses = run_both_stages(
        &detect_message("r7", "group.png", &face_image()),
        FixedExtractor::new(vec![0.0, 0.0, 1.0]),
        gallery(&members),
    );

    assert_eq!(responses, vec![json!({"request_id": "r7", "result": "cat"})]);
}

#[test]
fn test_empty_gallery_reports_no_face_with_forwarded_filename() {
    let extractor = FixedExtractor::new(vec![0.5, 0.5, 0.5]);
    let responses = run_both_stages(
        &detect_message("r2", "b.jpg", &face_image()),
        extractor.clone(),
        gallery(&[]),
    );

    assert_eq!(
        responses,
        vec![json!({"request_id": "r2", "result": "No-Face", "filename": "b_face.jpg"})]
    );
    assert_eq!(extractor.calls(), 0);
}

#[test]
fn test_malformed_messages_publish_nothing() {
    let work = tempfile::tempdir().unwrap();
    let queue = MemoryQueue::new();
    let detect = detect_orchestrator(Arc::new(BrightnessDetector), Arc::new(queue.clone()), work.path());

    let malformed = [
        json!({"request_id": "r1", "filename": "a.jpg"}),
        json!({"encoded": black_pixel(), "filename": "a.jpg"}),
        json!({"encoded": black_pixel(), "request_id": "r1"}),
        json!("just a string"),
    ];
    for msg in malformed {
        let outcome = detect.handle(msg.to_string().as_bytes());
        assert!(matches!(outcome, Outcome::Dropped { .. }), "{outcome:?}");
    }
    assert!(matches!(detect.handle(b"\xff\xfe"), Outcome::Dropped { .. }));

    assert!(queue.published().unwrap().is_empty());
    assert_eq!(leftovers(work.path()), 0);
}

#[test]
fn test_redelivery_produces_independent_identical_results() {
    let work = tempfile::tempdir().unwrap();
    let queue = MemoryQueue::new();
    let detect = Arc::new(detect_orchestrator(
        Arc::new(BrightnessDetector),
        Arc::new(queue.clone()),
        work.path(),
    ));
    let message = detect_message("dup", "same.jpg", &face_image());

    // Both deliveries run concurrently.
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let detect = detect.clone();
            let message = message.clone();
            std::thread::spawn(move || detect.handle(&message))
        })
        .collect();
    for h in handles {
        let outcome = h.join().unwrap();
        assert!(matches!(outcome, Outcome::Published { result: StageResult::Face { .. }, .. }));
    }

    let sent = queue.published_to(Destination::NextStage).unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(parse(&sent[0]), parse(&sent[1]));
    assert_eq!(parse(&sent[0])["filename"], "same_face.jpg");
    assert_eq!(leftovers(work.path()), 0);
}

#[test]
fn test_workspace_removed_after_capability_failure() {
    let work = tempfile::tempdir().unwrap();
    let queue = MemoryQueue::new();
    let detect = detect_orchestrator(Arc::new(FailingDetector), Arc::new(queue.clone()), work.path());

    let outcome = detect.handle(&detect_message("r9", "a.jpg", &face_image()));
    match outcome {
        Outcome::Failed { request_id, error: PipelineError::Detection(_) } => {
            assert_eq!(request_id.as_deref(), Some("r9"));
        }
        other => panic!("expected detection failure, got {other:?}"),
    }
    assert_eq!(leftovers(work.path()), 0);
    assert!(queue.published().unwrap().is_empty());
}

#[test]
fn test_recognition_stage_drops_detection_shaped_message() {
    let work = tempfile::tempdir().unwrap();
    let queue = MemoryQueue::new();
    let recognize = recognize_orchestrator(
        FixedExtractor::new(vec![1.0, 0.0, 0.0]),
        gallery(&[("alice", vec![1.0, 0.0, 0.0])]),
        Arc::new(queue.clone()),
        work.path(),
    );

    let outcome = recognize.handle(&detect_message("r1", "a.jpg", &face_image()));
    assert!(matches!(outcome, Outcome::Dropped { .. }));
    assert!(queue.published().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_workers_over_spool_queues() {
    let spool = tempfile::tempdir().unwrap();
    let work = tempfile::tempdir().unwrap();

    let inbound = SpoolQueue::open(spool.path(), "inbound").unwrap();
    let requests = SpoolQueue::open(spool.path(), "req-queue").unwrap();
    let responses = SpoolQueue::open(spool.path(), "resp-queue").unwrap();

    let detect = Arc::new(detect_orchestrator(
        Arc::new(BrightnessDetector),
        Arc::new(SpoolPublisher::open(spool.path(), "req-queue", "resp-queue").unwrap()),
        work.path(),
    ));
    let recognize = Arc::new(recognize_orchestrator(
        FixedExtractor::new(vec![0.1, 0.2, 0.3]),
        gallery(&[("bob", vec![5.0, 5.0, 5.0]), ("alice", vec![0.1, 0.2, 0.25])]),
        Arc::new(SpoolPublisher::open(spool.path(), "unused-next", "resp-queue").unwrap()),
        work.path(),
    ));

    inbound.enqueue(&detect_message("face-1", "a.jpg", &face_image())).unwrap();
    inbound.enqueue(&detect_message("dark-1", "d.jpg", &black_pixel())).unwrap();

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let config = SubscriberConfig { max_in_flight: 2, poll_interval: Duration::from_millis(10) };
    let stopper = |mut rx: tokio::sync::watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let w1 = tokio::spawn(run_subscriber(
        Arc::new(inbound.clone()),
        detect,
        config.clone(),
        stopper(stop_rx.clone()),
    ));
    let w2 = tokio::spawn(run_subscriber(
        Arc::new(requests.clone()),
        recognize,
        config,
        stopper(stop_rx),
    ));

    let mut waited = 0;
    while responses.ready_len().unwrap() < 2 && waited < 500 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    stop_tx.send(true).unwrap();
    let s1 = w1.await.unwrap().unwrap();
    let s2 = w2.await.unwrap().unwrap();

    assert_eq!((s1.published, s1.failed), (2, 0));
    assert_eq!((s2.published, s2.failed), (1, 0));
    assert_eq!(inbound.ready_len().unwrap() + inbound.in_flight_len().unwrap(), 0);
    assert_eq!(requests.ready_len().unwrap() + requests.in_flight_len().unwrap(), 0);

    let mut results: Vec<Value> = {
        use facepipe_pipeline::Inbox;
        responses
            .receive(10)
            .unwrap()
            .iter()
            .map(|d| serde_json::from_slice(&d.body).unwrap())
            .collect()
    };
    results.sort_by_key(|v| v["request_id"].as_str().unwrap_or_default().to_string());
    assert_eq!(
        results,
        vec![
            json!({"request_id": "dark-1", "result": "No-Face", "filename": "d.jpg"}),
            json!({"request_id": "face-1", "result": "alice"}),
        ]
    );
    assert_eq!(leftovers(work.path()), 0);
}
