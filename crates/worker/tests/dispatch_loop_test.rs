mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::{event_body, prediction_body, prediction_data, FixedPredictor, Harness, NO_WAIT};
use event_worker_worker::{
    MessageOutcome, PROCESSOR_VERSION, WASTE_PREDICTIONS_COLLECTION, WASTE_PREDICTION_EVENT,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn dead_letter_error(outcome: &MessageOutcome) -> (&'static str, String) {
    match outcome {
        MessageOutcome::DeadLettered {
            error_kind, error, ..
        } => (*error_kind, error.clone()),
        other => panic!("expected dead-letter outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn test_well_formed_prediction_is_stored_and_acknowledged() {
    let harness = Harness::new();
    harness.enqueue(&prediction_body("r1"), "waste-predictions").await;

    let report = harness.dispatch.poll_once().await;

    assert_eq!(report.received, 1);
    assert_eq!(report.processed(), 1);
    assert!(report.messages[0].acknowledged);
    assert_eq!(report.messages[0].request_id.as_deref(), Some("r1"));

    let calls = harness.predictor.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].production_volume, 50000.0);
    assert_eq!(calls[0].rain_sum, 200.0);
    assert_eq!(calls[0].temperature_mean, 28.0);
    assert_eq!(calls[0].humidity_mean, 85.0);
    assert_eq!(calls[0].wind_speed_mean, 15.0);
    assert_eq!(calls[0].month, 6);

    let records = harness.store.records(WASTE_PREDICTIONS_COLLECTION).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].metadata.request_id, "r1");
    assert_eq!(records[0].metadata.event_type, WASTE_PREDICTION_EVENT);
    assert_eq!(records[0].metadata.processor_version, PROCESSOR_VERSION);
    assert_eq!(records[0].input_parameters["month"], json!(6));
    let total = records[0].prediction_result["Total_Waste_kg"].as_f64().unwrap();
    assert!(total >= 0.0);

    assert_eq!(harness.source.acknowledged_count().await, 1);
    assert_eq!(harness.source.in_flight_len().await, 0);
    assert!(harness.dead_letter.is_empty().await);
}

#[tokio::test]
async fn test_missing_month_is_dead_lettered_with_raw_body() {
    let harness = Harness::new();
    let mut data = prediction_data("r2");
    data.as_object_mut().unwrap().remove("month");
    let body = event_body(WASTE_PREDICTION_EVENT, data);
    harness.enqueue(&body, "waste-predictions").await;

    let report = harness.dispatch.poll_once().await;

    let (kind, error) = dead_letter_error(&report.messages[0].outcome);
    assert_eq!(kind, "validation");
    assert!(error.contains("month"));
    assert!(report.messages[0].acknowledged);

    let dead = harness.dead_letter.pending_messages().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].1, body.as_bytes());
    assert_eq!(dead[0].0, "waste-predictions");

    assert!(harness.store.is_empty().await);
    assert_eq!(harness.source.acknowledged_count().await, 1);
}

#[tokio::test]
async fn test_every_missing_field_is_reported() {
    let harness = Harness::new();
    let body = event_body(
        WASTE_PREDICTION_EVENT,
        json!({"production_volume": 1, "metadata": {"request_id": "r3"}}),
    );
    harness.enqueue(&body, "g").await;

    let report = harness.dispatch.poll_once().await;
    let (_, error) = dead_letter_error(&report.messages[0].outcome);
    for field in [
        "rain_sum",
        "temperature_mean",
        "humidity_mean",
        "wind_speed_mean",
        "month",
    ] {
        assert!(error.contains(field), "{field} missing from: {error}");
    }
    assert!(harness.store.is_empty().await);
}

#[tokio::test]
async fn test_missing_request_id_never_reaches_predictor() {
    let harness = Harness::new();
    let mut data = prediction_data("unused");
    data.as_object_mut().unwrap().remove("metadata");
    harness.enqueue(&event_body(WASTE_PREDICTION_EVENT, data), "g").await;

    let report = harness.dispatch.poll_once().await;

    let (kind, error) = dead_letter_error(&report.messages[0].outcome);
    assert_eq!(kind, "validation");
    assert!(error.contains("metadata.request_id"));
    assert!(harness.predictor.calls().await.is_empty());
    assert_eq!(harness.dead_letter.len().await, 1);
}

#[tokio::test]
async fn test_unknown_event_is_dead_lettered_and_acknowledged_once() {
    let harness = Harness::new();
    let body = event_body("ORDER/CREATED", json!({"order_id": 7}));
    harness.enqueue(&body, "orders").await;

    let report = harness.dispatch.poll_once().await;

    let (kind, error) = dead_letter_error(&report.messages[0].outcome);
    assert_eq!(kind, "unknown_event");
    assert!(error.contains("ORDER/CREATED"));
    assert!(error.contains(WASTE_PREDICTION_EVENT));

    assert_eq!(harness.source.acknowledged_count().await, 1);
    assert!(harness.source.is_empty().await);
    assert_eq!(harness.dead_letter.pending_messages().await[0].1, body.as_bytes());

    // 已确认的消息不会再次投递
    let again = harness.dispatch.poll_once().await;
    assert_eq!(again.received, 0);
}

#[tokio::test]
async fn test_same_malformed_payload_gets_distinct_dedup_tokens() {
    let harness = Harness::new();
    harness.enqueue("{not json", "g1").await;
    harness.enqueue("{not json", "g2").await;

    let report = harness.dispatch.poll_once().await;
    assert_eq!(report.dead_lettered(), 2);

    let tokens: HashSet<String> = report
        .messages
        .iter()
        .map(|m| match &m.outcome {
            MessageOutcome::DeadLettered {
                error_kind,
                delivery: Some(delivery),
                ..
            } => {
                assert_eq!(*error_kind, "decode");
                delivery.dedup_token.clone()
            }
            other => panic!("unexpected outcome {other:?}"),
        })
        .collect();

    assert_eq!(tokens.len(), 2);
    assert!(report.messages.iter().all(|m| m.acknowledged));
    assert_eq!(harness.dead_letter.len().await, 2);
    assert_eq!(harness.source.acknowledged_count().await, 2);
}

#[tokio::test]
async fn test_decode_failures_are_dead_lettered() {
    let harness = Harness::new();
    for body in [
        r#"[1, 2, 3]"#.to_string(),
        json!({"eventData": {"a": 1}}).to_string(),
        json!({"eventName": WASTE_PREDICTION_EVENT}).to_string(),
        json!({"eventName": WASTE_PREDICTION_EVENT, "eventData": {}}).to_string(),
        json!({"eventName": "", "eventData": {"a": 1}}).to_string(),
    ] {
        harness.enqueue(&body, "g").await;
    }

    let report = harness.dispatch.poll_once().await;
    assert_eq!(report.received, 5);
    for message in &report.messages {
        assert_eq!(dead_letter_error(&message.outcome).0, "decode");
        assert!(message.acknowledged);
    }
    assert_eq!(harness.dead_letter.len().await, 5);
}

#[tokio::test]
async fn test_non_utf8_body_is_dead_lettered_byte_for_byte() {
    let harness = Harness::new();
    let raw = [b'{', 0xff, 0xfe, b'}'];
    harness.enqueue_raw(&raw, "binary").await;

    let report = harness.dispatch.poll_once().await;

    let (kind, error) = dead_letter_error(&report.messages[0].outcome);
    assert_eq!(kind, "decode");
    assert!(error.contains("UTF-8"));
    assert!(report.messages[0].acknowledged);

    let dead = harness.dead_letter.pending_messages().await;
    assert_eq!(dead, vec![("binary".to_string(), raw.to_vec())]);
}

#[tokio::test]
async fn test_one_failing_message_does_not_affect_the_batch() {
    let harness = Harness::new();
    harness.enqueue("garbage", "g").await;
    harness.enqueue(&prediction_body("ok-1"), "g").await;
    harness
        .enqueue(&event_body("UNKNOWN/EVENT", json!({"x": 1})), "g")
        .await;
    harness.enqueue(&prediction_body("ok-2"), "g").await;

    let report = harness.dispatch.poll_once().await;

    assert_eq!(report.received, 4);
    assert_eq!(report.processed(), 2);
    assert_eq!(report.dead_lettered(), 2);
    assert_eq!(report.ack_failures(), 0);
    let order: Vec<bool> = report.messages.iter().map(|m| m.is_processed()).collect();
    assert_eq!(order, vec![false, true, false, true]);
    assert_eq!(harness.store.len().await, 2);
}

#[tokio::test]
async fn test_empty_receive_is_a_no_op() {
    let harness = Harness::new();
    let report = harness.dispatch.poll_once().await;

    assert_eq!(report.received, 0);
    assert!(report.messages.is_empty());
    assert!(report.receive_error.is_none());
}

#[tokio::test]
async fn test_parallel_groups_preserve_order_within_group() {
    let harness = Harness::with_options(
        4,
        FixedPredictor::new(10.0).with_delay(Duration::from_millis(5)),
        NO_WAIT,
    );
    for i in 0..4 {
        harness.enqueue(&prediction_body(&format!("a-{i}")), "group-a").await;
        harness.enqueue(&prediction_body(&format!("b-{i}")), "group-b").await;
    }

    let report = harness.dispatch.poll_once().await;
    assert_eq!(report.processed(), 8);

    // 报告按接收顺序返回
    let reported: Vec<String> = report
        .messages
        .iter()
        .map(|m| m.request_id.clone().unwrap())
        .collect();
    assert_eq!(reported[0], "a-0");
    assert_eq!(reported[1], "b-0");

    let stored: Vec<String> = harness
        .store
        .records(WASTE_PREDICTIONS_COLLECTION)
        .await
        .into_iter()
        .map(|r| r.metadata.request_id)
        .collect();
    for prefix in ["a-", "b-"] {
        let group: Vec<&String> = stored.iter().filter(|id| id.starts_with(prefix)).collect();
        let expected: Vec<String> = (0..4).map(|i| format!("{prefix}{i}")).collect();
        assert_eq!(group, expected.iter().collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_run_processes_until_cancelled() {
    let harness = Harness::waiting(Duration::from_millis(20));
    for i in 0..3 {
        harness.enqueue(&prediction_body(&format!("run-{i}")), "g").await;
    }
    harness.enqueue("bad", "g").await;

    let cancel = CancellationToken::new();
    let store = harness.store.clone();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        while store.len().await < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        stopper.cancel();
    });

    let stats = tokio::time::timeout(Duration::from_secs(5), harness.dispatch.run(cancel))
        .await
        .expect("run should stop after cancellation");

    assert_eq!(stats.processed, 3);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.received, 4);
    assert_eq!(harness.dead_letter.len().await, 1);
}

#[tokio::test]
async fn test_cancellation_interrupts_receive_wait() {
    let harness = Harness::waiting(Duration::from_secs(20));

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.cancel();
    });

    let stats = tokio::time::timeout(Duration::from_secs(2), harness.dispatch.run(cancel))
        .await
        .expect("run should stop promptly after cancellation");
    assert_eq!(stats, Default::default());
}
