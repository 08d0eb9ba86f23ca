use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, StatusCode};
use serde_json::json;

use super::openai::{extract_content, is_transient_status};
use super::*;
use crate::services::result_validator::{ExtractionContract, ViolationKind};
use crate::services::retry::{Jitter, RetryPolicy};
use crate::test_support::{
    completion_body, extraction_reply, fake_client, FakeTransport, MockUpstream, RecordingSleeper,
};

fn extraction_request(submission_id: &str) -> ModelRequest {
    ModelRequest::for_contract(
        ModelTask::Extraction,
        submission_id,
        String::from("system"),
        String::from("user"),
        &ExtractionContract,
        1800,
    )
}

fn http_client(base_url: &str, sleeper: Arc<RecordingSleeper>) -> ModelClient {
    let settings = crate::test_support::test_settings().with_openai_base_url(base_url);
    let transport = OpenAiTransport::from_settings(&settings).expect("transport");
    ModelClient::new(
        Arc::new(transport),
        RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(40), Jitter::None),
        sleeper,
    )
}

#[test]
fn status_classification() {
    for status in [
        StatusCode::TOO_MANY_REQUESTS,
        StatusCode::REQUEST_TIMEOUT,
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusCode::BAD_GATEWAY,
        StatusCode::SERVICE_UNAVAILABLE,
        StatusCode::GATEWAY_TIMEOUT,
    ] {
        assert!(is_transient_status(status), "{status} should be transient");
    }

    for status in [
        StatusCode::BAD_REQUEST,
        StatusCode::UNAUTHORIZED,
        StatusCode::FORBIDDEN,
        StatusCode::NOT_FOUND,
        StatusCode::UNPROCESSABLE_ENTITY,
    ] {
        assert!(!is_transient_status(status), "{status} should be fatal");
    }
}

#[test]
fn content_extraction_handles_missing_and_refused_replies() {
    assert_eq!(
        extract_content(&completion_body("{\"items\": []}").to_string()),
        Ok(String::from("{\"items\": []}"))
    );

    let empty = json!({"choices": [{"message": {"content": "  "}}]}).to_string();
    assert!(matches!(extract_content(&empty), Err(TransportError::Transient(_))));

    let refusal = json!({"choices": [{"message": {"content": null, "refusal": "no"}}]});
    assert!(matches!(extract_content(&refusal.to_string()), Err(TransportError::Fatal(_))));

    assert!(matches!(extract_content("<html>"), Err(TransportError::Transient(_))));
}

#[tokio::test]
async fn sends_schema_constrained_request_with_bearer_auth() {
    let upstream = MockUpstream::start(vec![(StatusCode::OK, completion_body("{\"ok\": true}"))]).await;
    let client = http_client(&upstream.base_url, Arc::new(RecordingSleeper::default()));

    let reply = client.invoke(&extraction_request("exam-1")).await.expect("reply");
    assert_eq!(reply.value, "{\"ok\": true}");
    assert_eq!(reply.attempts, 1);

    let received = upstream.received();
    assert_eq!(received.len(), 1);
    let (headers, body) = &received[0];
    assert_eq!(
        headers.get(header::AUTHORIZATION).and_then(|value| value.to_str().ok()),
        Some("Bearer test-key")
    );
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["temperature"], 0.0);
    assert_eq!(body["max_completion_tokens"], 1800);
    assert_eq!(body["response_format"]["type"], "json_schema");
    assert_eq!(body["response_format"]["json_schema"]["name"], "exam_extraction");
    assert_eq!(body["messages"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn rate_limit_is_retried_with_backoff() {
    let upstream = MockUpstream::start(vec![
        (StatusCode::TOO_MANY_REQUESTS, json!({"error": "slow down"})),
        (StatusCode::SERVICE_UNAVAILABLE, json!({"error": "overloaded"})),
        (StatusCode::OK, completion_body("{}")),
    ])
    .await;
    let sleeper = Arc::new(RecordingSleeper::default());
    let client = http_client(&upstream.base_url, sleeper.clone());

    let reply = client.invoke(&extraction_request("exam-2")).await.expect("third call");
    assert_eq!(reply.attempts, 3);
    assert_eq!(sleeper.delays(), vec![Duration::from_millis(10), Duration::from_millis(20)]);
}

#[tokio::test]
async fn authentication_failure_is_fatal_without_retry() {
    let upstream =
        MockUpstream::start(vec![(StatusCode::UNAUTHORIZED, json!({"error": "bad key"}))]).await;
    let sleeper = Arc::new(RecordingSleeper::default());
    let client = http_client(&upstream.base_url, sleeper.clone());

    let err = client.invoke(&extraction_request("exam-3")).await.expect_err("fatal");
    assert!(matches!(err, ModelError::Fatal { attempts: 1, .. }));
    assert!(err.to_string().contains("401"));
    assert_eq!(upstream.received().len(), 1);
    assert!(sleeper.delays().is_empty());
}

#[tokio::test]
async fn persistent_server_errors_exhaust_attempts() {
    let upstream = MockUpstream::start(vec![
        (StatusCode::BAD_GATEWAY, json!({})),
        (StatusCode::BAD_GATEWAY, json!({})),
        (StatusCode::BAD_GATEWAY, json!({})),
    ])
    .await;
    let client = http_client(&upstream.base_url, Arc::new(RecordingSleeper::default()));

    let err = client.invoke(&extraction_request("exam-4")).await.expect_err("exhausted");
    assert!(matches!(err, ModelError::TransientExhausted { attempts: 3, .. }));
    assert_eq!(upstream.received().len(), 3);
}

#[tokio::test]
async fn invalid_output_is_reasked_with_correction_note() {
    let transport = Arc::new(FakeTransport::new().script(
        "exam-5",
        ModelTask::Extraction,
        vec![Ok(String::from("{\"items\": []}")), Ok(extraction_reply(&[("1", "a push")]))],
    ));
    let client = fake_client(transport.clone(), 3);

    let parsed = client
        .invoke_validated(extraction_request("exam-5"), &ExtractionContract, 2)
        .await
        .expect("second reply conforms");
    assert_eq!(parsed.attempts, 2);
    assert_eq!(parsed.value[0].student_answer, "a push");

    let requests = transport.requests();
    assert_eq!(requests[0].correction, None);
    let note = requests[1].correction.as_deref().expect("correction note");
    assert!(note.contains("$.items"), "{note}");
}

#[tokio::test]
async fn validation_budget_is_separate_from_transport_budget() {
    let transport = Arc::new(FakeTransport::new().script(
        "exam-6",
        ModelTask::Extraction,
        vec![
            Err(TransportError::Transient(String::from("429"))),
            Ok(String::from("not json")),
            Ok(String::from("still not json")),
            Ok(String::from("{\"items\": 3}")),
        ],
    ));
    let client = fake_client(transport.clone(), 3);

    let err = client
        .invoke_validated(extraction_request("exam-6"), &ExtractionContract, 2)
        .await
        .expect_err("never conforms");

    match err {
        InvocationError::Invalid { last, validation_attempts, model_attempts } => {
            assert_eq!(validation_attempts, 3);
            assert_eq!(model_attempts, 4);
            assert_eq!(last.kind, ViolationKind::WrongType);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(transport.calls_for("exam-6"), 4);
}

#[tokio::test]
async fn fatal_error_during_revalidation_keeps_attempt_count() {
    let transport = Arc::new(FakeTransport::new().script(
        "exam-7",
        ModelTask::Extraction,
        vec![Ok(String::from("garbage")), Err(TransportError::Fatal(String::from("403")))],
    ));
    let client = fake_client(transport, 3);

    let err = client
        .invoke_validated(extraction_request("exam-7"), &ExtractionContract, 2)
        .await
        .expect_err("fatal");
    assert_eq!(err.model_attempts(), 2);
    assert!(matches!(err, InvocationError::Model(ModelError::Fatal { .. })));
}
