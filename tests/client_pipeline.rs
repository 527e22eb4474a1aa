mod common;

use common::{client, config, fast_retry, init_tracing, ScriptedTransport, Step, BASE_URL};
use http::{HeaderValue, Method};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskwire::{
    ApiClient, ApiResponse, ClientConfig, ClientError, ErrorContext, ErrorKind, HttpResponse,
    InstantSleeper, MemorySink, RequestConfig, RequestOptions, TrackingSleeper,
};

#[tokio::test]
async fn succeeds_on_third_attempt() {
    init_tracing();
    let transport = ScriptedTransport::new();
    transport.script(
        "/tasks",
        [Step::status(503), Step::status(503), Step::json(200, json!({"ok": true}))],
    );
    let sleeper = TrackingSleeper::new();
    let client = ApiClient::builder(config(), transport.clone())
        .sleeper(sleeper.clone())
        .build()
        .unwrap();

    let response: ApiResponse<Value> = client.get("/tasks", None).await.unwrap();

    assert_eq!(response.data["ok"], true);
    assert_eq!(transport.count("/tasks"), 3);
    assert_eq!(sleeper.calls(), vec![Duration::from_millis(10), Duration::from_millis(20)]);
    let stats = client.stats();
    assert_eq!(stats.successful_requests, 1);
    assert_eq!(stats.failed_requests, 0);
    assert_eq!(stats.total_requests, 1);
}

#[tokio::test]
async fn bad_request_is_not_retried() {
    let transport = ScriptedTransport::new();
    transport.script("/tasks", [Step::json(400, json!({"code": "BAD_INPUT"}))]);
    let client = client(transport.clone());

    let err = client.post::<Value, _>("/tasks", &json!({}), None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.code(), "BAD_INPUT");
    assert_eq!(transport.count("/tasks"), 1);
    let stats = client.stats();
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.status_codes[&400], 1);
}

#[tokio::test]
async fn exhausted_retries_count_as_one_failed_call() {
    let transport = ScriptedTransport::new();
    transport.script("/boards", [Step::status(500), Step::status(500), Step::status(500)]);
    let client = client(transport.clone());

    let err = client.get::<Value>("/boards", None).await.unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert!(err.is_retryable());
    assert_eq!(transport.count("/boards"), 3);
    let stats = client.stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.status_codes[&500], 1);
}

#[tokio::test]
async fn rate_limit_waits_for_retry_after() {
    let transport = ScriptedTransport::new();
    let limited = HttpResponse::new(429, r#"{"code":"RATE_LIMITED","message":"slow down"}"#)
        .with_header(http::header::RETRY_AFTER, HeaderValue::from_static("2"));
    transport.script("/tasks", [Step::Reply(limited), Step::json(200, json!([]))]);
    let sleeper = TrackingSleeper::new();
    let client = ApiClient::builder(config(), transport.clone())
        .sleeper(sleeper.clone())
        .build()
        .unwrap();

    let response: ApiResponse<Vec<Value>> = client.get("/tasks", None).await.unwrap();

    assert!(response.data.is_empty());
    assert_eq!(sleeper.calls(), vec![Duration::from_secs(2)]);
}

#[tokio::test]
async fn auth_failures_surface_immediately() {
    let transport = ScriptedTransport::new();
    transport.script("/me", [Step::json(401, json!({"code": "TOKEN_EXPIRED"}))]);
    let client = client(transport.clone());

    let err = client.get::<Value>("/me", None).await.unwrap_err();

    assert!(err.is_auth_failure());
    assert!(err.is_security_relevant());
    assert_eq!(err.kind(), ErrorKind::Api);
    assert_eq!(transport.count("/me"), 1);
}

#[tokio::test]
async fn business_errors_keep_user_message() {
    let transport = ScriptedTransport::new();
    transport.script(
        "/tasks/9",
        [Step::json(
            409,
            json!({
                "type": "BusinessError",
                "code": "TASK_LOCKED",
                "message": "task 9 is locked by another editor",
                "userMessage": "Someone else is editing this task."
            }),
        )],
    );
    let client = client(transport.clone());

    let err = client.put::<Value, _>("/tasks/9", &json!({"title": "x"}), None).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Business);
    assert_eq!(err.user_message(), Some("Someone else is editing this task."));
    assert_eq!(transport.count("/tasks/9"), 1);
}

#[tokio::test]
async fn validation_errors_carry_field_errors() {
    let transport = ScriptedTransport::new();
    transport.script(
        "/projects",
        [Step::json(
            422,
            json!({
                "type": "validation",
                "code": "INVALID_PROJECT",
                "message": "project is invalid",
                "fieldErrors": {"name": ["is required"]}
            }),
        )],
    );
    let client = client(transport);

    let err = client.post::<Value, _>("/projects", &json!({}), None).await.unwrap_err();

    let fields = err.field_errors().expect("validation error");
    assert_eq!(fields["name"], vec!["is required".to_string()]);
}

#[tokio::test]
async fn interceptors_run_in_order_around_the_call() {
    let transport = ScriptedTransport::new();
    transport.script("/tasks", [Step::json(200, json!({"title": "a"}))]);
    let client = client(transport.clone());
    let trace = Arc::new(Mutex::new(Vec::new()));

    let seen = trace.clone();
    client.add_request_interceptor(move |config: RequestConfig| -> Result<_, ClientError> {
        // the built-in interceptor already ran
        assert!(config.request_id.is_some());
        seen.lock().unwrap().push("request-1");
        Ok(config.with_header(
            http::HeaderName::from_static("x-tenant"),
            HeaderValue::from_static("acme"),
        ))
    });
    let seen = trace.clone();
    client.add_request_interceptor(move |config: RequestConfig| -> Result<_, ClientError> {
        assert_eq!(config.headers["x-tenant"], "acme");
        seen.lock().unwrap().push("request-2");
        Ok(config)
    });
    let seen = trace.clone();
    client.add_response_interceptor(move |mut response: HttpResponse| -> Result<_, ClientError> {
        seen.lock().unwrap().push("response");
        response.body = br#"{"title":"rewritten"}"#.to_vec();
        Ok(response)
    });

    let response: ApiResponse<Value> = client.get("/tasks", None).await.unwrap();

    assert_eq!(response.data["title"], "rewritten");
    assert_eq!(*trace.lock().unwrap(), vec!["request-1", "request-2", "response"]);
    assert_eq!(transport.requests()[0].headers["x-tenant"], "acme");
}

#[tokio::test]
async fn response_interceptors_skip_non_success() {
    let transport = ScriptedTransport::new();
    transport.script("/tasks", [Step::status(404)]);
    let client = client(transport);
    let called = Arc::new(Mutex::new(false));
    let flag = called.clone();
    client.add_response_interceptor(move |response: HttpResponse| -> Result<_, ClientError> {
        *flag.lock().unwrap() = true;
        Ok(response)
    });

    let err = client.get::<Value>("/tasks", None).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert!(!*called.lock().unwrap());
}

#[tokio::test]
async fn error_interceptors_see_the_classified_error() {
    let transport = ScriptedTransport::new();
    transport.script("/tasks?secret=1", [Step::status(404)]);
    let client = client(transport);
    let contexts = Arc::new(Mutex::new(Vec::new()));
    let seen = contexts.clone();
    client.add_error_interceptor(move |error: ClientError, context: &ErrorContext| {
        seen.lock().unwrap().push(context.clone());
        match error {
            ClientError::Api { status: 404, .. } => ClientError::api(404, "TASK_MISSING", "gone"),
            other => other,
        }
    });

    let err = client
        .get::<Value>("/tasks?secret=1", Some(RequestOptions::new().request_id("req-42")))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "TASK_MISSING");
    let contexts = contexts.lock().unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].request_id, "req-42");
    assert_eq!(contexts[0].method, Method::GET);
    assert_eq!(contexts[0].endpoint, "/tasks?secret=[REDACTED]");
    assert_eq!(contexts[0].attempts, 1);
}

#[tokio::test]
async fn failing_request_interceptor_short_circuits() {
    let transport = ScriptedTransport::new();
    let client = client(transport.clone());
    client.add_request_interceptor(|_config: RequestConfig| -> Result<RequestConfig, _> {
        Err(ClientError::invalid_request("missing workspace"))
    });

    let err = client.delete::<Value>("/tasks/1", None).await.unwrap_err();

    assert_eq!(err.message(), "missing workspace");
    assert!(transport.requests().is_empty());
    assert_eq!(client.stats().failed_requests, 1);
}

#[tokio::test]
async fn caller_headers_win_over_defaults() {
    let transport = ScriptedTransport::new();
    transport.script("/export", [Step::Reply(HttpResponse::new(200, "\"csv\""))]);
    let client = client(transport.clone());

    let _: ApiResponse<String> = client
        .get("/export", Some(RequestOptions::new().header("Accept", "text/csv")))
        .await
        .unwrap();

    let sent = &transport.requests()[0];
    assert_eq!(sent.headers["accept"], "text/csv");
    assert_eq!(sent.headers["content-type"], "application/json");
}

#[tokio::test]
async fn configured_default_header_overrides_builtin_in_any_case() {
    let transport = ScriptedTransport::new();
    transport.script("/export", [Step::Reply(HttpResponse::new(200, "\"csv\""))]);
    let config = ClientConfig::builder()
        .base_url(BASE_URL)
        .retry(fast_retry(3))
        .default_header("accept", "text/csv")
        .default_header("X-Workspace", "ops")
        .build()
        .unwrap();
    let client =
        ApiClient::builder(config, transport.clone()).sleeper(InstantSleeper).build().unwrap();

    let _: ApiResponse<String> = client.get("/export", None).await.unwrap();

    let sent = &transport.requests()[0];
    assert_eq!(sent.headers.get_all("accept").iter().count(), 1);
    assert_eq!(sent.headers["accept"], "text/csv");
    assert_eq!(sent.headers["x-workspace"], "ops");
}

#[tokio::test]
async fn id_headers_follow_request_id_set_by_later_interceptor() {
    let transport = ScriptedTransport::new();
    transport.script("/tasks", [Step::json(200, json!([]))]);
    let client = client(transport.clone());
    client.add_request_interceptor(|mut config: RequestConfig| -> Result<_, ClientError> {
        config.request_id = Some("custom-9".into());
        Ok(config)
    });

    let response: ApiResponse<Value> = client.get("/tasks", None).await.unwrap();

    assert_eq!(response.request_id, "custom-9");
    let sent = &transport.requests()[0];
    assert_eq!(sent.headers["x-request-id"], "custom-9");
    assert_eq!(sent.headers["x-correlation-id"], "custom-9");
}

#[tokio::test]
async fn retry_override_applies_per_call() {
    let transport = ScriptedTransport::new();
    transport.script("/tasks", vec![Step::status(502); 5]);
    let client = client(transport.clone());

    let err = client
        .get::<Value>("/tasks", Some(RequestOptions::new().retry(fast_retry(5))))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(502));
    assert_eq!(transport.count("/tasks"), 5);
}

#[tokio::test]
async fn telemetry_reports_failures() {
    let transport = ScriptedTransport::new();
    transport.script("/tasks", [Step::Fail(taskwire::TransportError::Connect("refused".into()))]);
    let sink = MemorySink::new();
    let client = client(transport);
    client.set_telemetry_sink(sink.clone());

    let _ = client
        .get::<Value>("/tasks", Some(RequestOptions::new().no_retry()))
        .await
        .unwrap_err();

    let failed = sink.events_of("request_failed");
    assert_eq!(failed.len(), 1);
    assert!(matches!(
        &failed[0],
        taskwire::ClientEvent::RequestFailed { error_kind: ErrorKind::Network, status: None, .. }
    ));
}
