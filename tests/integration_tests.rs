//! Integration tests for ChatMux HTTP endpoints
//!
//! Starts the real router on an ephemeral port and drives it with reqwest. The
//! ChatGPT backend and the OAuth token endpoint are both mocked with httpmock, and
//! credentials live in a temporary home directory.

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chatmux::config::Config;
use chatmux::server::AppState;
use chatmux::build_router;
use chrono::{Duration, Utc};
use httpmock::prelude::*;
use serde_json::{Value, json};
use tempfile::TempDir;

const BACKEND_PATH: &str = "/backend-api/codex/responses";
const ACCOUNT_ID: &str = "acc-123";

/* --- helpers --------------------------------------------------------------------------------- */

fn make_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, payload)
}

fn access_token(expires_in: Duration) -> String {
    make_token(&json!({
        "exp": (Utc::now() + expires_in).timestamp(),
        "https://api.openai.com/auth": {"chatgpt_plan_type": "plus"}
    }))
}

fn id_token() -> String {
    make_token(&json!({
        "email": "dev@example.com",
        "https://api.openai.com/auth": {"chatgpt_account_id": ACCOUNT_ID}
    }))
}

fn write_auth(home: &Path, access: &str, refresh: Option<&str>, last_refresh: String) {
    let mut tokens = json!({"id_token": id_token(), "access_token": access, "account_id": ACCOUNT_ID});
    if let Some(refresh) = refresh {
        tokens["refresh_token"] = json!(refresh);
    }
    let auth = json!({"OPENAI_API_KEY": null, "tokens": tokens, "last_refresh": last_refresh});
    std::fs::write(home.join("auth.json"), auth.to_string()).unwrap();
}

fn write_fresh_auth(home: &Path) -> String {
    let access = access_token(Duration::hours(1));
    write_auth(home, &access, Some("refresh-1"), Utc::now().to_rfc3339());
    access
}

fn test_config(home: &Path, server: &MockServer) -> Config {
    let mut config = Config::default();
    config.auth.home_dir = Some(home.display().to_string());
    config.auth.issuer = server.base_url();
    config.upstream.responses_url = server.url(BACKEND_PATH);
    config.upstream.timeout_secs = 30;
    config
}

/// Serve the router on 127.0.0.1:0 and return its base URL
async fn spawn_gateway(config: Config) -> String {
    let state = Arc::new(AppState::new(config).expect("state builds"));
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", address)
}

fn sse_body(events: &[Value]) -> String {
    let mut body: String = events.iter().map(|event| format!("data: {}\n\n", event)).collect();
    body.push_str("data: [DONE]\n\n");
    body
}

fn reasoning_then_text() -> String {
    sse_body(&[
        json!({"type": "response.created", "response": {"id": "resp_1"}}),
        json!({"type": "response.reasoning_summary_text.delta", "delta": "think"}),
        json!({"type": "response.output_text.delta", "delta": "hi"}),
        json!({"type": "response.output_text.done"}),
        json!({"type": "response.completed", "response": {"id": "resp_1", "usage": {"input_tokens": 5, "output_tokens": 2}}}),
    ])
}

/// `data:` payloads of a client SSE body
fn data_lines(body: &str) -> Vec<String> {
    body.lines().filter_map(|line| line.strip_prefix("data:")).map(|d| d.trim().to_string()).collect()
}

fn user_message(text: &str) -> Value {
    json!({"model": "gpt-5", "messages": [{"role": "user", "content": text}]})
}

/* --- tests ----------------------------------------------------------------------------------- */

#[tokio::test]
async fn test_health_and_models_need_no_credentials() {
    let home = TempDir::new().unwrap();
    let server = MockServer::start();
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;
    let client = reqwest::Client::new();

    let health: Value = client.get(format!("{}/health", gateway)).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["requests"]["total"], 0);
    assert_eq!(health["requests"]["success_rate"], 100.0);

    let models: Value = client.get(format!("{}/v1/models", gateway)).send().await.unwrap().json().await.unwrap();
    let ids: Vec<&str> = models["data"].as_array().unwrap().iter().filter_map(|m| m["id"].as_str()).collect();
    assert_eq!(ids, vec!["gpt-5", "gpt-5-codex", "codex-mini-latest"]);
}

#[tokio::test]
async fn test_missing_credentials_return_401_without_backend_call() {
    let home = TempDir::new().unwrap();
    let server = MockServer::start();
    let backend = server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH);
        then.status(200).body(reasoning_then_text());
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gateway))
        .json(&user_message("hello"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");
    backend.assert_calls(0);
}

#[tokio::test]
async fn test_invalid_bodies_are_rejected() {
    let home = TempDir::new().unwrap();
    write_fresh_auth(home.path());
    let server = MockServer::start();
    let backend = server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH);
        then.status(200).body(reasoning_then_text());
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/v1/chat/completions", gateway))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Invalid JSON body");

    let response =
        client.post(format!("{}/v1/chat/completions", gateway)).json(&json!({"model": "gpt-5"})).send().await.unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Request must include messages: []");

    let response = client.post(format!("{}/v1/responses", gateway)).json(&json!({"input": []})).send().await.unwrap();
    assert_eq!(response.status(), 400);

    backend.assert_calls(0);
}

#[tokio::test]
async fn test_non_stream_chat_completion() {
    let home = TempDir::new().unwrap();
    let access = write_fresh_auth(home.path());
    let server = MockServer::start();
    let backend = server.mock(|when, then| {
        when.method(POST)
            .path(BACKEND_PATH)
            .header("authorization", format!("Bearer {}", access))
            .header("chatgpt-account-id", ACCOUNT_ID)
            .json_body_includes(json!({"model": "gpt-5", "stream": true, "store": false}).to_string());
        then.status(200).header("content-type", "text/event-stream").body(reasoning_then_text());
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gateway))
        .json(&user_message("hello"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let completion: Value = response.json().await.unwrap();
    assert_eq!(completion["object"], "chat.completion");
    assert_eq!(completion["model"], "gpt-5");
    assert_eq!(completion["choices"][0]["message"]["role"], "assistant");
    assert_eq!(completion["choices"][0]["message"]["content"], "<think>think</think>hi");
    assert_eq!(completion["choices"][0]["finish_reason"], "stop");
    assert_eq!(completion["usage"]["total_tokens"], 7);
    backend.assert_calls(1);
}

#[tokio::test]
async fn test_streaming_chat_completion() {
    let home = TempDir::new().unwrap();
    write_fresh_auth(home.path());
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH);
        then.status(200).header("content-type", "text/event-stream").body(reasoning_then_text());
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;

    let mut request = user_message("hello");
    request["stream"] = json!(true);
    request["stream_options"] = json!({"include_usage": true});

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gateway))
        .json(&request)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.headers()["content-type"].to_str().unwrap().starts_with("text/event-stream"));

    let lines = data_lines(&response.text().await.unwrap());
    assert_eq!(lines.last().map(String::as_str), Some("[DONE]"));
    assert_eq!(lines.iter().filter(|l| *l == "[DONE]").count(), 1);

    let chunks: Vec<Value> =
        lines.iter().filter(|l| *l != "[DONE]").map(|l| serde_json::from_str(l).unwrap()).collect();
    let content: String = chunks
        .iter()
        .filter_map(|c| c["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(content, "<think>think</think>hi");
    assert!(chunks.iter().all(|c| c["object"] == "chat.completion.chunk"));
    assert!(chunks.iter().any(|c| c["choices"][0]["finish_reason"] == "stop"));
    assert!(chunks.iter().any(|c| c["usage"]["total_tokens"] == 7));
}

#[tokio::test]
async fn test_streaming_tool_call() {
    let home = TempDir::new().unwrap();
    write_fresh_auth(home.path());
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH).body_includes("\"name\":\"get_weather\"");
        then.status(200).body(sse_body(&[
            json!({"type": "response.output_item.added", "item": {"type": "function_call", "id": "fc_1", "call_id": "call_1", "name": "get_weather"}}),
            json!({"type": "response.function_call_arguments.delta", "item_id": "fc_1", "delta": "{\"city\":"}),
            json!({"type": "response.output_item.done", "item": {"type": "function_call", "id": "fc_1", "call_id": "call_1", "name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}}),
            json!({"type": "response.completed", "response": {"id": "resp_t"}}),
        ]));
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;

    let mut request = user_message("weather in Paris?");
    request["stream"] = json!(true);
    request["tools"] = json!([{
        "type": "function",
        "function": {"name": "get_weather", "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}}
    }]);

    let body = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gateway))
        .json(&request)
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let chunks: Vec<Value> = data_lines(&body)
        .iter()
        .filter(|l| *l != "[DONE]")
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let call = chunks
        .iter()
        .find_map(|c| c["choices"][0]["delta"]["tool_calls"].as_array().cloned())
        .expect("a tool call chunk");
    assert_eq!(call[0]["id"], "call_1");
    assert_eq!(call[0]["function"]["name"], "get_weather");
    assert_eq!(call[0]["function"]["arguments"], "{\"city\":\"Paris\"}");
    assert!(chunks.iter().any(|c| c["choices"][0]["finish_reason"] == "tool_calls"));
}

#[tokio::test]
async fn test_passthrough_tools_retry_without_them() {
    let home = TempDir::new().unwrap();
    write_fresh_auth(home.path());
    let server = MockServer::start();
    let with_tools = server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH).body_includes("\"type\":\"web_search\"");
        then.status(400).json_body(json!({"error": {"message": "Unsupported tool: web_search"}}));
    });
    let without_tools = server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH).body_includes("\"tools\":[]");
        then.status(200).body(reasoning_then_text());
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;

    let mut request = user_message("search something");
    request["responses_tools"] = json!([{"type": "web_search"}]);

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gateway))
        .json(&request)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    with_tools.assert_calls(1);
    without_tools.assert_calls(1);
}

#[tokio::test]
async fn test_passthrough_tools_rejected_twice() {
    let home = TempDir::new().unwrap();
    write_fresh_auth(home.path());
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH).body_includes("\"type\":\"web_search\"");
        then.status(400).json_body(json!({"error": {"message": "Unsupported tool: web_search"}}));
    });
    server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH).body_includes("\"tools\":[]");
        then.status(400).json_body(json!({"error": {"message": "Bad input"}}));
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;

    let mut request = user_message("search something");
    request["responses_tools"] = json!([{"type": "web_search"}]);

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gateway))
        .json(&request)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Unsupported tool: web_search");
    assert_eq!(body["error"]["code"], "RESPONSES_TOOLS_REJECTED");
}

#[tokio::test]
async fn test_backend_error_status_is_forwarded_and_limits_recorded() {
    let home = TempDir::new().unwrap();
    write_fresh_auth(home.path());
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH);
        then.status(429)
            .header("x-codex-primary-used-percent", "100")
            .header("x-codex-primary-window-minutes", "300")
            .header("x-codex-primary-reset-after-seconds", "120")
            .json_body(json!({"error": {"message": "Usage limit reached", "type": "usage_limit_reached"}}));
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;
    let client = reqwest::Client::new();

    let response =
        client.post(format!("{}/v1/chat/completions", gateway)).json(&user_message("hi")).send().await.unwrap();

    assert_eq!(response.status(), 429);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Usage limit reached");
    assert_eq!(body["error"]["type"], "usage_limit_reached");

    let stored = chatmux::limits::load_snapshot(home.path()).expect("snapshot stored");
    assert_eq!(stored.snapshot.primary.unwrap().used_percent, 100.0);

    let health: Value = client.get(format!("{}/health", gateway)).send().await.unwrap().json().await.unwrap();
    assert_eq!(health["requests"]["total"], 1);
    assert_eq!(health["requests"]["error"], 1);
}

#[tokio::test]
async fn test_expired_token_is_refreshed_before_request() {
    let home = TempDir::new().unwrap();
    write_auth(
        home.path(),
        &access_token(Duration::minutes(-5)),
        Some("refresh-old"),
        (Utc::now() - Duration::hours(2)).to_rfc3339(),
    );
    let new_access = access_token(Duration::hours(1));

    let server = MockServer::start();
    let token_endpoint = server.mock(|when, then| {
        when.method(POST)
            .path("/oauth/token")
            .json_body_includes(json!({"grant_type": "refresh_token", "refresh_token": "refresh-old"}).to_string());
        then.status(200).json_body(json!({
            "id_token": id_token(),
            "access_token": new_access,
            "refresh_token": "refresh-new"
        }));
    });
    let backend = server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH).header("authorization", format!("Bearer {}", new_access));
        then.status(200).body(reasoning_then_text());
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gateway))
        .json(&user_message("hello"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    token_endpoint.assert_calls(1);
    backend.assert_calls(1);

    let saved: Value = serde_json::from_str(&std::fs::read_to_string(home.path().join("auth.json")).unwrap()).unwrap();
    assert_eq!(saved["tokens"]["refresh_token"], "refresh-new");
    assert_eq!(saved["tokens"]["access_token"], new_access.as_str());
}

#[tokio::test]
async fn test_failed_refresh_is_401() {
    let home = TempDir::new().unwrap();
    write_auth(
        home.path(),
        &access_token(Duration::minutes(-5)),
        Some("refresh-old"),
        (Utc::now() - Duration::hours(2)).to_rfc3339(),
    );
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/oauth/token");
        then.status(401).json_body(json!({"error": "invalid_grant"}));
    });
    let backend = server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH);
        then.status(200).body(reasoning_then_text());
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/chat/completions", gateway))
        .json(&user_message("hello"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
    backend.assert_calls(0);
}

#[tokio::test]
async fn test_text_completions() {
    let home = TempDir::new().unwrap();
    write_fresh_auth(home.path());
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH).body_includes("Say hi");
        then.status(200).body(reasoning_then_text());
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;

    let completion: Value = reqwest::Client::new()
        .post(format!("{}/v1/completions", gateway))
        .json(&json!({"model": "gpt-5", "prompt": "Say hi"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(completion["object"], "text_completion");
    assert_eq!(completion["choices"][0]["text"], "hi");
    assert_eq!(completion["usage"]["prompt_tokens"], 5);
}

#[tokio::test]
async fn test_responses_store_get_and_thread() {
    let home = TempDir::new().unwrap();
    write_fresh_auth(home.path());
    let server = MockServer::start();
    let first = server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH).body_includes("first question").body_excludes("second question");
        then.status(200).body(sse_body(&[
            json!({"type": "response.output_text.delta", "delta": "first answer"}),
            json!({"type": "response.completed", "response": {"id": "resp_abc"}}),
        ]));
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;
    let client = reqwest::Client::new();

    let response: Value = client
        .post(format!("{}/v1/responses", gateway))
        .json(&json!({"model": "gpt-5", "input": "first question", "stream": false, "store": true}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(response["id"], "resp_abc");
    assert_eq!(response["object"], "response");
    assert_eq!(response["output"][0]["content"][0]["text"], "first answer");
    first.assert_calls(1);

    let stored = client.get(format!("{}/v1/responses/resp_abc", gateway)).send().await.unwrap();
    assert_eq!(stored.status(), 200);
    assert_eq!(stored.json::<Value>().await.unwrap(), response);

    let missing = client.get(format!("{}/v1/responses/resp_missing", gateway)).send().await.unwrap();
    assert_eq!(missing.status(), 404);

    // The follow-up carries the earlier turns from the local thread
    let follow_up = server.mock(|when, then| {
        when.method(POST)
            .path(BACKEND_PATH)
            .body_includes("second question")
            .body_includes("first answer");
        then.status(200).body(sse_body(&[
            json!({"type": "response.output_text.delta", "delta": "second answer"}),
            json!({"type": "response.completed", "response": {"id": "resp_def"}}),
        ]));
    });
    let response = client
        .post(format!("{}/v1/responses", gateway))
        .json(&json!({"input": "second question", "stream": false, "previous_response_id": "resp_abc"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    follow_up.assert_calls(1);

    // store was not requested for the follow-up
    let not_stored = client.get(format!("{}/v1/responses/resp_def", gateway)).send().await.unwrap();
    assert_eq!(not_stored.status(), 404);
}

#[tokio::test]
async fn test_responses_stream_is_passed_through() {
    let home = TempDir::new().unwrap();
    write_fresh_auth(home.path());
    let server = MockServer::start();
    let backend_body = reasoning_then_text();
    server.mock(|when, then| {
        when.method(POST).path(BACKEND_PATH);
        then.status(200).header("content-type", "text/event-stream").body(backend_body.clone());
    });
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;

    let response = reqwest::Client::new()
        .post(format!("{}/v1/responses", gateway))
        .json(&json!({"model": "gpt-5", "input": [{"type": "input_text", "text": "hi"}]}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    assert_eq!(response.text().await.unwrap(), backend_body);
}

#[tokio::test]
async fn test_cors_preflight_mirrors_origin() {
    let home = TempDir::new().unwrap();
    let server = MockServer::start();
    let gateway = spawn_gateway(test_config(home.path(), &server)).await;

    let response = reqwest::Client::new()
        .request(reqwest::Method::OPTIONS, format!("{}/v1/chat/completions", gateway))
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "authorization,content-type")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_success());
    assert_eq!(response.headers()["access-control-allow-origin"], "http://localhost:3000");
    assert_eq!(response.headers()["access-control-max-age"], "86400");
}
