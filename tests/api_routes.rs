//! HTTP surface tests against a server bound on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;

use archforge::api::{serve_with_shutdown, ApiState};
use archforge::config::AppConfig;
use archforge::error::ProviderError;
use archforge::llm::{Completion, ProviderGateway, ProviderKind, ProviderRequest, TextProvider};
use archforge::storage::Database;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::oneshot;

const ORIGIN: &str = "https://app.example";
const INTERNAL_KEY: &str = "internal-secret";

struct EchoProvider(ProviderKind);

#[async_trait]
impl TextProvider for EchoProvider {
    fn kind(&self) -> ProviderKind {
        self.0
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<Completion, ProviderError> {
        Ok(Completion {
            text: format!("{{\"echo\": {:?}}}", request.input.len()),
            raw: json!({"provider": self.0.as_str()}),
            provider: self.0,
            model: request.model,
        })
    }
}

struct TestServer {
    addr: SocketAddr,
    client: Client,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        let config = AppConfig::default()
            .with_cors_origins(vec![ORIGIN.to_string(), "https://admin.example".to_string()])
            .with_internal_key(INTERNAL_KEY)
            .with_api_token("tok-alice", "alice")
            .with_api_token("tok-bob", "bob");

        let mut gateway = ProviderGateway::new();
        for kind in ProviderKind::ALL {
            gateway = gateway.with_provider(Arc::new(EchoProvider(kind)));
        }

        let db = Database::in_memory().await.unwrap();
        let state = ApiState::new(&config, &db, gateway);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(serve_with_shutdown(listener, state, async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            client: Client::new(),
            _shutdown: tx,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn post(&self, path: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut request = self.client.post(self.url(path)).json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn dispatch(&self, key: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.url("/jobs/dispatch"))
            .header("x-internal-key", key)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn enqueue(&self, token: &str, body: Value) -> String {
        let (status, body) = self.post("/jobs", Some(token), body).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["job_id"].as_str().unwrap().to_string()
    }
}

fn header<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn test_cors_headers_on_every_response() {
    let server = TestServer::start().await;

    let response = server
        .client
        .get(server.url("/health"))
        .header("Origin", "https://admin.example")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header(&response, "access-control-allow-origin"),
        Some("https://admin.example")
    );
    assert_eq!(header(&response, "vary"), Some("Origin"));

    // Unlisted origins get the first configured origin, errors included.
    let response = server
        .client
        .post(server.url("/jobs"))
        .header("Origin", "https://evil.example")
        .json(&json!({"tool": "gpt-query", "params": {}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(header(&response, "access-control-allow-origin"), Some(ORIGIN));

    let response = server
        .client
        .request(Method::OPTIONS, server.url("/jobs"))
        .header("Origin", ORIGIN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "access-control-allow-origin"), Some(ORIGIN));
    assert_eq!(
        header(&response, "access-control-allow-methods"),
        Some("GET, POST, OPTIONS")
    );
    assert!(header(&response, "access-control-allow-headers")
        .unwrap()
        .contains("x-internal-key"));
}

#[tokio::test]
async fn test_enqueue_requires_identity_and_validates() {
    let server = TestServer::start().await;
    let job = json!({"tool": "gpt-query", "params": {"input": "hi"}, "priority": 200});

    let (status, _) = server.post("/jobs", None, job.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = server.post("/jobs", Some("forged"), job.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = server.post("/jobs", Some("tok-alice"), job).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["tool"], "gpt-query");
    assert_eq!(body["status"], "queued");
    assert_eq!(body["priority"], 100);
    assert!(body["created_at"].is_string());

    let (status, body) = server
        .post("/jobs", Some("tok-alice"), json!({"tool": "shell", "params": {}}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("shell"));

    let (status, _) = server
        .post("/jobs", Some("tok-alice"), json!({"tool": "gpt-query", "params": null}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .post(
            "/jobs",
            Some("tok-alice"),
            json!({"tool": "gpt-query", "params": {}, "model": "gpt-4"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_execute_and_status_are_owner_only() {
    let server = TestServer::start().await;
    let job_id = server
        .enqueue("tok-alice", json!({"tool": "claude-query", "params": {"input": "hello"}}))
        .await;

    let (status, _) = server.get(&format!("/jobs/{job_id}"), Some("tok-bob")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = server
        .post("/jobs/execute", Some("tok-bob"), json!({"job_id": job_id}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = server
        .post("/jobs/execute", Some("tok-alice"), json!({"job_id": job_id}))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "completed");
    assert_eq!(body["attempts"], 1);
    assert_eq!(body["result"]["provider"], "anthropic");
    assert_eq!(body["result"]["model"], "Claude-4.5-Sonnet");

    let (status, body) = server
        .post("/jobs/execute", Some("tok-alice"), json!({"job_id": job_id}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Job is already completed");

    let (status, body) = server.get(&format!("/jobs/{job_id}"), Some("tok-alice")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], job_id.as_str());
    assert_eq!(body["status"], "completed");
    assert!(body["execution_ms"].is_number());

    let (status, _) = server
        .get("/jobs/00000000-0000-0000-0000-000000000000", Some("tok-alice"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dispatch_requires_internal_key() {
    let server = TestServer::start().await;

    let (status, _) = server.post("/jobs/dispatch", None, json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = server.dispatch("wrong-key").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = server.dispatch(INTERNAL_KEY).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "No jobs to process");
    assert_eq!(body["healed"], 0);

    let job_id = server
        .enqueue("tok-bob", json!({"tool": "gemini-query", "params": {"input": "draw"}}))
        .await;
    let (status, body) = server.dispatch(INTERNAL_KEY).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Job processed");
    assert_eq!(body["job_id"], job_id.as_str());
    assert_eq!(body["status"], "completed");
}

#[tokio::test]
async fn test_runs_round_trip() {
    let server = TestServer::start().await;

    let (status, body) = server.post("/runs", None, json!({"vision": "  "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "vision required");

    let (status, _) = server
        .post("/runs", None, json!({"vision": "x", "default_model": "gpt-2"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .post(
            "/runs",
            None,
            json!({"vision": "Build a todo app", "project_name": "todo"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "succeeded");
    let run_id = body["run_id"].as_str().unwrap().to_string();

    let (status, body) = server.get(&format!("/runs/{run_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["project_name"], "todo");
    let lanes = body["lanes"].as_array().unwrap();
    assert_eq!(lanes.len(), 5);
    assert_eq!(lanes[0]["lane"], "spec");
    assert!(lanes.iter().all(|l| !l["output"].is_null()));

    let (status, _) = server.get("/runs/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_direct_and_routed_calls() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post("/ai/dispatch", None, json!({"model": "gpt-4", "input": "hi"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("gpt-4"));

    let (status, _) = server
        .post("/ai/dispatch", None, json!({"model": "GPT-5"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .post("/ai/dispatch", None, json!({"model": "GPT-5", "input": "hi"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["provider"], "openai");
    assert_eq!(body["raw"]["provider"], "openai");

    let (status, body) = server
        .post(
            "/llm/route",
            None,
            json!({"messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "sketch a deployment diagram"}
            ]}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model"], "Gemini-2.5-Pro");
    assert_eq!(body["provider"], "google");

    let (status, _) = server.post("/llm/route", None, json!({"messages": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    archforge::metrics::init_metrics().unwrap();
    let server = TestServer::start().await;

    let response = server.client.get(server.url("/metrics")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
