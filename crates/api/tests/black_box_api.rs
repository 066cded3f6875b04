use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};

use songforge_api::app::{self, services::AppServices};
use songforge_api::config::AppConfig;
use songforge_core::UserId;
use songforge_credits::CreditTier;
use songforge_infra::{IntakeConfig, Providers, Stores, WorkerConfig, in_memory_status_bus};
use songforge_providers::{CompletionMode, PollPolicy, ScriptedProvider};

const CALLBACK_URL: &str = "https://songs.example.com/callbacks/provider";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Serve `application` (same router as prod) on an ephemeral port.
    async fn spawn(application: app::Application) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let router = application.router;
        let worker = application.worker;
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
            worker.shutdown().await;
        });

        Self { base_url, handle }
    }

    async fn from_env(pairs: &[(&str, &str)]) -> Self {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        let config = AppConfig::from_lookup(|key| vars.get(key).cloned());
        let application = app::build_app(&config).await.expect("failed to build app");
        Self::spawn(application).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Server whose music provider only ever reports pending, so songs finish by callback.
async fn callback_server(correlation_id: &str) -> TestServer {
    let provider = Arc::new(
        ScriptedProvider::new()
            .with_mode(CompletionMode::Callback)
            .with_correlation_id(correlation_id),
    );
    let services = AppServices::new(
        Stores::in_memory(CreditTier::FreeWeekly { allowance: 1 }),
        Providers::new(provider.clone(), provider),
        in_memory_status_bus(),
        IntakeConfig {
            submit_on_enqueue: true,
            callback_url: Some(CALLBACK_URL.to_string()),
        },
    );
    let worker = WorkerConfig::default()
        .with_idle_interval(Duration::from_millis(10))
        .with_poll(PollPolicy::fixed(10_000, Duration::from_millis(20)))
        .with_callback_url(Some(CALLBACK_URL.to_string()));
    TestServer::spawn(app::assemble(services, worker)).await
}

async fn post_song(client: &reqwest::Client, server: &TestServer, user: UserId, prompt: &str) -> reqwest::Response {
    client
        .post(server.url("/generate/song"))
        .header("x-user-id", user.to_string())
        .json(&json!({ "prompt": prompt, "style": "indie folk" }))
        .send()
        .await
        .unwrap()
}

async fn job_eventually(
    client: &reqwest::Client,
    server: &TestServer,
    user: UserId,
    job_id: &str,
    status: &str,
) -> Value {
    // The worker runs in the background; poll until it catches up.
    for _ in 0..200 {
        let res = client
            .get(server.url(&format!("/jobs/{job_id}")))
            .header("x-user-id", user.to_string())
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        if body["status"] == status {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("job {job_id} did not reach {status} within timeout");
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::from_env(&[]).await;
    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn generation_requires_a_user() {
    let server = TestServer::from_env(&[]).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/generate/song"))
        .json(&json!({ "prompt": "a song about rain" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(server.url("/credits"))
        .header("x-user-id", "not-a-uuid")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn placeholder_song_completes_and_uses_the_weekly_allowance() {
    let server = TestServer::from_env(&[("WORKER_IDLE_INTERVAL_MS", "10"), ("FREE_WEEKLY_ALLOWANCE", "1")]).await;
    let client = reqwest::Client::new();
    let user = UserId::new();

    let res = post_song(&client, &server, user, "a song about rain").await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: Value = res.json().await.unwrap();
    let job_id = accepted["job_id"].as_str().unwrap().to_string();
    assert!(accepted["song_id"].is_string());

    let job = job_eventually(&client, &server, user, &job_id, "succeeded").await;
    assert_eq!(job["kind"], "song");
    assert!(job["result"].is_string());
    assert_eq!(job["song_id"], accepted["song_id"]);

    let credits: Value = client
        .get(server.url("/credits"))
        .header("x-user-id", user.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(credits["tier"], "free_weekly");
    assert_eq!(credits["weekly_usage_count"], 1);

    let res = post_song(&client, &server, user, "another song about rain").await;
    assert_eq!(res.status(), StatusCode::PAYMENT_REQUIRED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "insufficient_credits");

    let stats: Value = reqwest::get(server.url("/worker/stats")).await.unwrap().json().await.unwrap();
    assert_eq!(stats["worker"]["jobs_claimed"], 1);
    assert_eq!(stats["queue"]["succeeded"], 1);
}

#[tokio::test]
async fn admin_grant_tops_up_a_user() {
    let server = TestServer::from_env(&[("ADMIN_TOKEN", "let-me-in")]).await;
    let client = reqwest::Client::new();
    let user = UserId::new();

    let res = client
        .post(server.url("/credits/grant"))
        .header("x-admin-token", "wrong")
        .json(&json!({ "user_id": user, "amount": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(server.url("/credits/grant"))
        .header("x-admin-token", "let-me-in")
        .json(&json!({ "user_id": user, "amount": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(server.url("/credits/grant"))
        .header("x-admin-token", "let-me-in")
        .json(&json!({ "user_id": user, "amount": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let credits: Value = client
        .get(server.url("/credits"))
        .header("x-user-id", user.to_string())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(credits["tier"], "metered");
    assert_eq!(credits["credits_remaining"], 5);
}

#[tokio::test]
async fn callback_finalizes_a_pending_song_and_closes_the_stream() {
    let server = callback_server("task-42").await;
    let client = reqwest::Client::new();
    let user = UserId::new();

    // Connect the live stream first so no status event is missed.
    let mut stream = client.get(server.url("/stream/task-42")).send().await.unwrap();
    assert_eq!(stream.status(), StatusCode::OK);
    assert!(
        stream.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    let res = post_song(&client, &server, user, "a song about rain").await;
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let accepted: Value = res.json().await.unwrap();
    assert_eq!(accepted["correlation_id"], "task-42");
    let job_id = accepted["job_id"].as_str().unwrap().to_string();

    let callback = json!({
        "code": 200,
        "msg": "All generated successfully.",
        "data": {
            "callbackType": "complete",
            "task_id": "task-42",
            "data": [{ "id": "a1", "audio_url": "https://cdn.example.com/a1.mp3", "duration": 31.6 }]
        }
    });
    let res = client.post(server.url("/callbacks/provider")).json(&callback).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "code": 200, "msg": "ok" }));

    let mut received = String::new();
    loop {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.chunk())
            .await
            .expect("stream stalled")
            .unwrap();
        match chunk {
            Some(bytes) => received.push_str(&String::from_utf8_lossy(&bytes)),
            None => break,
        }
    }
    assert!(received.contains("data: "));
    assert!(received.contains("\"status\":\"complete\""));
    assert!(received.contains("https://cdn.example.com/a1.mp3"));

    let job = job_eventually(&client, &server, user, &job_id, "succeeded").await;
    assert_eq!(job["result"], "https://cdn.example.com/a1.mp3");
    assert_eq!(job["correlation_id"], "task-42");

    // Provider retries are harmless.
    let res = client.post(server.url("/callbacks/provider")).json(&callback).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn callback_status_codes() {
    let server = callback_server("task-7").await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url("/callbacks/provider"))
        .header("content-type", "application/json")
        .body("{oops")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["code"], 400);

    let res = client
        .post(server.url("/callbacks/provider"))
        .json(&json!({ "code": 200, "data": { "data": [] } }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client
        .post(server.url("/callbacks/provider"))
        .json(&json!({ "code": 200, "data": { "task_id": "unknown", "data": [] } }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn video_packaging_needs_an_owned_song() {
    let server = TestServer::from_env(&[]).await;
    let client = reqwest::Client::new();

    let res = client
        .post(server.url(&format!("/songs/{}/video", uuid::Uuid::now_v7())))
        .header("x-user-id", UserId::new().to_string())
        .json(&json!({ "correlation_id": "task-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(server.url("/songs/not-an-id/video"))
        .header("x-user-id", UserId::new().to_string())
        .json(&json!({ "correlation_id": "task-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
