mod common;

use std::net::SocketAddr;

use axum::Router;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{app_state, wait_for_status};
use rust_ytweb::api::{ApiServer, AppState};
use rust_ytweb::domain::JobStatus;

const LOCAL: &str = "127.0.0.1:50000";
const REMOTE: &str = "203.0.113.7:50000";

struct TestApp {
    state: AppState,
    _temp: tempfile::TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        Self {
            state: app_state(temp.path(), 2).await,
            _temp: temp,
        }
    }

    fn router(&self, peer: &str) -> Router {
        let addr: SocketAddr = peer.parse().unwrap();
        ApiServer::new(self.state.clone())
            .build_router()
            .layer(MockConnectInfo(addr))
    }

    async fn call(
        &self,
        peer: &str,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, _, bytes) = self.raw(peer, method, uri, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn raw(
        &self,
        peer: &str,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router(peer)
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, bytes.to_vec())
    }

    async fn submit(&self, peer: &str, behavior: &str) -> (StatusCode, Value) {
        self.call(
            peer,
            Method::POST,
            "/api/download",
            Some(json!({
                "url": format!("https://media.example.com/watch/{behavior}"),
                "preset": "best",
                "options": { "outputTemplate": "%(title)s.%(ext)s", "parallelFragments": 4 }
            })),
        )
        .await
    }
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new().await;
    let (status, body) = app.call(REMOTE, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "ok": true, "ytDlpVersion": "2024.08.06", "ffmpeg": false })
    );
}

#[tokio::test]
async fn test_submit_validation() {
    let app = TestApp::new().await;

    let (status, body) = app
        .call(
            REMOTE,
            Method::POST,
            "/api/download",
            Some(json!({ "url": "ftp://example.com/file", "preset": "best" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("http"));

    let (status, body) = app
        .call(
            REMOTE,
            Method::POST,
            "/api/download",
            Some(json!({ "url": "https://example.com", "preset": "everything" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_submit_track_and_download() {
    let app = TestApp::new().await;

    let (status, body) = app.submit(REMOTE, "complete").await;
    assert_eq!(status, StatusCode::OK);
    let job_id = body["jobId"].as_str().unwrap().to_string();

    wait_for_status(&app.state.scheduler, &job_id, JobStatus::Completed).await;

    let (status, job) = app
        .call(REMOTE, Method::GET, &format!("/api/jobs/{job_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "completed");
    assert_eq!(job["options"]["parallelFragments"], 4);
    assert!(job.get("clientId").is_none());

    let (_, listed) = app.call(REMOTE, Method::GET, "/api/jobs", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    let (_, others) = app.call(LOCAL, Method::GET, "/api/jobs", None).await;
    assert!(others.as_array().unwrap().is_empty());

    let (status, link) = app
        .call(REMOTE, Method::GET, &format!("/api/jobs/{job_id}/download"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let url = link["url"].as_str().unwrap().to_string();
    assert!(url.starts_with(&format!("/dl/{job_id}?token=")));

    let (status, headers, bytes) = app.raw(REMOTE, Method::GET, &url, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bytes, b"media");
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"{job_id}.mp4\"")
    );
}

#[tokio::test]
async fn test_download_link_requires_completed_job() {
    let app = TestApp::new().await;

    let (_, body) = app.submit(REMOTE, "hang").await;
    let job_id = body["jobId"].as_str().unwrap().to_string();

    let (status, body) = app
        .call(REMOTE, Method::GET, &format!("/api/jobs/{job_id}/download"), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Job not ready" }));

    let (status, body) = app
        .call(REMOTE, Method::DELETE, &format!("/api/jobs/{job_id}"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));

    let (_, job) = app
        .call(REMOTE, Method::GET, &format!("/api/jobs/{job_id}"), None)
        .await;
    assert_eq!(job["status"], "canceled");
    assert_eq!(job["error"], "Canceled by user");
}

#[tokio::test]
async fn test_grant_redemption_failures() {
    let app = TestApp::new().await;

    let (status, body) = app
        .call(REMOTE, Method::GET, "/dl/missing?token=1.abc", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Not found" }));

    let (_, body) = app.submit(REMOTE, "complete").await;
    let job_id = body["jobId"].as_str().unwrap().to_string();
    wait_for_status(&app.state.scheduler, &job_id, JobStatus::Completed).await;

    for uri in [
        format!("/dl/{job_id}"),
        format!("/dl/{job_id}?token=garbage"),
        format!("/dl/{job_id}?token=99999999999999.AAAA"),
    ] {
        let (status, body) = app.call(REMOTE, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body, json!({ "error": "Invalid or expired token" }));
    }
}

#[tokio::test]
async fn test_unknown_job() {
    let app = TestApp::new().await;

    let (status, body) = app.call(REMOTE, Method::GET, "/api/jobs/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Not found" }));

    let (status, body) = app.call(REMOTE, Method::DELETE, "/api/jobs/nope", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
}

#[tokio::test]
async fn test_quota_is_enforced_per_client() {
    let app = TestApp::new().await;

    for _ in 0..2 {
        let (status, _) = app.submit(REMOTE, "hang").await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = app.submit(REMOTE, "hang").await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body["error"].as_str().unwrap().contains("limit 2"));

    let (status, _) = app.submit(LOCAL, "hang").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_settings_are_local_only() {
    let app = TestApp::new().await;

    let (status, body) = app
        .call(REMOTE, Method::GET, "/api/admin/settings", None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "Local access only" }));

    let (status, body) = app
        .call(LOCAL, Method::GET, "/api/admin/settings", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["maxConcurrency"], 3);
    assert_eq!(body["perClientLimit"], 2);
    assert_eq!(body["parallelFragmentsDefault"], 8);
    assert_eq!(body["binaries"]["ytDlpVersion"], "2024.08.06");
    assert!(body["diskUsage"].is_u64());

    let (status, _) = app
        .call("[::1]:50000", Method::GET, "/api/admin/settings", None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_log_filter() {
    let app = TestApp::new().await;

    let (status, body) = app
        .call(LOCAL, Method::GET, "/api/admin/logging", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["filter"].as_str().unwrap().contains("rust_ytweb=info"));

    let update = json!({ "filter": "rust_ytweb=debug" });
    let (status, _) = app
        .call(REMOTE, Method::PUT, "/api/admin/logging", Some(update.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.state.logging.get_filter().contains("rust_ytweb=info"));

    let (status, body) = app
        .call(LOCAL, Method::PUT, "/api/admin/logging", Some(update))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "filter": "rust_ytweb=debug" }));

    let (status, body) = app
        .call(
            LOCAL,
            Method::PUT,
            "/api/admin/logging",
            Some(json!({ "filter": "rust_ytweb=loud" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Invalid filter directive"));
    assert_eq!(app.state.logging.get_filter(), "rust_ytweb=debug");
}
