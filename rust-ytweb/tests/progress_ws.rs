mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use common::{app_state, eventually, request, wait_for_status};
use rust_ytweb::api::{ApiServer, AppState};
use rust_ytweb::domain::JobStatus;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serve the full router on an ephemeral port.
async fn serve(state: AppState) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = ApiServer::new(state).build_router();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr) -> Socket {
    let (socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, action: &str, job_id: &str) {
    let text = json!({ "action": action, "jobId": job_id }).to_string();
    socket.send(Message::text(text)).await.unwrap();
}

/// Next pushed job snapshot, or `None` if nothing arrives in `wait`.
async fn next_job(socket: &mut Socket, wait: Duration) -> Option<Value> {
    timeout(wait, async {
        while let Some(Ok(msg)) = socket.next().await {
            if let Message::Text(text) = msg {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(value["event"], "progress");
                return Some(value["job"].clone());
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

const RECV: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(300);

#[tokio::test]
async fn test_join_sends_current_snapshot_then_updates() {
    let temp = tempfile::tempdir().unwrap();
    let state = app_state(temp.path(), 3).await;
    let addr = serve(state.clone()).await;

    let job = state
        .scheduler
        .submit(request("127.0.0.1", "hang"))
        .await
        .unwrap();
    wait_for_status(&state.scheduler, &job.id, JobStatus::Running).await;

    let mut socket = connect(addr).await;
    send(&mut socket, "join", &job.id).await;

    let current = next_job(&mut socket, RECV).await.unwrap();
    assert_eq!(current["id"], job.id.as_str());
    assert_eq!(current["status"], "running");

    state.scheduler.cancel(&job.id).await.unwrap();

    let update = next_job(&mut socket, RECV).await.unwrap();
    assert_eq!(update["id"], job.id.as_str());
    assert_eq!(update["status"], "canceled");
    assert_eq!(update["error"], "Canceled by user");
}

#[tokio::test]
async fn test_duplicate_join_and_leave() {
    let temp = tempfile::tempdir().unwrap();
    let state = app_state(temp.path(), 3).await;
    let addr = serve(state.clone()).await;

    let first = state
        .scheduler
        .submit(request("127.0.0.1", "hang"))
        .await
        .unwrap();
    let second = state
        .scheduler
        .submit(request("127.0.0.2", "hang"))
        .await
        .unwrap();

    let mut socket = connect(addr).await;
    send(&mut socket, "join", &first.id).await;
    send(&mut socket, "join", &first.id).await;
    send(&mut socket, "join", &second.id).await;

    // A repeated join neither resends the snapshot nor subscribes twice.
    let current = next_job(&mut socket, RECV).await.unwrap();
    assert_eq!(current["id"], first.id.as_str());
    let current = next_job(&mut socket, RECV).await.unwrap();
    assert_eq!(current["id"], second.id.as_str());
    assert_eq!(state.hub.subscriber_count(&first.id), 1);

    state.scheduler.cancel(&first.id).await.unwrap();
    let update = next_job(&mut socket, RECV).await.unwrap();
    assert_eq!(update["id"], first.id.as_str());
    assert_eq!(update["status"], "canceled");
    assert!(next_job(&mut socket, QUIET).await.is_none());

    send(&mut socket, "leave", &second.id).await;
    eventually(|| {
        let hub = state.hub.clone();
        let job_id = second.id.clone();
        async move { hub.subscriber_count(&job_id) == 0 }
    })
    .await;

    state.scheduler.cancel(&second.id).await.unwrap();
    assert_eq!(
        state.scheduler.get(&second.id).await.unwrap().unwrap().status,
        JobStatus::Canceled
    );
    assert!(next_job(&mut socket, QUIET).await.is_none());
}

#[tokio::test]
async fn test_unknown_messages_are_ignored() {
    let temp = tempfile::tempdir().unwrap();
    let state = app_state(temp.path(), 3).await;
    let addr = serve(state.clone()).await;

    let job = state
        .scheduler
        .submit(request("127.0.0.1", "hang"))
        .await
        .unwrap();

    let mut socket = connect(addr).await;
    socket.send(Message::text("not json".to_string())).await.unwrap();
    send(&mut socket, "join", &job.id).await;

    let current = next_job(&mut socket, RECV).await.unwrap();
    assert_eq!(current["id"], job.id.as_str());

    state.scheduler.cancel(&job.id).await.unwrap();
}
