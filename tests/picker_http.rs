use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use picker_frame::auth::Credential;
use picker_frame::error::PickerError;
use picker_frame::picker::{HttpPickerApi, PickerApi, PollPolicy, SessionClient, WaitOutcome};
use serde_json::json;
use tokio::net::TcpListener;

fn credential() -> Credential {
    Credential {
        access_token: "tok-123".to_string(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
        refresh_token: None,
        scopes: vec![],
    }
}

#[derive(Clone, Default)]
struct Remote {
    /// Status returned by every endpoint; `None` means 200.
    fail_with: Option<u16>,
    authorizations: Arc<Mutex<Vec<String>>>,
    polls: Arc<Mutex<u32>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

impl Remote {
    fn record(&self, headers: &HeaderMap) -> Option<Response> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        self.authorizations.lock().unwrap().push(auth);
        self.fail_with
            .map(|code| StatusCode::from_u16(code).unwrap().into_response())
    }
}

async fn create(State(remote): State<Remote>, headers: HeaderMap) -> Response {
    if let Some(failure) = remote.record(&headers) {
        return failure;
    }
    Json(json!({
        "id": "s1",
        "pickerUri": "https://pick/x",
        "expireTime": "2030-01-01T00:00:00Z"
    }))
    .into_response()
}

async fn poll(
    State(remote): State<Remote>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(failure) = remote.record(&headers) {
        return failure;
    }
    let polls = {
        let mut polls = remote.polls.lock().unwrap();
        *polls += 1;
        *polls
    };
    Json(json!({
        "id": id,
        "pickerUri": "https://pick/x",
        "mediaItemsSet": polls >= 3
    }))
    .into_response()
}

async fn media_items(
    State(remote): State<Remote>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Some(failure) = remote.record(&headers) {
        return failure;
    }
    remote.queries.lock().unwrap().push(query.clone());
    let page = match query.get("pageToken").map(String::as_str) {
        None => json!({
            "mediaItems": [{
                "id": "m1",
                "type": "PHOTO",
                "mediaFile": {
                    "baseUrl": "https://cdn/m1",
                    "mimeType": "image/jpeg",
                    "filename": "a.jpg",
                    "mediaFileMetadata": { "width": 4000, "height": 3000 }
                }
            }],
            "nextPageToken": "p2"
        }),
        Some(_) => json!({
            "mediaItems": [{
                "id": "m2",
                "mediaFile": { "baseUrl": "https://cdn/m2", "filename": "b.png" }
            }]
        }),
    };
    Json(page).into_response()
}

async fn serve(remote: Remote) -> String {
    let app = Router::new()
        .route("/v1/sessions", post(create))
        .route("/v1/sessions/{id}", get(poll))
        .route("/v1/mediaItems", get(media_items))
        .with_state(remote);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/v1/")
}

#[tokio::test]
async fn create_session_sends_bearer_and_parses_session() {
    let remote = Remote::default();
    let base = serve(remote.clone()).await;
    let api = HttpPickerApi::new(reqwest::Client::new(), base);

    let session = api.create_session(&credential()).await.unwrap();
    assert_eq!(session.id, "s1");
    assert_eq!(session.picker_uri, "https://pick/x");
    assert!(!session.media_items_set);
    assert_eq!(session.expire_time.as_deref(), Some("2030-01-01T00:00:00Z"));
    assert_eq!(
        remote.authorizations.lock().unwrap().as_slice(),
        ["Bearer tok-123"]
    );
}

#[tokio::test]
async fn non_success_statuses_map_to_stage_errors() {
    let remote = Remote {
        fail_with: Some(503),
        ..Remote::default()
    };
    let base = serve(remote).await;
    let api = HttpPickerApi::new(reqwest::Client::new(), base);
    let cred = credential();

    assert!(matches!(
        api.create_session(&cred).await,
        Err(PickerError::SessionCreate { status: 503 })
    ));
    assert!(matches!(
        api.get_session(&cred, "s1").await,
        Err(PickerError::Poll { status: 503, ref session_id }) if session_id == "s1"
    ));
    assert!(matches!(
        api.list_media_items(&cred, "s1", None).await,
        Err(PickerError::Fetch { status: 503, .. })
    ));
}

#[tokio::test]
async fn wait_then_fetch_follows_pages() {
    let remote = Remote::default();
    let base = serve(remote.clone()).await;
    let api = HttpPickerApi::new(reqwest::Client::new(), base);
    let client = SessionClient::new(
        api,
        PollPolicy {
            interval: std::time::Duration::from_millis(10),
            timeout: std::time::Duration::from_secs(5),
        },
    );
    let cred = credential();

    match client.wait_for_selection(&cred, "s1").await.unwrap() {
        WaitOutcome::Completed { session, polls } => {
            assert_eq!(polls, 3);
            assert!(session.media_items_set);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let items = client.fetch_selection(&cred, "s1").await.unwrap();
    let names: Vec<_> = items.iter().map(|i| i.filename.as_str()).collect();
    assert_eq!(names, ["a.jpg", "b.png"]);
    assert_eq!(items[0].base_url, "https://cdn/m1");
    assert_eq!(items[0].width, Some(4000));
    assert_eq!(items[1].mime_type, None);

    let queries = remote.queries.lock().unwrap();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].get("sessionId").map(String::as_str), Some("s1"));
    assert_eq!(queries[0].get("pageSize").map(String::as_str), Some("100"));
    assert_eq!(queries[1].get("pageToken").map(String::as_str), Some("p2"));
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let api = HttpPickerApi::new(reqwest::Client::new(), format!("http://{addr}/v1"));
    assert!(matches!(
        api.create_session(&credential()).await,
        Err(PickerError::Transport { .. })
    ));
}
