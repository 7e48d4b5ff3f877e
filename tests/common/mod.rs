use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use streamchat::config::SessionConfig;
use streamchat::session::ChatSession;
use streamchat::storage::SqliteStorage;
use streamchat::stream::http::HttpChatTransport;

#[allow(dead_code)]
pub fn create_temp_storage() -> (SqliteStorage, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("chat.db");
    let storage =
        SqliteStorage::new_with_path(db_path).expect("failed to create sqlite storage with path");
    (storage, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// One `data:` line carrying `content` as the delta fragment.
#[allow(dead_code)]
pub fn delta_line(content: &str) -> String {
    let payload = serde_json::json!({ "choices": [{ "delta": { "content": content } }] });
    format!("data: {}\n", payload)
}

/// Event-stream body of `fragments` followed by the termination marker.
#[allow(dead_code)]
pub fn sse_body(fragments: &[&str]) -> String {
    let mut body: String = fragments.iter().map(|f| delta_line(f)).collect();
    body.push_str("data: [DONE]\n");
    body
}

/// Mount a streaming 200 response with `body` on every POST.
#[allow(dead_code)]
pub async fn mount_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.into_bytes(), "text/event-stream"))
        .mount(server)
        .await;
}

#[allow(dead_code)]
pub fn transport_for(server: &MockServer) -> HttpChatTransport {
    HttpChatTransport::new(
        url::Url::parse(&format!("{}/functions/v1/chat", server.uri())).expect("valid url"),
        None,
        Duration::from_secs(5),
    )
    .expect("transport")
}

/// Session over a temp SQLite store and its own insert feed.
#[allow(dead_code)]
pub fn sqlite_session(server: &MockServer) -> (ChatSession, Arc<SqliteStorage>, TempDir) {
    let (storage, dir) = create_temp_storage();
    let storage = Arc::new(storage);
    let feed = Arc::new(storage.feed());
    let session = ChatSession::new(
        storage.clone(),
        Arc::new(transport_for(server)),
        feed,
        SessionConfig::default(),
    );
    (session, storage, dir)
}
