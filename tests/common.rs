//! Common test utilities and constants
//!
//! Shared backend doubles and client setup used across all test modules.

use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zentao::prelude::*;

#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Root path the mock backend is served under.
#[allow(dead_code)]
pub const ROOT: &str = "/zentao";

/// What the backend sends instead of an envelope once a session has expired.
#[allow(dead_code)]
pub const EXPIRED_BODY: &str = "<html><meta charset='utf-8'/><script>self.location='/zentao/user-login-L3plbnRhby8=.html';</script></html>";

#[allow(dead_code)]
pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
#[allow(dead_code)]
pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];
#[allow(dead_code)]
pub const GIF: &[u8] = b"GIF89a\x01\x00\x01\x00";

/// Installs a test subscriber once; `RUST_LOG=zentao=debug` shows events.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `{"status":"success","data":"<data as a JSON string>"}`
#[allow(dead_code)]
pub fn envelope(data: Value) -> ResponseTemplate {
    let body = json!({"status": "success", "data": data.to_string()});
    ResponseTemplate::new(200).set_body_string(body.to_string())
}

#[allow(dead_code)]
pub fn expired() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(EXPIRED_BODY)
}

#[allow(dead_code)]
pub fn endpoint_path(relative: &str) -> String {
    format!("{}/{}", ROOT, relative)
}

/// Mounts the login flow. Each login issues the next id from `session_ids`;
/// the last one is reused once the others are spent.
#[allow(dead_code)]
pub async fn mount_login(server: &MockServer, session_ids: &[&str]) {
    for (index, id) in session_ids.iter().enumerate() {
        let mock = Mock::given(method("GET"))
            .and(path(endpoint_path("api-getSessionID.json")))
            .respond_with(envelope(json!({
                "title": "",
                "sessionName": "zentaosid",
                "sessionID": id,
                "rand": 4821
            })));
        let mock = if index + 1 < session_ids.len() {
            mock.up_to_n_times(1)
        } else {
            mock
        };
        mock.mount(server).await;
    }

    Mock::given(method("POST"))
        .and(path(endpoint_path("user-login.json")))
        .and(body_string_contains("account=alice"))
        .and(body_string_contains("password=secret"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"status":"success","user":{"account":"alice"}}"#),
        )
        .mount(server)
        .await;
}

#[allow(dead_code)]
pub fn config_builder(server: &MockServer) -> zentao::config::ClientConfigBuilder {
    let mut builder = ClientConfig::builder();
    builder
        .base_url(format!("{}{}", server.uri(), ROOT))
        .account("alice")
        .password("secret")
        .max_transport_retries(0u32);
    builder
}

#[allow(dead_code)]
pub fn client(server: &MockServer) -> Zentao {
    init_tracing();
    let config = config_builder(server).build().unwrap();
    Zentao::new(config).unwrap()
}

/// Minimal bug records with descending ids `first, first-1, ...`.
#[allow(dead_code)]
pub fn bug_records(first: u64, count: u64) -> Vec<Value> {
    (0..count)
        .map(|offset| {
            let id = first - offset;
            json!({
                "id": id.to_string(),
                "product": "1",
                "module": "0",
                "title": format!("Bug {}", id),
                "severity": "3",
                "pri": "3",
                "status": if id % 2 == 0 { "active" } else { "resolved" },
                "openedDate": "2024-05-01 10:00:00"
            })
        })
        .collect()
}

#[allow(dead_code)]
pub fn pager(total: u64, per_page: u64, page: u64) -> Value {
    json!({"recTotal": total, "recPerPage": per_page, "pageID": page})
}
