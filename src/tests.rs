//! End-to-end tests through the router with an in-memory store and a
//! wiremock stand-in for the processing engine.

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
    body::{Body, Bytes},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

use crate::{
    app::build_app, auth::repo::memory::MemoryUserStore, config::DEFAULT_UPLOAD_MAX_BYTES,
    state::AppState,
};

const BOUNDARY: &str = "readaloud-test-boundary";

struct Harness {
    app: Router,
    store: Arc<MemoryUserStore>,
    upload_dir: PathBuf,
    _tmp: TempDir,
}

impl Harness {
    async fn new(processing_url: String) -> Self {
        Self::with_timeout(processing_url, Duration::from_secs(5)).await
    }

    async fn with_timeout(processing_url: String, timeout: Duration) -> Self {
        let tmp = TempDir::new().unwrap();
        let upload_dir = tmp.path().join("uploads");
        let store = Arc::new(MemoryUserStore::default());
        let state = AppState::fake(store.clone(), processing_url, &upload_dir, timeout).await;
        Self {
            app: build_app(state),
            store,
            upload_dir,
            _tmp: tmp,
        }
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, Option<String>, Bytes) {
        let res = self.app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let content_type = res
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, content_type, body)
    }

    async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Bytes) {
        let req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let (status, _, body) = self.send(req).await;
        (status, body)
    }

    async fn signup(&self, email: &str, password: &str) -> String {
        let (status, body) = self
            .post_json(
                "/api/signup",
                json!({ "username": "reader", "email": email, "password": password }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
        token_of(&body)
    }

    async fn login(&self, email: &str, password: &str) -> (StatusCode, Bytes) {
        self.post_json("/api/login", json!({ "email": email, "password": password }))
            .await
    }

    async fn me(&self, token: &str) -> StatusCode {
        let req = Request::get("/api/me")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        self.send(req).await.0
    }

    fn upload_dir_is_empty(&self) -> bool {
        std::fs::read_dir(&self.upload_dir).unwrap().next().is_none()
    }
}

fn token_of(body: &[u8]) -> String {
    let v: Value = serde_json::from_slice(body).unwrap();
    v["token"].as_str().unwrap().to_string()
}

fn error_of(body: &[u8]) -> String {
    let v: Value = serde_json::from_slice(body).unwrap();
    v["error"].as_str().unwrap().to_string()
}

fn image_part(content_type: &str, data: &[u8]) -> Vec<u8> {
    let mut part = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"page.png\"\r\nContent-Type: {content_type}\r\n\r\n"
    )
    .into_bytes();
    part.extend_from_slice(data);
    part.extend_from_slice(b"\r\n");
    part
}

fn text_part(name: &str, value: &str) -> Vec<u8> {
    format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
        .into_bytes()
}

fn process_request(token: Option<&str>, parts: Vec<Vec<u8>>) -> Request<Body> {
    let mut body: Vec<u8> = parts.concat();
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    let mut req = Request::post("/api/process-image").header(
        header::CONTENT_TYPE,
        format!("multipart/form-data; boundary={BOUNDARY}"),
    );
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    req.body(Body::from(body)).unwrap()
}

async fn audio_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "audio/mpeg")
                .set_body_bytes(b"ID3-speech".to_vec()),
        )
        .mount(&server)
        .await;
    server
}

// ---- credentials ----

#[tokio::test]
async fn signup_then_login_yields_working_token() {
    let h = Harness::new("http://127.0.0.1:1".into()).await;
    let signup_token = h.signup("Reader@Example.com", "hunter22").await;
    assert_eq!(h.me(&signup_token).await, StatusCode::OK);

    let (status, body) = h.login("reader@example.com", "hunter22").await;
    assert_eq!(status, StatusCode::OK);
    let token = token_of(&body);
    assert_eq!(h.me(&token).await, StatusCode::OK);
}

#[tokio::test]
async fn relogin_revokes_previous_token() {
    let h = Harness::new("http://127.0.0.1:1".into()).await;
    h.signup("a@example.com", "secret1").await;

    let (_, body) = h.login("a@example.com", "secret1").await;
    let token_a = token_of(&body);
    assert_eq!(h.me(&token_a).await, StatusCode::OK);

    let (_, body) = h.login("a@example.com", "secret1").await;
    let token_b = token_of(&body);

    assert_eq!(h.me(&token_a).await, StatusCode::UNAUTHORIZED);
    assert_eq!(h.me(&token_b).await, StatusCode::OK);
}

#[tokio::test]
async fn short_password_is_400_whatever_else_is_sent() {
    let h = Harness::new("http://127.0.0.1:1".into()).await;
    for body in [
        json!({ "username": "reader", "email": "a@example.com", "password": "12345" }),
        json!({ "email": "not-an-email", "password": "abc" }),
        json!({ "password": "" }),
        json!({}),
    ] {
        let (status, _) = h.post_json("/api/signup", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
    assert_eq!(h.store.len().await, 0);
}

#[tokio::test]
async fn missing_fields_and_bad_json_are_400() {
    let h = Harness::new("http://127.0.0.1:1".into()).await;
    let (status, body) = h
        .post_json("/api/signup", json!({ "email": "a@example.com", "password": "longenough" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "Username, email and password are required");

    let req = Request::post("/api/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = h.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "Invalid JSON body");

    let (status, _) = h.post_json("/api/login", json!({ "email": "a@example.com" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_email_is_400_and_creates_nothing() {
    let h = Harness::new("http://127.0.0.1:1".into()).await;
    h.signup("dup@example.com", "secret1").await;
    let (status, body) = h
        .post_json(
            "/api/signup",
            json!({ "username": "other", "email": " DUP@example.com ", "password": "secret2" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "Email already registered");
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn password_is_matched_exactly_as_signed_up() {
    let h = Harness::new("http://127.0.0.1:1".into()).await;
    h.signup("spaces@example.com", "       ").await;
    h.signup("padded@example.com", " secret ").await;

    let (status, body) = h.login("spaces@example.com", "       ").await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    assert_eq!(h.me(&token_of(&body)).await, StatusCode::OK);

    let (status, _) = h.login("padded@example.com", " secret ").await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = h.login("padded@example.com", "secret").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_of(&body), "Invalid credentials");

    let (status, body) = h.login("spaces@example.com", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "Email and password are required");
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let h = Harness::new("http://127.0.0.1:1".into()).await;
    h.signup("known@example.com", "secret1").await;

    let (wrong_pw_status, wrong_pw_body) = h.login("known@example.com", "nope-nope").await;
    let (unknown_status, unknown_body) = h.login("unknown@example.com", "secret1").await;

    assert_eq!(wrong_pw_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_pw_body, unknown_body);
}

#[tokio::test]
async fn logout_revokes_current_token() {
    let h = Harness::new("http://127.0.0.1:1".into()).await;
    let token = h.signup("out@example.com", "secret1").await;

    let req = Request::post("/api/logout")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = h.send(req).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(h.me(&token).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn store_outage_during_auth_is_500() {
    let h = Harness::new("http://127.0.0.1:1".into()).await;
    let token = h.signup("ops@example.com", "secret1").await;
    h.store.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    assert_eq!(h.me(&token).await, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn health_is_public() {
    let h = Harness::new("http://127.0.0.1:1".into()).await;
    let (status, _, body) = h
        .send(Request::get("/api/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

// ---- process-image ----

#[tokio::test]
async fn process_image_returns_downstream_audio() {
    let server = audio_server().await;
    let h = Harness::new(format!("{}/process", server.uri())).await;
    let token = h.signup("img@example.com", "secret1").await;

    let req = process_request(
        Some(&token),
        vec![image_part("image/png", b"\x89PNG-data"), text_part("tts_lang", "en")],
    );
    let (status, content_type, body) = h.send(req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("audio/mpeg"));
    assert_eq!(&body[..], b"ID3-speech");
    assert!(h.upload_dir_is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn process_image_requires_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let h = Harness::new(server.uri()).await;

    let (status, _, body) = h
        .send(process_request(None, vec![image_part("image/png", b"x")]))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_of(&body), "Authorization header missing");

    let (status, _, _) = h
        .send(process_request(Some("garbage"), vec![image_part("image/png", b"x")]))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn oversized_upload_never_reaches_downstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let h = Harness::new(server.uri()).await;
    let token = h.signup("big@example.com", "secret1").await;

    let data = vec![0u8; DEFAULT_UPLOAD_MAX_BYTES + 1];
    let (status, _, body) = h
        .send(process_request(Some(&token), vec![image_part("image/png", &data)]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "File too large");
    assert!(h.upload_dir_is_empty());
}

#[tokio::test]
async fn upload_at_exact_limit_is_relayed() {
    let server = audio_server().await;
    let h = Harness::new(server.uri()).await;
    let token = h.signup("edge@example.com", "secret1").await;

    let data = vec![7u8; DEFAULT_UPLOAD_MAX_BYTES];
    let (status, content_type, body) = h
        .send(process_request(Some(&token), vec![image_part("image/png", &data)]))
        .await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    assert_eq!(content_type.as_deref(), Some("audio/mpeg"));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert!(h.upload_dir_is_empty());
}

#[tokio::test]
async fn non_image_upload_never_reaches_downstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let h = Harness::new(server.uri()).await;
    let token = h.signup("pdf@example.com", "secret1").await;

    let (status, _, body) = h
        .send(process_request(
            Some(&token),
            vec![image_part("application/pdf", b"%PDF-1.7")],
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "Only image files are allowed");
    assert!(h.upload_dir_is_empty());
}

#[tokio::test]
async fn missing_file_is_400() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let h = Harness::new(server.uri()).await;
    let token = h.signup("nofile@example.com", "secret1").await;

    let (status, _, body) = h
        .send(process_request(Some(&token), vec![text_part("ocr_lang", "eng")]))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_of(&body), "No file uploaded");

    let req = Request::post("/api/process-image")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let (status, _, _) = h.send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn downstream_json_error_is_forwarded_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(422).set_body_raw(r#"{"error":"bad image"}"#, "application/json"),
        )
        .mount(&server)
        .await;
    let h = Harness::new(server.uri()).await;
    let token = h.signup("bad@example.com", "secret1").await;

    let (status, content_type, body) = h
        .send(process_request(Some(&token), vec![image_part("image/jpeg", b"jpeg")]))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(&body[..], br#"{"error":"bad image"}"#);
    assert!(h.upload_dir_is_empty());
}

#[tokio::test]
async fn downstream_plain_500_is_processing_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Traceback (most recent call last)"))
        .mount(&server)
        .await;
    let h = Harness::new(server.uri()).await;
    let token = h.signup("fail@example.com", "secret1").await;

    let (status, _, body) = h
        .send(process_request(Some(&token), vec![image_part("image/png", b"x")]))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], br#"{"error":"Processing failed"}"#);
    assert!(h.upload_dir_is_empty());
}

#[tokio::test]
async fn downstream_timeout_is_processing_failed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;
    let h = Harness::with_timeout(server.uri(), Duration::from_millis(200)).await;
    let token = h.signup("slow@example.com", "secret1").await;

    let (status, _, body) = h
        .send(process_request(Some(&token), vec![image_part("image/png", b"x")]))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_of(&body), "Processing failed");
    assert!(h.upload_dir_is_empty());
}

#[tokio::test]
async fn connection_refused_is_processing_failed() {
    let h = Harness::new("http://127.0.0.1:1/process".into()).await;
    let token = h.signup("down@example.com", "secret1").await;

    let (status, _, body) = h
        .send(process_request(Some(&token), vec![image_part("image/png", b"x")]))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(&body[..], br#"{"error":"Processing failed"}"#);
    assert!(h.upload_dir_is_empty());
}
