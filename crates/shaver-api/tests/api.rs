use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use shaver_api::{AppStateInner, router};
use shaver_db::Database;
use shaver_gateway::identity::JwtVerifier;
use shaver_gateway::registry::Registry;
use shaver_gateway::service::ChatService;

const SECRET: &str = "api-test-secret";

struct TestApp {
    router: Router,
    upload_dir: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.upload_dir);
    }
}

fn app() -> TestApp {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let upload_dir = std::env::temp_dir().join(format!("shaver-api-test-{}", Uuid::new_v4()));
    let state = Arc::new(AppStateInner {
        chat: ChatService::new(db, Registry::new(), Duration::from_secs(5)),
        jwt_secret: SECRET.to_string(),
        verifier: JwtVerifier::new(SECRET),
        token_ttl: chrono::Duration::hours(1),
        upload_dir: upload_dir.clone(),
        max_upload_bytes: 1024,
    });
    TestApp {
        router: router(state),
        upload_dir,
    }
}

impl TestApp {
    async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn raw(&self, method: Method, uri: &str, token: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(body))
            .unwrap();
        let res = self.router.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    /// Register and return (user_id, token).
    async fn register(&self, name: &str) -> (String, String) {
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({"username": name, "email": format!("{}@example.com", name), "password": "correct horse"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        (
            body["user_id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    /// Create a group and return (group_id, invite_code).
    async fn group(&self, token: &str, name: &str) -> (String, String) {
        let (status, body) = self
            .call(Method::POST, "/groups", Some(token), Some(json!({"name": name})))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        (
            body["id"].as_str().unwrap().to_string(),
            body["invite_code"].as_str().unwrap().to_string(),
        )
    }
}

#[tokio::test]
async fn register_then_login() {
    let app = app();
    let (user_id, _) = app.register("alice").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({"username": "alice", "password": "correct horse"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], user_id);
    assert!(body["token"].as_str().is_some());

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({"username": "alice", "password": "wrong password"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let token = body_token(&app, "alice").await;
    let (status, body) = app.call(Method::GET, "/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], user_id);
    assert_eq!(body["email"], "alice@example.com");
    assert!(body.get("password").is_none());
}

async fn body_token(app: &TestApp, name: &str) -> String {
    let (_, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({"username": name, "password": "correct horse"})),
        )
        .await;
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn duplicate_and_invalid_registrations_are_refused() {
    let app = app();
    app.register("alice").await;

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({"username": "alice", "email": "other@example.com", "password": "correct horse"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({"username": "bob", "email": "ALICE@example.com", "password": "correct horse"})),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({"username": "bob", "email": "bob@example.com", "password": "short"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn protected_routes_need_a_valid_token() {
    let app = app();
    let (status, body) = app.call(Method::GET, "/groups", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let (status, _) = app.call(Method::GET, "/groups", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn group_lifecycle_over_rest() {
    let app = app();
    let (_, admin) = app.register("admin").await;
    let (alice_id, alice) = app.register("alice").await;
    let (group_id, code) = app.group(&admin, "rustaceans").await;

    // Join with the invite code; a second attempt conflicts.
    let (status, body) = app
        .call(Method::POST, "/groups/join", Some(&alice), Some(json!({"code": code})))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["role"], "member");
    assert!(body["invite_code"].is_null());
    let (status, body) = app
        .call(Method::POST, "/groups/join", Some(&alice), Some(json!({"code": code})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_member");

    // Members cannot rotate; admins can, and the old code dies.
    let rotate = format!("/groups/{}/invite-code", group_id);
    let (status, _) = app.call(Method::POST, &rotate, Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = app.call(Method::POST, &rotate, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["invite_code"], code);

    // Promote alice; she now sees the invite code.
    let promote = format!("/groups/{}/acting-leaders/{}", group_id, alice_id);
    let (status, _) = app.call(Method::POST, &promote, Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = app
        .call(Method::GET, &format!("/groups/{}", group_id), Some(&alice), None)
        .await;
    assert_eq!(body["role"], "acting_leader");
    assert!(body["invite_code"].is_string());

    // Listing shows both members.
    let (status, body) = app
        .call(Method::GET, &format!("/groups/{}/members", group_id), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["members"].as_array().unwrap().len(), 2);

    // Remove alice; her next request is refused.
    let (status, _) = app
        .call(
            Method::DELETE,
            &format!("/groups/{}/members/{}", group_id, alice_id),
            Some(&admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = app
        .call(Method::GET, &format!("/groups/{}", group_id), Some(&alice), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn join_with_unknown_code_is_a_bad_request() {
    let app = app();
    let (_, alice) = app.register("alice").await;
    let (status, body) = app
        .call(Method::POST, "/groups/join", Some(&alice), Some(json!({"code": "ZZZZZZZZ"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_code");
}

#[tokio::test]
async fn messages_post_and_page() {
    let app = app();
    let (_, admin) = app.register("admin").await;
    let (_, outsider) = app.register("outsider").await;
    let (group_id, _) = app.group(&admin, "g").await;
    let uri = format!("/groups/{}/messages", group_id);

    for i in 0..3 {
        let (status, body) = app
            .call(
                Method::POST,
                &uri,
                Some(&admin),
                Some(json!({"message_type": "text", "content": format!("m{}", i)})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
    }
    let (status, body) = app
        .call(
            Method::POST,
            &uri,
            Some(&admin),
            Some(json!({"message_type": "code", "content": "fn main() {}", "code_language": "rust"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["code_language"], "rust");

    let (status, body) = app
        .call(Method::POST, &uri, Some(&admin), Some(json!({"message_type": "system", "content": "x"})))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", body);

    let (status, body) = app.call(Method::GET, &format!("{}?limit=2", uri), Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let page = body.as_array().unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["content"], "m2");
    assert_eq!(page[1]["message_type"], "code");

    let before = page[0]["created_at"].as_str().unwrap();
    let (_, body) = app
        .call(Method::GET, &format!("{}?before={}", uri, before), Some(&admin), None)
        .await;
    let older: Vec<_> = body.as_array().unwrap().iter().map(|m| m["content"].clone()).collect();
    assert_eq!(older, vec![json!("m0"), json!("m1")]);

    let (status, _) = app.call(Method::GET, &uri, Some(&outsider), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn files_upload_and_download_for_members_only() {
    let app = app();
    let (_, admin) = app.register("admin").await;
    let (_, outsider) = app.register("outsider").await;
    let (group_id, _) = app.group(&admin, "g").await;

    let content = b"hello, shaver".to_vec();
    let (status, body) = app
        .raw(
            Method::POST,
            &format!("/groups/{}/files?name=hello.txt", group_id),
            &admin,
            content.clone(),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let upload: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(upload["size"], 13);
    assert_eq!(upload["sha256"].as_str().unwrap().len(), 64);
    let path = upload["path"].as_str().unwrap().to_string();

    // The reference can be posted as a file message.
    let (status, _) = app
        .call(
            Method::POST,
            &format!("/groups/{}/messages", group_id),
            Some(&admin),
            Some(json!({"message_type": "file", "file_ref": {"path": path, "name": "hello.txt"}})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, downloaded) = app.raw(Method::GET, &path, &admin, Vec::new()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(downloaded, content);

    let (status, _) = app.raw(Method::GET, &path, &outsider, Vec::new()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .raw(
            Method::POST,
            &format!("/groups/{}/files?name=big.bin", group_id),
            &admin,
            vec![0u8; 2048],
        )
        .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);

    let (status, _) = app
        .raw(
            Method::GET,
            &format!("/groups/{}/files/{}", group_id, Uuid::new_v4()),
            &admin,
            Vec::new(),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
