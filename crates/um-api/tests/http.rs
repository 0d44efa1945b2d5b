//! End-to-end HTTP tests: the real router over an in-memory SQLite store.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use mockall::predicate::eq;
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;
use um_api::{router, AppState};
use um_auth_jwt::JwtAuthProvider;
use um_config::PaginationConfig;
use um_core::error::AppError;
use um_core::models::{NewThread, NewUser, ThreadId, UserId, VoteTarget, VoteValue};
use um_core::traits::{AuthProvider, MockVoteLedger, ThreadRepo, UserRepo};
use um_db_sqlite::SqliteRepo;

const SECRET: &str = "test-secret";

struct TestApp {
    router: Router,
    repo: SqliteRepo,
    tokens: JwtAuthProvider,
}

fn provider() -> JwtAuthProvider {
    JwtAuthProvider::new(&SecretString::from(SECRET.to_string()), 1)
}

fn state(repo: &SqliteRepo) -> AppState {
    AppState {
        users: Box::new(repo.clone()),
        threads: Box::new(repo.clone()),
        votes: Box::new(repo.clone()),
        replies: Box::new(repo.clone()),
        reposts: Box::new(repo.clone()),
        follows: Box::new(repo.clone()),
        auth: Box::new(provider()),
        pagination: PaginationConfig {
            default_limit: 10,
            max_limit: 100,
        },
    }
}

async fn memory_repo() -> SqliteRepo {
    SqliteRepo::new("sqlite::memory:", 1).await.unwrap()
}

async fn app() -> TestApp {
    let repo = memory_repo().await;
    TestApp {
        router: router(Arc::new(state(&repo)), &[]),
        repo,
        tokens: provider(),
    }
}

impl TestApp {
    /// Creates a user directly in storage and returns it with a bearer token.
    async fn user(&self, name: &str) -> (UserId, String) {
        let user = self
            .repo
            .create_user(NewUser {
                name: name.into(),
                email: format!("{}@example.com", name.to_lowercase()),
                password_hash: "unused".into(),
            })
            .await
            .unwrap();
        (user.id, self.tokens.issue_token(user.id).unwrap())
    }

    async fn thread(&self, author_id: UserId, title: &str) -> ThreadId {
        self.repo
            .create_thread(NewThread {
                author_id,
                title: title.into(),
                content: "body".into(),
            })
            .await
            .unwrap()
            .id
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        send(&self.router, method, uri, token, body).await
    }

    async fn reply(&self, token: &str, thread_id: ThreadId, parent_id: Option<i64>, content: &str) -> i64 {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/replies",
                Some(token),
                Some(json!({ "threadId": thread_id, "parentId": parent_id, "content": content })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_i64().unwrap()
    }
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn ids(listing: &Value) -> Vec<i64> {
    listing["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|item| item["id"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn health_reports_success() {
    let app = app().await;
    let (status, body) = app.send(Method::GET, "/api/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
}

#[tokio::test]
async fn unknown_route_is_json_404() {
    let app = app().await;
    let (status, body) = app.send(Method::GET, "/api/nothing-here", None, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "route not found" }));
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = app().await;
    let request = Request::builder().uri("/api/health").body(Body::empty()).unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();

    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test]
async fn thread_vote_scenario() {
    let app = app().await;
    let (alice, alice_token) = app.user("Alice").await;
    let (_, bob_token) = app.user("Bob").await;
    let thread = app.thread(alice, "Rust or Go?").await;
    let base = format!("/api/threads/{thread}");

    let (status, body) = app.send(Method::POST, &format!("{base}/votes/upvote"), Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["vote"]["value"], 1);
    assert_eq!(body["vote"]["target"], json!({ "kind": "thread", "id": thread }));
    assert_eq!((body["upvotes"].as_i64(), body["downvotes"].as_i64(), body["score"].as_i64()), (Some(1), Some(0), Some(1)));

    let (_, body) = app.send(Method::POST, &format!("{base}/votes/downvote"), Some(&bob_token), None).await;
    assert_eq!((body["upvotes"].as_i64(), body["downvotes"].as_i64(), body["score"].as_i64()), (Some(1), Some(1), Some(0)));

    // Alice changes her mind: her vote is overwritten, not duplicated.
    let (_, body) = app.send(Method::POST, &format!("{base}/votes/downvote"), Some(&alice_token), None).await;
    assert_eq!(body["vote"]["value"], -1);
    assert_eq!((body["upvotes"].as_i64(), body["downvotes"].as_i64(), body["score"].as_i64()), (Some(0), Some(2), Some(-2)));

    let (status, body) = app.send(Method::GET, &format!("{base}/votes"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "upvotes": 0, "downvotes": 2, "score": -2 }));

    let (_, view) = app.send(Method::GET, &base, None, None).await;
    assert_eq!(view["score"], -2);
    assert_eq!(view["author"]["name"], "Alice");
}

#[tokio::test]
async fn votes_require_a_valid_token() {
    let app = app().await;
    let (alice, _) = app.user("Alice").await;
    let thread = app.thread(alice, "t").await;
    let uri = format!("/api/threads/{thread}/votes/upvote");

    let (status, body) = app.send(Method::POST, &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let (status, _) = app.send(Method::POST, &uri, Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // A well-signed token for a user that does not exist.
    let ghost = app.tokens.issue_token(UserId(9999)).unwrap();
    let (status, _) = app.send(Method::POST, &uri, Some(&ghost), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, body) = app.send(Method::GET, &format!("/api/threads/{thread}/votes"), None, None).await;
    assert_eq!(body["upvotes"], 0);
}

#[tokio::test]
async fn votes_on_missing_targets_are_404() {
    let app = app().await;
    let (_, token) = app.user("Alice").await;

    for uri in ["/api/threads/999/votes/upvote", "/api/replies/999/votes/downvote"] {
        let (status, _) = app.send(Method::POST, uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
    for uri in ["/api/threads/999/votes", "/api/replies/999/votes"] {
        let (status, _) = app.send(Method::GET, uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }

    let (status, _) = app.send(Method::POST, "/api/threads/abc/votes/upvote", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn reply_votes_are_separate_from_thread_votes() {
    let app = app().await;
    let (alice, token) = app.user("Alice").await;
    let thread = app.thread(alice, "t").await;
    let reply = app.reply(&token, thread, None, "first").await;

    let (status, body) = app.send(Method::POST, &format!("/api/replies/{reply}/votes/upvote"), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vote"]["target"], json!({ "kind": "reply", "id": reply }));
    assert_eq!(body["score"], 1);

    let (_, thread_votes) = app.send(Method::GET, &format!("/api/threads/{thread}/votes"), None, None).await;
    assert_eq!(thread_votes["score"], 0);
}

#[tokio::test]
async fn create_reply_validates_thread_parent_and_content() {
    let app = app().await;
    let (alice, token) = app.user("Alice").await;
    let first = app.thread(alice, "first").await;
    let second = app.thread(alice, "second").await;

    let (status, root) = app
        .send(Method::POST, "/api/replies", Some(&token), Some(json!({ "threadId": first, "content": "root" })))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(root["parentId"], Value::Null);
    assert_eq!(root["threadId"], json!(first));
    assert_eq!(root["author"]["name"], "Alice");

    let root_id = root["id"].as_i64().unwrap();
    let child = app.reply(&token, first, Some(root_id), "child").await;
    assert_ne!(child, root_id);

    let cases = [
        (json!({ "threadId": second, "parentId": root_id, "content": "x" }), StatusCode::BAD_REQUEST),
        (json!({ "threadId": first, "parentId": 999, "content": "x" }), StatusCode::BAD_REQUEST),
        (json!({ "threadId": 999, "content": "x" }), StatusCode::NOT_FOUND),
        (json!({ "threadId": first, "content": "   " }), StatusCode::BAD_REQUEST),
        (json!({ "content": "x" }), StatusCode::BAD_REQUEST),
    ];
    for (payload, expected) in cases {
        let (status, body) = app.send(Method::POST, "/api/replies", Some(&token), Some(payload.clone())).await;
        assert_eq!(status, expected, "{payload} -> {body}");
    }

    // Nothing was inserted into the second thread.
    let (_, listing) = app.send(Method::GET, &format!("/api/replies/thread/{second}"), None, None).await;
    assert_eq!(listing["total"], 0);

    let (status, _) = app
        .send(Method::POST, "/api/replies", None, Some(json!({ "threadId": first, "content": "anon" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn list_replies_one_level_at_a_time() {
    let app = app().await;
    let (alice, token) = app.user("Alice").await;
    let thread = app.thread(alice, "t").await;

    let r1 = app.reply(&token, thread, None, "one").await;
    let r2 = app.reply(&token, thread, None, "two").await;
    let r3 = app.reply(&token, thread, None, "three").await;
    let c1 = app.reply(&token, thread, Some(r1), "one.one").await;
    let base = format!("/api/replies/thread/{thread}");

    let (status, first_page) = app.send(Method::GET, &format!("{base}?page=1&limit=2"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first_page["total"], 3);
    assert_eq!(ids(&first_page), vec![r3, r2]);

    let (_, second_page) = app.send(Method::GET, &format!("{base}?page=2&limit=2"), None, None).await;
    assert_eq!(second_page["total"], 3);
    assert_eq!(ids(&second_page), vec![r1]);
    let children = second_page["items"][0]["children"].as_array().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0]["id"], json!(c1));

    let (_, explicit_null) = app.send(Method::GET, &format!("{base}?parent_id=null"), None, None).await;
    let (_, absent) = app.send(Method::GET, &base, None, None).await;
    assert_eq!(ids(&explicit_null), ids(&absent));
    assert_eq!(ids(&absent), vec![r3, r2, r1]);

    let (_, nested) = app.send(Method::GET, &format!("{base}?parent_id={r1}"), None, None).await;
    assert_eq!(nested["total"], 1);
    assert_eq!(ids(&nested), vec![c1]);
    assert_eq!(nested["items"][0]["parentId"], json!(r1));

    let (status, _) = app.send(Method::GET, &format!("{base}?parent_id=abc"), None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.send(Method::GET, &format!("{base}?page=0"), None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.send(Method::GET, "/api/replies/thread/999", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_reply_returns_context() {
    let app = app().await;
    let (alice, token) = app.user("Alice").await;
    let thread = app.thread(alice, "Context").await;
    let root = app.reply(&token, thread, None, "root").await;
    let child = app.reply(&token, thread, Some(root), "child").await;

    let (status, detail) = app.send(Method::GET, &format!("/api/replies/{root}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["thread"], json!({ "id": thread, "title": "Context" }));
    assert_eq!(detail["parent"], Value::Null);
    assert_eq!(detail["childrenCount"], 1);
    assert_eq!(detail["children"][0]["id"], json!(child));

    let (_, detail) = app.send(Method::GET, &format!("/api/replies/{child}"), None, None).await;
    assert_eq!(detail["parent"], json!({ "id": root }));
    assert_eq!(detail["childrenCount"], 0);

    let (status, _) = app.send(Method::GET, "/api/replies/999", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn thread_listing_is_paginated() {
    let app = app().await;
    let (_, token) = app.user("Alice").await;

    for title in ["a", "b", "c"] {
        let (status, _) = app
            .send(Method::POST, "/api/threads", Some(&token), Some(json!({ "title": title, "content": "body" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, listing) = app.send(Method::GET, "/api/threads?limit=2", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["total"], 3);
    assert_eq!(listing["items"].as_array().unwrap().len(), 2);

    let (status, _) = app
        .send(Method::POST, "/api/threads", Some(&token), Some(json!({ "title": "", "content": "body" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.send(Method::GET, "/api/threads/999", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn register_login_and_me() {
    let app = app().await;
    let account = json!({ "name": "Carol", "email": "Carol@Example.com", "password": "hunter22" });

    let (status, session) = app.send(Method::POST, "/api/auth/register", None, Some(account.clone())).await;
    assert_eq!(status, StatusCode::CREATED, "{session}");
    assert_eq!(session["user"]["email"], "carol@example.com");
    assert!(session["user"].get("passwordHash").is_none());

    let (status, _) = app.send(Method::POST, "/api/auth/register", None, Some(account)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(Method::POST, "/api/auth/login", None, Some(json!({ "email": "carol@example.com", "password": "wrong" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, login) = app
        .send(Method::POST, "/api/auth/login", None, Some(json!({ "email": "carol@example.com", "password": "hunter22" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = login["token"].as_str().unwrap();

    let (status, me) = app.send(Method::GET, "/api/auth/me", Some(token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["name"], "Carol");

    let (status, _) = app.send(Method::GET, "/api/auth/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn storage_failures_do_not_leak_details() {
    let repo = memory_repo().await;
    let user = repo
        .create_user(NewUser {
            name: "Alice".into(),
            email: "alice@example.com".into(),
            password_hash: "unused".into(),
        })
        .await
        .unwrap();

    let mut ledger = MockVoteLedger::new();
    ledger
        .expect_set_vote()
        .with(eq(user.id), eq(VoteTarget::Thread(ThreadId(7))), eq(VoteValue::Up))
        .times(1)
        .returning(|_, _, _| Err(AppError::Internal("database is locked at /var/lib/um.db".into())));

    let mut state = state(&repo);
    state.votes = Box::new(ledger);
    let app = router(Arc::new(state), &[]);
    let token = provider().issue_token(user.id).unwrap();

    let (status, body) = send(&app, Method::POST, "/api/threads/7/votes/upvote", Some(&token), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "internal server error" }));
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin_only() {
    let repo = memory_repo().await;
    let origins = ["http://localhost:5173".to_string(), "bad\norigin".to_string()];
    let app = router(Arc::new(state(&repo)), &origins);

    let preflight = |origin: &str| {
        Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/threads")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization,content-type")
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(preflight("http://localhost:5173")).await.unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "http://localhost:5173"
    );

    let response = app.clone().oneshot(preflight("http://evil.example")).await.unwrap();
    assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}

#[tokio::test]
async fn listing_limit_is_capped_and_echoed() {
    let app = app().await;
    let (_, token) = app.user("Alice").await;
    app.send(Method::POST, "/api/threads", Some(&token), Some(json!({ "title": "t", "content": "c" })))
        .await;

    let (status, listing) = app.send(Method::GET, "/api/threads?limit=500", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["limit"], 100);
}

#[tokio::test]
async fn repost_lifecycle() {
    let app = app().await;
    let (alice, alice_token) = app.user("Alice").await;
    let (bob, bob_token) = app.user("Bob").await;
    let thread = app.thread(alice, "Share me").await;

    let (status, repost) = app
        .send(Method::POST, "/api/reposts", Some(&bob_token), Some(json!({ "threadId": thread, "comment": "good one" })))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{repost}");
    assert_eq!(repost["comment"], "good one");
    assert_eq!(repost["user"]["name"], "Bob");
    assert_eq!(repost["thread"]["title"], "Share me");
    assert_eq!(repost["thread"]["score"], 0);
    let repost_id = repost["id"].as_i64().unwrap();

    let (status, _) = app
        .send(Method::POST, "/api/reposts", Some(&bob_token), Some(json!({ "threadId": thread })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(Method::POST, "/api/reposts", Some(&bob_token), Some(json!({ "threadId": 999 })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.send(Method::POST, "/api/reposts", None, Some(json!({ "threadId": thread }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, by_user) = app.send(Method::GET, &format!("/api/reposts/user/{bob}"), None, None).await;
    assert_eq!(by_user["total"], 1);
    assert_eq!(by_user["items"][0]["thread"]["id"], json!(thread));

    let (_, by_thread) = app.send(Method::GET, &format!("/api/reposts/thread/{thread}"), None, None).await;
    assert_eq!(by_thread["total"], 1);
    assert!(by_thread["items"][0].get("thread").is_none());

    let uri = format!("/api/reposts/{repost_id}");
    let (status, _) = app.send(Method::DELETE, &uri, Some(&alice_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.send(Method::DELETE, &uri, Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.send(Method::DELETE, &uri, Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn follow_lifecycle() {
    let app = app().await;
    let (alice, alice_token) = app.user("Alice").await;
    let (bob, bob_token) = app.user("Bob").await;

    let (status, outcome) = app
        .send(Method::POST, "/api/follows", Some(&bob_token), Some(json!({ "followingId": alice })))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{outcome}");
    assert_eq!(outcome["followerCount"], 1);
    assert_eq!(outcome["follow"]["following"]["name"], "Alice");

    let rejected = [
        (json!({ "followingId": alice }), StatusCode::BAD_REQUEST),
        (json!({ "followingId": bob }), StatusCode::BAD_REQUEST),
        (json!({ "followingId": 999 }), StatusCode::NOT_FOUND),
        (json!({}), StatusCode::BAD_REQUEST),
    ];
    for (payload, expected) in rejected {
        let (status, body) = app.send(Method::POST, "/api/follows", Some(&bob_token), Some(payload.clone())).await;
        assert_eq!(status, expected, "{payload} -> {body}");
    }

    let (_, followers) = app.send(Method::GET, &format!("/api/follows/{alice}/followers"), None, None).await;
    assert_eq!(followers["total"], 1);
    assert_eq!(followers["items"][0]["name"], "Bob");
    assert!(followers["items"][0].get("email").is_none());

    let (_, following) = app.send(Method::GET, &format!("/api/follows/{bob}/following"), None, None).await;
    assert_eq!(following["items"][0]["id"], json!(alice));

    let (status, check) = app.send(Method::GET, &format!("/api/follows/{alice}/check"), Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check, json!({ "isFollowing": true, "followerCount": 1, "followingCount": 0 }));

    let (status, _) = app.send(Method::GET, &format!("/api/follows/{alice}/check"), None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.send(Method::DELETE, &format!("/api/follows/{alice}"), Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["followerCount"], 0);

    let (status, _) = app.send(Method::DELETE, &format!("/api/follows/{alice}"), Some(&bob_token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, check) = app.send(Method::GET, &format!("/api/follows/{bob}/check"), Some(&alice_token), None).await;
    assert_eq!(check["isFollowing"], false);
}
