//! The full authorization-code grant exercised through the router: consent,
//! code issuance, PKCE-checked exchange, bearer access, and revocation.

mod helpers;

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use base64ct::{Base64UrlUnpadded, Encoding};
use helpers::TestApp;
use sha2::{Digest, Sha256};
use tower::ServiceExt;

const REDIRECT_URI: &str = "http://localhost:33205/oauth/authorized";

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, HeaderMap, String) {
    let resp = app
        .router
        .clone()
        .oneshot(req)
        .await
        .expect("request failed");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("Failed to read body");
    (status, headers, String::from_utf8_lossy(&body).to_string())
}

fn pkce_pair() -> (String, String) {
    let verifier = "3fa85f6457174562b3fc259a7e1d84f1aa99c2b5".to_string();
    let challenge = Base64UrlUnpadded::encode_string(&Sha256::digest(verifier.as_bytes()));
    (verifier, challenge)
}

fn auth_uri(client_id: &str, state: &str, challenge: &str) -> String {
    format!(
        "/oauth/auth?response_type=code&client_id={}&redirect_uri={}&scope=blog&state={}&code_challenge={}&code_challenge_method=S256",
        urlencoding::encode(client_id),
        urlencoding::encode(REDIRECT_URI),
        state,
        challenge,
    )
}

fn form_request(uri: &str, cookie: Option<&str>, fields: &[(&str, &str)]) -> Request<Body> {
    let body = serde_urlencoded::to_string(fields).expect("Failed to encode form");
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body)).expect("Failed to build request")
}

fn query_param(location: &str, key: &str) -> Option<String> {
    let parsed = url::Url::parse(location).expect("Invalid redirect URL");
    parsed
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.to_string())
}

/// Walk consent + exchange and hand back a working access token.
async fn obtain_token(app: &TestApp, client_id: &str, cookie: &str, csrf_token: &str) -> String {
    let (verifier, challenge) = pkce_pair();
    let state = "e2e-state";
    let uri = auth_uri(client_id, state, &challenge);

    let approve = form_request(
        &uri,
        Some(cookie),
        &[("authorize", ""), ("csrf_token", csrf_token)],
    );
    let (status, headers, body) = send(app, approve).await;
    assert!(status.is_redirection(), "expected redirect, got {}: {}", status, body);
    let location = headers[header::LOCATION].to_str().expect("bad location");
    let code = query_param(location, "code").expect("no code in redirect");

    let exchange = form_request(
        "/oauth/token",
        None,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", client_id),
            ("code", &code),
            ("code_verifier", &verifier),
            ("redirect_uri", REDIRECT_URI),
        ],
    );
    let (status, _, body) = send(app, exchange).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    let json: serde_json::Value = serde_json::from_str(&body).expect("bad token response");
    json["access_token"].as_str().expect("no access_token").to_string()
}

#[tokio::test]
async fn test_oauth_flow_anonymous_prompts_login() {
    let app = TestApp::spawn().await;
    let client = app.register_cli_client(REDIRECT_URI).await;

    let (_, challenge) = pkce_pair();
    let req = Request::builder()
        .uri(auth_uri(&client.client_id, "xyz", &challenge))
        .body(Body::empty())
        .expect("Failed to build request");

    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body.contains("Log in to continue"), "{}", body);
}

#[tokio::test]
async fn test_oauth_flow_authorize_end_to_end() {
    let app = TestApp::spawn().await;
    let client = app.register_cli_client(REDIRECT_URI).await;
    let (cookie, session) = app.login("defred").await;

    let (verifier, challenge) = pkce_pair();
    let state = "31zy-J0AN1s2fQ73uTHLtQ";
    let uri = auth_uri(&client.client_id, state, &challenge);

    // consent screen names the client and offers the authorize button
    let req = Request::builder()
        .uri(&uri)
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .expect("Failed to build request");
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body.contains("Allow \"commit --cli\" access?"), "{}", body);
    assert!(body.contains("Authorize"), "{}", body);
    assert!(body.contains("Create, view, and update posts"), "{}", body);

    // approval redirects to the client with code + untouched state
    let approve = form_request(
        &uri,
        Some(&cookie),
        &[("authorize", ""), ("csrf_token", &session.csrf_token)],
    );
    let (status, headers, body) = send(&app, approve).await;
    assert!(status.is_redirection(), "expected redirect, got {}: {}", status, body);
    let location = headers[header::LOCATION].to_str().expect("bad location");
    assert!(location.starts_with(REDIRECT_URI), "{}", location);
    assert_eq!(query_param(location, "state").as_deref(), Some(state));
    let code = query_param(location, "code").expect("no code in redirect");

    // exchange the code with the right verifier
    let exchange = form_request(
        "/oauth/token",
        None,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", &client.client_id),
            ("code", &code),
            ("code_verifier", &verifier),
            ("redirect_uri", REDIRECT_URI),
        ],
    );
    let (status, headers, body) = send(&app, exchange).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    let json: serde_json::Value = serde_json::from_str(&body).expect("bad token response");
    assert_eq!(json["token_type"], "Bearer");
    assert_eq!(json["scope"], "blog");
    assert!(json["expires_in"].as_i64().unwrap() > 60);
    let access_token = json["access_token"].as_str().expect("no access_token");

    // the code is single use
    let replay = form_request(
        "/oauth/token",
        None,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", &client.client_id),
            ("code", &code),
            ("code_verifier", &verifier),
            ("redirect_uri", REDIRECT_URI),
        ],
    );
    let (status, _, body) = send(&app, replay).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert!(body.contains("invalid_grant"), "{}", body);

    // the token authenticates; 404 proves auth + scope passed
    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/blog/fake-just-checking-auth")
        .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
        .body(Body::empty())
        .expect("Failed to build request");
    let (status, _, body) = send(&app, delete).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);

    // revoke, twice: both 200
    for _ in 0..2 {
        let revoke = form_request(
            "/oauth/revoke",
            None,
            &[("token", access_token), ("client_id", &client.client_id)],
        );
        let (status, _, _) = send(&app, revoke).await;
        assert_eq!(status, StatusCode::OK);
    }

    // the revoked token no longer authenticates
    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/blog/fake-just-checking-auth")
        .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
        .body(Body::empty())
        .expect("Failed to build request");
    let (status, _, body) = send(&app, delete).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", body);
    assert!(body.contains("invalid_token"), "{}", body);
}

#[tokio::test]
async fn test_oauth_flow_deny() {
    let app = TestApp::spawn().await;
    let client = app.register_cli_client(REDIRECT_URI).await;
    let (cookie, session) = app.login("defred").await;

    let (_, challenge) = pkce_pair();
    let uri = auth_uri(&client.client_id, "deny-state", &challenge);

    // no 'authorize' field in the form is a denial
    let deny = form_request(&uri, Some(&cookie), &[("csrf_token", &session.csrf_token)]);
    let (status, _, body) = send(&app, deny).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", body);
    assert!(body.contains("authorization denied"), "{}", body);
}

#[tokio::test]
async fn test_consent_requires_session_and_csrf() {
    let app = TestApp::spawn().await;
    let client = app.register_cli_client(REDIRECT_URI).await;
    let (cookie, _session) = app.login("defred").await;

    let (_, challenge) = pkce_pair();
    let uri = auth_uri(&client.client_id, "s", &challenge);

    // no session
    let req = form_request(&uri, None, &[("authorize", ""), ("csrf_token", "x")]);
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", body);
    assert!(body.contains("unauthorized"), "{}", body);

    // wrong csrf token
    let req = form_request(&uri, Some(&cookie), &[("authorize", ""), ("csrf_token", "nope")]);
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert!(body.contains("bad csrf token"), "{}", body);
}

#[tokio::test]
async fn test_auth_page_rejects_unknown_client_and_bad_redirect() {
    let app = TestApp::spawn().await;
    let client = app.register_cli_client(REDIRECT_URI).await;

    let (_, challenge) = pkce_pair();

    let req = Request::builder()
        .uri(auth_uri("not-a-client", "s", &challenge))
        .body(Body::empty())
        .expect("Failed to build request");
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert!(body.contains("invalid_client"), "{}", body);

    // registered client, unregistered redirect_uri: no redirect happens
    let uri = format!(
        "/oauth/auth?response_type=code&client_id={}&redirect_uri={}&scope=blog&code_challenge={}&code_challenge_method=S256",
        urlencoding::encode(&client.client_id),
        urlencoding::encode("http://evil.example/cb"),
        challenge,
    );
    let req = Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("Failed to build request");
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert!(body.contains("not registered"), "{}", body);
}

#[tokio::test]
async fn test_token_exchange_pkce_mismatch() {
    let app = TestApp::spawn().await;
    let client = app.register_cli_client(REDIRECT_URI).await;
    let (cookie, session) = app.login("defred").await;

    let (_, challenge) = pkce_pair();
    let uri = auth_uri(&client.client_id, "s", &challenge);
    let approve = form_request(
        &uri,
        Some(&cookie),
        &[("authorize", ""), ("csrf_token", &session.csrf_token)],
    );
    let (_, headers, _) = send(&app, approve).await;
    let location = headers[header::LOCATION].to_str().expect("bad location");
    let code = query_param(location, "code").expect("no code in redirect");

    let exchange = form_request(
        "/oauth/token",
        None,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", &client.client_id),
            ("code", &code),
            ("code_verifier", "the-wrong-verifier-entirely-0000000000000000"),
            ("redirect_uri", REDIRECT_URI),
        ],
    );
    let (status, _, body) = send(&app, exchange).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert!(body.contains("pkce verification failed"), "{}", body);
}

#[tokio::test]
async fn test_token_exchange_redirect_uri_must_match() {
    let app = TestApp::spawn().await;
    let client = app.register_cli_client(REDIRECT_URI).await;
    let (cookie, session) = app.login("defred").await;

    let (verifier, challenge) = pkce_pair();
    let uri = auth_uri(&client.client_id, "s", &challenge);
    let approve = form_request(
        &uri,
        Some(&cookie),
        &[("authorize", ""), ("csrf_token", &session.csrf_token)],
    );
    let (_, headers, _) = send(&app, approve).await;
    let location = headers[header::LOCATION].to_str().expect("bad location");
    let code = query_param(location, "code").expect("no code in redirect");

    let exchange = form_request(
        "/oauth/token",
        None,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", &client.client_id),
            ("code", &code),
            ("code_verifier", &verifier),
            ("redirect_uri", "http://localhost:33205/oauth/other"),
        ],
    );
    let (status, _, body) = send(&app, exchange).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert!(body.contains("invalid_grant"), "{}", body);
}

#[tokio::test]
async fn test_token_endpoint_unsupported_grant_type() {
    let app = TestApp::spawn().await;

    let req = form_request(
        "/oauth/token",
        None,
        &[("grant_type", "client_credentials"), ("client_id", "x")],
    );
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert!(body.contains("unsupported_grant_type"), "{}", body);
}

#[tokio::test]
async fn test_bearer_scope_enforced() {
    let app = TestApp::spawn().await;
    let (_, session) = app.login("defred").await;

    // token with a scope that does not include "blog"
    let (_, token_string) = commit_blog::storage::issue_token(
        &app.db,
        "some-client",
        Some(session.blogger_id),
        "feed",
        3600,
    )
    .await
    .expect("issue token");

    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/blog/abc123")
        .header(header::AUTHORIZATION, format!("Bearer {}", token_string))
        .body(Body::empty())
        .expect("Failed to build request");
    let (status, _, body) = send(&app, delete).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", body);
    assert!(body.contains("insufficient_scope"), "{}", body);
}

#[tokio::test]
async fn test_bearer_missing_or_garbage_token() {
    let app = TestApp::spawn().await;

    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/blog/abc123")
        .body(Body::empty())
        .expect("Failed to build request");
    let (status, _, _) = send(&app, delete).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/blog/abc123")
        .header(header::AUTHORIZATION, "Bearer short")
        .body(Body::empty())
        .expect("Failed to build request");
    let (status, _, body) = send(&app, delete).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{}", body);
    assert!(body.contains("invalid_token"), "{}", body);
}

#[tokio::test]
async fn test_login_resumes_original_request() {
    let app = TestApp::spawn().await;
    commit_blog::storage::create_blogger(&app.db, "defred", "hunter2hunter2", None)
        .await
        .expect("create blogger");

    let return_to = "/oauth/auth?response_type=code&client_id=x";
    let login = form_request(
        "/login",
        None,
        &[
            ("username", "defred"),
            ("password", "hunter2hunter2"),
            ("return_to", return_to),
        ],
    );
    let (status, headers, body) = send(&app, login).await;
    assert!(status.is_redirection(), "{}: {}", status, body);
    assert_eq!(headers[header::LOCATION].to_str().unwrap(), return_to);
    let set_cookie = headers[header::SET_COOKIE].to_str().unwrap();
    assert!(set_cookie.starts_with("commitblog_session="), "{}", set_cookie);
    assert!(set_cookie.contains("HttpOnly"), "{}", set_cookie);
}

#[tokio::test]
async fn test_login_rejects_bad_password_and_offsite_redirect() {
    let app = TestApp::spawn().await;
    commit_blog::storage::create_blogger(&app.db, "defred", "hunter2hunter2", None)
        .await
        .expect("create blogger");

    let login = form_request(
        "/login",
        None,
        &[("username", "defred"), ("password", "wrong")],
    );
    let (status, _, _) = send(&app, login).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // off-site return_to falls back to /
    let login = form_request(
        "/login",
        None,
        &[
            ("username", "defred"),
            ("password", "hunter2hunter2"),
            ("return_to", "https://evil.example/phish"),
        ],
    );
    let (status, headers, _) = send(&app, login).await;
    assert!(status.is_redirection());
    assert_eq!(headers[header::LOCATION].to_str().unwrap(), "/");
}

#[tokio::test]
async fn test_api_blog_post_and_ownership() {
    use helpers::StaticCommits;
    use std::sync::Arc;

    let app = TestApp::spawn_with_commits(Arc::new(StaticCommits {
        message: "add feature\n\nsome details worth blogging".to_string(),
    }))
    .await;
    let client = app.register_cli_client(REDIRECT_URI).await;
    let (cookie, session) = app.login("defred").await;
    let token = obtain_token(&app, &client.client_id, &cookie, &session.csrf_token).await;

    let post_body = serde_json::json!({
        "origin": {"github": {"repo": "defred/dotfiles"}},
        "commit": "ab34ef56ab34ef56ab34ef56ab34ef56ab34ef56",
    });
    let post = Request::builder()
        .method("POST")
        .uri("/api/blog")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(post_body.to_string()))
        .expect("Failed to build request");
    let (status, _, body) = send(&app, post).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert!(body.contains("sup"), "{}", body);

    // first sighting of the repo enqueued exactly one clone task
    let claimed = commit_blog::storage::claim_task(&app.db, Some("clone"))
        .await
        .expect("claim")
        .expect("no clone task enqueued");
    assert!(claimed.details.contains("defred/dotfiles"), "{}", claimed.details);
    assert!(commit_blog::storage::claim_task(&app.db, Some("clone"))
        .await
        .expect("claim")
        .is_none());

    // blogging the same commit again conflicts
    let replay = Request::builder()
        .method("POST")
        .uri("/api/blog")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(post_body.to_string()))
        .expect("Failed to build request");
    let (status, _, body) = send(&app, replay).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert!(body.contains("already blogged"), "{}", body);

    // another blogger cannot delete the post
    let (other_cookie, other_session) = app.login("intruder").await;
    let other_token =
        obtain_token(&app, &client.client_id, &other_cookie, &other_session.csrf_token).await;
    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/blog/ab34ef56ab34ef56ab34ef56ab34ef56ab34ef56")
        .header(header::AUTHORIZATION, format!("Bearer {}", other_token))
        .body(Body::empty())
        .expect("Failed to build request");
    let (status, _, body) = send(&app, delete).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "{}", body);

    // the owner can
    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/blog/ab34ef56ab34ef56ab34ef56ab34ef56ab34ef56")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .expect("Failed to build request");
    let (status, _, body) = send(&app, delete).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
}
