//! HTTP surface: the OAuth2 authorization server endpoints (consent, token
//! exchange, revocation), the bearer-protected blog API, and the small
//! login/account pages the consent flow leans on.

use crate::emails::Mailer;
use crate::github::CommitFetcher;
use crate::session::{SessionCookie, SESSION_TTL_SECS};
use crate::settings::Settings;
use crate::storage;
use crate::tasks;
use axum::body::Body;
use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64ct::{Base64, Base64UrlUnpadded, Encoding};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

/// Human-readable descriptions shown on the consent screen.
const SCOPES: &[(&str, &str)] = &[("blog", "Create, view, and update posts")];

const AUTH_CODE_TTL_SECS: i64 = 600;
const TOKEN_TTL_SECS: i64 = 3600;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
    pub mailer: Arc<dyn Mailer>,
    pub commits: Arc<dyn CommitFetcher>,
}

// Security headers middleware
async fn security_headers(request: Request<Body>, next: Next) -> impl IntoResponse {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("DENY"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static(
            "default-src 'self'; style-src 'self' 'unsafe-inline'; img-src 'self' data:; form-action 'self'",
        ),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );

    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/login", get(login_page).post(login_submit))
        .route("/logout", get(logout))
        .route("/oauth/auth", get(oauth_auth_page).post(oauth_auth_submit))
        .route("/oauth/token", post(oauth_token))
        .route("/oauth/revoke", post(oauth_revoke))
        .route("/oauth/clients", post(register_client))
        .route("/account/email", post(account_email))
        .route("/account/email/confirm", get(account_email_confirm))
        .route("/api/blog", post(api_post_blog))
        .route("/api/blog/{sha}", put(api_put_blog).delete(api_delete_blog))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    settings: Settings,
    db: DatabaseConnection,
    mailer: Arc<dyn Mailer>,
    commits: Arc<dyn CommitFetcher>,
) -> miette::Result<()> {
    let state = AppState {
        settings: Arc::new(settings),
        db,
        mailer,
        commits,
    };

    let addr: SocketAddr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    )
    .parse()
    .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let app = router(state);

    tracing::info!(%addr, "commit--blog listening");
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

// Shared helpers

fn urlencoded(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn url_append_query(mut base: String, params: &[(&str, String)]) -> String {
    let qs = serde_urlencoded::to_string(
        params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect::<Vec<(String, String)>>(),
    )
    .unwrap_or_default();
    if base.contains('?') {
        base.push('&');
    } else {
        base.push('?');
    }
    base.push_str(&qs);
    base
}

fn oauth_error_redirect(
    redirect_uri: &str,
    state: Option<&str>,
    error: &str,
    desc: &str,
) -> Redirect {
    let mut params = vec![("error", error.to_string())];
    if !desc.is_empty() {
        params.push(("error_description", desc.to_string()));
    }
    if let Some(s) = state {
        params.push(("state", s.to_string()));
    }
    let loc = url_append_query(redirect_uri.to_string(), &params);
    Redirect::temporary(&loc)
}

fn json_with_headers(status: StatusCode, value: Value, headers: &[(&str, String)]) -> Response {
    let mut resp = (status, Json(value)).into_response();
    let h = resp.headers_mut();
    for (name, val) in headers {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(val),
        ) {
            h.insert(n, v);
        }
    }
    resp
}

fn oauth_error_json(status: StatusCode, error: &str, desc: &str) -> Response {
    let body = if desc.is_empty() {
        json!({"error": error})
    } else {
        json!({"error": error, "error_description": desc})
    };
    (status, Json(body)).into_response()
}

fn pkce_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

fn pkce_matches(verifier: &str, challenge: &str) -> bool {
    pkce_s256(verifier)
        .as_bytes()
        .ct_eq(challenge.as_bytes())
        .into()
}

fn scope_description(scope: &str) -> &str {
    SCOPES
        .iter()
        .find(|(name, _)| *name == scope)
        .map(|(_, desc)| *desc)
        .unwrap_or(scope)
}

async fn current_session(state: &AppState, headers: &HeaderMap) -> Option<storage::Session> {
    let cookie = SessionCookie::from_headers(headers)?;
    storage::get_session(&state.db, &cookie.session_id)
        .await
        .ok()
        .flatten()
}

// Authorization endpoint

#[derive(Debug, Deserialize)]
struct AuthQuery {
    response_type: String,
    client_id: String,
    redirect_uri: String,
    scope: String,
    state: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

fn auth_query_params(q: &AuthQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("response_type", q.response_type.clone()),
        ("client_id", q.client_id.clone()),
        ("redirect_uri", q.redirect_uri.clone()),
        ("scope", q.scope.clone()),
    ];
    if let Some(s) = &q.state {
        params.push(("state", s.clone()));
    }
    if let Some(cc) = &q.code_challenge {
        params.push(("code_challenge", cc.clone()));
    }
    if let Some(ccm) = &q.code_challenge_method {
        params.push(("code_challenge_method", ccm.clone()));
    }
    params
}

/// Validate the pieces of an authorization request that are checked the
/// same way on both the GET and the POST. Returns the client and the PKCE
/// challenge pair, or the full error response.
async fn validate_auth_request(
    state: &AppState,
    q: &AuthQuery,
) -> Result<(storage::Client, String, String), Response> {
    // Unknown clients and unregistered redirect URIs must never cause a
    // redirect to the supplied URI.
    let client = match storage::get_client(&state.db, &q.client_id).await {
        Ok(Some(c)) => c,
        Ok(None) => {
            return Err(oauth_error_json(
                StatusCode::BAD_REQUEST,
                "invalid_client",
                "unknown client_id",
            ))
        }
        Err(_) => {
            return Err(oauth_error_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "db error",
            ))
        }
    };

    if !client.has_redirect_uri(&q.redirect_uri) {
        return Err(oauth_error_json(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "redirect_uri is not registered for this client",
        ));
    }

    if q.response_type != "code" {
        return Err(oauth_error_redirect(
            &q.redirect_uri,
            q.state.as_deref(),
            "unsupported_response_type",
            "only response_type=code is supported",
        )
        .into_response());
    }

    if !client.allows_scope(&q.scope) {
        return Err(oauth_error_redirect(
            &q.redirect_uri,
            q.state.as_deref(),
            "invalid_scope",
            "scope exceeds what the client registered",
        )
        .into_response());
    }

    // Require PKCE S256
    let (code_challenge, ccm) = match (&q.code_challenge, &q.code_challenge_method) {
        (Some(cc), Some(m)) if m == "S256" => (cc.clone(), m.clone()),
        _ => {
            return Err(oauth_error_redirect(
                &q.redirect_uri,
                q.state.as_deref(),
                "invalid_request",
                "PKCE (S256) required",
            )
            .into_response());
        }
    };

    Ok((client, code_challenge, ccm))
}

async fn oauth_auth_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<AuthQuery>,
) -> Response {
    let (client, _, _) = match validate_auth_request(&state, &q).await {
        Ok(parts) => parts,
        Err(resp) => return resp,
    };

    let Some(session) = current_session(&state, &headers).await else {
        // Defer the decision: send the visitor through login and resume
        // this exact request afterwards.
        let return_to = url_append_query("/oauth/auth".to_string(), &auth_query_params(&q));
        let login_url = format!("/login?return_to={}", urlencoded(&return_to));
        let page = format!(
            "<!doctype html>\n<html><body>\n<h1>commit --blog</h1>\n\
             <p>\"{}\" is asking for access to your blog.</p>\n\
             <p>Log in to continue: <a href=\"{}\">log in</a></p>\n\
             </body></html>",
            html_escape(&client.name),
            html_escape(&login_url),
        );
        return Html(page).into_response();
    };

    let scope_list = q
        .scope
        .split_whitespace()
        .map(|s| format!("<li>{}</li>", html_escape(scope_description(s))))
        .collect::<String>();

    let form_action = url_append_query("/oauth/auth".to_string(), &auth_query_params(&q));
    let page = format!(
        "<!doctype html>\n<html><body>\n<h1>commit --blog</h1>\n\
         <p>Allow \"{}\" access?</p>\n\
         <ul>{}</ul>\n\
         <form method=\"post\" action=\"{}\">\n\
         <input type=\"hidden\" name=\"csrf_token\" value=\"{}\">\n\
         <button type=\"submit\" name=\"authorize\" value=\"\">Authorize</button>\n\
         <button type=\"submit\">Deny</button>\n\
         </form>\n</body></html>",
        html_escape(&client.name),
        scope_list,
        html_escape(&form_action),
        html_escape(&session.csrf_token),
    );
    Html(page).into_response()
}

#[derive(Debug, Deserialize)]
struct ConsentForm {
    authorize: Option<String>,
    csrf_token: String,
}

async fn oauth_auth_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<AuthQuery>,
    Form(form): Form<ConsentForm>,
) -> Response {
    let Some(session) = current_session(&state, &headers).await else {
        return oauth_error_json(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "must be logged in to authorize client application",
        );
    };

    if form.csrf_token != session.csrf_token {
        return oauth_error_json(StatusCode::BAD_REQUEST, "invalid_request", "bad csrf token");
    }

    // No explicit affirmation is a denial; nothing is stored.
    if form.authorize.is_none() {
        return oauth_error_json(
            StatusCode::UNAUTHORIZED,
            "access_denied",
            "authorization denied",
        );
    }

    let (client, code_challenge, ccm) = match validate_auth_request(&state, &q).await {
        Ok(parts) => parts,
        Err(resp) => return resp,
    };

    let code = match storage::issue_auth_code(
        &state.db,
        &client.client_id,
        &q.redirect_uri,
        &q.scope,
        session.blogger_id,
        &code_challenge,
        &ccm,
        AUTH_CODE_TTL_SECS,
    )
    .await
    {
        Ok(code) => code,
        Err(_) => {
            return oauth_error_redirect(
                &q.redirect_uri,
                q.state.as_deref(),
                "server_error",
                "could not issue code",
            )
            .into_response()
        }
    };

    // state goes back byte-for-byte; tamper checks are the client's job
    let mut params = vec![("code", code.code)];
    if let Some(s) = &q.state {
        params.push(("state", s.clone()));
    }
    let loc = url_append_query(q.redirect_uri.clone(), &params);
    Redirect::temporary(&loc).into_response()
}

// Token endpoint

#[derive(Debug, Deserialize)]
struct TokenRequest {
    grant_type: String,
    code: Option<String>,
    redirect_uri: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    code_verifier: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    expires_in: i64,
    scope: String,
}

/// client_secret_basic first, then the form body.
fn client_credentials(
    headers: &HeaderMap,
    form_id: Option<&str>,
    form_secret: Option<&str>,
) -> (Option<String>, Option<String>) {
    if let Some(auth_val) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    {
        if let Some(b64) = auth_val.strip_prefix("Basic ") {
            if let Ok(decoded) = Base64::decode_vec(b64) {
                if let Ok(s) = String::from_utf8(decoded) {
                    if let Some((id, sec)) = s.split_once(':') {
                        return (Some(id.to_string()), Some(sec.to_string()));
                    }
                }
            }
        }
    }

    (
        form_id.map(|s| s.to_string()),
        form_secret.map(|s| s.to_string()),
    )
}

fn invalid_client_response() -> Response {
    json_with_headers(
        StatusCode::UNAUTHORIZED,
        json!({"error":"invalid_client"}),
        &[(
            "www-authenticate",
            "Basic realm=\"token\", error=\"invalid_client\"".to_string(),
        )],
    )
}

async fn oauth_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<TokenRequest>,
) -> Response {
    match req.grant_type.as_str() {
        "authorization_code" => handle_authorization_code_grant(state, headers, req).await,
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error":"unsupported_grant_type"})),
        )
            .into_response(),
    }
}

async fn handle_authorization_code_grant(
    state: AppState,
    headers: HeaderMap,
    req: TokenRequest,
) -> Response {
    let (client_id, client_secret) =
        client_credentials(&headers, req.client_id.as_deref(), req.client_secret.as_deref());
    let Some(client_id) = client_id else {
        return invalid_client_response();
    };

    let client = match storage::get_client(&state.db, &client_id).await {
        Ok(Some(c)) => c,
        _ => return invalid_client_response(),
    };

    // Enforce the client's registered token endpoint auth method; public
    // clients authenticate by identifier alone.
    if !client.is_public() {
        let Some(secret) = client_secret else {
            return invalid_client_response();
        };
        if !storage::verify_client_secret(&client, &secret) {
            return invalid_client_response();
        }
    }

    let code = match req.code {
        Some(c) => c,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error":"invalid_request","error_description":"code required"})),
            )
                .into_response()
        }
    };

    // Missing, expired, and foreign codes are all the same invalid_grant
    let code_row = match storage::get_auth_code(&state.db, &code, &client.client_id).await {
        Ok(Some(c)) => c,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error":"invalid_grant"})),
            )
                .into_response()
        }
    };

    let redirect_uri = req.redirect_uri.unwrap_or_default();
    if code_row.redirect_uri != redirect_uri {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error":"invalid_grant"})),
        )
            .into_response();
    }

    let verifier = match &req.code_verifier {
        Some(v) => v,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    json!({"error":"invalid_request","error_description":"code_verifier required"}),
                ),
            )
                .into_response()
        }
    };
    if code_row.code_challenge_method != "S256" || !pkce_matches(verifier, &code_row.code_challenge)
    {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error":"invalid_grant","error_description":"pkce verification failed"})),
        )
            .into_response();
    }

    // Single use: whoever deletes the row redeems it; a concurrent
    // redemption that lost the delete gets invalid_grant.
    match storage::delete_auth_code(&state.db, &code_row.code).await {
        Ok(true) => {}
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error":"invalid_grant"})),
            )
                .into_response()
        }
    }

    let (token, access_token) = match storage::issue_token(
        &state.db,
        &client.client_id,
        Some(code_row.blogger_id),
        &code_row.scope,
        TOKEN_TTL_SECS,
    )
    .await
    {
        Ok(pair) => pair,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error":"server_error","details":e.to_string()})),
            )
                .into_response()
        }
    };

    let resp = TokenResponse {
        access_token,
        token_type: token.token_type,
        expires_in: token.expires_in,
        scope: token.scope,
    };

    // Cache-Control: no-store as required by OAuth 2.0
    json_with_headers(
        StatusCode::OK,
        serde_json::to_value(resp).unwrap_or_default(),
        &[
            ("cache-control", "no-store".to_string()),
            ("pragma", "no-cache".to_string()),
        ],
    )
}

// Revocation endpoint (RFC 7009)

#[derive(Debug, Deserialize)]
struct RevokeRequest {
    token: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

async fn oauth_revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(req): Form<RevokeRequest>,
) -> Response {
    let (client_id, _secret) =
        client_credentials(&headers, req.client_id.as_deref(), req.client_secret.as_deref());

    // The authorization server responds with 200 whether the token was
    // revoked or not, to prevent token scanning.
    if let Some(client_id) = client_id {
        let _ = storage::revoke_token(&state.db, &req.token, &client_id).await;
    }

    Response::builder()
        .status(StatusCode::OK)
        .body(Body::empty())
        .unwrap_or_default()
}

// Resource protector

fn invalid_token_response() -> Response {
    json_with_headers(
        StatusCode::UNAUTHORIZED,
        json!({"error":"invalid_token"}),
        &[(
            "www-authenticate",
            "Bearer realm=\"api\", error=\"invalid_token\"".to_string(),
        )],
    )
}

/// Resolve and verify the bearer token before any handler logic runs:
/// selector lookup, constant-time validator check, revocation, expiry,
/// then the declared scope.
async fn authenticate_bearer(
    state: &AppState,
    headers: &HeaderMap,
    required_scope: &str,
) -> Result<(storage::Token, storage::Blogger), Response> {
    let token_str = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string());
    let Some(token_str) = token_str else {
        return Err(invalid_token_response());
    };

    let token = match storage::authenticate_token(&state.db, &token_str).await {
        Ok(Some(t)) => t,
        _ => return Err(invalid_token_response()),
    };

    if !token.scope_contains(required_scope) {
        return Err(json_with_headers(
            StatusCode::FORBIDDEN,
            json!({"error":"insufficient_scope"}),
            &[(
                "www-authenticate",
                "Bearer realm=\"api\", error=\"insufficient_scope\"".to_string(),
            )],
        ));
    }

    let blogger = match token.blogger_id {
        Some(id) => match storage::get_blogger(&state.db, id).await {
            Ok(Some(b)) => b,
            _ => return Err(invalid_token_response()),
        },
        None => return Err(invalid_token_response()),
    };

    Ok((token, blogger))
}

// Blog API

#[derive(Debug, Deserialize)]
struct PostBlogRequest {
    origin: OriginSpec,
    commit: String,
}

#[derive(Debug, Deserialize)]
struct OriginSpec {
    #[serde(alias = "Github")]
    github: Option<GithubOrigin>,
}

#[derive(Debug, Deserialize)]
struct GithubOrigin {
    repo: String,
}

async fn api_post_blog(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<PostBlogRequest>,
) -> Response {
    let (_token, blogger) = match authenticate_bearer(&state, &headers, "blog").await {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    let Some(origin) = req.origin.github else {
        return oauth_error_json(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "only github origin is supported for now",
        );
    };

    let commit = match state
        .commits
        .fetch(&origin.repo, &req.commit, blogger.gh_token.as_deref())
        .await
    {
        Ok(Some(c)) => c,
        Ok(None) => {
            return oauth_error_json(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "commit not found on github -- perhaps you need to push first?",
            )
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error":"server_error","details":e.to_string()})),
            )
                .into_response()
        }
    };

    let (repo, repo_created) = match storage::get_or_create_repo(&state.db, &origin.repo).await {
        Ok(pair) => pair,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error":"server_error","details":e.to_string()})),
            )
                .into_response()
        }
    };

    if storage::create_commit_post(
        &state.db,
        &req.commit,
        &commit.message,
        commit.committed_at,
        repo.id,
        blogger.id,
    )
    .await
    .is_err()
    {
        return oauth_error_json(
            StatusCode::BAD_REQUEST,
            "conflict",
            "seems like it's already blogged!",
        );
    }

    // First sighting of this repo: mirror it in the background.
    if repo_created {
        let details = json!({"full_name": repo.full_name});
        if let Err(e) =
            storage::enqueue_task(&state.db, tasks::KIND_CLONE, &details, Some(blogger.id)).await
        {
            tracing::error!(error = %e, repo = %repo.full_name, "could not enqueue clone task");
        }
    }

    (StatusCode::OK, Json(json!({"sup": "yo"}))).into_response()
}

async fn api_put_blog(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(sha): Path<String>,
) -> Response {
    let (_token, blogger) = match authenticate_bearer(&state, &headers, "blog").await {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    let post = match storage::get_commit_post_by_hex(&state.db, &sha).await {
        Ok(Some(p)) => p,
        _ => return (StatusCode::NOT_FOUND, Json(json!({"error":"not_found"}))).into_response(),
    };
    if post.blogger_id != blogger.id {
        return (StatusCode::FORBIDDEN, Json(json!({"error":"forbidden"}))).into_response();
    }

    let repo = match storage::get_repo(&state.db, post.repo_id).await {
        Ok(Some(r)) => r,
        _ => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error":"server_error"})),
            )
                .into_response()
        }
    };

    let commit = match state
        .commits
        .fetch(&repo.full_name, &sha, blogger.gh_token.as_deref())
        .await
    {
        Ok(Some(c)) => c,
        Ok(None) => {
            return oauth_error_json(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "commit not found on github -- perhaps you need to push first?",
            )
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error":"server_error","details":e.to_string()})),
            )
                .into_response()
        }
    };

    if let Err(e) = storage::update_commit_post_message(&state.db, post.id, &commit.message).await {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error":"server_error","details":e.to_string()})),
        )
            .into_response();
    }

    (StatusCode::OK, Json(json!({"ok": true}))).into_response()
}

async fn api_delete_blog(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(sha): Path<String>,
) -> Response {
    let (_token, blogger) = match authenticate_bearer(&state, &headers, "blog").await {
        Ok(pair) => pair,
        Err(resp) => return resp,
    };

    let post = match storage::get_commit_post_by_hex(&state.db, &sha).await {
        Ok(Some(p)) => p,
        _ => return (StatusCode::NOT_FOUND, Json(json!({"error":"not_found"}))).into_response(),
    };
    if post.blogger_id != blogger.id {
        return (StatusCode::FORBIDDEN, Json(json!({"error":"forbidden"}))).into_response();
    }

    if let Err(e) = storage::delete_commit_post(&state.db, post.id).await {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error":"server_error","details":e.to_string()})),
        )
            .into_response();
    }

    (StatusCode::OK, Json(json!({"ok": true}))).into_response()
}

// Client registration

#[derive(Debug, Deserialize)]
struct RegisterClientRequest {
    name: String,
    homepage_uri: Option<String>,
    redirect_uris: Vec<String>,
    scopes: Option<Vec<String>>,
    token_endpoint_auth_method: Option<String>,
}

#[derive(Debug, Serialize)]
struct RegisterClientResponse {
    client_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
    client_name: String,
    redirect_uris: Vec<String>,
    scopes: Vec<String>,
    token_endpoint_auth_method: String,
    client_id_issued_at: i64,
}

async fn register_client(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterClientRequest>,
) -> Response {
    let Some(session) = current_session(&state, &headers).await else {
        return oauth_error_json(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "log in to register a client application",
        );
    };

    if req.redirect_uris.is_empty() {
        return oauth_error_json(
            StatusCode::BAD_REQUEST,
            "invalid_client_metadata",
            "redirect_uris required",
        );
    }

    let method = req
        .token_endpoint_auth_method
        .unwrap_or_else(|| storage::AUTH_METHOD_NONE.to_string());
    if ![
        storage::AUTH_METHOD_NONE,
        storage::AUTH_METHOD_BASIC,
        storage::AUTH_METHOD_POST,
    ]
    .contains(&method.as_str())
    {
        return oauth_error_json(
            StatusCode::BAD_REQUEST,
            "invalid_client_metadata",
            "unsupported token_endpoint_auth_method",
        );
    }

    let input = storage::NewClient {
        name: req.name,
        homepage_uri: req.homepage_uri,
        redirect_uris: req.redirect_uris,
        grant_types: vec!["authorization_code".to_string()],
        scopes: req.scopes.unwrap_or_else(|| vec!["blog".to_string()]),
        token_endpoint_auth_method: method,
        dev_id: Some(session.blogger_id),
    };

    match storage::create_client(&state.db, input).await {
        Ok((client, secret)) => {
            let resp = RegisterClientResponse {
                client_id: client.client_id,
                client_secret: secret,
                client_name: client.name,
                redirect_uris: client.redirect_uris,
                scopes: client.scopes,
                token_endpoint_auth_method: client.token_endpoint_auth_method,
                client_id_issued_at: client.created_at,
            };
            (
                StatusCode::CREATED,
                Json(serde_json::to_value(resp).unwrap_or_default()),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

// Login & account pages

async fn index() -> impl IntoResponse {
    Html(
        "<!doctype html>\n<html><body>\n<h1>commit --blog</h1>\n\
         <p>blog your commits.</p>\n\
         <p><a href=\"/login\">log in</a></p>\n\
         </body></html>",
    )
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    return_to: Option<String>,
}

async fn login_page(Query(q): Query<LoginQuery>) -> impl IntoResponse {
    let return_to = q.return_to.unwrap_or_default();
    Html(format!(
        "<!doctype html>\n<html><body>\n<h1>commit --blog</h1>\n\
         <form method=\"post\" action=\"/login\">\n\
         <input type=\"hidden\" name=\"return_to\" value=\"{}\">\n\
         <label>username <input name=\"username\"></label>\n\
         <label>password <input name=\"password\" type=\"password\"></label>\n\
         <button type=\"submit\">Log in</button>\n\
         </form>\n</body></html>",
        html_escape(&return_to),
    ))
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
    return_to: Option<String>,
}

async fn login_submit(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Response {
    let blogger_id = match storage::verify_blogger_password(&state.db, &form.username, &form.password)
        .await
    {
        Ok(Some(id)) => id,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Html("<p>bad username or password</p>"),
            )
                .into_response()
        }
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error":"server_error"})),
            )
                .into_response()
        }
    };

    let session = match storage::create_session(&state.db, blogger_id, SESSION_TTL_SECS).await {
        Ok(s) => s,
        Err(_) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error":"server_error"})),
            )
                .into_response()
        }
    };

    // Only same-site paths may be resumed after login
    let target = match form.return_to {
        Some(t) if t.starts_with('/') && !t.starts_with("//") => t,
        _ => "/".to_string(),
    };

    let cookie = SessionCookie::new(session.session_id).to_cookie_header(&state.settings);
    let mut resp = Redirect::temporary(&target).into_response();
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        resp.headers_mut()
            .insert(axum::http::header::SET_COOKIE, value);
    }
    resp
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(cookie) = SessionCookie::from_headers(&headers) {
        let _ = storage::delete_session(&state.db, &cookie.session_id).await;
    }

    let mut resp = Redirect::temporary("/").into_response();
    if let Ok(value) = HeaderValue::from_str(&SessionCookie::delete_cookie_header()) {
        resp.headers_mut()
            .insert(axum::http::header::SET_COOKIE, value);
    }
    resp
}

#[derive(Debug, Deserialize)]
struct EmailForm {
    email: String,
    csrf_token: String,
}

/// Store an unconfirmed address and queue the confirmation mail.
async fn account_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<EmailForm>,
) -> Response {
    let Some(session) = current_session(&state, &headers).await else {
        return oauth_error_json(StatusCode::UNAUTHORIZED, "unauthorized", "log in first");
    };
    if form.csrf_token != session.csrf_token {
        return oauth_error_json(StatusCode::BAD_REQUEST, "invalid_request", "bad csrf token");
    }

    let blogger = match storage::get_blogger(&state.db, session.blogger_id).await {
        Ok(Some(b)) => b,
        _ => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error":"server_error"})),
            )
                .into_response()
        }
    };

    let token = match storage::set_pending_email(&state.db, blogger.id, &form.email).await {
        Ok(t) => t,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error":"server_error","details":e.to_string()})),
            )
                .into_response()
        }
    };

    let confirm_url = format!(
        "{}/account/email/confirm?token={}",
        state.settings.base_url(),
        urlencoded(&token)
    );
    let details = json!({
        "message": "confirm_email",
        "recipient": form.email,
        "variables": {
            "username": blogger.username,
            "confirm_url": confirm_url,
        },
    });
    if let Err(e) =
        storage::enqueue_task(&state.db, tasks::KIND_EMAIL, &details, Some(blogger.id)).await
    {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error":"server_error","details":e.to_string()})),
        )
            .into_response();
    }

    (StatusCode::OK, Json(json!({"ok": true}))).into_response()
}

#[derive(Debug, Deserialize)]
struct ConfirmQuery {
    token: String,
}

async fn account_email_confirm(
    State(state): State<AppState>,
    Query(q): Query<ConfirmQuery>,
) -> Response {
    match storage::confirm_email(&state.db, &q.token).await {
        Ok(true) => Html("<p>Email confirmed. Thanks!</p>").into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Html("<p>Unknown or already-used confirmation link.</p>"),
        )
            .into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error":"server_error"})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_s256_known_vector() {
        // RFC 7636 appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            pkce_s256(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
        assert!(pkce_matches(
            verifier,
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        ));
        assert!(!pkce_matches(verifier, "not-the-challenge"));
    }

    #[test]
    fn test_url_append_query() {
        let url = url_append_query(
            "http://localhost/cb".to_string(),
            &[("code", "abc".to_string()), ("state", "x y".to_string())],
        );
        assert_eq!(url, "http://localhost/cb?code=abc&state=x+y");

        let url = url_append_query("http://localhost/cb?k=1".to_string(), &[("a", "b".into())]);
        assert_eq!(url, "http://localhost/cb?k=1&a=b");
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(
            html_escape("<script>\"&\"</script>"),
            "&lt;script&gt;&quot;&amp;&quot;&lt;/script&gt;"
        );
    }

    #[test]
    fn test_scope_description() {
        assert_eq!(scope_description("blog"), "Create, view, and update posts");
        // unknown scopes fall back to their raw name
        assert_eq!(scope_description("mystery"), "mystery");
    }
}
