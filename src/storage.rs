use crate::entities;
use crate::errors::BlogError;
use crate::settings::Database as DbCfg;
use crate::tokens;
use base64ct::Encoding;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Database, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, Set,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const AUTH_METHOD_NONE: &str = "none";
pub const AUTH_METHOD_BASIC: &str = "client_secret_basic";
pub const AUTH_METHOD_POST: &str = "client_secret_post";

/// Bounded retry for the contended pending->in-flight task transition.
const CLAIM_MAX_RETRY: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blogger {
    pub id: i32,
    pub username: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub password_hash: String,
    pub gh_token: Option<String>,
    pub email: Option<String>,
    pub email_confirmed: i64,
    pub email_token: Option<String>,
    pub admin: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub secret_hash: String,
    pub name: String,
    pub homepage_uri: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub scopes: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub dev_id: Option<i32>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClient {
    pub name: String,
    pub homepage_uri: Option<String>,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub scopes: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub dev_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthCode {
    pub code: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub blogger_id: i32,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: i32,
    pub client_id: String,
    pub blogger_id: Option<i32>,
    pub token_type: String,
    pub scope: String,
    pub issued_at: i64,
    pub expires_in: i64,
    pub selector: String,
    pub validator_hash: String,
    pub revoked_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub blogger_id: i32,
    pub csrf_token: String,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repo {
    pub id: i32,
    pub name: Option<String>,
    pub full_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitPost {
    pub id: i32,
    pub hex: String,
    pub message: String,
    pub created: i64,
    pub repo_id: i32,
    pub blogger_id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i32,
    pub task: String,
    pub details: String,
    pub created: i64,
    pub started: Option<i64>,
    pub completed: Option<i64>,
    pub blogger_id: Option<i32>,
}

impl Client {
    pub fn is_public(&self) -> bool {
        self.token_endpoint_auth_method == AUTH_METHOD_NONE
    }

    pub fn has_redirect_uri(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == uri)
    }

    /// Requested scope (space-separated) must be a subset of the client's
    /// registered scopes.
    pub fn allows_scope(&self, requested: &str) -> bool {
        requested
            .split_whitespace()
            .all(|s| self.scopes.iter().any(|allowed| allowed == s))
    }
}

impl Token {
    pub fn expires_at(&self) -> i64 {
        self.issued_at + self.expires_in
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_valid(&self, now: i64) -> bool {
        !self.is_revoked() && now < self.expires_at()
    }

    pub fn scope_contains(&self, required: &str) -> bool {
        self.scope.split_whitespace().any(|s| s == required)
    }
}

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, BlogError> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

fn random_id() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

fn hash_secret(secret: &str) -> Result<String, BlogError> {
    use argon2::password_hash::{rand_core::OsRng, SaltString};
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| BlogError::Other(format!("secret hashing failed: {}", e)))
}

fn verify_secret(secret: &str, hash: &str) -> bool {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

// Blogger functions

fn blogger_from(model: entities::blogger::Model) -> Blogger {
    Blogger {
        id: model.id,
        username: model.username,
        name: model.name,
        avatar_url: model.avatar_url,
        password_hash: model.password_hash,
        gh_token: model.gh_token,
        email: model.email,
        email_confirmed: model.email_confirmed,
        email_token: model.email_token,
        admin: model.admin,
        created_at: model.created_at,
    }
}

pub async fn create_blogger(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
    name: Option<String>,
) -> Result<Blogger, BlogError> {
    let created_at = Utc::now().timestamp();
    let password_hash = hash_secret(password)?;

    let blogger = entities::blogger::ActiveModel {
        id: NotSet,
        username: Set(username.to_string()),
        name: Set(name.clone()),
        avatar_url: Set(None),
        password_hash: Set(password_hash),
        gh_token: Set(None),
        email: Set(None),
        email_confirmed: Set(0),
        email_token: Set(None),
        admin: Set(0),
        created_at: Set(created_at),
    };

    let model = blogger.insert(db).await?;
    Ok(blogger_from(model))
}

pub async fn get_blogger(db: &DatabaseConnection, id: i32) -> Result<Option<Blogger>, BlogError> {
    use entities::blogger::Entity;

    Ok(Entity::find_by_id(id).one(db).await?.map(blogger_from))
}

pub async fn get_blogger_by_username(
    db: &DatabaseConnection,
    username: &str,
) -> Result<Option<Blogger>, BlogError> {
    use entities::blogger::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Username.eq(username))
        .one(db)
        .await?
        .map(blogger_from))
}

pub async fn verify_blogger_password(
    db: &DatabaseConnection,
    username: &str,
    password: &str,
) -> Result<Option<i32>, BlogError> {
    let Some(blogger) = get_blogger_by_username(db, username).await? else {
        return Ok(None);
    };

    if verify_secret(password, &blogger.password_hash) {
        Ok(Some(blogger.id))
    } else {
        Ok(None)
    }
}

/// Store an unconfirmed address and mint the confirmation token mailed to
/// the blogger.
pub async fn set_pending_email(
    db: &DatabaseConnection,
    blogger_id: i32,
    email: &str,
) -> Result<String, BlogError> {
    use entities::blogger::Entity;

    let model = Entity::find_by_id(blogger_id)
        .one(db)
        .await?
        .ok_or_else(|| BlogError::Other(format!("blogger not found: {}", blogger_id)))?;

    let token = random_id();
    let mut active: entities::blogger::ActiveModel = model.into();
    active.email = Set(Some(email.to_string()));
    active.email_confirmed = Set(0);
    active.email_token = Set(Some(token.clone()));
    active.update(db).await?;

    Ok(token)
}

pub async fn confirm_email(db: &DatabaseConnection, token: &str) -> Result<bool, BlogError> {
    use entities::blogger::{Column, Entity};

    let Some(model) = Entity::find()
        .filter(Column::EmailToken.eq(token))
        .one(db)
        .await?
    else {
        return Ok(false);
    };

    let mut active: entities::blogger::ActiveModel = model.into();
    active.email_confirmed = Set(1);
    active.email_token = Set(None);
    active.update(db).await?;

    Ok(true)
}

// Session functions

pub async fn create_session(
    db: &DatabaseConnection,
    blogger_id: i32,
    ttl_secs: i64,
) -> Result<Session, BlogError> {
    let session_id = random_id();
    let csrf_token = random_id();
    let now = Utc::now().timestamp();
    let expires_at = now + ttl_secs;

    let session = entities::session::ActiveModel {
        session_id: Set(session_id.clone()),
        blogger_id: Set(blogger_id),
        csrf_token: Set(csrf_token.clone()),
        created_at: Set(now),
        expires_at: Set(expires_at),
    };

    session.insert(db).await?;

    Ok(Session {
        session_id,
        blogger_id,
        csrf_token,
        created_at: now,
        expires_at,
    })
}

pub async fn get_session(
    db: &DatabaseConnection,
    session_id: &str,
) -> Result<Option<Session>, BlogError> {
    use entities::session::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::SessionId.eq(session_id))
        .one(db)
        .await?
    {
        let now = Utc::now().timestamp();
        if now > model.expires_at {
            return Ok(None);
        }

        Ok(Some(Session {
            session_id: model.session_id,
            blogger_id: model.blogger_id,
            csrf_token: model.csrf_token,
            created_at: model.created_at,
            expires_at: model.expires_at,
        }))
    } else {
        Ok(None)
    }
}

pub async fn delete_session(db: &DatabaseConnection, session_id: &str) -> Result<(), BlogError> {
    use entities::session::{Column, Entity};

    Entity::delete_many()
        .filter(Column::SessionId.eq(session_id))
        .exec(db)
        .await?;

    Ok(())
}

pub async fn cleanup_expired_sessions(db: &DatabaseConnection) -> Result<u64, BlogError> {
    use entities::session::{Column, Entity};

    let now = Utc::now().timestamp();
    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

// Client functions

fn client_from(model: entities::client::Model) -> Result<Client, BlogError> {
    let redirect_uris: Vec<String> = serde_json::from_str(&model.redirect_uris)?;
    let grant_types: Vec<String> = serde_json::from_str(&model.grant_types)?;
    let scopes: Vec<String> = serde_json::from_str(&model.scopes)?;

    Ok(Client {
        client_id: model.client_id,
        secret_hash: model.secret_hash,
        name: model.name,
        homepage_uri: model.homepage_uri,
        redirect_uris,
        grant_types,
        scopes,
        token_endpoint_auth_method: model.token_endpoint_auth_method,
        dev_id: model.dev_id,
        created_at: model.created_at,
    })
}

/// Register a client. Confidential clients get a generated secret returned
/// exactly once; only its argon2 hash is stored. Public clients
/// (`token_endpoint_auth_method = "none"`) have no secret at all.
pub async fn create_client(
    db: &DatabaseConnection,
    input: NewClient,
) -> Result<(Client, Option<String>), BlogError> {
    let client_id = random_id();
    let created_at = Utc::now().timestamp();

    let (secret, secret_hash) = if input.token_endpoint_auth_method == AUTH_METHOD_NONE {
        (None, String::new())
    } else {
        let secret = random_id();
        let hash = hash_secret(&secret)?;
        (Some(secret), hash)
    };

    let client = entities::client::ActiveModel {
        id: NotSet,
        client_id: Set(client_id.clone()),
        secret_hash: Set(secret_hash.clone()),
        name: Set(input.name.clone()),
        homepage_uri: Set(input.homepage_uri.clone()),
        redirect_uris: Set(serde_json::to_string(&input.redirect_uris)?),
        grant_types: Set(serde_json::to_string(&input.grant_types)?),
        scopes: Set(serde_json::to_string(&input.scopes)?),
        token_endpoint_auth_method: Set(input.token_endpoint_auth_method.clone()),
        dev_id: Set(input.dev_id),
        created_at: Set(created_at),
    };

    client.insert(db).await?;

    Ok((
        Client {
            client_id,
            secret_hash,
            name: input.name,
            homepage_uri: input.homepage_uri,
            redirect_uris: input.redirect_uris,
            grant_types: input.grant_types,
            scopes: input.scopes,
            token_endpoint_auth_method: input.token_endpoint_auth_method,
            dev_id: input.dev_id,
            created_at,
        },
        secret,
    ))
}

pub async fn get_client(
    db: &DatabaseConnection,
    client_id: &str,
) -> Result<Option<Client>, BlogError> {
    use entities::client::{Column, Entity};

    match Entity::find()
        .filter(Column::ClientId.eq(client_id))
        .one(db)
        .await?
    {
        Some(model) => Ok(Some(client_from(model)?)),
        None => Ok(None),
    }
}

pub fn verify_client_secret(client: &Client, secret: &str) -> bool {
    if client.secret_hash.is_empty() {
        return false;
    }
    verify_secret(secret, &client.secret_hash)
}

// Authorization code functions

fn auth_code_from(model: entities::auth_code::Model) -> AuthCode {
    AuthCode {
        code: model.code,
        client_id: model.client_id,
        redirect_uri: model.redirect_uri,
        scope: model.scope,
        blogger_id: model.blogger_id,
        code_challenge: model.code_challenge,
        code_challenge_method: model.code_challenge_method,
        created_at: model.created_at,
        expires_at: model.expires_at,
    }
}

pub async fn issue_auth_code(
    db: &DatabaseConnection,
    client_id: &str,
    redirect_uri: &str,
    scope: &str,
    blogger_id: i32,
    code_challenge: &str,
    code_challenge_method: &str,
    ttl_secs: i64,
) -> Result<AuthCode, BlogError> {
    let code = random_id();
    let now = Utc::now().timestamp();

    let auth_code = entities::auth_code::ActiveModel {
        code: Set(code.clone()),
        client_id: Set(client_id.to_string()),
        redirect_uri: Set(redirect_uri.to_string()),
        scope: Set(scope.to_string()),
        blogger_id: Set(blogger_id),
        code_challenge: Set(code_challenge.to_string()),
        code_challenge_method: Set(code_challenge_method.to_string()),
        created_at: Set(now),
        expires_at: Set(now + ttl_secs),
    };

    let model = auth_code.insert(db).await?;
    Ok(auth_code_from(model))
}

/// Expired codes are indistinguishable from missing ones.
pub async fn get_auth_code(
    db: &DatabaseConnection,
    code: &str,
    client_id: &str,
) -> Result<Option<AuthCode>, BlogError> {
    use entities::auth_code::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::Code.eq(code))
        .filter(Column::ClientId.eq(client_id))
        .one(db)
        .await?
    {
        let now = Utc::now().timestamp();
        if now > model.expires_at {
            return Ok(None);
        }
        Ok(Some(auth_code_from(model)))
    } else {
        Ok(None)
    }
}

/// Single use: the row is deleted on redemption. Returns false when a
/// concurrent redemption already consumed it.
pub async fn delete_auth_code(db: &DatabaseConnection, code: &str) -> Result<bool, BlogError> {
    use entities::auth_code::{Column, Entity};

    let result = Entity::delete_many()
        .filter(Column::Code.eq(code))
        .exec(db)
        .await?;

    Ok(result.rows_affected == 1)
}

pub async fn cleanup_expired_auth_codes(db: &DatabaseConnection) -> Result<u64, BlogError> {
    use entities::auth_code::{Column, Entity};

    let now = Utc::now().timestamp();
    let result = Entity::delete_many()
        .filter(Column::ExpiresAt.lt(now))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

// Token functions

fn token_from(model: entities::token::Model) -> Token {
    Token {
        id: model.id,
        client_id: model.client_id,
        blogger_id: model.blogger_id,
        token_type: model.token_type,
        scope: model.scope,
        issued_at: model.issued_at,
        expires_in: model.expires_in,
        selector: model.selector,
        validator_hash: model.validator_hash,
        revoked_at: model.revoked_at,
    }
}

/// Issue a bearer token. The full token string is returned exactly once;
/// only the selector and the hashed validator are stored.
pub async fn issue_token(
    db: &DatabaseConnection,
    client_id: &str,
    blogger_id: Option<i32>,
    scope: &str,
    expires_in: i64,
) -> Result<(Token, String), BlogError> {
    let issued = tokens::encode();
    let now = Utc::now().timestamp();

    let token = entities::token::ActiveModel {
        id: NotSet,
        client_id: Set(client_id.to_string()),
        blogger_id: Set(blogger_id),
        token_type: Set("Bearer".to_string()),
        scope: Set(scope.to_string()),
        issued_at: Set(now),
        expires_in: Set(expires_in),
        selector: Set(issued.selector.clone()),
        validator_hash: Set(issued.validator_hash.clone()),
        revoked_at: Set(None),
    };

    let model = token.insert(db).await?;
    Ok((token_from(model), issued.token))
}

/// Resolve a presented bearer string to a live token: selector lookup,
/// constant-time validator check, then revocation and expiry.
pub async fn authenticate_token(
    db: &DatabaseConnection,
    presented: &str,
) -> Result<Option<Token>, BlogError> {
    use entities::token::{Column, Entity};

    let parts = tokens::decode(presented);

    let Some(model) = Entity::find()
        .filter(Column::Selector.eq(parts.selector.as_str()))
        .one(db)
        .await?
    else {
        return Ok(None);
    };

    if !tokens::validator_hash_matches(&parts.validator_hash, &model.validator_hash) {
        return Ok(None);
    }

    let token = token_from(model);
    if !token.is_valid(Utc::now().timestamp()) {
        return Ok(None);
    }

    Ok(Some(token))
}

/// RFC 7009 revocation: verify the presented string against the client's
/// own live tokens and soft-delete on match. Lookup misses and validator
/// mismatches are not reported to the caller.
pub async fn revoke_token(
    db: &DatabaseConnection,
    presented: &str,
    client_id: &str,
) -> Result<(), BlogError> {
    use entities::token::{Column, Entity};

    let parts = tokens::decode(presented);

    let Some(model) = Entity::find()
        .filter(Column::Selector.eq(parts.selector.as_str()))
        .filter(Column::ClientId.eq(client_id))
        .filter(Column::RevokedAt.is_null())
        .one(db)
        .await?
    else {
        return Ok(());
    };

    if !tokens::validator_hash_matches(&parts.validator_hash, &model.validator_hash) {
        return Ok(());
    }

    let mut active: entities::token::ActiveModel = model.into();
    active.revoked_at = Set(Some(Utc::now().timestamp()));
    active.update(db).await?;

    Ok(())
}

// Repo functions

fn repo_from(model: entities::repo::Model) -> Repo {
    Repo {
        id: model.id,
        name: model.name,
        full_name: model.full_name,
        description: model.description,
    }
}

pub async fn get_repo(db: &DatabaseConnection, id: i32) -> Result<Option<Repo>, BlogError> {
    use entities::repo::Entity;

    Ok(Entity::find_by_id(id).one(db).await?.map(repo_from))
}

pub async fn get_repo_by_full_name(
    db: &DatabaseConnection,
    full_name: &str,
) -> Result<Option<Repo>, BlogError> {
    use entities::repo::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::FullName.eq(full_name))
        .one(db)
        .await?
        .map(repo_from))
}

pub async fn get_or_create_repo(
    db: &DatabaseConnection,
    full_name: &str,
) -> Result<(Repo, bool), BlogError> {
    if let Some(repo) = get_repo_by_full_name(db, full_name).await? {
        return Ok((repo, false));
    }

    let name = full_name.split('/').next_back().map(|s| s.to_string());
    let repo = entities::repo::ActiveModel {
        id: NotSet,
        name: Set(name),
        full_name: Set(full_name.to_string()),
        description: Set(None),
    };

    let model = repo.insert(db).await?;
    Ok((repo_from(model), true))
}

// Commit post functions

fn commit_post_from(model: entities::commit_post::Model) -> CommitPost {
    CommitPost {
        id: model.id,
        hex: model.hex,
        message: model.message,
        created: model.created,
        repo_id: model.repo_id,
        blogger_id: model.blogger_id,
    }
}

/// Insert a post; the (hex, repo) unique index surfaces duplicates as a
/// database error for the caller to map to a conflict response.
pub async fn create_commit_post(
    db: &DatabaseConnection,
    hex: &str,
    message: &str,
    created: i64,
    repo_id: i32,
    blogger_id: i32,
) -> Result<CommitPost, BlogError> {
    let post = entities::commit_post::ActiveModel {
        id: NotSet,
        hex: Set(hex.to_string()),
        message: Set(message.to_string()),
        created: Set(created),
        repo_id: Set(repo_id),
        blogger_id: Set(blogger_id),
    };

    let model = post.insert(db).await?;
    Ok(commit_post_from(model))
}

pub async fn get_commit_post_by_hex(
    db: &DatabaseConnection,
    hex: &str,
) -> Result<Option<CommitPost>, BlogError> {
    use entities::commit_post::{Column, Entity};

    Ok(Entity::find()
        .filter(Column::Hex.eq(hex))
        .one(db)
        .await?
        .map(commit_post_from))
}

pub async fn update_commit_post_message(
    db: &DatabaseConnection,
    id: i32,
    message: &str,
) -> Result<(), BlogError> {
    use entities::commit_post::Entity;

    let model = Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| BlogError::Other(format!("commit post not found: {}", id)))?;

    let mut active: entities::commit_post::ActiveModel = model.into();
    active.message = Set(message.to_string());
    active.update(db).await?;

    Ok(())
}

pub async fn delete_commit_post(db: &DatabaseConnection, id: i32) -> Result<(), BlogError> {
    use entities::commit_post::Entity;

    Entity::delete_by_id(id).exec(db).await?;
    Ok(())
}

// Task queue functions

fn task_from(model: entities::task::Model) -> Task {
    Task {
        id: model.id,
        task: model.task,
        details: model.details,
        created: model.created,
        started: model.started,
        completed: model.completed,
        blogger_id: model.blogger_id,
    }
}

/// Producers insert pending tasks inline with their own flow.
pub async fn enqueue_task(
    db: &DatabaseConnection,
    kind: &str,
    details: &Value,
    blogger_id: Option<i32>,
) -> Result<Task, BlogError> {
    let task = entities::task::ActiveModel {
        id: NotSet,
        task: Set(kind.to_string()),
        details: Set(serde_json::to_string(details)?),
        created: Set(Utc::now().timestamp()),
        started: Set(None),
        completed: Set(None),
        blogger_id: Set(blogger_id),
    };

    let model = task.insert(db).await?;
    Ok(task_from(model))
}

/// Claim the oldest pending task, optionally filtered by kind.
///
/// The pending->in-flight transition is a single conditional update on
/// `started IS NULL`; a concurrent claimant makes it touch zero rows, in
/// which case we retry from the top, bounded. Returns None when no pending
/// task exists (or every attempt lost the race).
pub async fn claim_task(
    db: &DatabaseConnection,
    of_kind: Option<&str>,
) -> Result<Option<Task>, BlogError> {
    use entities::task::{Column, Entity};

    for _ in 0..CLAIM_MAX_RETRY {
        let mut query = Entity::find()
            .filter(Column::Started.is_null())
            .order_by_asc(Column::Created)
            .order_by_asc(Column::Id);
        if let Some(kind) = of_kind {
            query = query.filter(Column::Task.eq(kind));
        }

        let candidate = match query.one(db).await {
            Ok(Some(model)) => model,
            Ok(None) => return Ok(None),
            // lock contention; roll over into another attempt
            Err(_) => continue,
        };

        let now = Utc::now().timestamp();
        let claimed = Entity::update_many()
            .col_expr(Column::Started, Expr::value(Some(now)))
            .filter(Column::Id.eq(candidate.id))
            .filter(Column::Started.is_null())
            .exec(db)
            .await;

        match claimed {
            Ok(res) if res.rows_affected == 1 => {
                let mut task = task_from(candidate);
                task.started = Some(now);
                return Ok(Some(task));
            }
            // another consumer won the row, or the write conflicted
            Ok(_) | Err(_) => continue,
        }
    }

    Ok(None)
}

pub async fn complete_task(db: &DatabaseConnection, task_id: i32) -> Result<(), BlogError> {
    use entities::task::Entity;

    let model = Entity::find_by_id(task_id)
        .one(db)
        .await?
        .ok_or_else(|| BlogError::Other(format!("task not found: {}", task_id)))?;

    let mut active: entities::task::ActiveModel = model.into();
    active.completed = Set(Some(Utc::now().timestamp()));
    active.update(db).await?;

    Ok(())
}

pub async fn get_task(db: &DatabaseConnection, task_id: i32) -> Result<Option<Task>, BlogError> {
    use entities::task::Entity;

    Ok(Entity::find_by_id(task_id).one(db).await?.map(task_from))
}
