use async_trait::async_trait;
use axum::Router;
use commit_blog::emails::LogMailer;
use commit_blog::errors::BlogError;
use commit_blog::github::{CommitFetcher, RemoteCommit};
use commit_blog::session::SESSION_COOKIE_NAME;
use commit_blog::settings::Settings;
use commit_blog::storage;
use commit_blog::web::{router, AppState};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};

/// Commit fetcher that never finds anything, for flows that stop at auth.
pub struct NoCommits;

#[async_trait]
impl CommitFetcher for NoCommits {
    async fn fetch(
        &self,
        _full_name: &str,
        _sha: &str,
        _gh_token: Option<&str>,
    ) -> Result<Option<RemoteCommit>, BlogError> {
        Ok(None)
    }
}

/// Commit fetcher that answers every lookup with a fixed message.
pub struct StaticCommits {
    pub message: String,
}

#[async_trait]
impl CommitFetcher for StaticCommits {
    async fn fetch(
        &self,
        _full_name: &str,
        _sha: &str,
        _gh_token: Option<&str>,
    ) -> Result<Option<RemoteCommit>, BlogError> {
        Ok(Some(RemoteCommit {
            message: self.message.clone(),
            committed_at: 1_700_000_000,
        }))
    }
}

pub struct TestApp {
    pub router: Router,
    pub db: DatabaseConnection,
    _db_file: NamedTempFile,
    _repo_dir: TempDir,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with_commits(Arc::new(NoCommits)).await
    }

    pub async fn spawn_with_commits(commits: Arc<dyn CommitFetcher>) -> Self {
        let db_file = NamedTempFile::new().expect("Failed to create temp db file");
        let db_url = format!(
            "sqlite://{}?mode=rwc",
            db_file.path().to_str().expect("Invalid temp file path")
        );
        let db = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");
        migration::Migrator::up(&db, None)
            .await
            .expect("Failed to run migrations");

        let repo_dir = TempDir::new().expect("Failed to create repo dir");
        let mut settings = Settings::default();
        settings.git.repo_dir = repo_dir.path().to_path_buf();
        let settings = Arc::new(settings);

        let state = AppState {
            settings,
            db: db.clone(),
            mailer: Arc::new(LogMailer),
            commits,
        };

        Self {
            router: router(state),
            db,
            _db_file: db_file,
            _repo_dir: repo_dir,
        }
    }

    /// Create a blogger with a live session, returning the cookie header
    /// value plus the session (tests need its csrf token).
    pub async fn login(&self, username: &str) -> (String, storage::Session) {
        let blogger = storage::create_blogger(&self.db, username, "correct horse battery", None)
            .await
            .expect("Failed to create blogger");
        let session = storage::create_session(&self.db, blogger.id, 3600)
            .await
            .expect("Failed to create session");
        let cookie = format!("{}={}", SESSION_COOKIE_NAME, session.session_id);
        (cookie, session)
    }

    /// Register the public CLI client the end-to-end scenario uses.
    pub async fn register_cli_client(&self, redirect_uri: &str) -> storage::Client {
        let (client, secret) = storage::create_client(
            &self.db,
            storage::NewClient {
                name: "commit --cli".to_string(),
                homepage_uri: None,
                redirect_uris: vec![redirect_uri.to_string()],
                grant_types: vec!["authorization_code".to_string()],
                scopes: vec!["blog".to_string()],
                token_endpoint_auth_method: storage::AUTH_METHOD_NONE.to_string(),
                dev_id: None,
            },
        )
        .await
        .expect("Failed to register client");
        assert!(secret.is_none(), "public clients have no secret");
        client
    }
}
