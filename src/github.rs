use crate::errors::BlogError;
use async_trait::async_trait;
use serde::Deserialize;

/// The fields of a commit this service depends on.
#[derive(Debug, Clone)]
pub struct RemoteCommit {
    pub message: String,
    pub committed_at: i64,
}

/// Fetches a commit from the blogger's git host so a post can be created
/// from it.
#[async_trait]
pub trait CommitFetcher: Send + Sync {
    async fn fetch(
        &self,
        full_name: &str,
        sha: &str,
        gh_token: Option<&str>,
    ) -> Result<Option<RemoteCommit>, BlogError>;
}

pub struct GithubCommits {
    http: reqwest::Client,
    api_base: String,
}

impl GithubCommits {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: "https://api.github.com".to_string(),
        }
    }
}

impl Default for GithubCommits {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct CommitPayload {
    commit: CommitInner,
}

#[derive(Debug, Deserialize)]
struct CommitInner {
    message: String,
    committer: Option<Signature>,
}

#[derive(Debug, Deserialize)]
struct Signature {
    date: Option<String>,
}

#[async_trait]
impl CommitFetcher for GithubCommits {
    async fn fetch(
        &self,
        full_name: &str,
        sha: &str,
        gh_token: Option<&str>,
    ) -> Result<Option<RemoteCommit>, BlogError> {
        let url = format!("{}/repos/{}/commits/{}", self.api_base, full_name, sha);

        let mut request = self
            .http
            .get(&url)
            .header(reqwest::header::USER_AGENT, "commit--blog")
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = gh_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BlogError::Other(format!("github request failed: {}", e)))?;

        // 404 covers both "no such commit" and "not pushed yet"
        if response.status() == reqwest::StatusCode::NOT_FOUND
            || response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY
        {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(BlogError::Other(format!(
                "github returned {} for {}",
                response.status(),
                url
            )));
        }

        let payload: CommitPayload = response
            .json()
            .await
            .map_err(|e| BlogError::Other(format!("github response parse failed: {}", e)))?;

        let committed_at = payload
            .commit
            .committer
            .and_then(|c| c.date)
            .and_then(|d| chrono::DateTime::parse_from_rfc3339(&d).ok())
            .map(|dt| dt.timestamp())
            .unwrap_or_else(|| chrono::Utc::now().timestamp());

        Ok(Some(RemoteCommit {
            message: payload.commit.message,
            committed_at,
        }))
    }
}
