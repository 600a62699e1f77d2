//! Deferred work: a polling consumer over the persisted task table.
//!
//! Producers insert pending rows inline with their own writes; a single
//! long-lived consumer claims rows at-most-once and dispatches on a closed
//! set of task kinds.

use crate::emails::{self, Mailer};
use crate::errors::BlogError;
use crate::git;
use crate::settings::Settings;
use crate::storage;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

pub const KIND_CLONE: &str = "clone";
pub const KIND_EMAIL: &str = "email";

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
pub struct TaskContext {
    pub db: DatabaseConnection,
    pub settings: Arc<Settings>,
    pub mailer: Arc<dyn Mailer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneDetails {
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailDetails {
    pub message: String,
    pub recipient: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

/// Every task kind the consumer knows, with its typed payload. Dispatch is
/// exhaustive; the stringly-typed table column only exists at the wire.
#[derive(Debug)]
pub enum TaskJob {
    Clone(CloneDetails),
    Email(EmailDetails),
}

impl TaskJob {
    pub fn parse(kind: &str, details: &str) -> Result<Self, BlogError> {
        match kind {
            KIND_CLONE => Ok(Self::Clone(serde_json::from_str(details)?)),
            KIND_EMAIL => Ok(Self::Email(serde_json::from_str(details)?)),
            other => Err(BlogError::UnknownTask(other.to_string())),
        }
    }
}

/// Long-lived consumer loop: claim, dispatch, mark complete.
///
/// A task kind this build does not recognize aborts the loop — it means
/// producer and consumer are out of step and someone must redeploy. A
/// handler failure only logs: the row stays in-flight (started set,
/// completed null) for an operator to find. The watch channel is the clean
/// shutdown hook.
pub async fn run(
    ctx: TaskContext,
    of_kind: Option<String>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BlogError> {
    match &of_kind {
        Some(kind) => info!(kind = %kind, "task runner started"),
        None => info!(
            "task runner started, handling: {}, {}",
            KIND_CLONE, KIND_EMAIL
        ),
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        let claimed = match storage::claim_task(&ctx.db, of_kind.as_deref()).await {
            Ok(task) => task,
            Err(e) => {
                error!(error = %e, "claiming a task failed");
                None
            }
        };

        let Some(task) = claimed else {
            tokio::select! {
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
                _ = shutdown.changed() => break,
            }
            continue;
        };

        let job = match TaskJob::parse(&task.task, &task.details) {
            Ok(job) => job,
            Err(e @ BlogError::UnknownTask(_)) => return Err(e),
            Err(e) => {
                // undecodable payload for a known kind: left in-flight
                error!(id = task.id, kind = %task.task, error = %e, "task details did not parse");
                continue;
            }
        };

        info!(id = task.id, kind = %task.task, "handling task");
        match execute(&ctx, job).await {
            Ok(()) => {
                if let Err(e) = storage::complete_task(&ctx.db, task.id).await {
                    error!(id = task.id, error = %e, "task finished but completion did not commit");
                } else {
                    info!(id = task.id, kind = %task.task, "completed task");
                }
            }
            Err(e) => {
                // fail-stuck: no retry, no dead-letter; started stays set
                error!(id = task.id, kind = %task.task, error = %e, "task errored out");
            }
        }
    }

    info!("task runner stopped");
    Ok(())
}

async fn execute(ctx: &TaskContext, job: TaskJob) -> Result<(), BlogError> {
    match job {
        TaskJob::Clone(details) => handle_clone(ctx, details).await,
        TaskJob::Email(details) => handle_email(ctx, details).await,
    }
}

/// Mirror-clone the repository into the local store, keyed by its row id.
async fn handle_clone(ctx: &TaskContext, details: CloneDetails) -> Result<(), BlogError> {
    let repo = storage::get_repo_by_full_name(&ctx.db, &details.full_name)
        .await?
        .ok_or_else(|| BlogError::Other(format!("repo not found: {}", details.full_name)))?;

    let remote_url = format!("https://github.com/{}", details.full_name);
    let local_path = ctx.settings.git.repo_dir.join(format!("{}.git", repo.id));

    tokio::task::spawn_blocking(move || git::mirror_clone(&remote_url, &local_path))
        .await
        .map_err(|e| BlogError::Other(format!("clone task panicked: {}", e)))?
}

async fn handle_email(ctx: &TaskContext, details: EmailDetails) -> Result<(), BlogError> {
    let template = emails::template(&details.message)
        .ok_or_else(|| BlogError::Mail(format!("no template named {}", details.message)))?;
    let body = emails::render(template, &details.variables);
    let sender = ctx.settings.mail_sender();

    ctx.mailer
        .send(
            template.subject,
            &sender,
            std::slice::from_ref(&details.recipient),
            &body,
        )
        .await
}
