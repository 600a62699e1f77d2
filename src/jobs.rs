use crate::errors::BlogError;
use crate::storage;
use sea_orm::DatabaseConnection;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Initialize and start the job scheduler with all background maintenance
/// jobs. Deferred work with payloads lives in the task queue instead; these
/// are fixed-schedule sweeps.
pub async fn init_scheduler(db: DatabaseConnection) -> Result<JobScheduler, BlogError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| BlogError::Other(format!("Failed to create job scheduler: {}", e)))?;

    let db_clone = db.clone();

    // Cleanup expired sessions job - runs every hour
    let cleanup_sessions_job = Job::new_async("0 0 * * * *", move |_uuid, _l| {
        let db = db_clone.clone();
        Box::pin(async move {
            info!("Running cleanup_expired_sessions job");
            match storage::cleanup_expired_sessions(&db).await {
                Ok(count) => info!("Cleaned up {} expired sessions", count),
                Err(e) => error!("Failed to cleanup expired sessions: {}", e),
            }
        })
    })
    .map_err(|e| BlogError::Other(format!("Failed to create cleanup sessions job: {}", e)))?;

    sched
        .add(cleanup_sessions_job)
        .await
        .map_err(|e| BlogError::Other(format!("Failed to add cleanup sessions job: {}", e)))?;

    let db_clone = db.clone();

    // Cleanup expired auth codes job - runs every hour at 30 minutes past
    let cleanup_codes_job = Job::new_async("0 30 * * * *", move |_uuid, _l| {
        let db = db_clone.clone();
        Box::pin(async move {
            info!("Running cleanup_expired_auth_codes job");
            match storage::cleanup_expired_auth_codes(&db).await {
                Ok(count) => info!("Cleaned up {} expired auth codes", count),
                Err(e) => error!("Failed to cleanup expired auth codes: {}", e),
            }
        })
    })
    .map_err(|e| BlogError::Other(format!("Failed to create cleanup codes job: {}", e)))?;

    sched
        .add(cleanup_codes_job)
        .await
        .map_err(|e| BlogError::Other(format!("Failed to add cleanup codes job: {}", e)))?;

    sched
        .start()
        .await
        .map_err(|e| BlogError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!("Job scheduler started with {} jobs", 2);

    Ok(sched)
}
