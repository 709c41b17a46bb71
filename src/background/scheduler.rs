use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::auth::AuthService;

/// Every ten minutes, on the minute.
pub const JANITOR_SCHEDULE: &str = "0 */10 * * * *";

/// Periodic maintenance for the gateway. Today that is only the credential
/// janitor: expired refresh tokens and OAuth states are deleted.
pub struct BackgroundScheduler {
    scheduler: JobScheduler,
}

impl BackgroundScheduler {
    pub async fn new(auth: Arc<AuthService>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;

        scheduler
            .add(Job::new_async(JANITOR_SCHEDULE, move |_uuid, _l| {
                let auth = auth.clone();
                Box::pin(async move {
                    run_janitor(&auth).await;
                })
            })?)
            .await?;

        scheduler.start().await?;
        info!("Background scheduler started");

        Ok(Self { scheduler })
    }

    pub async fn shutdown(mut self) {
        match self.scheduler.shutdown().await {
            Ok(()) => info!("Background scheduler stopped"),
            Err(e) => warn!("Background scheduler did not stop cleanly: {}", e),
        }
    }
}

/// One janitor pass. Failures are logged; the next tick retries.
pub async fn run_janitor(auth: &AuthService) {
    match auth.purge_expired().await {
        Ok((0, 0)) => {}
        Ok((tokens, states)) => info!("Janitor removed {} refresh tokens and {} OAuth states", tokens, states),
        Err(e) => warn!("Janitor pass failed: {}", e),
    }
}
