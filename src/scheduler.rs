use chrono_tz::Tz;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::config::SchedulerConfig;
use crate::scanner::Scanner;
use crate::{AppError, Result};

/// Fires a scan cycle on a fixed calendar schedule in a fixed timezone.
/// A firing that lands while a cycle is active is absorbed by the scan
/// lock inside `Scanner::run_cycle` and simply dropped.
pub struct ScanScheduler {
    scheduler: JobScheduler,
}

impl ScanScheduler {
    pub async fn new(scanner: Arc<Scanner>, config: &SchedulerConfig) -> Result<Self> {
        let timezone: Tz = config
            .timezone
            .parse()
            .map_err(|_| AppError::Scheduler(format!("unknown timezone: {}", config.timezone)))?;

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::Scheduler(e.to_string()))?;

        let cron = config.cron.clone();
        let job = Job::new_async_tz(config.cron.as_str(), timezone, move |_uuid, _lock| {
            let scanner = Arc::clone(&scanner);
            let cron = cron.clone();
            Box::pin(async move {
                info!(%cron, "scheduled scan trigger fired");
                if let Err(err) = scanner.run_cycle().await {
                    error!(%err, "scheduled scan cycle failed");
                }
            })
        })
        .map_err(|e| AppError::Scheduler(e.to_string()))?;

        scheduler
            .add(job)
            .await
            .map_err(|e| AppError::Scheduler(e.to_string()))?;

        Ok(Self { scheduler })
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::Scheduler(e.to_string()))?;
        info!("scan scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::Scheduler(e.to_string()))?;
        info!("scan scheduler shut down");
        Ok(())
    }
}
