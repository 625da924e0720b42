use std::time::{Duration, Instant};

use rocket_db_pools::sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use super::{JobKind, JobQueue};
use crate::abtest::AbTestService;
use crate::config::AppConfig;
use crate::export::ExportService;
use crate::import::ImportService;

const ERROR_BACKOFF: Duration = Duration::from_secs(10);

/// Background loop that claims pending import and export jobs and runs them,
/// and periodically picks winners for A/B tests that asked for it.
pub struct JobDispatcher {
    queue: JobQueue,
    imports: ImportService,
    exports: ExportService,
    ab_tests: AbTestService,
    poll_interval: Duration,
    ab_test_interval: Duration,
}

impl JobDispatcher {
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        Self {
            queue: JobQueue::new(pool.clone()),
            imports: ImportService::new(pool.clone()),
            exports: ExportService::new(pool.clone(), config.clone()),
            ab_tests: AbTestService::new(pool),
            poll_interval: Duration::from_secs(config.job_poll_interval_secs),
            ab_test_interval: Duration::from_secs(config.ab_test_check_interval_secs),
        }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        log::info!(
            "JobDispatcher started (poll every {}s, A/B check every {}s)",
            self.poll_interval.as_secs(),
            self.ab_test_interval.as_secs()
        );
        let mut last_ab_check: Option<Instant> = None;

        while !shutdown.is_cancelled() {
            if last_ab_check.is_none_or(|at| at.elapsed() >= self.ab_test_interval) {
                self.check_ab_tests().await;
                last_ab_check = Some(Instant::now());
            }

            let delay = match self.run_next().await {
                Ok(true) => continue,
                Ok(false) => self.poll_interval,
                Err(e) => {
                    log::error!("dispatcher: failed to claim job: {}", e);
                    ERROR_BACKOFF
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        log::info!("JobDispatcher stopped");
    }

    /// Claim and run at most one job, imports first. Returns whether a job ran.
    async fn run_next(&self) -> Result<bool, sqlx::Error> {
        for kind in [JobKind::Import, JobKind::Export] {
            let Some(job_id) = self.queue.claim_next(kind).await? else {
                continue;
            };
            log::info!("dispatcher: claimed {} job {}", kind.label(), job_id);

            let outcome = match kind {
                JobKind::Import => self.imports.run_claimed(job_id).await,
                JobKind::Export => self.exports.run_claimed(job_id).await,
            };
            match outcome {
                Ok(status) => log::info!(
                    "dispatcher: {} job {} finished as {}",
                    kind.label(),
                    job_id,
                    status.as_str()
                ),
                Err(e) => log::error!(
                    "dispatcher: {} job {} could not be recorded: {}",
                    kind.label(),
                    job_id,
                    e
                ),
            }
            return Ok(true);
        }
        Ok(false)
    }

    async fn check_ab_tests(&self) {
        match self.ab_tests.auto_select_winners().await {
            Ok(campaigns) if !campaigns.is_empty() => {
                log::info!("dispatcher: selected A/B winners for campaigns {:?}", campaigns)
            }
            Ok(_) => {}
            Err(e) => log::error!("dispatcher: A/B winner check failed: {}", e),
        }
    }
}
