//! Background maintenance jobs.
//!
//! Jobs run once at startup, on a fixed interval, or both. A failed run is
//! logged and the next tick tries again.

pub mod reaper;
pub mod sizer;

pub use reaper::{Reaper, ReaperReport};
pub use sizer::{Sizer, TreeNode};

use std::sync::Arc;
use std::time::Instant as StdInstant;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{error, info};

use crate::Result;

/// A unit of background work.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    /// Perform one full pass.
    async fn run_once(&self) -> Result<()>;
}

/// Run a job once, logging how it went.
pub async fn run_logged(job: &dyn Job) -> Result<()> {
    let start = StdInstant::now();
    info!("Job {} started", job.name());

    let result = job.run_once().await;
    match &result {
        Ok(()) => info!(
            "Job {} finished in {:.2}s",
            job.name(),
            start.elapsed().as_secs_f64()
        ),
        Err(e) => error!("Job {} failed: {}", job.name(), e),
    }
    result
}

/// Runs a job on a fixed interval.
pub struct JobRunner {
    job: Arc<dyn Job>,
    period: Duration,
}

impl JobRunner {
    /// Create a runner. The first run happens one `period` from now.
    pub fn new(job: Arc<dyn Job>, period: Duration) -> Self {
        Self { job, period }
    }

    /// Interval between runs.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Run the job forever.
    pub async fn run(&self) {
        info!(
            "Job {} scheduled (interval: {} seconds)",
            self.job.name(),
            self.period.as_secs()
        );

        let mut timer = interval_at(Instant::now() + self.period, self.period);
        // A slow pass pushes the next one back instead of bunching them up
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            let _ = run_logged(self.job.as_ref()).await;
        }
    }
}

/// Spawn a [`JobRunner`] on the runtime.
pub fn start_job_runner(job: Arc<dyn Job>, period: Duration) -> JoinHandle<()> {
    let runner = JobRunner::new(job, period);
    tokio::spawn(async move {
        runner.run().await;
    })
}
