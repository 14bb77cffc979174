//! Self-rescheduling tick loop shared by background workers.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

pub const DEFAULT_TICK: Duration = Duration::from_secs(30);

/// Mutable delay between two ticks.
#[derive(Debug)]
pub struct TickTimer {
    millis: AtomicU64,
}

impl TickTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            millis: AtomicU64::new(interval.as_millis() as u64),
        }
    }

    pub fn get(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::Relaxed))
    }

    pub fn set(&self, interval: Duration) {
        self.millis
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

#[async_trait]
pub trait IntervalTask: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn tick_timer(&self) -> &TickTimer;

    /// One-time setup: connections, listeners.
    async fn prepare(&self) -> Result<()> {
        warn!("{}::prepare do nothing", self.name());
        Ok(())
    }

    async fn do_process(&self) -> Result<()> {
        warn!("{}::do_process do nothing", self.name());
        Ok(())
    }
}

/// Drives an [`IntervalTask`]: prepare once, then tick forever.
pub struct IntervalScheduler<T: IntervalTask> {
    task: Arc<T>,
    started: AtomicBool,
}

impl<T: IntervalTask> IntervalScheduler<T> {
    pub fn new(task: Arc<T>) -> Self {
        Self {
            task,
            started: AtomicBool::new(false),
        }
    }

    pub fn task(&self) -> &Arc<T> {
        &self.task
    }

    /// Spawns the loop. A second call only logs a warning and returns `None`.
    ///
    /// The returned handle resolves only if `prepare` fails.
    pub fn start(&self) -> Option<JoinHandle<Result<()>>> {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Trying to start processor twice: {}", self.task.name());
            return None;
        }

        let task = self.task.clone();
        Some(tokio::spawn(async move {
            task.prepare().await?;
            info!(
                "{} finished preparing. Will start the first tick shortly...",
                task.name()
            );
            run_ticks(task).await
        }))
    }
}

async fn run_ticks<T: IntervalTask>(task: Arc<T>) -> Result<()> {
    loop {
        if let Err(e) = task.do_process().await {
            error!(
                "{} something went wrong: {:#}. The worker will be restarted shortly...",
                task.name(),
                e
            );
        }
        sleep(task.tick_timer().get()).await;
    }
}
