use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Background job that runs on a fixed interval until stopped.
///
/// The first run happens one `period` after spawning. Dropping the handle
/// also stops the task (the shutdown channel closes).
pub struct PeriodicTask {
    name: String,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn a periodic task on the current Tokio runtime
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        info!("Starting periodic task '{}' (interval={:?})", name, period);

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = interval.tick() => {
                        debug!("Periodic task '{}' tick", task_name);
                        tick().await;
                    }
                }
            }

            debug!("Periodic task '{}' exited", task_name);
        });

        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal shutdown and wait for the in-flight tick (if any) to finish
    pub async fn stop(self) {
        let Self {
            name,
            shutdown_tx,
            handle,
        } = self;

        let _ = shutdown_tx.send(());
        let _ = handle.await;
        info!("Stopped periodic task '{}'", name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_ticks_until_stopped() {
        let counter = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&counter);
        let task = PeriodicTask::spawn("counter", Duration::from_secs(1), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        task.stop().await;
        let ticks = counter.load(Ordering::SeqCst);
        assert_eq!(ticks, 3);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), ticks);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_stops_task() {
        let counter = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&counter);
        let task = PeriodicTask::spawn("dropped", Duration::from_secs(1), move || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(task);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
