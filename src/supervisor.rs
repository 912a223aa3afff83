use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Restarts a long-running task on a fixed schedule, whether or not it
/// looks healthy.
///
/// A stalled connection does not always produce an error; it can simply stop
/// delivering events. Cancelling and restarting every `interval` bounds how
/// long such a task can stay stuck. Invocations that fail or panic are
/// logged and counted; the next restart still happens on schedule.
pub struct RestartSupervisor {
    name: String,
    interval: Duration,
}

/// Counters returned when the supervisor is shut down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    /// Invocations started after the first one.
    pub restarts: u64,
    /// Invocations that returned an error or panicked.
    pub failures: u64,
}

impl RestartSupervisor {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs `task` until `shutdown` is cancelled. Each invocation gets its
    /// own child token which is cancelled when its interval ends.
    pub async fn run<F, Fut, E>(&self, shutdown: CancellationToken, mut task: F) -> SupervisorReport
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let mut report = SupervisorReport::default();
        let name = self.name.as_str();

        loop {
            let scope = shutdown.child_token();
            let deadline = Instant::now() + self.interval;
            let mut handle = tokio::spawn(task(scope.clone()));
            let mut finished = false;

            tracing::debug!(task = name, "invocation started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = sleep_until(deadline) => break,
                    joined = &mut handle, if !finished => {
                        finished = true;
                        match joined {
                            Ok(Ok(())) => tracing::info!(task = name, "invocation ended before restart"),
                            Ok(Err(e)) => {
                                report.failures += 1;
                                metrics::counter!("supervisor_failures_total", "task" => name.to_string()).increment(1);
                                tracing::error!(task = name, "invocation failed: {e}");
                            }
                            Err(e) => {
                                report.failures += 1;
                                metrics::counter!("supervisor_failures_total", "task" => name.to_string()).increment(1);
                                tracing::error!(task = name, "invocation panicked: {e}");
                            }
                        }
                    }
                }
            }

            scope.cancel();
            if !finished {
                match handle.await {
                    Ok(Err(e)) => {
                        report.failures += 1;
                        tracing::error!(task = name, "invocation failed while stopping: {e}");
                    }
                    Err(e) if e.is_panic() => {
                        report.failures += 1;
                        tracing::error!(task = name, "invocation panicked while stopping: {e}");
                    }
                    _ => {}
                }
            }

            if shutdown.is_cancelled() {
                tracing::info!(task = name, restarts = report.restarts, "supervisor stopped");
                return report;
            }

            report.restarts += 1;
            metrics::counter!("supervisor_restarts_total", "task" => name.to_string()).increment(1);
            tracing::info!(task = name, interval = ?self.interval, "scheduled restart");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn restarts_on_every_interval() {
        let supervisor = RestartSupervisor::new("test", Duration::from_secs(10));
        let started = Arc::new(AtomicUsize::new(0));
        let cancelled = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let run = {
            let started = Arc::clone(&started);
            let cancelled = Arc::clone(&cancelled);
            let shutdown = shutdown.clone();
            async move {
                supervisor
                    .run(shutdown, move |scope: CancellationToken| {
                        started.fetch_add(1, Ordering::SeqCst);
                        let cancelled = Arc::clone(&cancelled);
                        async move {
                            scope.cancelled().await;
                            cancelled.fetch_add(1, Ordering::SeqCst);
                            Ok::<(), String>(())
                        }
                    })
                    .await
            }
        };
        let handle = tokio::spawn(run);

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(started.load(Ordering::SeqCst), 4);
        assert_eq!(cancelled.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        let report = handle.await.unwrap();
        assert_eq!(report, SupervisorReport { restarts: 3, failures: 0 });
        assert_eq!(cancelled.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_schedule() {
        let supervisor = RestartSupervisor::new("failing", Duration::from_secs(5));
        let started = Arc::new(AtomicUsize::new(0));
        let shutdown = CancellationToken::new();

        let handle = {
            let started = Arc::clone(&started);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                supervisor
                    .run(shutdown, move |_scope: CancellationToken| {
                        let attempt = started.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if attempt == 1 {
                                panic!("boom");
                            }
                            Err::<(), String>(format!("attempt {attempt} failed"))
                        }
                    })
                    .await
            })
        };

        // failed invocations are not retried before the interval ends
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(started.load(Ordering::SeqCst), 3);

        shutdown.cancel();
        let report = handle.await.unwrap();
        assert_eq!(report, SupervisorReport { restarts: 2, failures: 3 });
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_running_invocation() {
        let supervisor = RestartSupervisor::new("idle", Duration::from_secs(60));
        let shutdown = CancellationToken::new();
        let observed = CancellationToken::new();

        let handle = {
            let shutdown = shutdown.clone();
            let observed = observed.clone();
            tokio::spawn(async move {
                supervisor
                    .run(shutdown, move |scope: CancellationToken| {
                        let observed = observed.clone();
                        async move {
                            scope.cancelled().await;
                            observed.cancel();
                            Ok::<(), String>(())
                        }
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
        let report = handle.await.unwrap();
        assert!(observed.is_cancelled());
        assert_eq!(report.restarts, 0);
    }
}
