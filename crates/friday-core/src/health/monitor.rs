//! Periodic health monitoring.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use super::{CheckStatus, HealthChecker, HealthReport};

/// Handle for the background check loop
pub struct HealthMonitor {
    receiver: watch::Receiver<Option<HealthReport>>,
    abort_handle: tokio::task::AbortHandle,
    interval: Duration,
}

impl HealthMonitor {
    /// Run the checks now and then every `every`, publishing each report
    pub fn spawn(checker: Arc<HealthChecker>, every: Duration) -> Self {
        let (sender, receiver) = watch::channel(None);

        info!(interval_secs = every.as_secs(), "Starting health monitor");

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last_status: Option<CheckStatus> = None;

            loop {
                ticker.tick().await;
                let report = checker.run().await;

                match (last_status, report.overall_status) {
                    (Some(CheckStatus::Error), CheckStatus::Success) => {
                        info!("Health recovered: {}", report.message)
                    }
                    (prev, CheckStatus::Error) if prev != Some(CheckStatus::Error) => {
                        error!("Health degraded: {}", report.message)
                    }
                    _ => {}
                }
                last_status = Some(report.overall_status);

                // The handle keeps a receiver, so publishing cannot fail
                sender.send_replace(Some(report));
            }
        });

        Self {
            receiver,
            abort_handle: handle.abort_handle(),
            interval: every,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<HealthReport>> {
        self.receiver.clone()
    }

    /// Most recent report, `None` until the first run finishes
    pub fn latest(&self) -> Option<HealthReport> {
        self.receiver.borrow().clone()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        !self.abort_handle.is_finished()
    }

    pub fn stop(&self) {
        info!("Stopping health monitor");
        self.abort_handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test(start_paused = true)]
    async fn test_monitor_publishes_reports() {
        let checker = Arc::new(HealthChecker::new(Config::default()).unwrap());
        let monitor = HealthMonitor::spawn(checker, Duration::from_secs(60));
        let mut reports = monitor.subscribe();

        reports.changed().await.unwrap();
        let first = reports.borrow_and_update().clone().unwrap();
        assert!(!first.is_healthy());

        reports.changed().await.unwrap();
        let second = monitor.latest().unwrap();
        assert!(second.timestamp >= first.timestamp);

        monitor.stop();
        // The aborted task drops its sender instead of publishing again
        assert!(reports.changed().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_runs_without_subscribers() {
        let checker = Arc::new(HealthChecker::new(Config::default()).unwrap());
        let monitor = HealthMonitor::spawn(checker, Duration::from_secs(60));
        drop(monitor.subscribe());

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert!(monitor.is_running());
        assert!(monitor.latest().is_some());

        let mut late = monitor.subscribe();
        late.borrow_and_update();
        late.changed().await.unwrap();
        monitor.stop();
    }
}
