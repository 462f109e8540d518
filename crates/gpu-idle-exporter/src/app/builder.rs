use std::sync::Arc;

use anyhow::Context as _;
use anyhow::Result;

use crate::app::Application;
use crate::app::ApplicationServices;
use crate::config::DaemonArgs;
use crate::domain::IdleTracker;
use crate::infrastructure::gpu::initialize_gpu_system;
use crate::infrastructure::metrics::IdleMetrics;
use crate::infrastructure::Collector;
use crate::infrastructure::IdleObserver;
use crate::infrastructure::ProcessNames;

/// Application builder
pub struct ApplicationBuilder {
    daemon_args: DaemonArgs,
}

impl ApplicationBuilder {
    pub fn new(daemon_args: DaemonArgs) -> Self {
        Self { daemon_args }
    }

    /// Build complete application
    pub fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let source = initialize_gpu_system()?;

        let tracker_config = self.daemon_args.tracker_config();
        tracing::info!(
            stale_timeout_secs = tracker_config.stale_timeout.as_secs_f64(),
            grace_cycles = tracker_config.grace_cycles,
            poll_interval_ms = self.daemon_args.poll_interval.as_millis() as u64,
            "Idle tracking configured"
        );
        if self.daemon_args.stale_timeout_within_poll_interval() {
            tracing::warn!(
                stale_timeout_secs = tracker_config.stale_timeout.as_secs_f64(),
                poll_interval_secs = self.daemon_args.poll_interval.as_secs_f64(),
                "Stale timeout does not exceed the poll interval, a single late poll will evict processes and reset idle streaks"
            );
        }

        let collector = Collector::new(source);
        let observer = IdleObserver::create(
            collector,
            IdleTracker::new(tracker_config),
            ProcessNames::default(),
        );

        let metrics = IdleMetrics::new(self.daemon_args.const_labels())
            .map_err(|report| anyhow::anyhow!("{report:?}"))
            .context("failed to register Prometheus metrics")?;

        Ok(Application::new(
            ApplicationServices {
                observer,
                metrics: Arc::new(metrics),
            },
            self.daemon_args,
        ))
    }
}
