use std::time::Duration;

use anyhow::anyhow;
use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::ApiServer;
use crate::app::core::Application;
use crate::infrastructure::metrics;
use crate::infrastructure::metrics::encoders::create_encoder;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(&mut self, app: &Application) {
        let cli = app.daemon_args();

        // subscribe before the observer starts so the first cycle is not missed
        let prometheus_task = self.spawn_prometheus_task(app);
        self.tasks.push(prometheus_task);

        if cli.gpu_metrics_file.is_some() {
            let sink_task = self.spawn_metrics_sink_task(app);
            self.tasks.push(sink_task);
        }

        let observer_task = {
            let observer = app.services().observer.clone();
            let poll_interval = cli.poll_interval;
            let token = self.cancellation_token.clone();
            tokio::spawn(async move {
                tracing::info!("Starting idle observer task");
                observer.run(poll_interval, token).await;
                tracing::info!("Idle observer task completed");
            })
        };
        self.tasks.push(observer_task);

        let api_server_task = self.spawn_api_server_task(app);
        self.tasks.push(api_server_task);
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate())?;
                let mut sigint = signal(SignalKind::interrupt())?;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = sigterm.recv() => {
                            tracing::info!("Received SIGTERM, initiating graceful shutdown");
                        }
                        _ = sigint.recv() => {
                            tracing::info!("Received SIGINT, initiating graceful shutdown");
                        }
                    }
                })
            }
            #[cfg(not(unix))]
            {
                tokio::spawn(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for Ctrl+C: {e}");
                    }
                    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
                })
            }
        };

        let outcome = tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                Ok(())
            }
            // any task ending on its own is fatal for the daemon
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, index, _remaining) = result;
                match result {
                    Ok(()) => {
                        tracing::error!(task = index, "Task exited unexpectedly, shutting down");
                        Err(anyhow!("task {index} exited unexpectedly"))
                    }
                    Err(e) => {
                        tracing::error!(task = index, "Task failed: {e}");
                        Err(anyhow::Error::from(e).context(format!("task {index} failed")))
                    }
                }
            }
        };

        self.cancellation_token.cancel();
        self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
        outcome
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if task.is_finished() {
                    continue;
                }
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_prometheus_task(&self, app: &Application) -> JoinHandle<()> {
        let receiver = app.services().observer.subscribe();
        let idle_metrics = app.services().metrics.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting Prometheus update task");
            metrics::run_prometheus_updates(receiver, idle_metrics, token).await;
            tracing::info!("Prometheus update task completed");
        })
    }

    fn spawn_metrics_sink_task(&self, app: &Application) -> JoinHandle<()> {
        let cli = app.daemon_args();
        let receiver = app.services().observer.subscribe();
        let encoder = create_encoder(&cli.metrics_format);
        let metrics_batch_size = cli.metrics_batch_size;
        let node_name = cli.node_name.clone().unwrap_or_else(|| "unknown".to_string());
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting metrics sink task");
            metrics::run_metrics_sink(receiver, encoder, metrics_batch_size, &node_name, token)
                .await;
            tracing::info!("Metrics sink task completed");
        })
    }

    fn spawn_api_server_task(&self, app: &Application) -> JoinHandle<()> {
        let listen_addr = app.daemon_args().listen_addr();
        let idle_metrics = app.services().metrics.clone();
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            let server = ApiServer::new(idle_metrics, listen_addr);
            if let Err(e) = server.run(token).await {
                tracing::error!("HTTP server failed: {e:?}");
            } else {
                tracing::info!("HTTP server completed");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test(tokio::test)]
    async fn task_exiting_on_its_own_is_an_error() {
        let mut tasks = Tasks::new();
        // e.g. the HTTP server failing to bind
        tasks.tasks.push(tokio::spawn(async {
            tracing::error!("HTTP server failed: address in use");
        }));
        let token = tasks.cancellation_token.clone();
        let waiting = tokio::spawn(async move { token.cancelled().await });
        tasks.tasks.push(waiting);

        let result = tokio::time::timeout(Duration::from_secs(5), tasks.wait_for_completion())
            .await
            .expect("should not wait for a signal");

        assert!(result.is_err());
        assert!(tasks.cancellation_token.is_cancelled());
        assert!(tasks.tasks.iter().all(|task| task.is_finished()));
    }

    #[test(tokio::test)]
    async fn panicking_task_is_an_error() {
        let mut tasks = Tasks::new();
        tasks.tasks.push(tokio::spawn(async { panic!("observer crashed") }));

        let result = tokio::time::timeout(Duration::from_secs(5), tasks.wait_for_completion())
            .await
            .expect("should not wait for a signal");

        let message = format!("{:#}", result.expect_err("panic should surface"));
        assert!(message.contains("task 0 failed"), "{message}");
    }

    #[test(tokio::test)]
    async fn shutdown_wait_skips_finished_tasks() {
        let mut tasks = Tasks::new();
        tasks.tasks.push(tokio::spawn(async {}));
        let token = tasks.cancellation_token.clone();
        tasks.tasks.push(tokio::spawn(async move { token.cancelled().await }));

        tasks.cancellation_token.cancel();
        tokio::time::timeout(Duration::from_secs(1), tasks.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT))
            .await
            .expect("cancelled tasks should be joined promptly");
    }
}
