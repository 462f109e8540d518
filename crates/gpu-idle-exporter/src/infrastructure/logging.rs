//! provides logging helpers

use std::fmt;
use std::path::Path;

use anyhow::Context as _;
use tracing::field::Field;
use tracing::field::Visit;
use tracing::Event;
use tracing::Metadata;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::FilterExt;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::FormatEvent;
use tracing_subscriber::fmt::FormatFields;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;
use tracing_subscriber::registry::LookupSpan;

/// Target of events carrying pre-encoded metric lines
pub const METRICS_TARGET: &str = "metrics";

const MAX_METRICS_FILES: usize = 3;

fn is_metrics_event(metadata: &Metadata<'_>) -> bool {
    metadata.target() == METRICS_TARGET
}

/// Writes the `msg` field verbatim, one line per event.
struct MetricLineFormatter;

#[derive(Default)]
struct MessageVisitor {
    line: Option<String>,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "msg" {
            self.line = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "msg" {
            self.line = Some(format!("{value:?}"));
        }
    }
}

impl<S, N> FormatEvent<S, N> for MetricLineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let Some(line) = visitor.line else {
            return Ok(());
        };
        writeln!(writer, "{}", line.trim_end())
    }
}

/// initiate the global tracing subscriber
///
/// Human readable logs go to stderr. When `gpu_metrics_file` is set, events on
/// the `metrics` target go to a daily rotated file instead.
pub fn init<P: AsRef<Path>>(gpu_metrics_file: Option<P>) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();
    let fmt_layer = utils::logging::get_fmt_layer()
        .with_filter(env_filter.and(filter::filter_fn(|metadata| !is_metrics_event(metadata))));

    let Some(gpu_metrics_file) = gpu_metrics_file else {
        registry().with(fmt_layer).try_init()?;
        return Ok(None);
    };

    let gpu_metrics_file = gpu_metrics_file.as_ref();
    let path = gpu_metrics_file
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let file = gpu_metrics_file
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("invalid metrics file name: {}", gpu_metrics_file.display()))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(file)
        .max_log_files(MAX_METRICS_FILES)
        .build(path)
        .context("failed to create rolling file appender")?;
    let (file_writer, file_guard) = tracing_appender::non_blocking(appender);

    let metrics_layer = layer()
        .event_format(MetricLineFormatter)
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(filter::filter_fn(is_metrics_event));

    registry().with(fmt_layer).with(metrics_layer).try_init()?;
    Ok(Some(file_guard))
}
