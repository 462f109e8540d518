use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::domain::TrackerConfig;

#[derive(Parser, Debug, Clone)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "POLL_INTERVAL",
        default_value = "5s",
        value_parser = parse_poll_interval,
        help = "Interval between GPU polling cycles (e.g. 500ms, 5s, 1m30s, 2.5s)"
    )]
    pub poll_interval: Duration,

    #[arg(
        long,
        env = "HTTP_PORT",
        default_value_t = 9835,
        help = "Port of the HTTP server exposing /metrics and /healthz"
    )]
    pub http_port: u16,

    #[arg(
        long,
        env = "HTTP_LISTEN_HOST",
        default_value = "0.0.0.0",
        help = "Host the HTTP server binds to"
    )]
    pub listen_host: String,

    #[arg(
        long,
        env = "STALE_TIMEOUT",
        default_value = "30s",
        value_parser = parse_duration,
        help = "Forget processes not reported for longer than this"
    )]
    pub stale_timeout: Duration,

    #[arg(
        long,
        env = "IDLE_GRACE_CYCLES",
        default_value_t = crate::domain::DEFAULT_GRACE_CYCLES,
        help = "Number of initial observations during which a new process is never classified idle"
    )]
    pub grace_cycles: u32,

    #[arg(long, env = "NODE_NAME", help = "Node name attached to every metric")]
    pub node_name: Option<String>,

    #[arg(long, env = "POD_NAME", help = "Exporter pod name attached to every metric")]
    pub pod_name: Option<String>,

    #[arg(
        long,
        env = "POD_NAMESPACE",
        help = "Exporter pod namespace attached to every metric"
    )]
    pub pod_namespace: Option<String>,

    #[arg(
        long,
        env = "GPU_METRICS_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Write encoded metric lines to this daily rotated file"
    )]
    pub gpu_metrics_file: Option<PathBuf>,

    #[arg(
        long,
        env = "GPU_IDLE_METRICS_FORMAT",
        default_value = "influx",
        help = "Metrics file format, either 'influx' or 'json'"
    )]
    pub metrics_format: String,

    #[arg(
        long,
        default_value_t = 1,
        help = "Write to the metrics file once every this many cycles"
    )]
    pub metrics_batch_size: usize,
}

impl DaemonArgs {
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            stale_timeout: self.stale_timeout,
            grace_cycles: self.grace_cycles,
        }
    }

    pub fn listen_addr(&self) -> String {
        // bracket bare IPv6 hosts
        if self.listen_host.contains(':') && !self.listen_host.starts_with('[') {
            format!("[{}]:{}", self.listen_host, self.http_port)
        } else {
            format!("{}:{}", self.listen_host, self.http_port)
        }
    }

    /// True when one late poll is enough to evict every tracked process
    pub fn stale_timeout_within_poll_interval(&self) -> bool {
        self.stale_timeout <= self.poll_interval
    }

    /// Labels attached to every exported series, only for configured values
    pub fn const_labels(&self) -> HashMap<String, String> {
        [
            ("node", &self.node_name),
            ("pod", &self.pod_name),
            ("namespace", &self.pod_namespace),
        ]
        .into_iter()
        .filter_map(|(label, value)| {
            value
                .as_deref()
                .filter(|value| !value.is_empty())
                .map(|value| (label.to_string(), value.to_string()))
        })
        .collect()
    }
}

const NANOS_PER_SECOND: u128 = 1_000_000_000;

const DURATION_UNITS: &[(&str, u128)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("µs", 1_000),
    ("ms", 1_000_000),
    ("s", NANOS_PER_SECOND),
    ("m", 60 * NANOS_PER_SECOND),
    ("h", 3_600 * NANOS_PER_SECOND),
];

/// Parses a sequence of `<number><unit>` segments such as `1m30s` or `1.5s`,
/// with units ns, us, ms, s, m and h. A bare number is taken as seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let is_numeric = |c: char| c.is_ascii_digit() || c == '.';
    if s.chars().all(is_numeric) {
        return nanos_to_duration(segment_nanos(s, NANOS_PER_SECOND, s)?, s);
    }

    let mut total: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let (number, tail) = rest.split_at(rest.find(|c| !is_numeric(c)).unwrap_or(rest.len()));
        let (unit, next) = tail.split_at(tail.find(is_numeric).unwrap_or(tail.len()));
        let scale = DURATION_UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| {
                format!("invalid duration unit `{unit}` in `{s}`, expected one of ns, us, ms, s, m, h")
            })?;
        total = total
            .checked_add(segment_nanos(number, scale, s)?)
            .ok_or_else(|| format!("duration `{s}` is too large"))?;
        rest = next;
    }

    nanos_to_duration(total, s)
}

fn segment_nanos(number: &str, scale: u128, input: &str) -> Result<u128, String> {
    let invalid = || format!("invalid duration `{input}`");
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if (whole.is_empty() && fraction.is_empty())
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !fraction.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }

    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| invalid())? };
    let mut nanos = whole
        .checked_mul(scale)
        .ok_or_else(|| format!("duration `{input}` is too large"))?;

    // digits past nanosecond precision are dropped
    let fraction = &fraction[..fraction.len().min(18)];
    if !fraction.is_empty() {
        let digits: u128 = fraction.parse().map_err(|_| invalid())?;
        nanos += digits * scale / 10u128.pow(fraction.len() as u32);
    }
    Ok(nanos)
}

fn nanos_to_duration(nanos: u128, input: &str) -> Result<Duration, String> {
    u64::try_from(nanos)
        .map(Duration::from_nanos)
        .map_err(|_| format!("duration `{input}` is too large"))
}

fn parse_poll_interval(s: &str) -> Result<Duration, String> {
    let interval = parse_duration(s)?;
    if interval.is_zero() {
        return Err("poll interval must be greater than zero".to_string());
    }
    Ok(interval)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::config::Cli;
    use crate::config::Commands;

    fn daemon_args(args: &[&str]) -> DaemonArgs {
        let cli = Cli::try_parse_from(
            ["gpu-idle-exporter", "daemon"]
                .iter()
                .chain(args.iter())
                .copied(),
        )
        .expect("should parse daemon args");
        match cli.command {
            Commands::Daemon(args) => *args,
        }
    }

    #[test]
    fn parse_duration_accepts_units() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration("5s"), Ok(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_duration("30"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration(" 7s "), Ok(Duration::from_secs(7)));
        assert_eq!(parse_duration("100us"), Ok(Duration::from_micros(100)));
    }

    #[test]
    fn parse_duration_accepts_compound_and_fractional_values() {
        assert_eq!(parse_duration("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse_duration("1h2m3s"), Ok(Duration::from_secs(3723)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("2.5"), Ok(Duration::from_millis(2500)));
        assert_eq!(parse_duration(".5m"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_duration("1s500ms"), Ok(Duration::from_millis(1500)));
    }

    #[test]
    fn parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("1..5s").is_err());
        assert!(parse_duration(".s").is_err());
        assert!(parse_duration("1m30").is_err());
    }

    #[test]
    fn poll_interval_must_be_positive() {
        assert!(parse_poll_interval("0s").is_err());
        assert!(parse_poll_interval("0").is_err());
        assert_eq!(parse_poll_interval("1ms"), Ok(Duration::from_millis(1)));
    }

    #[test]
    fn zero_poll_interval_is_rejected_by_cli() {
        let result = Cli::try_parse_from(["gpu-idle-exporter", "daemon", "--poll-interval", "0s"]);
        assert!(result.is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let args = daemon_args(&[
            "--poll-interval",
            "2s",
            "--http-port",
            "9100",
            "--listen-host",
            "127.0.0.1",
            "--stale-timeout",
            "1m",
            "--grace-cycles",
            "3",
            "--node-name",
            "worker-7",
            "--pod-name",
            "",
            "--pod-namespace",
            "",
            "--metrics-format",
            "json",
            "--metrics-batch-size",
            "10",
        ]);

        assert_eq!(args.poll_interval, Duration::from_secs(2));
        assert_eq!(args.listen_addr(), "127.0.0.1:9100");
        assert_eq!(
            args.tracker_config(),
            TrackerConfig {
                stale_timeout: Duration::from_secs(60),
                grace_cycles: 3,
            }
        );
        assert_eq!(args.metrics_format, "json");
        assert_eq!(args.metrics_batch_size, 10);
        assert_eq!(
            args.const_labels(),
            HashMap::from([("node".to_string(), "worker-7".to_string())])
        );
    }

    #[test]
    fn stale_timeout_must_exceed_poll_interval() {
        let args = daemon_args(&["--poll-interval", "30s", "--stale-timeout", "30s"]);
        assert!(args.stale_timeout_within_poll_interval());

        let args = daemon_args(&["--poll-interval", "5s", "--stale-timeout", "30s"]);
        assert!(!args.stale_timeout_within_poll_interval());
    }

    #[test]
    fn ipv6_listen_host_is_bracketed() {
        let args = daemon_args(&["--listen-host", "::", "--http-port", "9835"]);
        assert_eq!(args.listen_addr(), "[::]:9835");
    }

    #[test]
    fn empty_label_values_are_skipped() {
        let args = daemon_args(&[
            "--node-name",
            "",
            "--pod-name",
            "",
            "--pod-namespace",
            "monitoring",
        ]);
        assert_eq!(
            args.const_labels(),
            HashMap::from([("namespace".to_string(), "monitoring".to_string())])
        );
    }
}
