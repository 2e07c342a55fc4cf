mod handlers;
mod sse;
mod state;

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{ArgAction, CommandFactory, Parser};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use digestwatch_core::estimate::Estimator;
use digestwatch_core::source::{PAGE_SIZE, PostgresSource};
use digestwatch_core::stream::{LogTee, SessionSettings, StreamHub, StreamMode};
use digestwatch_core::util::{parse_duration, parse_size};
use digestwatch_core::{Monitor, MonitorError, MonitorSettings, TracingReporter};

use state::AppState;

/// How long open streams may keep the server alive after shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ============================================================
// CLI
// ============================================================

#[derive(Parser, Debug)]
#[command(
    name = "digestwatch",
    about = "Query digest monitor with a live log stream",
    version = digestwatch_core::VERSION
)]
struct Args {
    /// PostgreSQL connection string (key=value or postgres:// URL).
    #[arg(long, env = "DIGESTWATCH_DSN")]
    dsn: String,

    /// Listen address of the HTTP server.
    #[arg(long, default_value = "0.0.0.0:8088", env = "DIGESTWATCH_LISTEN")]
    listen: SocketAddr,

    /// Polling interval (e.g. 10s, 1m30s).
    #[arg(long, default_value = "10s", env = "DIGESTWATCH_INTERVAL", value_parser = parse_duration)]
    interval: Duration,

    /// Deadline for a single snapshot fetch.
    #[arg(long, default_value = "5s", env = "DIGESTWATCH_FETCH_TIMEOUT", value_parser = parse_duration)]
    fetch_timeout: Duration,

    /// Sets both read and write thresholds (legacy).
    #[arg(long, env = "DIGESTWATCH_THRESHOLD", value_parser = parse_size)]
    threshold: Option<u64>,

    /// Estimated bytes read per interval that trigger an alert.
    #[arg(long, default_value = "1MB", env = "DIGESTWATCH_READ_THRESHOLD", value_parser = parse_size)]
    read_threshold: u64,

    /// Estimated bytes sent per interval that trigger an alert.
    #[arg(long, default_value = "1MB", env = "DIGESTWATCH_WRITE_THRESHOLD", value_parser = parse_size)]
    write_threshold: u64,

    /// Smallest non-alerting activity worth logging.
    #[arg(long, default_value = "1MB", env = "DIGESTWATCH_MIN_REPORT_BYTES", value_parser = parse_size)]
    min_report_bytes: u64,

    /// Average bytes per row examined. PostgreSQL reports examined work in
    /// buffer pages, hence the page-size default.
    #[arg(long, default_value_t = PAGE_SIZE, env = "DIGESTWATCH_AVG_READ_BYTES")]
    avg_read_bytes: u64,

    /// Average bytes per row sent.
    #[arg(long, default_value_t = 200, env = "DIGESTWATCH_AVG_SENT_BYTES")]
    avg_sent_bytes: u64,

    /// Number of non-alerting digests logged per interval.
    #[arg(long, default_value_t = 5, env = "DIGESTWATCH_TOP")]
    top: usize,

    /// Log lines kept for stream replay.
    #[arg(long, default_value_t = 2048, env = "DIGESTWATCH_RING_CAPACITY")]
    ring_capacity: usize,

    /// Lines buffered per stream subscriber before dropping.
    #[arg(long, default_value_t = 256, env = "DIGESTWATCH_QUEUE_CAPACITY")]
    queue_capacity: usize,

    /// Lowest heartbeat a client may request.
    #[arg(long, default_value = "100ms", env = "DIGESTWATCH_HEARTBEAT_MIN", value_parser = parse_duration)]
    heartbeat_min: Duration,

    /// Highest heartbeat a client may request.
    #[arg(long, default_value = "5m", env = "DIGESTWATCH_HEARTBEAT_MAX", value_parser = parse_duration)]
    heartbeat_max: Duration,

    /// Heartbeat used when the client does not ask for one.
    #[arg(long, default_value = "15s", env = "DIGESTWATCH_HEARTBEAT_DEFAULT", value_parser = parse_duration)]
    heartbeat_default: Duration,

    /// Stream delivery: push (broadcast) or poll (ring buffer).
    #[arg(long, default_value = "push", env = "DIGESTWATCH_STREAM_MODE")]
    stream_mode: StreamMode,

    /// Log level.
    #[arg(
        long,
        default_value = "info",
        env = "DIGESTWATCH_LOG_LEVEL",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    log_level: String,

    /// Verbose output (-v debug, -vv trace). Overrides --log-level.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn validate(&self) -> Result<(), String> {
        if self.interval.is_zero() {
            return Err("--interval must be greater than zero".to_string());
        }
        if self.fetch_timeout.is_zero() {
            return Err("--fetch-timeout must be greater than zero".to_string());
        }
        if self.ring_capacity == 0 {
            return Err("--ring-capacity must be at least 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("--queue-capacity must be at least 1".to_string());
        }
        if self.heartbeat_min.is_zero() {
            return Err("--heartbeat-min must be greater than zero".to_string());
        }
        if self.heartbeat_default.is_zero() {
            return Err("--heartbeat-default must be greater than zero".to_string());
        }
        if self.heartbeat_min > self.heartbeat_max {
            return Err("--heartbeat-min must not exceed --heartbeat-max".to_string());
        }
        Ok(())
    }

    fn estimator(&self) -> Estimator {
        let (read_threshold, write_threshold) = match self.threshold {
            Some(both) => (both, both),
            None => (self.read_threshold, self.write_threshold),
        };
        Estimator {
            avg_bytes_per_row_examined: self.avg_read_bytes,
            avg_bytes_per_row_sent: self.avg_sent_bytes,
            read_threshold,
            write_threshold,
        }
    }

    fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            interval: self.interval,
            fetch_timeout: self.fetch_timeout,
            estimator: self.estimator(),
            min_report_bytes: self.min_report_bytes,
            top_n: self.top,
            ..MonitorSettings::default()
        }
    }

    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            default_heartbeat: self.heartbeat_default,
            min_heartbeat: self.heartbeat_min,
            max_heartbeat: self.heartbeat_max,
            ..SessionSettings::default()
        }
    }

    fn level(&self) -> &str {
        match self.verbose {
            0 => &self.log_level,
            1 => "debug",
            _ => "trace",
        }
    }
}

// ============================================================
// Main
// ============================================================

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(msg) = args.validate() {
        Args::command().error(ErrorKind::ValueValidation, msg).exit();
    }

    let hub = StreamHub::new(
        args.ring_capacity,
        args.queue_capacity,
        args.stream_mode,
        args.session_settings(),
    );
    init_logging(args.level(), hub.clone());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async_main(args, hub))
}

/// JSON logs on stdout, mirrored into the stream hub.
fn init_logging(level: &str, hub: StreamHub) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("digestwatch={level},digestwatch_core={level}"))
    });

    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_target(true)
        .with_env_filter(filter)
        .with_writer(LogTee::new(hub))
        .init();
}

async fn async_main(args: Args, hub: StreamHub) -> ExitCode {
    info!(version = digestwatch_core::VERSION, "digestwatch starting");

    let source = match PostgresSource::new(&args.dsn) {
        Ok(source) => source.with_connect_timeout(args.fetch_timeout),
        Err(e) => {
            error!(error = %e, "invalid --dsn");
            return ExitCode::FAILURE;
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);

    let monitor = Monitor::new(source, TracingReporter, args.monitor_settings())
        .with_stream(hub.mode(), args.ring_capacity);
    let mut monitor_task = tokio::spawn(monitor.run(stopped(stop_rx.clone())));

    let listener = match tokio::net::TcpListener::bind(args.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %args.listen, error = %e, "failed to bind");
            let _ = stop_tx.send(true);
            let _ = monitor_task.await;
            return ExitCode::FAILURE;
        }
    };
    info!(addr = %args.listen, mode = %hub.mode(), "listening");

    let app = handlers::router(AppState::new(hub))
        .into_make_service_with_connect_info::<SocketAddr>();
    let server_stop = stopped(stop_rx);
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(server_stop)
            .await
    });

    let early_exit = tokio::select! {
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            None
        }
        result = &mut monitor_task => Some(result),
    };

    let _ = stop_tx.send(true);
    let monitor_result = match early_exit {
        Some(result) => result,
        None => monitor_task.await,
    };
    let code = exit_code(monitor_result);

    // Streams only end when their clients leave; do not wait for them forever.
    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(Ok(Ok(()))) => info!("server stopped"),
        Ok(Ok(Err(e))) => error!(error = %e, "server error"),
        Ok(Err(e)) => error!(error = %e, "server task failed"),
        Err(_) => warn!(
            grace_ms = SHUTDOWN_GRACE.as_millis() as u64,
            "open streams did not close in time"
        ),
    }

    info!("shutdown complete");
    code
}

fn exit_code(result: Result<Result<(), MonitorError>, JoinError>) -> ExitCode {
    match result {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!(error = %e, "monitor failed to start");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "monitor task failed");
            ExitCode::FAILURE
        }
    }
}

/// Resolves once `true` is sent on the stop channel (or it is dropped).
async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
