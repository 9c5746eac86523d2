use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kaudit_core::{FindingSink, ResourceKind, Severity, SnapshotStore};
use kaudit_kubehub::Watchers;
use kaudit_policy::PolicyEngine;
use kaudit_queue::ReconcileQueue;
use kaudit_reconcile::{pump_events, ControllerConfig, JsonLinesSink, LogSink, Reconciler, WorkerPool};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod check;

#[derive(Parser, Debug)]
#[command(name = "kauditctl", version, about = "Kubernetes ConfigMap/Secret/RBAC auditor")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Log line format on stderr
    #[arg(long = "log-format", value_enum, global = true, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogFormat { Text, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum SinkKind {
    /// One log event per finding
    Log,
    /// JSON lines on stdout
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the cluster and audit objects as they change
    Run(RunArgs),
    /// Audit manifest files offline ("-" reads stdin)
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Exit with status 1 when a finding at or above this severity is found
        #[arg(long = "fail-on", value_parser = parse_severity)]
        fail_on: Option<Severity>,
    },
    /// List the audit rules
    Rules,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Kinds to watch, comma separated (configmaps,secrets,roles,rolebindings)
    #[arg(long = "kinds", value_delimiter = ',', value_parser = parse_kind)]
    kinds: Vec<ResourceKind>,
    /// Only watch this namespace
    #[arg(long = "ns", env = "KAUDIT_NAMESPACE")]
    namespace: Option<String>,
    #[arg(long = "workers", env = "KAUDIT_WORKERS", default_value_t = 4)]
    workers: usize,
    #[arg(long = "reconcile-timeout-secs", env = "KAUDIT_RECONCILE_TIMEOUT_SECS", default_value_t = 30)]
    reconcile_timeout_secs: u64,
    #[arg(long = "backoff-base-ms", env = "KAUDIT_BACKOFF_BASE_MS", default_value_t = 1000)]
    backoff_base_ms: u64,
    #[arg(long = "backoff-max-secs", env = "KAUDIT_BACKOFF_MAX_SECS", default_value_t = 300)]
    backoff_max_secs: u64,
    /// Consecutive transient failures before a key is reported as degraded
    #[arg(long = "degraded-after", env = "KAUDIT_DEGRADED_AFTER", default_value_t = 10)]
    degraded_after: u32,
    #[arg(long = "shutdown-grace-secs", env = "KAUDIT_SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    shutdown_grace_secs: u64,
    /// Event channel capacity between watchers and the queue
    #[arg(long = "event-buffer", env = "KAUDIT_EVENT_BUFFER", default_value_t = 1024)]
    event_buffer: usize,
    #[arg(long = "sink", value_enum, default_value_t = SinkKind::Log)]
    sink: SinkKind,
}

impl RunArgs {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.workers,
            reconcile_timeout: Duration::from_secs(self.reconcile_timeout_secs),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_cap: Duration::from_secs(self.backoff_max_secs),
            degraded_after: self.degraded_after,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            kinds: if self.kinds.is_empty() { ResourceKind::ALL.to_vec() } else { self.kinds.clone() },
            namespace: self.namespace.clone(),
            ..ControllerConfig::default()
        }
    }
}

fn parse_kind(s: &str) -> Result<ResourceKind, String> {
    ResourceKind::parse(s).ok_or_else(|| format!("unknown kind {s:?}; expected configmaps, secrets, roles or rolebindings"))
}

fn parse_severity(s: &str) -> Result<Severity, String> {
    Severity::parse(s).ok_or_else(|| format!("unknown severity {s:?}; expected low, medium, high or critical"))
}

fn init_tracing(format: LogFormat) {
    let env = std::env::var("KAUDIT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KAUDIT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KAUDIT_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    init_metrics();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Check { files, fail_on } => {
            let m = check::load(&files)?;
            let report = check::audit(m, Arc::new(PolicyEngine::with_default_rules())).await;
            match cli.output {
                Output::Human => check::print_human(&report),
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
            if report.fails(fail_on) {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Rules => {
            let catalog = PolicyEngine::with_default_rules().catalog();
            match cli.output {
                Output::Human => {
                    for r in catalog {
                        println!("{:<34} {:<12} {:<9} {}", r.id, r.kind.as_str(), r.severity.as_str(), r.summary);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&catalog)?),
            }
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let cfg = args.controller_config();
    cfg.validate().map_err(|e| anyhow!("invalid configuration: {e}"))?;
    info!(workers = cfg.workers, kinds = ?cfg.kinds, ns = ?cfg.namespace, "starting controller");

    let client = kaudit_kubehub::connect().await.context("connecting to cluster")?;
    let (tx, rx) = mpsc::channel(args.event_buffer.max(1));
    let watchers = kaudit_kubehub::spawn_watchers(client, &cfg.kinds, cfg.namespace.as_deref(), tx);

    let sink: Arc<dyn FindingSink> = match args.sink {
        SinkKind::Log => Arc::new(LogSink),
        SinkKind::Json => Arc::new(JsonLinesSink::stdout()),
    };
    let queue = Arc::new(ReconcileQueue::new());
    let pump = tokio::spawn(pump_events(rx, Arc::clone(&queue)));
    wait_for_sync(&watchers, Duration::from_secs(30)).await;
    let store: Arc<dyn SnapshotStore> = watchers.store();
    let reconciler = Arc::new(Reconciler::new(store, Arc::new(PolicyEngine::with_default_rules()), sink, &cfg));
    let pool = WorkerPool::spawn(Arc::clone(&queue), reconciler, cfg.workers);

    signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!(pending = queue.len(), in_flight = queue.in_flight(), "shutdown requested");
    watchers.abort();
    if !pool.shutdown(cfg.shutdown_grace).await {
        error!("in-flight reconciles did not finish within the grace period");
    }
    pump.abort();
    Ok(())
}

/// Returns once every cache has listed, or after `limit`.
async fn wait_for_sync(watchers: &Watchers, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while !watchers.synced() {
        if tokio::time::Instant::now() >= deadline {
            warn!(waited_secs = limit.as_secs(), "caches not synced yet; starting workers anyway");
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    info!("caches synced");
}
