//! Smoke harness for the AppShell offline worker.
//!
//! Installs and activates a worker against a live origin, then replays
//! requests through it, optionally with the network cut off.
//!
//! ## Usage
//!
//! ```bash
//! # Validate a worker config
//! appshell-smoke check --config worker.json
//!
//! # Install, go offline, and replay requests
//! appshell-smoke run --config worker.json --offline \
//!     --navigate /inbox /app.css /logo.png --report smoke.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use appshell_common::{init_logging, AppShellError, LogConfig, LogFormat, ResultExt};
use appshell_net::{HttpFetcher, LoaderConfig, NetError, NetworkFetch, Request, Response, Url};
use appshell_sw::{ClientList, MemoryCacheStore, ServiceWorker, WorkerConfig, WorkerEvent};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "appshell-smoke")]
#[command(about = "Smoke harness for the AppShell offline worker")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    format: FormatArg,

    /// Custom tracing filter, e.g. "appshell_sw=debug"
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a worker config
    Check {
        /// Worker config (JSON)
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Install, activate, and replay requests through the worker
    Run {
        /// Worker config (JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Cut the network off after activation
        #[arg(long)]
        offline: bool,
        /// Paths to request as navigations
        #[arg(long)]
        navigate: Vec<String>,
        /// Output JSON report path
        #[arg(long)]
        report: Option<PathBuf>,
        /// Paths to request as sub-resources
        paths: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Pretty,
    Compact,
    Json,
}

impl From<FormatArg> for LogFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Pretty => LogFormat::Pretty,
            FormatArg::Compact => LogFormat::Compact,
            FormatArg::Json => LogFormat::Json,
        }
    }
}

/// Requests to replay after activation.
#[derive(Debug, Default)]
struct Plan {
    offline: bool,
    navigations: Vec<String>,
    assets: Vec<String>,
}

/// Network that can be switched off mid-run.
struct Connectivity {
    online: AtomicBool,
    inner: HttpFetcher,
}

impl Connectivity {
    fn new(inner: HttpFetcher) -> Self {
        Self {
            online: AtomicBool::new(true),
            inner,
        }
    }

    fn go_offline(&self) {
        self.online.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl NetworkFetch for Connectivity {
    async fn fetch(&self, request: &Request) -> Result<Response, NetError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(NetError::Offline);
        }
        self.inner.fetch(request).await
    }
}

#[tokio::main]
async fn main() -> appshell_common::Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_verbosity(cli.verbose).with_format(cli.format.into());
    if let Some(filter) = cli.log_filter {
        log_config = log_config.with_filter(filter);
    }
    init_logging(log_config);

    match cli.command {
        Commands::Check { config } => {
            let config = load_config(&config)?;
            let summary = json!({
                "generation": config.generation().name(),
                "origin": config.origin.as_str(),
                "manifest": config.manifest,
            });
            println!("{}", serde_json::to_string_pretty(&summary).context("encoding summary")?);
        }

        Commands::Run {
            config,
            offline,
            navigate,
            report,
            paths,
        } => {
            let config = load_config(&config)?;
            let plan = Plan {
                offline,
                navigations: navigate,
                assets: paths,
            };
            let summary = run_smoke(config, &plan).await?;
            let json = serde_json::to_string_pretty(&summary).context("encoding report")?;

            match report {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    println!("Report written to: {}", path.display());
                }
                None => println!("{json}"),
            }
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> appshell_common::Result<WorkerConfig> {
    let config = WorkerConfig::load(path).map_err(|e| {
        AppShellError::config_with_source(format!("cannot load {}", path.display()), e)
    })?;
    config
        .validate()
        .map_err(|e| AppShellError::config_with_source("invalid worker config", e))?;
    Ok(config)
}

/// Drive one worker through install, activate and the request plan.
async fn run_smoke(config: WorkerConfig, plan: &Plan) -> appshell_common::Result<Value> {
    let fetcher = HttpFetcher::new(LoaderConfig::default())
        .map_err(|e| AppShellError::network_with_source("cannot build HTTP client", e))?;
    let network = Arc::new(Connectivity::new(fetcher));
    let store = Arc::new(MemoryCacheStore::new());
    let clients = Arc::new(ClientList::new());

    let origin = config.origin.clone();
    let requests = plan_requests(&config, plan)?;
    clients.open(origin).await;

    let (worker, mut events) = ServiceWorker::new(config, store, network.clone(), clients)?;
    let worker = Arc::new(worker);

    let started = Instant::now();
    let (installed, activated) = worker.start().await?;
    let startup_ms = started.elapsed().as_millis();
    info!(
        generation = %worker.generation(),
        startup_ms,
        cached = installed.cached().count(),
        "Worker started"
    );

    if plan.offline {
        info!("Cutting network off");
        network.go_offline();
    }

    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let url = request.url.clone();
            let navigation = request.is_navigation();
            (url, navigation, worker.respond_with(request))
        })
        .collect();

    let mut responses = Vec::with_capacity(handles.len());
    for (url, navigation, handle) in handles {
        let response = handle.response().await;
        if !response.ok() {
            warn!(url = %url, status = %response.status, source = %response.source, "Non-OK response");
        }
        responses.push(json!({
            "url": url.as_str(),
            "navigation": navigation,
            "status": response.status.as_u16(),
            "source": response.source.to_string(),
            "bytes": response.body.len(),
        }));
    }

    let mut event_log = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let WorkerEvent::PrecacheFailed { ref path, ref reason } = event {
            error!(path = %path, reason = %reason, "Precache failed");
        }
        event_log.push(format!("{event:?}"));
    }

    Ok(json!({
        "generation": worker.generation().name(),
        "startup_ms": startup_ms,
        "offline": plan.offline,
        "install": {
            "cached": installed.cached().map(|o| o.path()).collect::<Vec<_>>(),
            "failed": installed.failed().map(|o| o.path()).collect::<Vec<_>>(),
        },
        "activate": {
            "deleted": activated.deleted,
            "errors": activated.errors,
            "clients_claimed": activated.clients_claimed,
        },
        "responses": responses,
        "events": event_log,
    }))
}

fn plan_requests(config: &WorkerConfig, plan: &Plan) -> appshell_common::Result<Vec<Request>> {
    let resolve = |path: &String| -> appshell_common::Result<Url> {
        let url = config
            .resolve(path)
            .map_err(|e| AppShellError::config_with_source(format!("bad request path {path}"), e))?;
        if url.origin() != config.origin.origin() {
            return Err(AppShellError::Config {
                message: format!("{url} is outside the worker origin"),
                source: None,
            });
        }
        Ok(url)
    };

    let mut requests = Vec::with_capacity(plan.navigations.len() + plan.assets.len());
    for path in &plan.navigations {
        requests.push(Request::navigate(resolve(path)?));
    }
    for path in &plan.assets {
        requests.push(Request::get(resolve(path)?));
    }
    Ok(requests)
}
