use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::Api;
use steward_controller::{plan, Action, Controller, ControllerConfig, EventRouter, IngressReconciler, LogSink};
use steward_core::{DesiredResource, Key, ManagedResource, ManagedTemplate};
use steward_kubehub::{
    desired_from_service, managed_from_ingress, scoped_api, start_watcher, KubeIngressClient,
};
use steward_queue::WorkQueue;
use steward_store::spawn_ingest;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "steward", version, about = "Keeps an Ingress for every annotated Service")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller until SIGINT/SIGTERM
    Run(RunArgs),
    /// Print the action a sync of one Service would take, without taking it
    Plan {
        /// Service key, "namespace/name" (bare names resolve in "default")
        key: String,
        #[command(flatten)]
        ingress: IngressArgs,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Namespace to watch
    #[arg(long = "ns", env = "STEWARD_NAMESPACE", default_value = "default")]
    namespace: String,
    /// Watch every namespace (overrides --ns)
    #[arg(long = "all-namespaces", env = "STEWARD_ALL_NAMESPACES", action = ArgAction::SetTrue)]
    all_namespaces: bool,
    #[arg(long, env = "STEWARD_WORKERS", default_value_t = 5)]
    workers: usize,
    /// Failed syncs retried per key before giving up
    #[arg(long = "max-retries", env = "STEWARD_MAX_RETRIES", default_value_t = 10)]
    max_retries: usize,
    /// Re-enqueue every Service this often; 0 disables
    #[arg(long = "resync-secs", env = "STEWARD_RESYNC_SECS", default_value_t = 60)]
    resync_secs: u64,
    #[arg(long = "sync-timeout-secs", env = "STEWARD_SYNC_TIMEOUT_SECS", default_value_t = 30)]
    sync_timeout_secs: u64,
    /// Startup fails if the caches have not listed by then
    #[arg(long = "cache-sync-timeout-secs", env = "STEWARD_CACHE_SYNC_TIMEOUT_SECS", default_value_t = 60)]
    cache_sync_timeout_secs: u64,
    #[command(flatten)]
    ingress: IngressArgs,
}

/// Shape of the managed Ingress.
#[derive(Args, Debug)]
struct IngressArgs {
    /// Annotation whose presence on a Service requests an Ingress
    #[arg(long, env = "STEWARD_MARKER", default_value = steward_controller::DEFAULT_MARKER)]
    marker: String,
    /// Ingress class; empty leaves it unset
    #[arg(long = "ingress-class", env = "STEWARD_INGRESS_CLASS", default_value = "nginx")]
    ingress_class: String,
    #[arg(long, env = "STEWARD_HOST", default_value = "example.com")]
    host: String,
    /// Backend service port
    #[arg(long, env = "STEWARD_PORT", default_value_t = 80)]
    port: i32,
}

impl IngressArgs {
    fn template(&self) -> ManagedTemplate {
        ManagedTemplate {
            class_name: (!self.ingress_class.is_empty()).then(|| self.ingress_class.clone()),
            host: self.host.clone(),
            backend_port: self.port,
            ..ManagedTemplate::default()
        }
    }
}

fn init_tracing() {
    let env = std::env::var("STEWARD_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("STEWARD_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid STEWARD_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Plan { key, ingress } => plan_one(&key, &ingress, cli.output).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let client = steward_kubehub::connect().await?;
    let namespace = (!args.all_namespaces).then_some(args.namespace.as_str());
    let template = args.ingress.template();
    let config = ControllerConfig {
        workers: args.workers,
        max_retries: args.max_retries,
        sync_timeout: Duration::from_secs(args.sync_timeout_secs),
        cache_sync_timeout: Duration::from_secs(args.cache_sync_timeout_secs),
        resync_period: (args.resync_secs > 0).then(|| Duration::from_secs(args.resync_secs)),
        ..ControllerConfig::default()
    };
    info!(ns = ?namespace, workers = config.workers, marker = %args.ingress.marker, "starting");

    let queue = WorkQueue::with_default_rate_limiter(config.name.clone());
    let router = Arc::new(EventRouter::new(queue.clone(), template.owner_kind.clone()));
    let (svc_tx, services) = spawn_ingest::<DesiredResource>("services", 1024, router.clone());
    let (ing_tx, ingresses) = spawn_ingest::<ManagedResource>("ingresses", 1024, router);

    let svc_api: Api<Service> = scoped_api(client.clone(), namespace);
    let ing_api: Api<Ingress> = scoped_api(client.clone(), namespace);
    let watchers = [
        tokio::spawn(async move {
            if let Err(e) = start_watcher("services", svc_api, desired_from_service, svc_tx).await {
                error!(error = ?e, "service watcher failed");
            }
        }),
        tokio::spawn(async move {
            if let Err(e) = start_watcher("ingresses", ing_api, managed_from_ingress, ing_tx).await {
                error!(error = ?e, "ingress watcher failed");
            }
        }),
    ];

    let storage = Arc::new(KubeIngressClient::new(client).with_field_manager("steward"));
    let reconciler = IngressReconciler::new(Arc::new(services.clone()), Arc::new(ingresses.clone()), storage)
        .with_marker(args.ingress.marker.clone())
        .with_template(template);
    let controller = Controller::new(config, queue, Arc::new(reconciler), Arc::new(LogSink))
        .wait_for(services.ready())
        .wait_for(ingresses.ready())
        .resync_from(Arc::new(services));

    let res = controller.run(shutdown_signal()).await;
    for w in &watchers {
        w.abort();
    }
    res.context("controller failed")
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("SIGINT received; shutting down"),
        _ = terminate => info!("SIGTERM received; shutting down"),
    }
}

async fn plan_one(raw: &str, args: &IngressArgs, output: Output) -> Result<()> {
    let parsed = Key::from_str(raw).with_context(|| format!("parsing key {raw:?}"))?;
    let key = if parsed.is_namespaced() { parsed } else { Key::new("default", parsed.name) };
    let client = steward_kubehub::connect().await?;

    let services: Api<Service> = Api::namespaced(client.clone(), &key.namespace);
    let ingresses: Api<Ingress> = Api::namespaced(client, &key.namespace);
    let desired = services.get_opt(&key.name).await.context("reading service")?.map(|s| desired_from_service(&s));
    let managed = ingresses.get_opt(&key.name).await.context("reading ingress")?.map(|i| managed_from_ingress(&i));

    let template = args.template();
    let action = plan(&key, desired.as_ref(), managed.as_ref(), &args.marker, &template);
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(&action)?),
        Output::Human => match &action {
            Action::Create { object } => println!(
                "create {} • host {} • path {} • backend {}:{}",
                object.key, object.spec.host, object.spec.path, object.spec.backend_service, object.spec.backend_port
            ),
            Action::Delete { key } => println!("delete {key}"),
            Action::Noop { reason } => println!("noop {key} • {reason}"),
        },
    }
    Ok(())
}
