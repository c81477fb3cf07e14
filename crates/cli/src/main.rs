use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{error, info};
use vsync_core::{Domain, Identity, SyncConfig, TrackedKind};
use vsync_kubehub::{physical_client, spawn_dispatch, start_watcher, virtual_client, KubeStore};
use vsync_sync::Dispatcher;
use vsync_translate::{NamespacedTranslator, RevisionTranslator, Translate};

#[derive(Parser, Debug)]
#[command(name = "vsyncd", version, about = "Knative object sync between a virtual cluster and its host")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(flatten)]
    sync: SyncArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Args, Debug)]
struct SyncArgs {
    /// Host namespace holding the synced objects
    #[arg(long, env = "VSYNC_TARGET_NAMESPACE", global = true, default_value = "vcluster")]
    target_namespace: String,
    /// Virtual cluster suffix, also the value of the managed-by label
    #[arg(long, env = "VSYNC_SUFFIX", global = true, default_value = "vcluster")]
    suffix: String,
    #[arg(long = "max-name-length", env = "VSYNC_MAX_NAME_LENGTH", global = true, default_value_t = vsync_core::DEFAULT_MAX_NAME_LEN)]
    max_name_len: usize,
    #[arg(long, env = "VSYNC_CACHE_SHARDS", global = true, default_value_t = 16)]
    cache_shards: usize,
    #[arg(long, env = "VSYNC_QUEUE_CAP", global = true, default_value_t = 4096)]
    queue_cap: usize,
    /// Delay before a failed event is retried
    #[arg(long, env = "VSYNC_REQUEUE_MS", global = true, default_value_t = 1000)]
    requeue_ms: u64,
}

impl SyncArgs {
    fn config(&self) -> SyncConfig {
        SyncConfig {
            target_namespace: self.target_namespace.clone(),
            suffix: self.suffix.clone(),
            max_name_len: self.max_name_len,
            cache_shards: self.cache_shards,
            queue_cap: self.queue_cap,
            requeue_ms: self.requeue_ms,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch both clusters and keep virtual objects in step with the host
    Run {
        /// Kubeconfig of the virtual cluster API server
        #[arg(long, env = "VSYNC_VIRTUAL_KUBECONFIG")]
        virtual_kubeconfig: PathBuf,
    },
    /// Print the identity an object maps to in the other domain
    Translate {
        /// Kind, e.g. "revision" or "routes"
        kind: String,
        /// Object as namespace/name
        identity: String,
        /// Map a physical identity back to its virtual one
        #[arg(long)]
        reverse: bool,
    },
}

/// Used when `VSYNC_LOG` is unset or does not parse.
const DEFAULT_LOG_FILTER: &str = "info,vsync_sync=debug,kube_runtime=warn";

const DISPATCH_LATENCY_BUCKETS_MS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0];

fn log_filter(env: Option<&str>) -> String {
    match env {
        Some(directives) if tracing_subscriber::EnvFilter::try_new(directives).is_ok() => directives.to_string(),
        _ => DEFAULT_LOG_FILTER.to_string(),
    }
}

fn init_tracing() {
    let env = std::env::var("VSYNC_LOG").ok();
    let filter = tracing_subscriber::EnvFilter::from_str(&log_filter(env.as_deref()))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn describe_metrics() {
    metrics::describe_counter!("vsync_sync_total", "Reconcile steps by kind and outcome");
    metrics::describe_counter!("vsync_store_errors_total", "Failed store calls by operation and kind");
    metrics::describe_counter!("vsync_namecache_records_total", "Identities recorded in the name caches");
    metrics::describe_counter!("vsync_coalescer_dropped_total", "Events dropped by a full dispatch queue");
    metrics::describe_counter!("vsync_dispatch_gave_up_total", "Events that ran out of retries");
    metrics::describe_counter!("vsync_watch_events_total", "Watch events forwarded by domain and kind");
    metrics::describe_histogram!("vsync_dispatch_latency_ms", "Time to handle one dispatch batch");
}

fn init_metrics() {
    let Ok(addr) = std::env::var("VSYNC_METRICS_ADDR") else { return };
    let Ok(sock) = addr.parse::<std::net::SocketAddr>() else {
        tracing::warn!(addr = %addr, "invalid VSYNC_METRICS_ADDR; expected host:port");
        return;
    };
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(sock);
    let builder = match builder.set_buckets_for_metric(
        metrics_exporter_prometheus::Matcher::Full("vsync_dispatch_latency_ms".to_string()),
        DISPATCH_LATENCY_BUCKETS_MS,
    ) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "invalid latency buckets; metrics exporter disabled");
            return;
        }
    };
    match builder.install() {
        Ok(_) => {
            describe_metrics();
            tracing::info!(addr = %addr, "Prometheus metrics exporter listening");
        }
        Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
    }
}

fn translate(cfg: &SyncConfig, kind: TrackedKind, id: &Identity, reverse: bool) -> Result<Identity> {
    let translator: Box<dyn Translate> = match kind {
        TrackedKind::Revision => Box::new(RevisionTranslator::new(cfg)?),
        _ => Box::new(NamespacedTranslator::new(cfg)?),
    };
    let out = if reverse { translator.physical_to_virtual(id)? } else { translator.virtual_to_physical(id)? };
    Ok(out)
}

async fn run(cfg: SyncConfig, virtual_kubeconfig: PathBuf) -> Result<()> {
    let vclient = virtual_client(&virtual_kubeconfig).await?;
    let pclient = physical_client().await?;
    let vstore = KubeStore::new(vclient.clone(), Domain::Virtual, Dispatcher::index_specs(&cfg)?);
    let pstore = KubeStore::new(pclient.clone(), Domain::Physical, Vec::new());
    let dispatcher = Arc::new(Dispatcher::new(&cfg, Arc::new(vstore.clone()), Arc::new(pstore.clone()))?);

    for kind in [TrackedKind::Service, TrackedKind::Configuration] {
        vstore.prime(kind, None).await.with_context(|| format!("listing virtual {}", kind))?;
    }
    let mut existing = Vec::new();
    for kind in [TrackedKind::Configuration, TrackedKind::Route, TrackedKind::Revision] {
        existing.extend(
            pstore
                .prime(kind, Some(&cfg.target_namespace))
                .await
                .with_context(|| format!("listing host {}", kind))?,
        );
    }
    let total = existing.len();
    let resolved = dispatcher.warm(existing).await;
    info!(total, resolved, "name caches warmed");

    let handle = spawn_dispatch(dispatcher, cfg.queue_cap, Duration::from_millis(cfg.requeue_ms));
    let mut watchers = Vec::new();
    for kind in TrackedKind::ALL {
        let (client, cache, tx) = (vclient.clone(), vstore.cache(), handle.tx.clone());
        watchers.push(tokio::spawn(async move {
            if let Err(e) = start_watcher(client, Domain::Virtual, kind, None, cache, tx).await {
                error!(error = ?e, %kind, "virtual watcher failed");
            }
        }));
    }
    for kind in [TrackedKind::Configuration, TrackedKind::Route, TrackedKind::Revision] {
        let (client, cache, tx) = (pclient.clone(), pstore.cache(), handle.tx.clone());
        let ns = Some(cfg.target_namespace.clone());
        watchers.push(tokio::spawn(async move {
            if let Err(e) = start_watcher(client, Domain::Physical, kind, ns, cache, tx).await {
                error!(error = ?e, %kind, "host watcher failed");
            }
        }));
    }
    info!(target_namespace = %cfg.target_namespace, suffix = %cfg.suffix, "syncing");

    signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutting down");
    for w in &watchers {
        w.abort();
    }
    drop(handle.tx);
    let _ = handle.task.await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let cfg = cli.sync.config();

    match cli.command {
        Commands::Run { virtual_kubeconfig } => run(cfg, virtual_kubeconfig).await?,
        Commands::Translate { kind, identity, reverse } => {
            let kind = TrackedKind::from_str(&kind).map_err(|e| anyhow::anyhow!("{}", e))?;
            let id = Identity::parse_key(&identity)
                .with_context(|| format!("expected namespace/name, got {:?}", identity))?;
            let out = translate(&cfg, kind, &id, reverse)?;
            match cli.output {
                Output::Human => println!("{}", out),
                Output::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "kind": kind.as_str(),
                        "from": id.key(),
                        "to": out.key(),
                    }))?
                ),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translate_both_ways() {
        let cfg = SyncConfig::new("vcluster", "vcluster");
        let v = Identity::new("default", "hello-00001");
        let p = translate(&cfg, TrackedKind::Revision, &v, false).unwrap();
        assert_eq!(p.key(), "vcluster/hello-x-default-x-vcluster-00001");
        assert_eq!(translate(&cfg, TrackedKind::Revision, &p, true).unwrap(), v);
        assert!(translate(&cfg, TrackedKind::Route, &Identity::new("other", "x"), true).is_err());
    }

    #[test]
    fn log_filter_defaults_to_sync_debug() {
        assert_eq!(log_filter(None), DEFAULT_LOG_FILTER);
        assert!(DEFAULT_LOG_FILTER.contains("vsync_sync=debug"));
        assert_eq!(log_filter(Some("warn,vsync_kubehub=trace")), "warn,vsync_kubehub=trace");
        assert_eq!(log_filter(Some("vsync_sync=loud")), DEFAULT_LOG_FILTER);
    }

    #[test]
    fn flags_fill_the_sync_config() {
        let cli = Cli::try_parse_from([
            "vsyncd",
            "--target-namespace",
            "host",
            "--suffix",
            "vc1",
            "translate",
            "route",
            "default/hello",
        ])
        .unwrap();
        let cfg = cli.sync.config();
        assert_eq!(cfg.target_namespace, "host");
        assert_eq!(cfg.suffix, "vc1");
        assert_eq!(cfg.max_name_len, 63);
    }
}
