use anyhow::{Context, Result};
use clap::Parser;
use harbor_core::{LifecycleEvent, RetryPolicy};
use harbor_sync::{
    EngineApi, EngineEndpoints, EventReconciler, HttpEngine, JsonFrames, LogFeed, RegistryDelta,
    StreamSession, WorkloadRegistry, WsConnector, DEFAULT_LOG_CEILING,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "harbor-dash")]
#[command(about = "Live workload dashboard over a container engine gateway", long_about = None)]
struct Cli {
    /// Base url of the engine gateway, e.g. http://127.0.0.1:8080
    #[arg(long)]
    engine_url: Option<String>,

    /// Also tail the logs of one workload id
    #[arg(long)]
    tail: Option<String>,

    /// Retained log lines when tailing
    #[arg(long, default_value_t = DEFAULT_LOG_CEILING)]
    log_ceiling: usize,
}

fn init_tracing() {
    let level = if let Ok(level) = std::env::var("HARBOR_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn engine_url(cli: &Cli) -> Result<String> {
    if let Some(url) = &cli.engine_url {
        return Ok(url.clone());
    }
    if let Ok(url) = std::env::var("HARBOR_ENGINE_URL") {
        return Ok(url);
    }
    Ok("http://127.0.0.1:8080".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let base = engine_url(&cli)?;

    let endpoints = EngineEndpoints::new(&base).context("bad engine url")?;
    let engine: Arc<dyn EngineApi> = Arc::new(HttpEngine::new(endpoints.clone()));
    let connector = Arc::new(WsConnector);

    let registry = WorkloadRegistry::new();
    registry.subscribe(|delta| match delta {
        RegistryDelta::Upserted(workload) => {
            println!("* {} {} [{}] {}", workload.id, workload.name, workload.state, workload.image)
        }
        RegistryDelta::Removed(id) => println!("- {id}"),
        RegistryDelta::Replaced(workloads) => {
            for workload in workloads {
                println!("  {} {} [{}] {}", workload.id, workload.name, workload.state, workload.image);
            }
        }
    });

    let reconciler = EventReconciler::new(registry.clone(), engine);
    let loaded = reconciler
        .load_initial()
        .await
        .context("initial workload list failed")?;
    info!("workloads_loaded: {loaded} from {base}");

    let (events_session, events_rx) = StreamSession::open(
        connector.clone(),
        endpoints.events().context("events endpoint")?,
        JsonFrames::<LifecycleEvent>::default(),
        RetryPolicy::persistent(),
        true,
    );
    let reconcile = tokio::spawn(async move { reconciler.run(events_rx).await });

    let _tail = match &cli.tail {
        Some(id) => {
            let feed = LogFeed::open(
                connector,
                endpoints.logs(id).context("logs endpoint")?,
                cli.log_ceiling,
            );
            feed.buffer().subscribe(|record| {
                println!("[log] {} {}", record.timestamp, record.message);
            });
            Some(feed)
        }
        None => None,
    };

    tokio::signal::ctrl_c().await.context("ctrl-c handler")?;
    info!("shutdown_requested");
    events_session.close();
    if let Err(err) = reconcile.await {
        warn!("reconciler_join_failed: {err}");
    }
    Ok(())
}
