use clap::Parser;
use labelgrid_core::{signal::shutdown_signal, telemetry::init_telemetry};
use labelgrid_dispatch::{
    engine::{EngineFactory, bench_provider, hash::HashEngineFactory},
    worker::{
        ComputeNode,
        config::{CliArgs, Command, WorkerConfig},
    },
};
use portable_atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const BENCH_LABELS: u64 = 1 << 16;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let command = Command::try_from(args)?;

    let providers = init_telemetry("compute-node")?;
    let factory = Arc::new(HashEngineFactory::default());

    match command {
        Command::PrintProviders => {
            for provider in factory.providers() {
                println!("{provider}");
            }
        }
        Command::BenchProviders => {
            for provider in factory.providers() {
                let rate = bench_provider(factory.as_ref(), provider.id, BENCH_LABELS)?;
                println!("{provider}: {rate:.0} labels/s");
            }
        }
        Command::Run(config) => run(config, factory).await,
    }

    providers.shutdown();
    Ok(())
}

async fn run(config: WorkerConfig, factory: Arc<HashEngineFactory>) {
    tracing::info!(
        target_server = %config.target_server,
        preferred_size = config.preferred_size,
        provider = config.provider_id,
        "Starting compute node"
    );

    let node = ComputeNode::new(config, factory);
    let stats = node.stats();
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    node.run(shutdown).await;

    tracing::info!(
        sessions = stats.sessions.load(Ordering::Relaxed),
        ranges = stats.ranges_completed.load(Ordering::Relaxed),
        labels = stats.labels_computed.load(Ordering::Relaxed),
        "Compute node shut down"
    );
}
