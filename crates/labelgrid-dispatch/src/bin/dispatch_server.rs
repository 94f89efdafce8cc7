use anyhow::Context;
use clap::Parser;
use labelgrid_core::{signal::shutdown_signal, telemetry::init_telemetry};
use labelgrid_dispatch::{
    coordinator::{
        DispatchJob, DispatchSummary, LabelSink,
        config::{CliArgs, DispatchConfig, StorageTarget},
        resume_point, run_dispatch,
    },
    engine::{EngineParams, hash::HashEngineFactory, verify_solution},
};
use labelgrid_storage::{
    client::{RemoteLabelsWriter, endpoint_uri},
    server::{config::DEFAULT_WRITE_BUFFER_BYTES, session::LabelFile},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = DispatchConfig::try_from(args)?;

    let providers = init_telemetry("dispatch-server")?;

    let res = match config.storage.clone() {
        StorageTarget::Local(params) => {
            tracing::info!(path = %params.file_path().display(), "Writing labels locally");
            let sink = LabelFile::open(&params, DEFAULT_WRITE_BUFFER_BYTES).await?;
            dispatch(&config, sink).await
        }
        StorageTarget::Remote { addr, params } => {
            tracing::info!(%addr, path = %params.file_path().display(), "Writing labels remotely");
            let sink = RemoteLabelsWriter::connect(endpoint_uri(&addr), params).await?;
            dispatch(&config, sink).await
        }
    };

    let res = match res {
        Ok(summary) if config.verify_solution => verify(&config, summary),
        other => other.map(|_| ()),
    };

    providers.shutdown();
    res
}

fn verify(config: &DispatchConfig, summary: DispatchSummary) -> anyhow::Result<()> {
    let Some(index) = summary.solution else {
        return Ok(());
    };
    let params = EngineParams::for_dataset(0, config.commitment, config.num_labels)?;
    verify_solution(&HashEngineFactory::default(), &params, index)
        .context("reported solution failed verification")?;
    tracing::info!(index, "Solution verified");
    Ok(())
}

async fn dispatch<S: LabelSink>(config: &DispatchConfig, mut sink: S) -> anyhow::Result<DispatchSummary> {
    let first_label = resume_point(&mut sink, config.num_labels).await?;
    let job = DispatchJob {
        commitment: config.commitment,
        num_labels: config.num_labels,
        first_label,
        default_chunk: config.default_chunk,
        max_chunk: config.max_chunk,
    };

    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(listen_addr = %config.listen_addr, "Waiting for compute nodes");

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let (sink, summary) = run_dispatch(listener, job, sink, shutdown).await?;
    sink.close().await?;

    match summary.solution {
        Some(index) => tracing::info!(index, "Found solution"),
        None => tracing::warn!("No label satisfied the difficulty"),
    }
    Ok(summary)
}
