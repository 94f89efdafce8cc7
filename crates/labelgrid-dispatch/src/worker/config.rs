use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Runtime configuration for the `compute-node` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "compute-node",
    version,
    about = "A remote compute worker for distributed label generation"
)]
pub struct CliArgs {
    /// Dispatch server to take work from.
    ///
    /// Environment variable: `TARGET_SERVER`
    #[arg(long, env = "TARGET_SERVER", required_unless_present_any = ["print_providers", "bench_providers"])]
    pub target_server: Option<String>,

    /// Preferred number of labels per work range. Advisory; the dispatch
    /// server may hand out smaller or larger ranges.
    ///
    /// Environment variable: `PREFERRED_SIZE`
    #[arg(long, env = "PREFERRED_SIZE", default_value_t = 16)]
    pub preferred_size: u64,

    /// Compute provider to initialise the engine on.
    ///
    /// Environment variable: `PROVIDER`
    #[arg(long, env = "PROVIDER", default_value_t = 0)]
    pub provider: u32,

    /// Delay between reconnection attempts, in milliseconds.
    ///
    /// Environment variable: `RECONNECT_BACKOFF_MS`
    #[arg(long, env = "RECONNECT_BACKOFF_MS", default_value_t = 1000)]
    pub reconnect_backoff_ms: u64,

    /// Print the available compute providers and exit.
    #[arg(long, default_value_t = false)]
    pub print_providers: bool,

    /// Benchmark every compute provider and exit.
    #[arg(long, default_value_t = false)]
    pub bench_providers: bool,
}

/// What the binary should do once configuration is parsed.
#[derive(Debug, Clone)]
pub enum Command {
    PrintProviders,
    BenchProviders,
    Run(WorkerConfig),
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub target_server: String,
    pub preferred_size: u64,
    pub provider_id: u32,
    pub reconnect_backoff: Duration,
}

impl WorkerConfig {
    pub fn new(target_server: impl Into<String>) -> Self {
        Self {
            target_server: target_server.into(),
            preferred_size: 16,
            provider_id: 0,
            reconnect_backoff: Duration::from_secs(1),
        }
    }
}

impl TryFrom<CliArgs> for Command {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.print_providers {
            return Ok(Self::PrintProviders);
        }
        if args.bench_providers {
            return Ok(Self::BenchProviders);
        }

        let Some(target_server) = args.target_server else {
            bail!("TARGET_SERVER is required");
        };
        if target_server.is_empty() {
            bail!("TARGET_SERVER must not be empty");
        }

        Ok(Self::Run(WorkerConfig {
            target_server,
            preferred_size: args.preferred_size,
            provider_id: args.provider,
            reconnect_backoff: Duration::from_millis(args.reconnect_backoff_ms),
        }))
    }
}
