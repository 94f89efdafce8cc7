use anyhow::{Context, bail};
use clap::Parser;
use labelgrid_core::types::{BITS_PER_LABEL, Commitment, OpenParams};
use std::path::PathBuf;

/// Runtime configuration for the `dispatch-server` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "dispatch-server",
    version,
    about = "Distributes label generation across remote compute nodes"
)]
pub struct CliArgs {
    /// Address compute nodes connect to.
    ///
    /// Environment variable: `LISTEN_ADDR`
    #[arg(long, env = "LISTEN_ADDR", default_value_t = String::from("0.0.0.0:25445"))]
    pub listen_addr: String,

    /// Commitment to generate labels for, as 64 hex characters.
    ///
    /// Environment variable: `COMMITMENT`
    #[arg(long, env = "COMMITMENT")]
    pub commitment: String,

    /// Total number of labels in the dataset.
    ///
    /// Environment variable: `NUM_LABELS`
    #[arg(long, env = "NUM_LABELS")]
    pub num_labels: u64,

    /// Range size handed to workers that express no preference.
    ///
    /// Environment variable: `DEFAULT_CHUNK_SIZE`
    #[arg(long, env = "DEFAULT_CHUNK_SIZE", default_value_t = 1 << 20)]
    pub default_chunk_size: u64,

    /// Upper bound on any range handed to a worker.
    ///
    /// Environment variable: `MAX_CHUNK_SIZE`
    #[arg(long, env = "MAX_CHUNK_SIZE", default_value_t = 1 << 22)]
    pub max_chunk_size: u64,

    /// Directory holding the label file.
    ///
    /// Environment variable: `DATA_DIR`
    #[arg(long, env = "DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Index of the label file inside the data directory.
    ///
    /// Environment variable: `FILE_INDEX`
    #[arg(long, env = "FILE_INDEX", default_value_t = 0)]
    pub file_index: u32,

    /// Label storage service to write through. When unset, labels are
    /// written to a local file.
    ///
    /// Environment variable: `REMOTE_ADDR`
    #[arg(long, env = "REMOTE_ADDR")]
    pub remote_addr: Option<String>,

    /// Recompute the winning index once the dispatch completes.
    #[arg(long, default_value_t = false)]
    pub verify_solution: bool,
}

/// Where assembled labels go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    Local(OpenParams),
    Remote { addr: String, params: OpenParams },
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub listen_addr: String,
    pub commitment: Commitment,
    pub num_labels: u64,
    pub default_chunk: u64,
    pub max_chunk: u64,
    pub storage: StorageTarget,
    pub verify_solution: bool,
}

impl TryFrom<CliArgs> for DispatchConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let bytes = hex::decode(args.commitment.trim()).context("COMMITMENT is not valid hex")?;
        let commitment = Commitment::from_slice(&bytes)?;

        if args.num_labels == 0 {
            bail!("NUM_LABELS must be greater than 0");
        }
        if args.default_chunk_size == 0 || args.max_chunk_size == 0 {
            bail!("DEFAULT_CHUNK_SIZE and MAX_CHUNK_SIZE must be greater than 0");
        }

        let params = OpenParams::new(args.data_dir, args.file_index, BITS_PER_LABEL);
        let storage = match args.remote_addr {
            Some(addr) if !addr.is_empty() => StorageTarget::Remote { addr, params },
            _ => StorageTarget::Local(params),
        };

        Ok(Self {
            listen_addr: args.listen_addr,
            commitment,
            num_labels: args.num_labels,
            default_chunk: args.default_chunk_size,
            max_chunk: args.max_chunk_size,
            storage,
            verify_solution: args.verify_solution,
        })
    }
}
