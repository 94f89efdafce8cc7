use anyhow::bail;
use clap::Parser;

/// Default capacity of a session's write buffer.
pub const DEFAULT_WRITE_BUFFER_BYTES: usize = 1 << 20;

/// Default maximum size of a decoded gRPC message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 << 20;

/// Runtime configuration for the `label-store-server` binary.
///
/// All values are parsed from CLI arguments or environment variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "label-store-server",
    version,
    about = "A gRPC service for remote append-only label files"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix
    /// socket).
    ///
    /// Example: "0.0.0.0:25446" or "/tmp/label-store.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:25446"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be
    /// a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Capacity of the in-memory buffer in front of the label file.
    ///
    /// Bytes written by clients stay in this buffer until it fills up or a
    /// `Flush`, `Truncate` or `Close` arrives.
    ///
    /// Environment variable: `WRITE_BUFFER_BYTES`
    #[arg(long, env = "WRITE_BUFFER_BYTES", default_value_t = DEFAULT_WRITE_BUFFER_BYTES)]
    pub write_buffer_bytes: usize,

    /// Largest `Write` payload the service will decode.
    ///
    /// Environment variable: `MAX_MESSAGE_BYTES`
    #[arg(long, env = "MAX_MESSAGE_BYTES", default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub write_buffer_bytes: usize,
    pub max_message_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("0.0.0.0:25446"),
            uds: false,
            write_buffer_bytes: DEFAULT_WRITE_BUFFER_BYTES,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.write_buffer_bytes == 0 {
            bail!("WRITE_BUFFER_BYTES must be greater than 0");
        }

        if args.max_message_bytes == 0 {
            bail!("MAX_MESSAGE_BYTES must be greater than 0");
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            write_buffer_bytes: args.write_buffer_bytes,
            max_message_bytes: args.max_message_bytes,
        })
    }
}
