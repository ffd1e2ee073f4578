use clap::Parser;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(version, about = "Point-to-point transfer sink for shuffle data", long_about = None)]
pub struct Args {
    /// Port to serve the Transfer RPC on
    #[arg(short = 'P', long, env = "TRANSFER_PORT", default_value_t = 50052)]
    pub port: u16,
    /// Memory budget for buffered payloads, in MiB
    #[arg(short, long, env = "TRANSFER_QUOTA_MB", default_value_t = 1024)]
    pub quota_mb: usize,
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: Level,
}
