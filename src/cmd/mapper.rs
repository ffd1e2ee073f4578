use clap::Parser;
use tracing::Level;

use super::{EngineArgs, StoreArgs};

#[derive(Parser, Debug)]
#[command(version, about = "Map stage service of the MapReduce benchmark", long_about = None)]
pub struct Args {
    /// Port to serve the Mapper RPC on
    #[arg(short = 'P', long, env = "MAPPER_PORT", default_value_t = 50051)]
    pub port: u16,
    /// Concurrent requests served per connection
    #[arg(long, env = "MAX_SERVER_THREADS", default_value_t = 16)]
    pub max_server_threads: usize,
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: Level,
    #[command(flatten)]
    pub store: StoreArgs,
    #[command(flatten)]
    pub engine: EngineArgs,
}
