use clap::{Parser, Subcommand};

use super::StoreArgs;
use crate::config::Codec;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Commands,
    /// Mapper service to talk to
    #[clap(short = 'J', long, default_value = "127.0.0.1:50051")]
    pub host: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a map task on the mapper service
    Run {
        /// Container holding the input shards
        #[arg(long)]
        src: String,
        /// Container receiving the shuffle buckets
        #[arg(long)]
        dest: String,
        #[arg(short, long)]
        job: String,
        #[arg(short, long)]
        mapper: String,
        /// Number of reducers
        #[arg(short = 'n', long)]
        reducers: u32,
        /// Deadline in milliseconds, 0 for the service default
        #[arg(long, default_value_t = 0)]
        deadline_ms: u64,
        /// Input shard keys
        #[clap(value_parser, last = true, required = true)]
        keys: Vec<String>,
    },
    /// Fetch a shuffle shard and print its contents
    Fetch {
        /// Container the shard lives in
        #[arg(long)]
        container: String,
        /// Shard handle as returned by `run`
        handle: String,
        #[arg(long, value_enum, default_value = "parquet")]
        codec: Codec,
        #[command(flatten)]
        store: StoreArgs,
    },
}
