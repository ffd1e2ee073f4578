use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, Level};

use super::{EngineArgs, StoreArgs};
use crate::blobstore::MemoryBlobstore;

/// Single-shot invocation: one map task in, one JSON reply out.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// JSON map request; `-` reads it from stdin
    #[arg(short, long, default_value = "-")]
    pub request: String,
    /// Read source keys as local files and keep the shuffle in memory.
    /// The decoded buckets are printed along with the reply.
    #[arg(long)]
    pub dry_run: bool,
    /// Base directory for source keys in a dry run
    #[arg(long, default_value = ".")]
    pub input_dir: PathBuf,
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: Level,
    #[command(flatten)]
    pub store: StoreArgs,
    #[command(flatten)]
    pub engine: EngineArgs,
}

/// Loads each key as the file `input_dir/key` into a fresh memory store.
///
/// A missing file is left out so the engine reports it like a missing
/// object. Any other read failure aborts the load.
pub fn local_store<'a>(
    input_dir: &Path,
    container: &str,
    keys: impl IntoIterator<Item = &'a str>,
) -> anyhow::Result<MemoryBlobstore> {
    let store = MemoryBlobstore::new();
    for key in keys {
        let path = input_dir.join(key);
        match fs::read(&path) {
            Ok(data) => store.insert(container, key, data),
            Err(e) if e.kind() == ErrorKind::NotFound => debug!(path = %path.display(), "no such input file"),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }
    Ok(store)
}
