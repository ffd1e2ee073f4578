use std::fs;
use std::io::Read;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mrmap::blobstore::SharedBlobstore;
use mrmap::cmd::standalone::{local_store, Args};
use mrmap::codec::decode_bucket;
use mrmap::engine::MapEngine;
use mrmap::utils::init_tracing;
use mrmap::{Bucket, MapRequest};
use serde_json::json;

fn read_request(path: &str) -> anyhow::Result<MapRequest> {
    let mut raw = String::new();
    if path == "-" {
        std::io::stdin().read_to_string(&mut raw)?;
    } else {
        raw = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    }
    Ok(serde_json::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level);
    let request = read_request(&args.request)?;
    let config = args.engine.engine_config();
    let codec = config.codec;

    let (engine, memory) = if args.dry_run {
        let keys: Vec<String> = request
            .source_keys
            .iter()
            .map(|key| format!("{}{}", config.input_prefix, key))
            .collect();
        let store = Arc::new(local_store(
            &args.input_dir,
            &request.source_container,
            keys.iter().map(String::as_str),
        )?);
        let shared: SharedBlobstore = store.clone();
        (MapEngine::new(shared.clone(), shared, config), Some(store))
    } else {
        let (source, shuffle) = args.store.connect().await?;
        (MapEngine::new(source, shuffle, config), None)
    };

    let reply = engine.reply(&request, None).await;
    let mut output = json!({ "reply": &reply });
    if let (Some(store), true) = (memory, reply.is_success()) {
        let mut buckets: Vec<Bucket> = Vec::with_capacity(reply.bucket_handles.len());
        for handle in &reply.bucket_handles {
            let data = mrmap::blobstore::Blobstore::get(store.as_ref(), &request.dest_container, handle).await?;
            buckets.push(decode_bucket(codec, data)?);
        }
        output["buckets"] = serde_json::to_value(&buckets)?;
    }
    println!("{}", serde_json::to_string_pretty(&output)?);

    if !reply.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
