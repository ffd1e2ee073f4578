use anyhow::{bail, Context};
use clap::Parser;
use itertools::Itertools;
use mrmap::blobstore;
use mrmap::cmd::ctl::{Args, Commands};
use mrmap::codec::decode_bucket;
use mrmap::proto::mapper_client::MapperClient;
use mrmap::proto::{MapRequest, MapStatus};
use tonic::Request;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Run { src, dest, job, mapper, reducers, deadline_ms, keys } => {
            let mut client = MapperClient::connect(format!("http://{}", args.host)).await?;
            let request = Request::new(MapRequest {
                source_container: src,
                dest_container: dest,
                job_id: job,
                mapper_id: mapper,
                reducer_count: reducers,
                source_keys: keys,
                deadline_ms,
            });
            let reply = client.run_map(request).await?.into_inner();
            println!(
                "records: {}\tparse errors: {}\tsources: {}\telapsed: {}ms",
                reply.records_processed, reply.parse_errors, reply.sources_read, reply.elapsed_ms
            );
            if reply.status() != MapStatus::Success {
                bail!("map task failed: {} (buckets {:?})", reply.error_detail, reply.failed_buckets);
            }
            for (bucket, handle) in reply.bucket_handles.iter().enumerate() {
                println!("[{bucket}]\t{handle}");
            }
        }
        Commands::Fetch { container, handle, codec, store } => {
            let store = blobstore::connect(&store.store_config(store.backend)).await?;
            let data = store
                .get(&container, &handle)
                .await
                .with_context(|| format!("fetching {container}/{handle}"))?;
            let bucket = decode_bucket(codec, data)?;
            for (key, sum) in bucket.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
                println!("{key}\t{sum}");
            }
        }
    }

    Ok(())
}
