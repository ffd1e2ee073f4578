use std::sync::Arc;

use clap::Parser;
use mrmap::cmd::mapper::Args;
use mrmap::engine::MapEngine;
use mrmap::proto::mapper_server::MapperServer;
use mrmap::service::MapperService;
use mrmap::utils::init_tracing;
use tonic::transport::Server;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level);

    // Storage clients are created once and shared by every request.
    let (source, shuffle) = args.store.connect().await?;
    let config = args.engine.engine_config();
    info!(
        backend = shuffle.name(),
        source = source.name(),
        max_writers = config.max_writers,
        deadline = ?config.deadline,
        "mapper configured"
    );
    let engine = Arc::new(MapEngine::new(source, shuffle, config));

    let addr = format!("0.0.0.0:{}", args.port).parse()?;
    info!("Mapper listening on {}", addr);
    Server::builder()
        .concurrency_limit_per_connection(args.max_server_threads.max(1))
        .add_service(MapperServer::new(MapperService::new(engine)))
        .serve(addr)
        .await?;

    Ok(())
}
