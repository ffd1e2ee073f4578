use clap::Parser;
use mrmap::blobstore::transfer::TransferService;
use mrmap::cmd::transfer::Args;
use mrmap::proto::transfer_server::TransferServer;
use mrmap::utils::init_tracing;
use tonic::transport::Server;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_level);

    let quota = args.quota_mb.saturating_mul(1024 * 1024);
    let addr = format!("0.0.0.0:{}", args.port).parse()?;
    info!(quota, "Transfer sink listening on {}", addr);

    Server::builder()
        .add_service(TransferServer::new(TransferService::new(quota)))
        .serve(addr)
        .await?;

    Ok(())
}
