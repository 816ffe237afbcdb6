use camrelay_app::{HubArgs, init_tracing};
use camrelay_tokio_hub::{HubServer, RelayHub};
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();
    let args = HubArgs::parse();

    if args.credentials.is_empty() {
        tracing::warn!("no credentials configured; every connection will be refused");
    }

    let directory = Arc::new(args.directory());
    let hub = Arc::new(RelayHub::new(
        directory.clone(),
        directory,
        args.hub_config(),
    ));

    HubServer::with_config(hub, args.server_config())
        .serve(args.listen.as_str())
        .await?;

    Ok(())
}
