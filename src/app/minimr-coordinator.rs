use anyhow::Context;
use clap::Parser;
use minimr::cmd::coordinator::Args;
use minimr::{coordinator, utils};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_tracing("minimr=info");
    let (config, files) = Args::parse().into_config();
    let socket = config.socket.clone();

    coordinator::run(config, files)
        .await
        .with_context(|| format!("coordinator on {} failed", socket.display()))
}
