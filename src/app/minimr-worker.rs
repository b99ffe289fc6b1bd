use anyhow::Context;
use clap::Parser;
use minimr::cmd::worker::Args;
use minimr::worker::Worker;
use minimr::{utils, workload};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_tracing("minimr=info");
    let args = Args::parse();
    let engine = workload::named(&args.workload)?;
    let config = args.to_config();

    let worker = Worker::connect(config.clone(), engine)
        .await
        .with_context(|| format!("cannot reach coordinator at {}", config.socket.display()))?;
    worker.run().await.context("worker stopped")?;
    Ok(())
}
