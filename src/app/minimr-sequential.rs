use anyhow::Result;
use clap::Parser;
use minimr::standalone::engine::{expand_inputs, perform_sequential, write_output};
use minimr::standalone::Args;
use minimr::{utils, workload};
use tracing::info;

fn main() -> Result<()> {
    utils::init_tracing("minimr=info");
    let args = Args::parse();
    let engine = workload::named(&args.workload)?;

    let inputs = expand_inputs(&args.input)?;
    let output = perform_sequential(&inputs, &engine)?;
    write_output(&args.output, &output)?;
    info!(inputs = inputs.len(), keys = output.len(), output = %args.output.display(), "done");
    Ok(())
}
