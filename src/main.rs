use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use bgstrip::{load_onnx_model, logging, run, Config};

fn main() -> Result<()> {
    let config = Config::parse();
    logging::init(config.verbose)?;

    let input_dir = config.input_dir.clone();
    let summary = run(config, load_onnx_model)
        .with_context(|| format!("Failed to process {}", input_dir.display()))?;
    if summary.failed() > 0 {
        info!(
            "{} of {} files could not be processed",
            summary.failed(),
            summary.found
        );
    }

    Ok(())
}
