use std::io::{self, BufReader};

use anyhow::{Context, Result};
use clap::Parser;

use corecollect::{cli::Cli, Collector, ShutdownReason};

fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.setup_logging();

    let config = cli.to_config().context("Failed to load configuration")?;

    std::fs::create_dir_all(&config.output_path).with_context(|| {
        format!(
            "Failed to create output directory {}",
            config.output_path.display()
        )
    })?;

    tracing::info!(
        "Starting corecollect on {} -> {}",
        config.input_path.display(),
        config.output_path.display()
    );

    let mut collector = Collector::new(config).context("Invalid configuration")?;

    let signal = collector.shutdown_signal();
    ctrlc::set_handler(move || {
        signal.request(ShutdownReason::Interrupt);
    })?;

    collector.start().context("Failed to start watching")?;

    let res = if cli.ignore_stdin {
        collector.wait()
    } else {
        collector.run_until_quit(BufReader::new(io::stdin()))
    };

    if let Err(err) = res {
        eprintln!("Application error: {}", err);
        std::process::exit(1);
    }

    Ok(())
}
