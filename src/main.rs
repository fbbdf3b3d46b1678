use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    wayfarer::logging::init().context("init logging")?;

    let cli = wayfarer::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let loader = wayfarer::spiders::loader();
    match cli.command {
        wayfarer::cli::Command::Parse(args) => {
            wayfarer::parse::run(args, &loader).await.context("parse")?;
        }
        wayfarer::cli::Command::List => {
            for name in loader.names() {
                println!("{name}");
            }
        }
    }

    Ok(())
}
