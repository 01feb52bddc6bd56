//! scorewatch: live sports score monitor.
//! Watches JSON feed files listed in a TOML config, detects per-match changes
//! and reports them through structured logs and an optional JSONL changes file.

use clap::Parser;

mod cli;
mod cmd_check;
mod cmd_run;
mod config;
mod feeds;
mod recorder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let command = args
        .command
        .unwrap_or_else(|| cli::Command::Run(cli::RunOpts::default()));

    match command {
        cli::Command::Run(opts) => {
            let filter = std::env::var("SCOREWATCH_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("scorewatch starting");

            let exit_code = cmd_run::cmd_run(&args.config, opts).await?;
            if exit_code != 0 {
                std::process::exit(exit_code);
            }
        }
        cli::Command::Check => {
            cmd_check::cmd_check(&args.config).await?;
        }
    }

    Ok(())
}
