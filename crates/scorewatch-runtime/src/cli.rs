//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "scorewatch", about = "Live sports score monitor")]
pub struct Cli {
    /// Config file (TOML)
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "SCOREWATCH_CONFIG",
        default_value = "scorewatch.toml"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the monitor until interrupted (default)
    Run(RunOpts),
    /// Validate the config and list the sources that would be watched
    Check,
}

#[derive(clap::Args, Default)]
pub struct RunOpts {
    /// Append every detected change to this file as JSON lines
    #[arg(long)]
    pub changes_out: Option<PathBuf>,
}
