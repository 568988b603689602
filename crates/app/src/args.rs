pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "conveyor")]
#[command(about = "Copy content-addressed artifact graphs between stores", version)]
pub struct Args {
    /// Path to the config file (defaults to ./conveyor.toml when present)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log level, overriding the config file
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: crate::Command,
}
