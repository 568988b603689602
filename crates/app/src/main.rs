mod args;
mod config;
mod logging;
mod op;
mod ops;
mod version;

use args::Args;
use clap::{Parser, Subcommand};
use config::AppConfig;
use op::Op;

command_enum! {
    (Copy, ops::Copy),
    (Resolve, ops::Resolve),
    (Version, ops::Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    let level = match config.log_level() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let guard = logging::init_logging(level);

    let ctx = op::OpContext::new(config);
    let outcome = args.command.execute(&ctx).await;
    // flush buffered logs before exiting
    drop(guard);

    match outcome {
        Ok(output) => {
            println!("{}", output);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
