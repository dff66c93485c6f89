use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;
pub mod ux_error;

use commands::{Cli, Commands};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Resolve(args) => commands::resolve::run(&cli.global, args),
        Commands::Trace(args) => commands::trace::run(&cli.global, args),
        Commands::Env(args) => commands::env::run(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ux_error::report(&err);
            ExitCode::FAILURE
        }
    }
}
