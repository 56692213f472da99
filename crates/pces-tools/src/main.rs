use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match &cli.config {
        Some(path) => pces_writer::PcesConfig::from_yaml_file(path)
            .with_context(|| format!("Loading config from {}", path.display()))?,
        None => pces_writer::PcesConfig::default(),
    };

    let mode = cli.mode;
    match cli.command {
        Command::List { directory } => commands::list(&directory, mode),
        Command::Dump {
            directory,
            lower_bound,
            origin,
        } => commands::dump(&config, &directory, mode, lower_bound, origin),
        Command::Compact { directory } => commands::compact(&config, &directory, mode),
        Command::Copy {
            directory,
            destination,
            lower_bound,
        } => commands::copy(&directory, mode, lower_bound, &destination),
        Command::Migrate {
            root,
            self_id,
            round,
            generation,
            recycle_bin,
        } => commands::migrate(&root, self_id, round, generation, recycle_bin),
    }
}
