mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::{check, run};

pub fn execute() -> anyhow::Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    geoclimate::logging::init_logging(cli.verbose);
    match &cli.command {
        Commands::Run(args) => run::run(&cli, args),
        Commands::Check(args) => check::run(&cli, args),
    }
}

fn main() -> anyhow::Result<()> { execute() }
