use std::path::PathBuf;

/// Urban climate indicators over administrative zones
#[derive(clap::Parser, Debug)]
#[command(name = "geoclimate", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Process every configured location
    Run(ConfigArgs),

    /// Validate a configuration and print the resolved parameters
    Check(ConfigArgs),
}

#[derive(clap::Args, Debug)]
pub struct ConfigArgs {
    /// JSON configuration file
    #[arg(value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,
}
