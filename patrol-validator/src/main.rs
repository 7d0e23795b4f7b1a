mod cmds;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "patrol-validator")]
#[command(version = "0.1.0")]
#[command(about = "Validate chain activity for the Patrol subnet", long_about = None)]
struct Cli {
    #[clap(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[clap(name = "run")]
    Run(cmds::run::Opts),

    #[clap(name = "request-evidence")]
    RequestEvidence(cmds::request_evidence::Opts),

    #[clap(name = "create-keypair")]
    CreateKeypair(cmds::create_keypair::Opts),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.as_str())).init();

    match &cli.command {
        Commands::Run(opts) => cmds::run::run(opts).await?,
        Commands::RequestEvidence(opts) => cmds::request_evidence::run(opts).await?,
        Commands::CreateKeypair(opts) => cmds::create_keypair::run(opts).await?,
    }

    Ok(())
}
