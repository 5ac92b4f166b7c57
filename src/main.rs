use anyhow::Result;
use clap::Parser;
use meetbot::{
    app,
    cli::{handle_join_command, handle_status_command, Cli, CliCommand},
    config::Config,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(CliCommand::Version) = cli.command {
        println!("meetbot {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load()?;
    let log_level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Join(args)) => handle_join_command(args, config).await,
        Some(CliCommand::Status(args)) => handle_status_command(args).await,
        Some(CliCommand::Run) | None => app::run_service(config).await,
        Some(CliCommand::Version) => Ok(()),
    }
}
