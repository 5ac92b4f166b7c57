use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "meetbot")]
#[command(about = "Send a bot to video meetings and deliver their transcripts", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the service: session sweep plus HTTP API (default)
    Run,
    /// Join one meeting now and follow it until its result is delivered
    Join(JoinCliArgs),
    /// Show persisted sessions
    Status(StatusCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct JoinCliArgs {
    /// Meeting join URL
    #[arg(long)]
    pub meeting_url: String,
    /// Scheduled start (RFC 3339); defaults to now
    #[arg(long)]
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(ClapArgs, Debug)]
pub struct StatusCliArgs {
    /// Show a single session
    #[arg(long)]
    pub id: Option<String>,
    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}
