pub mod args;
pub mod session;

pub use args::{Cli, CliCommand, JoinCliArgs, StatusCliArgs};
pub use session::{handle_join_command, handle_status_command};
