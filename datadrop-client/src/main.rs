mod api_client;
mod commands;
mod config;
mod device_auth;
mod error;
mod progress;
mod uploader;

use anyhow::Result;
use clap::{Parser, ValueHint};
use commands::{
    DeleteCommand, GenCompletionsCommand, GetUrlCommand, ListCommand, LoginCommand,
    LogoutCommand, StatusCommand, UploadCommand,
};
use config::ConfigStore;
use dotenvy::dotenv;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// State built once per invocation and handed to the command being run.
struct CommandContext {
    config_store: ConfigStore,
}

trait ExecutableCommand: Parser {
    /// Consume `self` and run the command.
    async fn run(self, context: &CommandContext) -> Result<()>;
}

#[derive(Parser)]
enum Command {
    Login(LoginCommand),
    Logout(LogoutCommand),
    Status(StatusCommand),
    Upload(UploadCommand),
    List(ListCommand),
    GetUrl(GetUrlCommand),
    Delete(DeleteCommand),
    Completions(GenCompletionsCommand),
}

#[derive(Parser)]
#[command(author, version, about, long_about)]
struct RootCommand {
    /// Path of the file stored credentials are kept in.
    ///
    /// Defaults to '.datadrop/config.json' inside the home directory.
    #[clap(
        long = "config",
        env = "DATADROP_CONFIG",
        global = true,
        value_hint = ValueHint::FilePath
    )]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

impl RootCommand {
    async fn run(self) -> Result<()> {
        let context = CommandContext {
            config_store: ConfigStore::new(match self.config {
                Some(path) => path,
                None => ConfigStore::default_path()?,
            }),
        };
        match self.command {
            Command::Login(cmd) => cmd.run(&context).await,
            Command::Logout(cmd) => cmd.run(&context).await,
            Command::Status(cmd) => cmd.run(&context).await,
            Command::Upload(cmd) => cmd.run(&context).await,
            Command::List(cmd) => cmd.run(&context).await,
            Command::GetUrl(cmd) => cmd.run(&context).await,
            Command::Delete(cmd) => cmd.run(&context).await,
            Command::Completions(cmd) => cmd.run(&context).await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or(EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    RootCommand::parse().run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        RootCommand::command().debug_assert();
    }

    #[test]
    fn file_commands_require_exactly_one_selector() {
        assert!(RootCommand::try_parse_from(["datadrop", "delete"]).is_err());
        assert!(
            RootCommand::try_parse_from(["datadrop", "delete", "--id", "a", "--name", "b"])
                .is_err()
        );
        assert!(RootCommand::try_parse_from(["datadrop", "get-url", "--name", "notes.txt"]).is_ok());
    }

    #[test]
    fn upload_type_defaults_to_private() {
        let root = RootCommand::try_parse_from(["datadrop", "upload", "notes.txt"]).unwrap();
        assert!(matches!(root.command, Command::Upload(_)));
        assert!(
            RootCommand::try_parse_from(["datadrop", "upload", "notes.txt", "--type", "public"])
                .is_err()
        );
    }
}
