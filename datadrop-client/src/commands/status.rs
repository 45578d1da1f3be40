use super::{authenticated_client, format_datetime};
use crate::{CommandContext, ExecutableCommand};
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::HumanBytes;

/// Show the current login status and account permissions.
#[derive(Parser)]
pub struct StatusCommand;

impl ExecutableCommand for StatusCommand {
    async fn run(self, context: &CommandContext) -> Result<()> {
        let Some(config) = context
            .config_store
            .load()
            .context("failed to load config")?
        else {
            println!("Not logged in");
            println!("\nRun '{} login' to authenticate", env!("CARGO_PKG_NAME"));
            return Ok(());
        };

        if !config.is_valid() {
            println!("Session expired");
            println!("  Was logged in as: {} ({})", config.name, config.email);
            println!(
                "\nRun '{} login' to re-authenticate",
                env!("CARGO_PKG_NAME")
            );
            return Ok(());
        }

        println!("Logged in");
        println!("  User: {} ({})", config.name, config.email);
        println!("  API: {}", config.api_endpoint);
        println!("  Token expires: {}", format_datetime(config.expires_at)?);

        let user = match authenticated_client(&config)?.verify().await {
            Ok(user) => user,
            Err(err) => {
                println!(
                    "\n⚠ Could not verify with server: {:#}",
                    anyhow::Error::new(err)
                );
                return Ok(());
            }
        };

        println!("\nVerified as {} ({})", user.name, user.email);
        println!("  User ID: {}", user.user_id);
        println!("\nPermissions:");
        println!("  CDN uploads: {}", user.can_upload_cdn);
        println!("  Private uploads: {}", user.can_upload_file);
        println!("  Max file size: {}", HumanBytes(user.max_file_size_bytes));
        if !user.roles.is_empty() {
            println!("  Roles: {}", user.roles.join(", "));
        }

        Ok(())
    }
}
