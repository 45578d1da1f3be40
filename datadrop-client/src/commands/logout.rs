use crate::{CommandContext, ExecutableCommand};
use anyhow::{Context, Result};
use clap::Parser;

/// Log out and remove stored credentials.
#[derive(Parser)]
pub struct LogoutCommand;

impl ExecutableCommand for LogoutCommand {
    async fn run(self, context: &CommandContext) -> Result<()> {
        if context
            .config_store
            .load()
            .context("failed to load config")?
            .is_none()
        {
            println!("Not logged in");
            return Ok(());
        }

        context.config_store.delete()?;
        println!("✓ Logged out successfully");
        Ok(())
    }
}
