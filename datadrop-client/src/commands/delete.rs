use super::{FileSelector, authenticated_client, require_session};
use crate::{CommandContext, ExecutableCommand};
use anyhow::{Context, Result};
use clap::Parser;
use inquire::Confirm;

/// Delete a file.
#[derive(Parser)]
pub struct DeleteCommand {
    #[clap(flatten)]
    file: FileSelector,

    /// Skip all confirmation dialogues.
    #[clap(short = 'y', env = "DATADROP_NOCONFIRM", long = "yes")]
    no_confirm: bool,
}

impl ExecutableCommand for DeleteCommand {
    async fn run(self, context: &CommandContext) -> Result<()> {
        let config = require_session(context)?;
        let api_client = authenticated_client(&config)?;
        let (file_id, display_name) = self.file.resolve(&api_client).await?;

        if !self.no_confirm
            && !Confirm::new(&format!(
                "Are you sure you want to delete '{display_name}'?"
            ))
            .with_default(false)
            .prompt()?
        {
            println!("Cancelled");
            return Ok(());
        }

        api_client
            .delete_file(&file_id)
            .await
            .context("failed to delete file")?;
        println!("✓ File deletion queued");
        Ok(())
    }
}
