use super::{FileSelector, authenticated_client, format_timestamp, require_session};
use crate::{CommandContext, ExecutableCommand};
use anyhow::{Context, Result};
use clap::Parser;

/// Create a shareable URL for a file.
#[derive(Parser)]
pub struct GetUrlCommand {
    #[clap(flatten)]
    file: FileSelector,

    /// Link expiration in seconds.
    #[clap(long = "expires", default_value_t = 86_400)]
    expires: u64,
}

impl ExecutableCommand for GetUrlCommand {
    async fn run(self, context: &CommandContext) -> Result<()> {
        let config = require_session(context)?;
        let api_client = authenticated_client(&config)?;
        let (file_id, _) = self.file.resolve(&api_client).await?;

        let share = api_client
            .share_url(&file_id, self.expires)
            .await
            .context("failed to get share URL")?;

        println!("Share URL: {}", share.share_url);
        println!("Type: {}", share.share_type);
        if let Some(expires_at) = &share.expires_at {
            println!("Link expires: {}", format_timestamp(expires_at));
        }
        if let Some(file_expires_at) = &share.file_expires_at {
            println!("File expires: {}", format_timestamp(file_expires_at));
        }
        if let (Some(max), Some(remaining)) = (share.max_downloads, share.downloads_remaining) {
            println!("Downloads remaining: {remaining}/{max}");
        }

        Ok(())
    }
}
