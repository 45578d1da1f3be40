use super::{authenticated_client, format_timestamp, require_session};
use crate::{
    CommandContext, ExecutableCommand,
    api_client::{FileInfo, UploadType},
};
use anyhow::{Context, Result};
use clap::Parser;
use indicatif::HumanBytes;

/// List all uploaded files.
#[derive(Parser)]
pub struct ListCommand {
    /// Only show files of this upload type.
    #[clap(short = 't', long = "type", value_enum)]
    upload_type: Option<UploadType>,
}

fn print_file(file: &FileInfo) {
    let type_icon = if file.upload_type == UploadType::Cdn.as_str() {
        "🌐"
    } else {
        "🔒"
    };
    let status_icon = if file.is_expired {
        "⏰"
    } else if file.status != "uploaded" {
        "⏳"
    } else {
        "✓"
    };

    println!("{type_icon} {status_icon} {}", file.file_name);
    println!("   ID: {}", file.id);
    println!(
        "   Size: {} | Type: {} | Status: {}",
        HumanBytes(file.file_size),
        file.upload_type,
        file.status
    );
    if !file.file_type.is_empty() {
        println!("   Content type: {}", file.file_type);
    }
    if !file.created_at.is_empty() {
        println!("   Created: {}", format_timestamp(&file.created_at));
    }
    if let Some(expires_at) = &file.expires_at {
        println!("   Expires: {}", format_timestamp(expires_at));
    }
    if let (Some(max), Some(remaining)) = (file.max_downloads, file.downloads_remaining) {
        println!("   Downloads: {remaining}/{max} remaining");
    }
    if let Some(cdn_url) = &file.cdn_url {
        println!("   CDN URL: {cdn_url}");
    }
    println!();
}

impl ExecutableCommand for ListCommand {
    async fn run(self, context: &CommandContext) -> Result<()> {
        let config = require_session(context)?;
        let mut files = authenticated_client(&config)?
            .list_files()
            .await
            .context("failed to list files")?;

        if let Some(upload_type) = self.upload_type {
            files.retain(|file| file.upload_type == upload_type.as_str());
        }
        if files.is_empty() {
            match self.upload_type {
                Some(upload_type) => println!("No {} files found", upload_type.as_str()),
                None => println!("No files found"),
            }
            return Ok(());
        }

        println!("Found {} file(s):\n", files.len());
        files.iter().for_each(print_file);
        Ok(())
    }
}
