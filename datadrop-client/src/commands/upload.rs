use super::{PROGRESS_BAR_TICKRATE, authenticated_client, format_timestamp, require_session};
use crate::{
    CommandContext, ExecutableCommand,
    api_client::UploadType,
    progress::{ProgressReporter, ProgressUpdate},
    uploader::{UploadOptions, UploadSource, UploadStrategy, Uploader},
};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueHint};
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};
use std::{path::PathBuf, sync::Arc};
use tokio::fs::{self, File};

/// Upload a file to DataDrop.
#[derive(Parser)]
pub struct UploadCommand {
    /// File to upload.
    #[clap(value_hint = ValueHint::FilePath)]
    path: PathBuf,

    /// Who the uploaded file is served to.
    #[clap(short = 't', long = "type", value_enum, default_value_t = UploadType::Private)]
    upload_type: UploadType,

    /// Expiration time in seconds (private files only).
    #[clap(short = 'e', long = "expires")]
    expires: Option<u64>,

    /// Maximum number of downloads (private files only).
    #[clap(short = 'm', long = "max-downloads")]
    max_downloads: Option<u32>,
}

/// Renders upload progress onto a terminal progress bar.
struct BarReporter {
    bar: ProgressBar,
}

impl ProgressReporter for BarReporter {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.bar.set_length(update.total);
        self.bar.set_position(update.uploaded);
        let eta = match update.estimate.eta {
            Some(eta) => HumanDuration(eta).to_string(),
            None => "--:--".to_owned(),
        };
        let part = match update.part {
            Some(part) => format!(" (part {}/{})", part.number, part.count),
            None => String::new(),
        };
        self.bar.set_message(format!(
            "{}/s ETA {eta}{part}",
            HumanBytes(update.estimate.throughput as u64)
        ));
    }
}

impl ExecutableCommand for UploadCommand {
    async fn run(self, context: &CommandContext) -> Result<()> {
        let config = require_session(context)?;

        let metadata = match fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(err) => bail!(
                "failed while trying to read file at '{}': {err}",
                self.path.display()
            ),
        };
        if metadata.is_dir() {
            bail!("cannot upload directories");
        }
        let file_name = self
            .path
            .file_name()
            .context("failed to read file name")?
            .to_str()
            .context("failed to parse file name as str")?
            .to_owned();
        let file = File::open(&self.path)
            .await
            .with_context(|| format!("failed to open file '{}'", self.path.display()))?;
        let source = UploadSource {
            content_type: mime_guess::from_path(&self.path)
                .first_or_octet_stream()
                .to_string(),
            file_name,
            size: metadata.len(),
        };
        let options = UploadOptions {
            upload_type: self.upload_type,
            expires_in_seconds: self.expires,
            max_downloads: self.max_downloads,
        };

        println!(
            "Uploading {} ({})...",
            source.file_name,
            HumanBytes(source.size)
        );
        let api_client = authenticated_client(&config)?;
        let prog_bar = ProgressBar::new(source.size);
        prog_bar.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40}] {percent:>3}% {bytes}/{total_bytes} {msg}")
                .unwrap()
                .progress_chars("##-"),
        );
        prog_bar.enable_steady_tick(PROGRESS_BAR_TICKRATE);
        let receipt = Uploader::new(&api_client)
            .with_reporter(Arc::new(BarReporter {
                bar: prog_bar.clone(),
            }))
            .upload(&file, &source, &options)
            .await;
        prog_bar.finish_and_clear();
        let receipt = receipt?;

        println!("\n✓ Upload complete!");
        println!("  File ID: {}", receipt.file_id);
        if let UploadStrategy::Multipart { parts } = receipt.strategy {
            println!("  Parts: {parts}");
        }
        if let Some(cdn_url) = &receipt.cdn_url {
            println!("  CDN URL: {cdn_url}");
        }
        if let Some(expires_at) = &receipt.expires_at {
            println!("  Expires: {}", format_timestamp(expires_at));
        }
        if let Some(max_downloads) = receipt.max_downloads {
            println!("  Max downloads: {max_downloads}");
        }

        Ok(())
    }
}
