mod completion;
mod delete;
mod get_url;
mod list;
mod login;
mod logout;
mod status;
mod upload;

pub use completion::GenCompletionsCommand;
pub use delete::DeleteCommand;
pub use get_url::GetUrlCommand;
pub use list::ListCommand;
pub use login::LoginCommand;
pub use logout::LogoutCommand;
pub use status::StatusCommand;
pub use upload::UploadCommand;

use crate::{CommandContext, api_client::DataDropClient, config::Config};
use anyhow::{Context, Result, bail};
use clap::Args;
use std::time::Duration;
use time::{OffsetDateTime, UtcOffset, format_description, format_description::well_known::Rfc3339};

const PROGRESS_BAR_TICKRATE: Duration = Duration::from_millis(100);

/// Load the stored config, failing unless it holds a usable session.
fn require_session(context: &CommandContext) -> Result<Config> {
    match context.config_store.load()? {
        Some(config) if config.is_valid() => Ok(config),
        _ => bail!(
            "not logged in. Run '{} login' first",
            env!("CARGO_PKG_NAME")
        ),
    }
}

fn authenticated_client(config: &Config) -> Result<DataDropClient> {
    DataDropClient::new(&config.api_endpoint, Some(config.id_token.clone()))
        .context("failed to create api client from stored endpoint")
}

/// Selects a remote file either by its ID or by its name.
#[derive(Args)]
#[group(required = true, multiple = false)]
pub struct FileSelector {
    /// ID of the file.
    #[clap(long = "id")]
    id: Option<String>,

    /// Name of the file. The first file with this name is used.
    #[clap(long = "name")]
    name: Option<String>,
}

impl FileSelector {
    /// Returns the file ID and a name suitable for display.
    async fn resolve(&self, client: &DataDropClient) -> Result<(String, String)> {
        if let Some(id) = &self.id {
            return Ok((id.clone(), id.clone()));
        }
        let Some(name) = &self.name else {
            bail!("either --id or --name is required");
        };
        let files = client.list_files().await.context("failed to list files")?;
        match files.into_iter().find(|file| &file.file_name == name) {
            Some(file) => Ok((file.id, file.file_name)),
            None => bail!("file not found: {name}"),
        }
    }
}

/// Render a timestamp in the local timezone, falling back to UTC when the local offset is unknown.
fn format_datetime(datetime: OffsetDateTime) -> Result<String> {
    let datetime = match UtcOffset::current_local_offset() {
        Ok(offset) => datetime.to_offset(offset),
        Err(_) => datetime,
    };
    Ok(datetime.format(&format_description::parse(
        "[year]-[month]-[day] [hour]:[minute]:[second]",
    )?)?)
}

/// Render an RFC 3339 timestamp from the server, or return it untouched if it does not parse.
fn format_timestamp(raw: &str) -> String {
    OffsetDateTime::parse(raw, &Rfc3339)
        .ok()
        .and_then(|datetime| format_datetime(datetime).ok())
        .unwrap_or_else(|| raw.to_owned())
}
