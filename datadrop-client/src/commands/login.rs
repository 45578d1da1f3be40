use super::{PROGRESS_BAR_TICKRATE, format_datetime};
use crate::{
    CommandContext, ExecutableCommand,
    api_client::DataDropClient,
    config::Config,
    device_auth::{self, DeviceLoginOptions},
    error::AuthError,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueHint};
use indicatif::ProgressBar;
use inquire::{Confirm, Text};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// Authenticate with DataDrop by confirming a one-time code in a browser.
///
/// The code can be confirmed on any device; a local browser is opened automatically
/// when one is available.
#[derive(Parser)]
pub struct LoginCommand {
    /// URL (including scheme) of the DataDrop API, e.g. https://api.example.com.
    ///
    /// Defaults to the endpoint of the previous login.
    #[clap(long = "api", env = "DATADROP_API", value_hint = ValueHint::Url)]
    api: Option<Url>,

    /// Do not try to open a browser automatically.
    #[clap(long = "no-browser")]
    no_browser: bool,

    /// Skip all confirmation dialogues.
    #[clap(short = 'y', env = "DATADROP_NOCONFIRM", long = "yes")]
    no_confirm: bool,
}

impl ExecutableCommand for LoginCommand {
    async fn run(self, context: &CommandContext) -> Result<()> {
        let existing = context.config_store.load().unwrap_or_else(|err| {
            warn!("ignoring unreadable config: {err:#}");
            None
        });

        if let Some(config) = existing.as_ref().filter(|config| config.is_valid()) {
            println!("Already logged in as {} ({})", config.name, config.email);
            if !self.no_confirm
                && !Confirm::new("Do you want to re-authenticate?")
                    .with_default(false)
                    .prompt()?
            {
                return Ok(());
            }
        }

        let api_endpoint = match (self.api, existing) {
            (Some(api), _) => api,
            (None, Some(config)) => {
                println!("Using saved API endpoint: {}", config.api_endpoint);
                config.api_endpoint
            }
            (None, None) => {
                let input = Text::new("API endpoint URL:").prompt()?;
                Url::parse(input.trim()).context("invalid API endpoint URL")?
            }
        };
        let api_client = DataDropClient::new(&api_endpoint, None)
            .context("failed to create api client for endpoint")?;

        // Stop polling locally on Ctrl+C; the code expires server-side on its own.
        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                interrupt.cancel();
            }
        });

        let spinner = ProgressBar::new_spinner();
        let options = DeviceLoginOptions {
            open_browser: !self.no_browser,
            cancel: Some(cancel),
            ..Default::default()
        };
        let result = device_auth::authorize(&api_client, &options, |session| {
            println!("\nVerification code: {}\n", session.display_code);
            println!("Open this URL in a browser (or use another device):\n");
            println!("  {}\n", session.auth_url);
            spinner.set_message("Waiting for authorization...");
            spinner.enable_steady_tick(PROGRESS_BAR_TICKRATE);
        })
        .await;
        spinner.finish_and_clear();

        let credential = match result {
            Ok(credential) => credential,
            Err(AuthError::Expired) => bail!(
                "the verification code expired before it was confirmed - run '{} login' to try again",
                env!("CARGO_PKG_NAME")
            ),
            Err(AuthError::Denied(reason)) => bail!("login was denied: {reason}"),
            Err(err) => return Err(err).context("authentication failed"),
        };

        let config = Config::from_credential(api_endpoint, credential);
        context
            .config_store
            .save(&config)
            .context("failed to save config")?;
        debug!(
            "saved credentials to '{}'",
            context.config_store.path().display()
        );

        println!("✓ Logged in as {} ({})", config.name, config.email);
        println!("  Token expires: {}", format_datetime(config.expires_at)?);

        Ok(())
    }
}
