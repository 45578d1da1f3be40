use crate::device_auth::Credential;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};
use time::OffsetDateTime;
use url::Url;

const CONFIG_DIRECTORY: &str = ".datadrop";
const CONFIG_FILENAME: &str = "config.json";

/// Credentials and endpoint persisted between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub api_endpoint: Url,
    pub id_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub user_id: String,
    pub email: String,
    pub name: String,
}

impl Config {
    pub fn from_credential(api_endpoint: Url, credential: Credential) -> Self {
        Self {
            api_endpoint,
            id_token: credential.token,
            expires_at: credential.expires_at,
            user_id: credential.user.user_id,
            email: credential.user.email,
            name: credential.user.name,
        }
    }

    /// Whether the stored token can still be used.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(OffsetDateTime::now_utc())
    }

    fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        !self.id_token.is_empty() && now < self.expires_at
    }
}

/// JSON file holding a single [`Config`], readable only by its owner.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `~/.datadrop/config.json`
    pub fn default_path() -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .context("failed to determine the home directory")?
            .join(CONFIG_DIRECTORY)
            .join(CONFIG_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored config, or `None` if nothing has been saved yet.
    pub fn load(&self) -> Result<Option<Config>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to read config file at '{}'", self.path.display())
                });
            }
        };
        serde_json::from_slice(&data)
            .map(Some)
            .with_context(|| format!("failed to parse config file at '{}'", self.path.display()))
    }

    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(directory) = self.path.parent() {
            create_private_dir(directory).with_context(|| {
                format!("failed to create config directory '{}'", directory.display())
            })?;
        }
        let data = serde_json::to_vec_pretty(config).context("failed to serialize config")?;
        write_private_file(&self.path, &data)
            .with_context(|| format!("failed to write config file at '{}'", self.path.display()))
    }

    pub fn delete(&self) -> Result<()> {
        fs::remove_file(&self.path)
            .with_context(|| format!("failed to delete config file at '{}'", self.path.display()))
    }
}

#[cfg(unix)]
fn create_private_dir(directory: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(directory)
}

#[cfg(not(unix))]
fn create_private_dir(directory: &Path) -> io::Result<()> {
    fs::create_dir_all(directory)
}

#[cfg(unix)]
fn write_private_file(path: &Path, data: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies when the file is created.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_private_file(path: &Path, data: &[u8]) -> io::Result<()> {
    fs::File::create(path)?.write_all(data)
}
