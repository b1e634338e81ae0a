use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use dialoguer::Input;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{PipeboardError, Result};

fn validate_url(url: &str) -> Result<()> {
    url::Url::parse(url)
        .map(|_| ())
        .map_err(|e| PipeboardError::Config(format!("Invalid API URL: {e}")))
}

/// A snapshot of the GitLab API credentials bound to outbound requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// API base URL (e.g., <https://gitlab.com/api/v4>)
    pub url: String,
    /// Personal access token sent as a bearer token
    pub token: String,
}

/// On-disk credential file layout.
///
/// `None` means the field was never stored (or was cleared) and must be
/// acquired interactively; an explicitly stored empty string is kept as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StoredCredentials {
    api_url: Option<String>,
    api_token: Option<String>,
    /// Project name filter applied by the dashboard view
    filter: Option<String>,
}

/// Durable store for the API base URL, access token and project filter.
///
/// Credentials persist in a platform-specific config directory:
/// - Linux: `~/.config/pipeboard/credentials.toml`
/// - macOS: `~/Library/Application Support/pipeboard/credentials.toml`
///
/// The store is the single owner of credential mutation. Components that need
/// to react to credential changes hold a [`watch::Receiver`] obtained from
/// [`CredentialStore::subscribe`]; every mutation publishes a fresh snapshot.
pub struct CredentialStore {
    file: PathBuf,
    stored: StoredCredentials,
    tx: watch::Sender<Credentials>,
}

impl CredentialStore {
    /// Opens the store at the default platform config location.
    ///
    /// # Errors
    ///
    /// Returns an error if no config directory can be determined or the
    /// existing credential file cannot be read or parsed.
    pub fn open() -> Result<Self> {
        let file = dirs::config_dir()
            .ok_or_else(|| PipeboardError::Config("No config directory found".into()))?
            .join("pipeboard")
            .join("credentials.toml");

        Self::open_at(&file)
    }

    /// Opens the store backed by a specific file path.
    pub fn open_at(file: &Path) -> Result<Self> {
        let stored = if file.exists() {
            let contents = std::fs::read_to_string(file)?;
            toml::from_str(&contents)?
        } else {
            debug!("No credential file at {}", file.display());
            StoredCredentials::default()
        };

        let (tx, _rx) = watch::channel(Self::snapshot_of(&stored));

        Ok(Self {
            file: file.to_path_buf(),
            stored,
            tx,
        })
    }

    fn snapshot_of(stored: &StoredCredentials) -> Credentials {
        Credentials {
            url: stored.api_url.clone().unwrap_or_default(),
            token: stored.api_token.clone().unwrap_or_default(),
        }
    }

    /// Current credential snapshot. Missing fields read as empty strings;
    /// use [`CredentialStore::ensure`] when a usable value is required.
    pub fn credentials(&self) -> Credentials {
        Self::snapshot_of(&self.stored)
    }

    /// Subscribes to credential changes.
    pub fn subscribe(&self) -> watch::Receiver<Credentials> {
        self.tx.subscribe()
    }

    /// Returns credentials, interactively acquiring any missing field.
    ///
    /// Prompts on the terminal until a non-empty value is supplied and
    /// persists the answer before returning, so a successful return always
    /// carries both fields.
    ///
    /// # Errors
    ///
    /// Returns [`PipeboardError::MissingCredential`] if a field is absent and
    /// stdin is not a terminal (nothing to prompt on).
    pub fn ensure(&mut self) -> Result<Credentials> {
        if self.stored.api_url.is_none() {
            let url = Self::prompt("GitLab API URL", "api-url")?;
            validate_url(&url)?;
            self.stored.api_url = Some(url);
            self.persist()?;
        }

        if self.stored.api_token.is_none() {
            let token = Self::prompt("GitLab access token", "api-token")?;
            self.stored.api_token = Some(token);
            self.persist()?;
        }

        Ok(self.credentials())
    }

    fn prompt(text: &str, field: &'static str) -> Result<String> {
        if !std::io::stdin().is_terminal() {
            return Err(PipeboardError::MissingCredential(field));
        }

        let value: String = Input::new()
            .with_prompt(text)
            .allow_empty(false)
            .interact_text()
            .map_err(|e| PipeboardError::Config(format!("Prompt failed: {e}")))?;

        Ok(value)
    }

    /// Stores both credential fields.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid URL or the file cannot be
    /// written.
    pub fn set_credentials(&mut self, url: String, token: String) -> Result<()> {
        validate_url(&url)?;
        self.stored.api_url = Some(url);
        self.stored.api_token = Some(token);
        self.persist()?;
        info!("Credentials updated");
        Ok(())
    }

    /// Removes both credential fields; the next [`CredentialStore::ensure`]
    /// re-prompts.
    pub fn clear_credentials(&mut self) -> Result<()> {
        self.stored.api_url = None;
        self.stored.api_token = None;
        self.persist()?;
        info!("Credentials cleared");
        Ok(())
    }

    /// Project name filter for the dashboard view, if one was stored.
    pub fn filter(&self) -> Option<&str> {
        self.stored.filter.as_deref()
    }

    /// Stores or removes the project name filter.
    pub fn set_filter(&mut self, filter: Option<String>) -> Result<()> {
        self.stored.filter = filter;
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(&self.stored)?;
        std::fs::write(&self.file, contents)?;

        // Publish the new snapshot, but only when it actually changed: a
        // filter update must not re-key every credential-bound watcher.
        let snapshot = self.credentials();
        self.tx.send_if_modified(|current| {
            if *current != snapshot {
                *current = snapshot;
                true
            } else {
                false
            }
        });

        Ok(())
    }
}
