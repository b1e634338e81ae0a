use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::credentials::Credentials;
use crate::error::{PipeboardError, Result};

/// Builds the shared HTTP client used by every authenticated fetch.
pub fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("pipeboard/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PipeboardError::Config(format!("Failed to create HTTP client: {e}")))
}

/// Joins a request path onto the API base URL, collapsing duplicate
/// separators at the seam.
fn join_path(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// An outbound fetch function bound to one credentials snapshot.
///
/// Every call injects a bearer token derived from the snapshot. The bound
/// `url` and `token` are exposed for display; mutation goes through
/// [`crate::credentials::CredentialStore`], which hands dependents a new
/// snapshot and thereby a new fetch identity.
#[derive(Debug, Clone)]
pub struct ApiFetch {
    client: Client,
    credentials: Credentials,
}

impl ApiFetch {
    pub fn new(client: Client, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
        }
    }

    /// API base URL this fetch is bound to.
    pub fn url(&self) -> &str {
        &self.credentials.url
    }

    /// Access token this fetch is bound to.
    pub fn token(&self) -> &str {
        &self.credentials.token
    }

    /// Issues an authenticated GET for `path` relative to the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`PipeboardError::Network`] on transport failure and
    /// [`PipeboardError::Api`] on any non-2xx status. No retries; callers
    /// treat any error as "data unavailable, keep the previous state".
    pub async fn fetch(&self, path: &str) -> Result<reqwest::Response> {
        let url = join_path(&self.credentials.url, path);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.credentials.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(PipeboardError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    /// Fetches `path` and decodes the JSON response body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self.fetch(path).await?.json().await?)
    }
}
