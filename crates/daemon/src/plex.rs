//! Media library notification.
//!
//! After a new encode is published the library section it belongs to is
//! asked to rescan. The daemon only needs success or failure back.

use auto_encode_config::PlexConfig;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("library refresh of section {section} returned HTTP {status}")]
    Status { section: String, status: u16 },
}

/// Something that can be told to rescan a library section.
pub trait LibraryNotifier: Send + Sync {
    fn refresh_section(&self, section: &str)
        -> impl Future<Output = Result<(), NotifyError>> + Send;
}

/// Plex Media Server client authenticated with an `X-Plex-Token`.
#[derive(Debug, Clone)]
pub struct PlexClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl PlexClient {
    pub fn new(cfg: &PlexConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            token: cfg.token.clone(),
        })
    }

    pub fn refresh_url(&self, section: &str) -> String {
        format!("{}/library/sections/{}/refresh", self.base_url, section)
    }
}

impl LibraryNotifier for PlexClient {
    async fn refresh_section(&self, section: &str) -> Result<(), NotifyError> {
        let mut request = self.client.get(self.refresh_url(section));
        if !self.token.is_empty() {
            request = request.header("X-Plex-Token", &self.token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status {
                section: section.to_string(),
                status: status.as_u16(),
            })
        }
    }
}
