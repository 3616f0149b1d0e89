use std::path::{Path, PathBuf};
use std::time::Duration;

use lettre::message::Mailbox;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::feed::Feed;
use crate::sink::ErrorPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read profile {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed profile: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid profile: {0}")]
    Invalid(String),
}

fn default_interval() -> u64 {
    30 * 60
}

/// Run profile. Keys keep the PascalCase layout of existing profile files.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Profile {
    /// `host:port` of the SMTP server.
    pub smtp_addr: String,
    pub smtp_user: String,
    pub smtp_pass: String,
    /// Host name the server certificate is checked against.
    pub smtp_host: String,
    pub src_email: String,
    pub dst_emails: Vec<String>,
    #[serde(default)]
    pub subject_prefix: String,
    /// Seconds allowed for one feed fetch.
    pub fetch_timeout: u64,
    pub hist_file: PathBuf,
    pub feeds: Vec<String>,
    /// Seconds between polls when a feed gives no hint of its own.
    #[serde(default = "default_interval")]
    pub default_interval: u64,
    #[serde(default)]
    pub fail_fast: bool,
}

impl Profile {
    /// Reads and validates the profile at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let profile: Profile = serde_json::from_str(content)?;
        profile.validate()?;
        Ok(profile)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.feeds.is_empty() {
            return Err(ConfigError::Invalid("no feeds configured".into()));
        }
        for feed in &self.feeds {
            let url = Url::parse(feed)
                .map_err(|e| ConfigError::Invalid(format!("feed {feed:?}: {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "feed {feed:?}: unsupported scheme {}",
                    url.scheme()
                )));
            }
        }
        if self.dst_emails.is_empty() {
            return Err(ConfigError::Invalid("no recipients configured".into()));
        }
        self.sender()?;
        self.recipients()?;
        self.smtp_endpoint()?;
        if self.smtp_host.trim().is_empty() {
            return Err(ConfigError::Invalid("SmtpHost is empty".into()));
        }
        if self.fetch_timeout == 0 {
            return Err(ConfigError::Invalid("FetchTimeout must be positive".into()));
        }
        if self.default_interval == 0 {
            return Err(ConfigError::Invalid("DefaultInterval must be positive".into()));
        }
        Ok(())
    }

    pub fn sender(&self) -> Result<Mailbox, ConfigError> {
        parse_mailbox(&self.src_email)
    }

    pub fn recipients(&self) -> Result<Vec<Mailbox>, ConfigError> {
        self.dst_emails.iter().map(|a| parse_mailbox(a)).collect()
    }

    /// Host and port to connect to, split from `SmtpAddr`.
    pub fn smtp_endpoint(&self) -> Result<(String, u16), ConfigError> {
        self.smtp_addr
            .rsplit_once(':')
            .filter(|(host, _)| !host.trim().is_empty())
            .and_then(|(host, port)| Some((host.trim().to_owned(), port.parse().ok()?)))
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "SmtpAddr {:?} is not host:port",
                    self.smtp_addr
                ))
            })
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    pub fn default_interval(&self) -> Duration {
        Duration::from_secs(self.default_interval)
    }

    pub fn feeds(&self) -> Vec<Feed> {
        self.feeds
            .iter()
            .map(|url| Feed::new(url.clone(), self.fetch_timeout()))
            .collect()
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        if self.fail_fast {
            ErrorPolicy::FailFast
        } else {
            ErrorPolicy::LogAndContinue
        }
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, ConfigError> {
    address
        .parse()
        .map_err(|e| ConfigError::Invalid(format!("address {address:?}: {e}")))
}
