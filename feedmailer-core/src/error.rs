use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedMailError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("feed is neither RSS nor Atom: {0}")]
    Parse(#[from] rss::Error),
    #[error("item has no publication date")]
    MissingDate,
    #[error("unparseable publication date {raw:?}")]
    BadDate { raw: String },
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("mail transport error: {0}")]
    Transport(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error("watermark store is no longer running")]
    StoreClosed,
}

impl From<lettre::transport::smtp::Error> for FeedMailError {
    fn from(err: lettre::transport::smtp::Error) -> Self {
        FeedMailError::Transport(err.to_string())
    }
}

