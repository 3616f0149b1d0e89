pub mod config;
pub mod dedup;
pub mod error;
pub mod feed;
pub mod mailer;
pub mod notify;
pub mod poller;
pub mod sink;
pub mod source;
pub mod storage;

pub use config::{ConfigError, Profile};
pub use dedup::{classify, next_watermark, Fresh, Verdict};
pub use error::FeedMailError;
pub use feed::{parse_published, Feed, FeedItem, FetchedBatch};
pub use mailer::FeedMailer;
pub use notify::{render, MailProfile, MailTransport, Notifier, Rendered, SmtpMailer};
pub use poller::{poll_once, process_batch, spawn_poller, PollContext, PollReport, PollerHandle};
pub use sink::{error_channel, ErrorPolicy, ErrorSink, ErrorStream, Origin, Reported};
pub use source::{parse_feed, FeedSource, HttpFeedSource};
pub use storage::{Advance, Settlement, WatermarkStore, Watermarks};
