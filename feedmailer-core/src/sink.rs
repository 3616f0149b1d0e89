use std::fmt;

use tokio::sync::mpsc;

use crate::error::FeedMailError;

/// Where a reported error came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Feed(String),
    Store,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Feed(url) => write!(f, "feed {url}"),
            Origin::Store => f.write_str("watermark store"),
        }
    }
}

#[derive(Debug)]
pub struct Reported {
    pub origin: Origin,
    pub error: FeedMailError,
}

impl fmt::Display for Reported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.origin, self.error)
    }
}

/// Cloneable submission side of the error stream. Reporting never blocks.
#[derive(Debug, Clone)]
pub struct ErrorSink {
    tx: mpsc::UnboundedSender<Reported>,
}

/// Consuming side of the error stream.
#[derive(Debug)]
pub struct ErrorStream {
    rx: mpsc::UnboundedReceiver<Reported>,
}

pub fn error_channel() -> (ErrorSink, ErrorStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ErrorSink { tx }, ErrorStream { rx })
}

impl ErrorSink {
    pub fn report(&self, origin: Origin, error: FeedMailError) {
        // The stream is only gone during shutdown; nothing left to tell.
        let _ = self.tx.send(Reported { origin, error });
    }

    pub fn report_feed(&self, url: &str, error: FeedMailError) {
        self.report(Origin::Feed(url.to_owned()), error);
    }
}

impl ErrorStream {
    /// Next reported error, or `None` once every sink has been dropped.
    pub async fn next(&mut self) -> Option<Reported> {
        self.rx.recv().await
    }

    /// Drains whatever is queued right now without waiting.
    pub fn drain(&mut self) -> Vec<Reported> {
        let mut out = Vec::new();
        while let Ok(reported) = self.rx.try_recv() {
            out.push(reported);
        }
        out
    }
}

/// What the process does with a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Log it and keep every feed running.
    #[default]
    LogAndContinue,
    /// Stop everything on the first report.
    FailFast,
}
