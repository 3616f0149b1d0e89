use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dedup::next_watermark;
use crate::error::FeedMailError;
use crate::sink::{ErrorSink, Origin};

/// feed url -> timestamp of the newest item already notified
pub type Watermarks = BTreeMap<String, DateTime<Utc>>;

/// Outcome of an update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The mapping moved forward and the snapshot was replaced.
    Committed,
    /// The mapping moved forward but writing the snapshot failed.
    Unpersisted,
    /// Nothing to write: the stored value was already at or past the
    /// candidate, or no delivered item could move it.
    Stale,
}

/// Delivery outcomes of one batch, as `(identity, published)` pairs.
#[derive(Debug, Clone, Default)]
pub struct Settlement {
    pub delivered: Vec<(String, Option<DateTime<Utc>>)>,
    pub failed: Vec<(String, Option<DateTime<Utc>>)>,
}

enum StoreCommand {
    Advance {
        feed: String,
        at: DateTime<Utc>,
        reply: oneshot::Sender<Advance>,
    },
    Settle {
        feed: String,
        settlement: Settlement,
        reply: oneshot::Sender<Advance>,
    },
}

/// Handle to the task that owns the watermark mapping. Reads come from the
/// last published copy; every update is queued to the owning task, which
/// applies them one at a time.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    tx: mpsc::Sender<StoreCommand>,
    current: watch::Receiver<Arc<Watermarks>>,
}

impl WatermarkStore {
    /// Loads the snapshot at `path` and starts the owning task. A missing
    /// file yields an empty mapping; anything else unreadable is an error.
    pub async fn open(
        path: impl AsRef<Path>,
        sink: ErrorSink,
    ) -> Result<(Self, JoinHandle<()>), FeedMailError> {
        let path = path.as_ref().to_path_buf();
        let marks = load_snapshot(&path).await?;
        Ok(Self::spawn(marks, Some(path), sink))
    }

    /// Store without a backing file.
    pub fn in_memory(marks: Watermarks, sink: ErrorSink) -> (Self, JoinHandle<()>) {
        Self::spawn(marks, None, sink)
    }

    fn spawn(marks: Watermarks, path: Option<PathBuf>, sink: ErrorSink) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let (published, current) = watch::channel(Arc::new(marks.clone()));
        let actor = StoreActor {
            marks,
            held: HashMap::new(),
            path,
            rx,
            published,
            sink,
        };
        let join = tokio::spawn(actor.run());
        (Self { tx, current }, join)
    }

    pub fn get(&self, feed: &str) -> Option<DateTime<Utc>> {
        self.current.borrow().get(feed).copied()
    }

    pub fn snapshot(&self) -> Arc<Watermarks> {
        self.current.borrow().clone()
    }

    /// Asks the owning task to move `feed` forward to `at`. Never moves a
    /// watermark backwards.
    pub async fn advance(&self, feed: &str, at: DateTime<Utc>) -> Result<Advance, FeedMailError> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(StoreCommand::Advance {
                feed: feed.to_owned(),
                at,
                reply,
            })
            .await
            .map_err(|_| FeedMailError::StoreClosed)?;
        outcome.await.map_err(|_| FeedMailError::StoreClosed)
    }

    /// Records which items of a batch were delivered and moves the
    /// watermark accordingly. Failed items are held in memory until a later
    /// settlement delivers them; while any is held the watermark stays
    /// below the earliest one.
    pub async fn settle(
        &self,
        feed: &str,
        settlement: Settlement,
    ) -> Result<Advance, FeedMailError> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(StoreCommand::Settle {
                feed: feed.to_owned(),
                settlement,
                reply,
            })
            .await
            .map_err(|_| FeedMailError::StoreClosed)?;
        outcome.await.map_err(|_| FeedMailError::StoreClosed)
    }
}

struct StoreActor {
    marks: Watermarks,
    // feed url -> identity -> timestamp of items whose send failed
    held: HashMap<String, HashMap<String, DateTime<Utc>>>,
    path: Option<PathBuf>,
    rx: mpsc::Receiver<StoreCommand>,
    published: watch::Sender<Arc<Watermarks>>,
    sink: ErrorSink,
}

impl StoreActor {
    async fn run(mut self) {
        debug!(feeds = self.marks.len(), "watermark store started");
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                StoreCommand::Advance { feed, at, reply } => {
                    let outcome = self.advance(feed, at).await;
                    let _ = reply.send(outcome);
                }
                StoreCommand::Settle {
                    feed,
                    settlement,
                    reply,
                } => {
                    let outcome = self.settle(feed, settlement).await;
                    let _ = reply.send(outcome);
                }
            }
        }
        debug!("watermark store stopped");
    }

    async fn settle(&mut self, feed: String, settlement: Settlement) -> Advance {
        let Settlement { delivered, failed } = settlement;
        let held = self.held.entry(feed.clone()).or_default();
        for (identity, _) in &delivered {
            held.remove(identity);
        }
        for (identity, at) in failed {
            if let Some(at) = at {
                held.insert(identity, at);
            }
        }
        let floor = held.values().min().copied();
        if held.is_empty() {
            self.held.remove(&feed);
        } else {
            debug!(feed = %feed, held = held.len(), "undelivered items hold the watermark");
        }

        match next_watermark(floor, delivered.into_iter().map(|(_, at)| (at, true))) {
            Some(at) => self.advance(feed, at).await,
            None => Advance::Stale,
        }
    }

    async fn advance(&mut self, feed: String, at: DateTime<Utc>) -> Advance {
        if self.marks.get(&feed).is_some_and(|current| *current >= at) {
            debug!(feed = %feed, %at, "ignoring stale watermark");
            return Advance::Stale;
        }
        info!(feed = %feed, %at, "advancing watermark");
        self.marks.insert(feed, at);
        self.published.send_replace(Arc::new(self.marks.clone()));

        let Some(path) = &self.path else {
            return Advance::Committed;
        };
        match write_snapshot(path, &self.marks).await {
            Ok(()) => Advance::Committed,
            Err(err) => {
                warn!(error = %err, path = %path.display(), "failed to persist watermarks");
                self.sink.report(Origin::Store, err);
                Advance::Unpersisted
            }
        }
    }
}

pub async fn load_snapshot(path: &Path) -> Result<Watermarks, FeedMailError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "history file not found, it will be created");
            Ok(Watermarks::new())
        }
        Err(err) => Err(err.into()),
    }
}

/// Replaces the snapshot at `path` in one step: the full mapping goes to a
/// sibling temp file which is then renamed over the old one.
pub async fn write_snapshot(path: &Path, marks: &Watermarks) -> Result<(), FeedMailError> {
    let bytes = serde_json::to_vec_pretty(marks)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);
    let mut file = options.open(&tmp).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), feeds = marks.len(), "history file updated");
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
