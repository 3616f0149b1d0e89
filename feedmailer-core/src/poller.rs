use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dedup::{classify, Verdict};
use crate::error::FeedMailError;
use crate::feed::{Feed, FetchedBatch};
use crate::notify::Notifier;
use crate::sink::ErrorSink;
use crate::source::FeedSource;
use crate::storage::{Advance, Settlement, WatermarkStore};

/// Everything a poller needs besides its own feed. Cheap to clone.
#[derive(Clone)]
pub struct PollContext {
    pub source: Arc<dyn FeedSource>,
    pub notifier: Notifier,
    pub store: WatermarkStore,
    pub sink: ErrorSink,
    pub default_interval: Duration,
}

/// What one poll cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: bool,
    pub fresh: usize,
    pub delivered: usize,
    pub advance: Option<Advance>,
    pub next_poll: Duration,
}

/// Lifecycle handle of one feed's polling task. Dropping it also stops the
/// task at its next suspension point.
pub struct PollerHandle {
    feed: String,
    cancel_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl PollerHandle {
    pub fn feed(&self) -> &str {
        &self.feed
    }

    pub async fn stop(self) -> Result<(), FeedMailError> {
        let _ = self.cancel_tx.send(());
        self.join.await.map_err(FeedMailError::from)
    }
}

pub fn spawn_poller(feed: Feed, ctx: PollContext) -> PollerHandle {
    let (cancel_tx, mut cancel_rx) = broadcast::channel(1);
    let url = feed.url.clone();
    let join = tokio::spawn(async move {
        info!(feed = %feed.url, "poller started");
        loop {
            let report = tokio::select! {
                _ = cancel_rx.recv() => break,
                report = poll_once(&feed, &ctx) => report,
            };
            debug!(feed = %feed.url, wait = ?report.next_poll, "next poll scheduled");
            tokio::select! {
                _ = cancel_rx.recv() => break,
                _ = tokio::time::sleep(report.next_poll) => {}
            }
        }
        info!(feed = %feed.url, "poller stopped");
    });

    PollerHandle {
        feed: url,
        cancel_tx,
        join,
    }
}

/// One fetch-classify-notify-advance cycle. Failures are reported to the
/// sink; the returned report says when to poll next.
pub async fn poll_once(feed: &Feed, ctx: &PollContext) -> PollReport {
    match ctx.source.fetch(feed).await {
        Ok(batch) => {
            info!(feed = %feed.url, count = batch.items.len(), "new item(s) fetched");
            process_batch(&feed.url, &batch, ctx).await
        }
        Err(err) => {
            warn!(feed = %feed.url, error = %err, "failed to fetch feed");
            ctx.sink.report_feed(&feed.url, err);
            PollReport {
                fetched: false,
                fresh: 0,
                delivered: 0,
                advance: None,
                next_poll: ctx.default_interval,
            }
        }
    }
}

/// Runs a fetched batch through dedup and the notifier, then settles the
/// delivery outcomes with the store. An item whose send fails is handed back
/// to the source so the next fetch returns it again.
pub async fn process_batch(url: &str, batch: &FetchedBatch, ctx: &PollContext) -> PollReport {
    let watermark = ctx.store.get(url);
    let Verdict { fresh, date_errors } = classify(watermark, &batch.items);
    for err in date_errors {
        warn!(feed = %url, error = %err, "skipping item date");
        ctx.sink.report_feed(url, err);
    }

    let mut settlement = Settlement::default();
    for item in &fresh {
        let identity = item.item.identity();
        match ctx.notifier.notify(&batch.channel_title, item).await {
            Ok(()) => settlement.delivered.push((identity, item.published)),
            Err(err) => {
                warn!(feed = %url, title = %item.item.title, error = %err, "failed to send e-mail");
                ctx.sink.report_feed(url, err);
                ctx.source.forget(url, &identity).await;
                settlement.failed.push((identity, item.published));
            }
        }
    }
    let delivered = settlement.delivered.len();

    let advance = if fresh.is_empty() {
        None
    } else {
        match ctx.store.settle(url, settlement).await {
            Ok(advance) => Some(advance),
            Err(err) => {
                ctx.sink.report_feed(url, err);
                None
            }
        }
    };

    PollReport {
        fetched: true,
        fresh: fresh.len(),
        delivered,
        advance,
        next_poll: batch.next_interval(ctx.default_interval),
    }
}
