use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::FeedMailError;
use crate::feed::{Feed, FeedItem, FetchedBatch};

/// Fetch collaborator used by the pollers.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetches `feed` and returns the items not returned by an earlier call.
    async fn fetch(&self, feed: &Feed) -> Result<FetchedBatch, FeedMailError>;

    /// Lets the item with `identity` be returned again by the next fetch of
    /// `url`. Used when its notification could not be sent.
    async fn forget(&self, _url: &str, _identity: &str) {}
}

/// Fetches feeds over HTTP and remembers, per feed, which items it has
/// already handed out. Only identities still present in the latest document
/// are remembered.
#[derive(Debug)]
pub struct HttpFeedSource {
    client: Client,
    // feed url -> identities already fetched
    fetched: Mutex<HashMap<String, HashSet<String>>>,
}

impl HttpFeedSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            fetched: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, feed: &Feed) -> Result<FetchedBatch, FeedMailError> {
        let response = self
            .client
            .get(feed.url.as_str())
            .timeout(feed.timeout)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        let mut batch = parse_feed(&body)?;

        let mut fetched = self.fetched.lock().await;
        let known = fetched.entry(feed.url.clone()).or_default();
        let current: HashSet<String> = batch.items.iter().map(FeedItem::identity).collect();
        known.retain(|identity| current.contains(identity));
        let total = batch.items.len();
        batch.items.retain(|item| known.insert(item.identity()));
        debug!(feed = %feed.url, total, fresh = batch.items.len(), "fetched feed");

        Ok(batch)
    }

    async fn forget(&self, url: &str, identity: &str) {
        if let Some(known) = self.fetched.lock().await.get_mut(url) {
            known.remove(identity);
        }
    }
}

/// Parses an RSS 2.0 document, falling back to Atom.
pub fn parse_feed(body: &Bytes) -> Result<FetchedBatch, FeedMailError> {
    let rss_err = match rss::Channel::read_from(Cursor::new(&body[..])) {
        Ok(channel) => return Ok(batch_from_channel(&channel)),
        Err(err) => err,
    };
    match atom_syndication::Feed::read_from(Cursor::new(&body[..])) {
        Ok(feed) => Ok(batch_from_atom(&feed)),
        Err(atom_err) => {
            debug!(error = %atom_err, "document is not Atom either");
            Err(FeedMailError::Parse(rss_err))
        }
    }
}

fn batch_from_channel(channel: &rss::Channel) -> FetchedBatch {
    let ttl = channel
        .ttl()
        .and_then(|minutes| minutes.trim().parse::<u64>().ok())
        .filter(|minutes| *minutes > 0)
        .map(|minutes| Duration::from_secs(minutes * 60));

    FetchedBatch {
        channel_title: channel.title().to_owned(),
        items: channel.items().iter().map(FeedItem::from_rss_item).collect(),
        ttl,
    }
}

fn batch_from_atom(feed: &atom_syndication::Feed) -> FetchedBatch {
    FetchedBatch {
        channel_title: feed.title().value.clone(),
        items: feed.entries().iter().map(FeedItem::from_atom_entry).collect(),
        ttl: None,
    }
}
