//! Decides which items of a fetched batch still need a notification and
//! where the watermark should move afterwards. Nothing here touches the
//! store or the network.

use chrono::{DateTime, Utc};

use crate::error::FeedMailError;
use crate::feed::FeedItem;

/// An item judged new, with its parsed timestamp when it had one.
#[derive(Debug, Clone, Copy)]
pub struct Fresh<'a> {
    pub item: &'a FeedItem,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct Verdict<'a> {
    /// New items, in batch order.
    pub fresh: Vec<Fresh<'a>>,
    /// One entry per item whose date was missing or unparseable.
    pub date_errors: Vec<FeedMailError>,
}

/// Splits `items` against the feed's current watermark.
///
/// An item is new when its date is strictly after the watermark, or when
/// the feed has no watermark yet. Items without a usable date are reported
/// and only count as new while the feed has no watermark.
pub fn classify(watermark: Option<DateTime<Utc>>, items: &[FeedItem]) -> Verdict<'_> {
    let mut verdict = Verdict::default();
    for item in items {
        let published = match item.published_at() {
            Ok(at) => Some(at),
            Err(err) => {
                verdict.date_errors.push(err);
                None
            }
        };
        let is_new = match (watermark, published) {
            (None, _) => true,
            (Some(mark), Some(at)) => at > mark,
            (Some(_), None) => false,
        };
        if is_new {
            verdict.fresh.push(Fresh { item, published });
        }
    }
    verdict
}

impl Verdict<'_> {
    /// Newest timestamp among the fresh items, assuming every one of them
    /// gets delivered.
    pub fn candidate(&self) -> Option<DateTime<Utc>> {
        self.fresh.iter().filter_map(|f| f.published).max()
    }
}

/// Watermark to request once delivery outcomes are known, as
/// `(published, delivered)` pairs.
///
/// `floor` is the timestamp of the earliest item still waiting for a
/// successful send from an earlier batch. Delivered items only advance the
/// watermark up to, but excluding, the earliest of `floor` and this batch's
/// failures, so an undelivered item stays new across polls and restarts.
/// Returns `None` when nothing should be written.
pub fn next_watermark<I>(floor: Option<DateTime<Utc>>, outcomes: I) -> Option<DateTime<Utc>>
where
    I: IntoIterator<Item = (Option<DateTime<Utc>>, bool)>,
{
    let mut delivered = Vec::new();
    let mut first_failure = floor;
    for (published, ok) in outcomes {
        let Some(at) = published else { continue };
        if ok {
            delivered.push(at);
        } else {
            first_failure = Some(first_failure.map_or(at, |f| f.min(at)));
        }
    }
    delivered
        .into_iter()
        .filter(|at| first_failure.map_or(true, |f| *at < f))
        .max()
}
