use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::FeedMailError;

/// A configured feed. The URL doubles as the watermark key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Feed {
    pub url: String,
    pub timeout: Duration,
}

impl Feed {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedItem {
    pub title: String,
    pub links: Vec<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    /// Publication date exactly as the feed wrote it.
    pub published: Option<String>,
    pub guid: Option<String>,
}

impl FeedItem {
    pub fn from_rss_item(item: &rss::Item) -> Self {
        let mut links: Vec<String> = item.link().map(ToOwned::to_owned).into_iter().collect();
        if let Some(enclosure) = item.enclosure() {
            links.push(enclosure.url().to_owned());
        }

        // Fall back to the Dublin Core date when pubDate is absent
        let published = item
            .pub_date()
            .map(ToOwned::to_owned)
            .or_else(|| {
                item.dublin_core_ext()
                    .and_then(|dc| dc.dates().first().cloned())
            });

        Self {
            title: item.title().unwrap_or_default().to_owned(),
            links,
            description: item
                .description()
                .filter(|d| !d.trim().is_empty())
                .map(ToOwned::to_owned),
            content: item.content().map(ToOwned::to_owned),
            published,
            guid: item.guid().map(|guid| guid.value().to_owned()),
        }
    }

    pub fn from_atom_entry(entry: &atom_syndication::Entry) -> Self {
        let published = entry
            .published()
            .unwrap_or_else(|| entry.updated())
            .to_rfc3339();

        Self {
            title: entry.title().value.clone(),
            links: entry.links().iter().map(|l| l.href().to_owned()).collect(),
            description: entry
                .summary()
                .map(|s| s.value.clone())
                .filter(|s| !s.trim().is_empty()),
            content: entry.content().and_then(|c| c.value()).map(ToOwned::to_owned),
            published: Some(published),
            guid: Some(entry.id().to_owned()).filter(|id| !id.is_empty()),
        }
    }

    /// Stable key used to recognise an item across fetches.
    pub fn identity(&self) -> String {
        if let Some(guid) = &self.guid {
            return format!("guid:{guid}");
        }
        if let Some(link) = self.links.first() {
            return format!("link:{link}");
        }
        format!("title:{}", self.title)
    }

    pub fn published_at(&self) -> Result<DateTime<Utc>, FeedMailError> {
        match self.published.as_deref() {
            Some(raw) if !raw.trim().is_empty() => parse_published(raw),
            _ => Err(FeedMailError::MissingDate),
        }
    }
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Parses a feed date: RFC 2822, then RFC 3339, then a couple of naive
/// forms read as UTC.
pub fn parse_published(raw: &str) -> Result<DateTime<Utc>, FeedMailError> {
    let value = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| FeedMailError::BadDate {
            raw: raw.to_owned(),
        })
}

/// Result of one successful fetch: only the items the source had not
/// returned before, in document order.
#[derive(Debug, Clone, Default)]
pub struct FetchedBatch {
    pub channel_title: String,
    pub items: Vec<FeedItem>,
    /// Refresh hint published by the feed itself (RSS `<ttl>`).
    pub ttl: Option<Duration>,
}

impl FetchedBatch {
    /// How long to wait before the next poll. The configured default is a
    /// floor: a feed may ask to be polled less often, never more often.
    pub fn next_interval(&self, default: Duration) -> Duration {
        self.ttl.map_or(default, |ttl| ttl.max(default))
    }
}
