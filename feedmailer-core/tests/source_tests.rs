use std::time::Duration;

use feedmailer_core::{Feed, FeedMailError, FeedSource, HttpFeedSource};
use reqwest::Client;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn rss_with(items: &[(&str, &str)]) -> String {
    let items: String = items
        .iter()
        .map(|(guid, date)| {
            format!(
                r#"<item>
      <title>Item {guid}</title>
      <link>http://example.com/{guid}</link>
      <guid>{guid}</guid>
      <pubDate>{date}</pubDate>
      <description>Body of {guid}</description>
    </item>"#
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test Feed</title>
    <link>http://example.com/</link>
    <description>Test description</description>
    <ttl>60</ttl>
    {items}
  </channel>
</rss>"#
    )
}

const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Feed</title>
  <id>urn:uuid:60a76c80-d399-11d9-b93C-0003939e0af6</id>
  <updated>2024-01-02T00:00:00Z</updated>
  <entry>
    <title>Atom entry</title>
    <link href="http://example.org/2024/01/02/entry"/>
    <id>urn:uuid:1225c695-cfb8-4ebb-aaaa-80da344efa6a</id>
    <updated>2024-01-02T10:00:00Z</updated>
    <summary>Short summary</summary>
  </entry>
</feed>"#;

async fn serve(server: &MockServer, body: String) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

fn feed_at(server: &MockServer) -> Feed {
    Feed::new(format!("{}/feed", server.uri()), Duration::from_secs(2))
}

#[tokio::test]
async fn returns_only_items_it_has_not_handed_out_before() {
    let server = MockServer::start().await;
    serve(
        &server,
        rss_with(&[
            ("1", "Mon, 21 Oct 2024 07:28:00 GMT"),
            ("2", "Mon, 21 Oct 2024 08:00:00 GMT"),
        ]),
    )
    .await;
    let source = HttpFeedSource::new(Client::new());
    let feed = feed_at(&server);

    let first = source.fetch(&feed).await.unwrap();
    assert_eq!(first.channel_title, "Test Feed");
    assert_eq!(first.ttl, Some(Duration::from_secs(3600)));
    let titles: Vec<_> = first.items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, ["Item 1", "Item 2"]);
    assert_eq!(first.items[0].links, ["http://example.com/1"]);
    assert_eq!(
        first.items[0].published.as_deref(),
        Some("Mon, 21 Oct 2024 07:28:00 GMT")
    );

    let second = source.fetch(&feed).await.unwrap();
    assert!(second.items.is_empty());

    serve(
        &server,
        rss_with(&[
            ("3", "Mon, 21 Oct 2024 09:00:00 GMT"),
            ("1", "Mon, 21 Oct 2024 07:28:00 GMT"),
        ]),
    )
    .await;
    let third = source.fetch(&feed).await.unwrap();
    assert_eq!(third.items.len(), 1);
    assert_eq!(third.items[0].title, "Item 3");
}

#[tokio::test]
async fn forgets_items_that_left_the_document() {
    let server = MockServer::start().await;
    let one = ("1", "Mon, 21 Oct 2024 07:28:00 GMT");
    let two = ("2", "Mon, 21 Oct 2024 08:00:00 GMT");
    let source = HttpFeedSource::new(Client::new());
    let feed = feed_at(&server);

    serve(&server, rss_with(&[one, two])).await;
    assert_eq!(source.fetch(&feed).await.unwrap().items.len(), 2);

    serve(&server, rss_with(&[two])).await;
    assert!(source.fetch(&feed).await.unwrap().items.is_empty());

    // item 1 was dropped from memory while it was absent
    serve(&server, rss_with(&[one, two])).await;
    let back = source.fetch(&feed).await.unwrap();
    let titles: Vec<_> = back.items.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, ["Item 1"]);
}

#[tokio::test]
async fn forgotten_item_is_returned_again() {
    let server = MockServer::start().await;
    serve(
        &server,
        rss_with(&[
            ("1", "Mon, 21 Oct 2024 07:28:00 GMT"),
            ("2", "Mon, 21 Oct 2024 08:00:00 GMT"),
        ]),
    )
    .await;
    let source = HttpFeedSource::new(Client::new());
    let feed = feed_at(&server);

    let first = source.fetch(&feed).await.unwrap();
    source.forget(&feed.url, &first.items[1].identity()).await;
    source.forget("https://unknown.example/feed", "guid:1").await;

    let again = source.fetch(&feed).await.unwrap();
    assert_eq!(again.items.len(), 1);
    assert_eq!(again.items[0].title, "Item 2");
}

#[tokio::test]
async fn falls_back_to_atom() {
    let server = MockServer::start().await;
    serve(&server, ATOM.to_string()).await;
    let source = HttpFeedSource::new(Client::new());

    let batch = source.fetch(&feed_at(&server)).await.unwrap();

    assert_eq!(batch.channel_title, "Atom Feed");
    assert_eq!(batch.ttl, None);
    assert_eq!(batch.items.len(), 1);
    let entry = &batch.items[0];
    assert_eq!(entry.links, ["http://example.org/2024/01/02/entry"]);
    assert_eq!(entry.description.as_deref(), Some("Short summary"));
    assert!(entry.published_at().is_ok());
}

#[tokio::test]
async fn http_errors_and_garbage_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/garbage"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
        .mount(&server)
        .await;
    let source = HttpFeedSource::new(Client::new());

    let broken = Feed::new(format!("{}/broken", server.uri()), Duration::from_secs(2));
    assert!(matches!(
        source.fetch(&broken).await,
        Err(FeedMailError::Network(_))
    ));

    let garbage = Feed::new(format!("{}/garbage", server.uri()), Duration::from_secs(2));
    assert!(matches!(
        source.fetch(&garbage).await,
        Err(FeedMailError::Parse(_))
    ));
}

#[tokio::test]
async fn slow_feeds_time_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(rss_with(&[]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;
    let source = HttpFeedSource::new(Client::new());
    let feed = Feed::new(format!("{}/feed", server.uri()), Duration::from_millis(50));

    let err = source.fetch(&feed).await.unwrap_err();
    assert!(matches!(err, FeedMailError::Network(ref e) if e.is_timeout()));
}
