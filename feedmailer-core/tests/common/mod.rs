#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use feedmailer_core::{
    error_channel, ErrorStream, Feed, FeedItem, FeedMailError, FeedSource,
    FetchedBatch, MailProfile, MailTransport, Notifier, PollContext, WatermarkStore, Watermarks,
};
use lettre::Message;

/// Fresh directory under the system temp dir.
pub async fn temp_dir(tag: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "feedmailer_{tag}_{}_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    dir
}

pub fn item(title: &str, published: &str) -> FeedItem {
    FeedItem {
        title: title.into(),
        links: vec![format!("https://a.example/{title}")],
        published: Some(published.into()),
        ..Default::default()
    }
}

pub fn batch(items: Vec<FeedItem>) -> FetchedBatch {
    FetchedBatch {
        channel_title: "Channel".into(),
        items,
        ttl: None,
    }
}

/// Hands out queued fetch results, then empty batches.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<FetchedBatch, FeedMailError>>>,
    pub calls: AtomicUsize,
    pub forgotten: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<FetchedBatch, FeedMailError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch(&self, _feed: &Feed) -> Result<FetchedBatch, FeedMailError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(batch(Vec::new())))
    }

    async fn forget(&self, _url: &str, identity: &str) {
        self.forgotten.lock().unwrap().push(identity.to_owned());
    }
}

/// Records subjects of sent mail; fails any message whose subject contains
/// one of `fail_on` until `heal` is called.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<String>>,
    pub fail_on: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn failing_on(titles: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_on: Mutex::new(titles.iter().map(|t| t.to_string()).collect()),
        }
    }

    pub fn heal(&self) {
        self.fail_on.lock().unwrap().clear();
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn send(&self, message: Message) -> Result<(), FeedMailError> {
        let subject = message
            .headers()
            .get_raw("Subject")
            .unwrap_or_default()
            .to_owned();
        let refused = self
            .fail_on
            .lock()
            .unwrap()
            .iter()
            .any(|t| subject.contains(t.as_str()));
        if refused {
            return Err(FeedMailError::Transport(format!("refused {subject}")));
        }
        self.sent.lock().unwrap().push(subject);
        Ok(())
    }
}

pub fn mail_profile() -> MailProfile {
    MailProfile {
        subject_prefix: "[feeds]".into(),
        from: "bot@example.com".parse().unwrap(),
        to: vec!["me@example.com".parse().unwrap()],
    }
}

pub struct Harness {
    pub ctx: PollContext,
    pub source: Arc<ScriptedSource>,
    pub transport: Arc<RecordingTransport>,
    pub store: WatermarkStore,
    pub errors: ErrorStream,
}

pub fn harness(
    marks: Watermarks,
    source: ScriptedSource,
    transport: RecordingTransport,
) -> Harness {
    let (sink, errors) = error_channel();
    let (store, _task) = WatermarkStore::in_memory(marks, sink.clone());
    let source = Arc::new(source);
    let transport = Arc::new(transport);
    let ctx = PollContext {
        source: source.clone(),
        notifier: Notifier::new(mail_profile(), transport.clone()),
        store: store.clone(),
        sink,
        default_interval: Duration::from_millis(20),
    };
    Harness {
        ctx,
        source,
        transport,
        store,
        errors,
    }
}
