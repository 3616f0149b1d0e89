use std::sync::Arc;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Profile;
use crate::error::FeedMailError;
use crate::notify::{MailProfile, MailTransport, Notifier};
use crate::poller::{spawn_poller, PollContext, PollerHandle};
use crate::sink::{error_channel, ErrorPolicy, ErrorStream, Reported};
use crate::source::FeedSource;
use crate::storage::WatermarkStore;

/// A running instance: one poller per feed, the watermark store task, and
/// the error stream they all report to.
pub struct FeedMailer {
    pollers: Vec<PollerHandle>,
    store: WatermarkStore,
    store_task: JoinHandle<()>,
    errors: ErrorStream,
}

impl FeedMailer {
    /// Loads the history file and starts polling every configured feed.
    /// Only startup failures are returned here; everything later goes to
    /// the error stream.
    pub async fn start(
        profile: &Profile,
        source: Arc<dyn FeedSource>,
        transport: Arc<dyn MailTransport>,
    ) -> Result<Self, FeedMailError> {
        let (sink, errors) = error_channel();

        info!(path = %profile.hist_file.display(), "reading history");
        let (store, store_task) = WatermarkStore::open(&profile.hist_file, sink.clone()).await?;

        let notifier = Notifier::new(
            MailProfile {
                subject_prefix: profile.subject_prefix.clone(),
                from: profile.sender()?,
                to: profile.recipients()?,
            },
            transport,
        );
        let ctx = PollContext {
            source,
            notifier,
            store: store.clone(),
            sink,
            default_interval: profile.default_interval(),
        };

        info!(feeds = profile.feeds.len(), "fetching feeds");
        let pollers = profile
            .feeds()
            .into_iter()
            .map(|feed| spawn_poller(feed, ctx.clone()))
            .collect();

        Ok(Self {
            pollers,
            store,
            store_task,
            errors,
        })
    }

    pub fn store(&self) -> &WatermarkStore {
        &self.store
    }

    /// Consumes the error stream according to `policy`. Under `FailFast`
    /// the first report is returned; otherwise every report is logged and
    /// this only returns once all reporters are gone.
    pub async fn run(&mut self, policy: ErrorPolicy) -> Option<Reported> {
        while let Some(reported) = self.errors.next().await {
            match policy {
                ErrorPolicy::FailFast => {
                    error!(origin = %reported.origin, error = %reported.error, "stopping on first error");
                    return Some(reported);
                }
                ErrorPolicy::LogAndContinue => {
                    warn!(origin = %reported.origin, error = %reported.error, "reported error");
                }
            }
        }
        None
    }

    /// Stops every poller, then lets the store finish its queued updates.
    pub async fn shutdown(self) -> Result<(), FeedMailError> {
        let Self {
            pollers,
            store,
            store_task,
            mut errors,
        } = self;

        for result in join_all(pollers.into_iter().map(PollerHandle::stop)).await {
            result?;
        }
        drop(store);
        store_task.await?;

        for reported in errors.drain() {
            warn!(origin = %reported.origin, error = %reported.error, "reported during shutdown");
        }
        info!("feed mailer stopped");
        Ok(())
    }
}
