use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::dedup::Fresh;
use crate::error::FeedMailError;
use crate::feed::FeedItem;

/// Mail transport collaborator.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), FeedMailError>;
}

/// SMTP with STARTTLS and PLAIN/LOGIN credentials.
pub struct SmtpMailer {
    inner: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Connects to `addr:port` and checks the server certificate against
    /// `tls_host`, which may differ from the address dialled.
    pub fn new(
        addr: &str,
        port: u16,
        tls_host: &str,
        user: &str,
        pass: &str,
    ) -> Result<Self, FeedMailError> {
        let tls = TlsParameters::new(tls_host.to_owned())?;
        let inner = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(addr)
            .port(port)
            .tls(Tls::Required(tls))
            .credentials(Credentials::new(user.to_owned(), pass.to_owned()))
            .build();
        Ok(Self { inner })
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, message: Message) -> Result<(), FeedMailError> {
        self.inner.send(message).await?;
        Ok(())
    }
}

/// Static fields every notification shares.
#[derive(Debug, Clone)]
pub struct MailProfile {
    pub subject_prefix: String,
    pub from: Mailbox,
    pub to: Vec<Mailbox>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub subject: String,
    pub html: String,
}

/// Renders one item. Date, links, description and content sections are
/// left out when the item has nothing for them.
pub fn render(
    subject_prefix: &str,
    channel_title: &str,
    item: &FeedItem,
    published: Option<DateTime<Utc>>,
) -> Rendered {
    let subject = format!("{subject_prefix} [{channel_title}] {}", item.title)
        .trim_start()
        .to_owned();

    let mut html = String::new();
    let _ = writeln!(html, "<b>Title:</b> {}<br>", item.title);
    if let Some(at) = published {
        let _ = writeln!(html, "<b>Date:</b> {}<br>", at.format("%-d %B %Y %H:%M"));
    }
    if !item.links.is_empty() {
        html.push_str("<b>Links:</b><br>\n");
        for link in &item.links {
            let _ = writeln!(html, "  - {link}<br>");
        }
    }
    if let Some(description) = item.description.as_deref().filter(|d| !d.is_empty()) {
        let _ = writeln!(html, "<b>Description:</b><br>{description}<br>");
    }
    if let Some(content) = &item.content {
        let _ = write!(html, "<b>Content:</b><br>{content}");
    }

    Rendered { subject, html }
}

/// Turns new items into mail and hands them to the transport, one send per
/// item. Never retries.
#[derive(Clone)]
pub struct Notifier {
    profile: MailProfile,
    transport: Arc<dyn MailTransport>,
}

impl Notifier {
    pub fn new(profile: MailProfile, transport: Arc<dyn MailTransport>) -> Self {
        Self { profile, transport }
    }

    pub fn build_message(
        &self,
        channel_title: &str,
        fresh: &Fresh<'_>,
    ) -> Result<Message, FeedMailError> {
        let rendered = render(
            &self.profile.subject_prefix,
            channel_title,
            fresh.item,
            fresh.published,
        );
        let mut builder = Message::builder()
            .from(self.profile.from.clone())
            .subject(rendered.subject);
        for to in &self.profile.to {
            builder = builder.to(to.clone());
        }
        Ok(builder.header(ContentType::TEXT_HTML).body(rendered.html)?)
    }

    pub async fn notify(&self, channel_title: &str, fresh: &Fresh<'_>) -> Result<(), FeedMailError> {
        let message = self.build_message(channel_title, fresh)?;
        info!(channel = %channel_title, title = %fresh.item.title, "sending e-mail");
        self.transport.send(message).await
    }
}
