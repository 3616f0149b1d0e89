use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use feedmailer_core::{FeedMailer, HttpFeedSource, Profile, SmtpMailer};
use reqwest::{redirect, ClientBuilder};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Polls the feeds listed in a profile and mails every new item.
#[derive(Debug, Parser)]
#[command(name = "feedmailer", version)]
struct Args {
    /// JSON profile with SMTP settings, recipients and feeds
    profile: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "feedmailer stopped");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    info!(path = %args.profile.display(), "reading profile");
    let profile = Profile::load(&args.profile)?;

    let client = ClientBuilder::new()
        .redirect(redirect::Policy::limited(5))
        .user_agent(concat!("feedmailer/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let source = Arc::new(HttpFeedSource::new(client));
    let (smtp_addr, smtp_port) = profile.smtp_endpoint()?;
    let transport = Arc::new(SmtpMailer::new(
        &smtp_addr,
        smtp_port,
        &profile.smtp_host,
        &profile.smtp_user,
        &profile.smtp_pass,
    )?);

    let mut mailer = FeedMailer::start(&profile, source, transport).await?;
    let first_error = tokio::select! {
        reported = mailer.run(profile.error_policy()) => reported,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            None
        }
    };
    mailer.shutdown().await?;

    match first_error {
        Some(reported) => Err(reported.to_string().into()),
        None => Ok(()),
    }
}
