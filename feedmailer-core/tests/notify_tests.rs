use std::time::Duration;

use feedmailer_core::{FeedMailError, MailTransport, SmtpMailer};
use lettre::Message;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

fn message() -> Message {
    Message::builder()
        .from("bot@example.com".parse().unwrap())
        .to("me@example.com".parse().unwrap())
        .subject("[feeds] hello")
        .body(String::from("body"))
        .unwrap()
}

#[tokio::test]
async fn dials_the_configured_address_not_the_tls_name() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        conn.write_all(b"421 closing\r\n").await.unwrap();
        conn.shutdown().await.ok();
    });

    let mailer = SmtpMailer::new("127.0.0.1", port, "smtp.invalid.example", "bot", "secret")
        .expect("build transport");
    let sent = tokio::time::timeout(Duration::from_secs(5), mailer.send(message()))
        .await
        .expect("send did not finish");

    assert!(matches!(sent, Err(FeedMailError::Transport(_))));
    tokio::time::timeout(Duration::from_secs(1), server)
        .await
        .expect("nothing connected to the configured address")
        .unwrap();
}
