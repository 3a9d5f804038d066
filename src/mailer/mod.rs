//! Outbound email.
//!
//! [`SmtpMailer`] delivers through a STARTTLS relay. When no SMTP host is
//! configured the server uses [`DisabledMailer`], which fails every send so
//! report jobs record a failure instead of silently dropping mail.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio::runtime::Handle;
use tracing::info;

pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, thiserror::Error)]
pub enum MailerError {
    #[error("Email delivery is not configured (no SMTP host)")]
    NotConfigured,

    #[error("No recipients given")]
    NoRecipients,

    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Email build error: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub from_address: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Sends one HTML email to all recipients.
///
/// Called from job bodies, which run on blocking worker threads.
pub trait Mailer: Send + Sync {
    fn send(&self, html: &str, subject: &str, recipients: &[String]) -> Result<(), MailerError>;
}

pub struct DisabledMailer;

impl Mailer for DisabledMailer {
    fn send(&self, _html: &str, _subject: &str, _recipients: &[String]) -> Result<(), MailerError> {
        Err(MailerError::NotConfigured)
    }
}

pub struct SmtpMailer {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    runtime: Handle,
}

impl SmtpMailer {
    /// `runtime` drives the async transport from blocking job threads.
    pub fn new(settings: &SmtpSettings, runtime: Handle) -> Result<Self, MailerError> {
        let from: Mailbox = settings.from_address.parse()?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
                .port(settings.port);
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            from,
            transport: transport_builder.build(),
            runtime,
        })
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, html: &str, subject: &str, recipients: &[String]) -> Result<(), MailerError> {
        let message = build_message(&self.from, html, subject, recipients)?;
        self.runtime.block_on(self.transport.send(message))?;

        info!(
            recipients = recipients.len(),
            subject = subject,
            "Report email sent"
        );
        Ok(())
    }
}

fn build_message(
    from: &Mailbox,
    html: &str,
    subject: &str,
    recipients: &[String],
) -> Result<Message, MailerError> {
    if recipients.is_empty() {
        return Err(MailerError::NoRecipients);
    }

    let mut builder = Message::builder().from(from.clone()).subject(subject);
    for recipient in recipients {
        builder = builder.to(recipient.parse()?);
    }

    builder
        .header(ContentType::TEXT_HTML)
        .body(html.to_string())
        .map_err(|e| MailerError::Build(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> Mailbox {
        "reports@example.com".parse().unwrap()
    }

    #[test]
    fn builds_single_message_for_all_recipients() {
        let recipients = vec!["a@example.com".to_string(), "b@example.com".to_string()];
        let message = build_message(&sender(), "<p>hi</p>", "Weekly", &recipients).unwrap();

        let to: Vec<String> = message
            .envelope()
            .to()
            .iter()
            .map(|a| a.to_string())
            .collect();
        assert_eq!(to, recipients);
        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("Subject: Weekly"));
        assert!(formatted.contains("text/html"));
    }

    #[test]
    fn rejects_empty_recipients() {
        assert!(matches!(
            build_message(&sender(), "x", "y", &[]),
            Err(MailerError::NoRecipients)
        ));
    }

    #[test]
    fn rejects_malformed_recipient() {
        assert!(matches!(
            build_message(&sender(), "x", "y", &["not an address".to_string()]),
            Err(MailerError::Address(_))
        ));
    }

    #[test]
    fn disabled_mailer_always_fails() {
        let err = DisabledMailer
            .send("x", "y", &["a@example.com".to_string()])
            .unwrap_err();
        assert!(matches!(err, MailerError::NotConfigured));
    }
}
