//! Outbound mail notifier.
//!
//! The notifier is an external collaborator: it accepts a rendered document,
//! a subject, and a destination address, and reports only success or failure.
//! Nothing is retried here; delivery confirmation is out of scope.

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::SmtpSettings;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("el transporte de correo no está configurado")]
    NotConfigured,
    #[error("dirección o mensaje inválido: {0}")]
    Message(String),
    #[error("fallo en la entrega SMTP: {0}")]
    Transport(String),
}

/// Delivery seam between the plan service and the mail transport.
pub trait Notifier: Send + Sync {
    /// Delivers `html_body` to `to`. Fire-and-forget: a successful return
    /// means the transport accepted the message, not that it arrived.
    fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError>;
}

/// SMTP-backed notifier built once at startup from [`SmtpSettings`].
pub struct SmtpNotifier {
    transport: SmtpTransport,
    from: Mailbox,
}

impl SmtpNotifier {
    /// # Errors
    ///
    /// Returns `NotifyError::Message` if the configured sender address does
    /// not parse as a mailbox.
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let from: Mailbox = settings
            .from_address
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Message(e.to_string()))?;

        let mut builder = SmtpTransport::builder_dangerous(settings.host.as_str()).port(settings.port);
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

impl Notifier for SmtpNotifier {
    fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), NotifyError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Message(e.to_string()))?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| NotifyError::Message(e.to_string()))?;

        self.transport
            .send(&message)
            .map(|_| ())
            .map_err(|e| NotifyError::Transport(e.to_string()))
    }
}

/// Stands in when SMTP is not configured; every delivery fails.
pub struct DisabledNotifier;

impl Notifier for DisabledNotifier {
    fn send(&self, _to: &str, _subject: &str, _html_body: &str) -> Result<(), NotifyError> {
        Err(NotifyError::NotConfigured)
    }
}
