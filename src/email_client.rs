use crate::domain::MailMessage;
use crate::routes::error_chain_fmt;
use lettre::address::AddressError;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, Secret};
use std::fmt::Formatter;
use std::time::Duration;

/// Delivers HTML emails over SMTP with a fixed sender identity.
///
/// Every call opens its own session: connect, `EHLO`, `STARTTLS` when the
/// server advertises it, authenticate, send one message, `QUIT`. Nothing is
/// retried, and the whole exchange is abandoned once `timeout` has elapsed.
pub struct EmailClient {
    sender: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
    timeout: Duration,
}

//region DispatchError & Implementations
#[derive(thiserror::Error)]
pub enum DispatchError {
    #[error("`{0}` is not a valid recipient address")]
    InvalidRecipient(String, #[source] AddressError),
    #[error("Failed to build the email message")]
    MessageBuild(#[from] lettre::error::Error),
    #[error("The SMTP exchange failed")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("The SMTP exchange did not complete within {0:?}")]
    Timeout(Duration),
}

impl std::fmt::Debug for DispatchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}
//endregion

impl EmailClient {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: String,
        password: Secret<String>,
        sender: Mailbox,
        timeout: Duration,
    ) -> Result<Self, lettre::transport::smtp::Error> {
        let tls_parameters = TlsParameters::new(smtp_host.to_string())?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_host)
            .port(smtp_port)
            .tls(Tls::Opportunistic(tls_parameters))
            .credentials(Credentials::new(
                username,
                password.expose_secret().to_string(),
            ))
            .authentication(vec![Mechanism::Plain, Mechanism::Login])
            .timeout(Some(timeout))
            .build();
        Ok(Self {
            sender,
            transport,
            timeout,
        })
    }

    #[tracing::instrument(
        name = "Dispatching an email",
        skip_all,
        fields(recipient = %message.to, subject = %message.subject)
    )]
    pub async fn send_email(&self, message: &MailMessage) -> Result<(), DispatchError> {
        let recipient: Mailbox = message
            .to
            .parse()
            .map_err(|e| DispatchError::InvalidRecipient(message.to.clone(), e))?;
        let email = Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(message.html_body.clone())?;

        tokio::time::timeout(self.timeout, self.transport.send(email))
            .await
            .map_err(|_| DispatchError::Timeout(self.timeout))??;
        Ok(())
    }
}
