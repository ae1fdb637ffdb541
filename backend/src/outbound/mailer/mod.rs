//! SMTP relay adapter implementing the `Mailer` port via lettre.
//!
//! The relay is dialled in cleartext with opportunistic STARTTLS and no
//! certificate verification; the relay is a trusted hop inside the
//! deployment, not an arbitrary internet MTA. One transport is built per
//! process and reused across jobs (lettre pools connections internally).

use async_trait::async_trait;
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::domain::delivery::{RelayReceipt, SmtpEnvelope};
use crate::domain::ports::{MailError, Mailer};

/// Where the upstream relay listens.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
}

/// lettre-backed implementation of the `Mailer` port.
#[derive(Clone)]
pub struct SmtpRelayMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpRelayMailer {
    /// Build the shared transport for the configured relay.
    pub fn new(config: &RelayConfig) -> Result<Self, MailError> {
        let tls = TlsParameters::builder(config.host.clone())
            .dangerous_accept_invalid_certs(true)
            .dangerous_accept_invalid_hostnames(true)
            .build()
            .map_err(|err| MailError::connection(format!("tls setup failed: {err}")))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
            .port(config.port)
            .tls(Tls::Opportunistic(tls))
            .build();
        Ok(Self { transport })
    }
}

fn parse_mailbox(raw: &str, field: &str) -> Result<Mailbox, MailError> {
    raw.parse()
        .map_err(|err| MailError::rejected(format!("invalid {field} address {raw}: {err}"), None))
}

/// Assemble the RFC 5322 message from the domain envelope.
fn build_message(envelope: &SmtpEnvelope) -> Result<Message, MailError> {
    let mut builder = Message::builder()
        .from(parse_mailbox(&envelope.from, "from")?)
        .subject(envelope.subject.clone())
        .message_id(Some(envelope.message_id.clone()));
    for recipient in &envelope.to {
        builder = builder.to(parse_mailbox(recipient, "to")?);
    }
    if let Some(reply_to) = &envelope.reply_to {
        builder = builder.reply_to(parse_mailbox(reply_to, "reply-to")?);
    }

    let build_err =
        |err: lettre::error::Error| MailError::rejected(format!("message build failed: {err}"), None);
    let mut message = match (&envelope.html, &envelope.text) {
        (Some(html), Some(text)) => builder
            .multipart(MultiPart::alternative_plain_html(
                text.clone(),
                html.clone(),
            ))
            .map_err(build_err)?,
        (Some(html), None) => builder
            .header(ContentType::TEXT_HTML)
            .body(html.clone())
            .map_err(build_err)?,
        (None, Some(text)) => builder
            .header(ContentType::TEXT_PLAIN)
            .body(text.clone())
            .map_err(build_err)?,
        (None, None) => return Err(MailError::rejected("message has no body", None)),
    };

    for (name, value) in &envelope.headers {
        let header_name = HeaderName::new_from_ascii(name.clone())
            .map_err(|err| MailError::rejected(format!("invalid header {name}: {err}"), None))?;
        message
            .headers_mut()
            .insert_raw(HeaderValue::new(header_name, value.clone()));
    }

    Ok(message)
}

#[async_trait]
impl Mailer for SmtpRelayMailer {
    async fn send(&self, envelope: &SmtpEnvelope) -> Result<RelayReceipt, MailError> {
        let message = build_message(envelope)?;
        let response = self.transport.send(message).await.map_err(|err| {
            let code = err
                .status()
                .and_then(|status| status.to_string().parse::<u16>().ok());
            match code {
                Some(code) => MailError::rejected(err.to_string(), Some(code)),
                None => MailError::connection(err.to_string()),
            }
        })?;

        let line = response.message().collect::<Vec<_>>().join(" ");
        Ok(RelayReceipt {
            response: format!("{} {line}", response.code()),
            accepted: envelope.to.clone(),
            rejected: Vec::new(),
        })
    }
}
