//! Outgoing mail.
//!
//! [`Mailer`] is the seam the gateway talks to; [`SmtpMailer`] relays through an
//! SMTP server with lettre, [`DisabledMailer`] stands in when no relay is configured.

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, info};

use crate::{
    config::SmtpSettings,
    error::{BoothError, BoothResult},
};

/// A file carried alongside the message body.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// One message ready to hand to a [`Mailer`].
#[derive(Debug, Clone)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
    pub attachment: Option<Attachment>,
}

impl OutgoingMail {
    /// The "here is your photo" message: greeting, optional link, optional attachment.
    pub fn final_image(
        to: &str,
        brand: &str,
        image_url: Option<&str>,
        attachment: Option<Attachment>,
    ) -> Self {
        let mut html = format!(
            "<p>Hi,<br/>Here's your final image from the {}.</p>",
            escape_html(brand)
        );
        if let Some(url) = image_url {
            let url = escape_html(url);
            html.push_str(&format!("<p><a href=\"{url}\">{url}</a></p>"));
        }
        if attachment.is_some() {
            html.push_str("<p>It's also attached to this email.</p>");
        }
        Self {
            to: to.to_string(),
            subject: format!("Your {brand} image"),
            html,
            attachment,
        }
    }
}

/// Sends mail. Implementations must be safe to share between requests.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: OutgoingMail) -> BoothResult<()>;

    /// False when sends can never succeed (no relay configured).
    fn is_enabled(&self) -> bool {
        true
    }
}

/// SMTP relay via lettre's tokio transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings, from_name: &str, from_address: &str) -> BoothResult<Self> {
        let builder = if settings.starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        }
        .map_err(|e| BoothError::config("smtp.host", &settings.host, e.to_string()))?;

        let mut builder = builder.port(settings.port);
        if !settings.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ));
        }

        let address = from_address
            .parse()
            .map_err(|e: lettre::address::AddressError| {
                BoothError::config("mail_from_address", from_address, e.to_string())
            })?;

        info!(host = %settings.host, port = settings.port, "SMTP mailer configured");
        Ok(Self {
            transport: builder.build(),
            from: Mailbox::new(Some(from_name.to_string()), address),
        })
    }

    fn build_message(&self, mail: OutgoingMail) -> BoothResult<Message> {
        let to: Mailbox = mail
            .to
            .parse()
            .map_err(|_| BoothError::validation("email", "is not a valid address", &mail.to))?;

        let mut body = MultiPart::mixed().singlepart(SinglePart::html(mail.html));
        if let Some(attachment) = mail.attachment {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|e| BoothError::external("lettre", e))?;
            body = body.singlepart(
                MailAttachment::new(attachment.file_name).body(attachment.bytes, content_type),
            );
        }

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(mail.subject)
            .multipart(body)
            .map_err(|e| BoothError::external("lettre", e))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: OutgoingMail) -> BoothResult<()> {
        let recipient = mail.to.clone();
        let message = self.build_message(mail)?;
        self.transport
            .send(message)
            .await
            .map_err(|e| BoothError::upstream_with_source("smtp", e).retryable())?;
        debug!(%recipient, "Mail relayed");
        Ok(())
    }
}

/// Used when no relay is configured; every send fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledMailer;

#[async_trait]
impl Mailer for DisabledMailer {
    async fn send(&self, _mail: OutgoingMail) -> BoothResult<()> {
        Err(BoothError::config("smtp", "", "email delivery is not configured"))
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_image_mail_links_and_mentions_attachment() {
        let attachment = Attachment {
            file_name: "photobooth.jpg".into(),
            content_type: "image/jpeg".into(),
            bytes: vec![1, 2, 3],
        };
        let mail = OutgoingMail::final_image(
            "asha@x.com",
            "Art Photobooth",
            Some("http://booth/final-images/a.jpg?x=1&y=2"),
            Some(attachment),
        );
        assert!(mail.html.contains("href=\"http://booth/final-images/a.jpg?x=1&amp;y=2\""));
        assert!(mail.html.contains("attached"));
        assert_eq!(mail.subject, "Your Art Photobooth image");
    }

    #[tokio::test]
    async fn smtp_message_builds_with_attachment() {
        let settings = SmtpSettings {
            host: "smtp.example.com".into(),
            port: 465,
            username: "booth@example.com".into(),
            password: "secret".into(),
            starttls: false,
        };
        let mailer = SmtpMailer::new(&settings, "Art Photobooth", "booth@example.com").unwrap();
        let mail = OutgoingMail::final_image(
            "asha@x.com",
            "Art Photobooth",
            Some("http://booth/a.jpg"),
            Some(Attachment {
                file_name: "photobooth.jpg".into(),
                content_type: "image/jpeg".into(),
                bytes: vec![0xff, 0xd8, 0xff],
            }),
        );
        let formatted = String::from_utf8(mailer.build_message(mail).unwrap().formatted()).unwrap();
        assert!(formatted.contains("photobooth.jpg"));
        assert!(formatted.contains("Art Photobooth"));
    }

    #[tokio::test]
    async fn bad_recipient_is_a_validation_error() {
        let settings = SmtpSettings {
            host: "smtp.example.com".into(),
            port: 465,
            username: String::new(),
            password: String::new(),
            starttls: false,
        };
        let mailer = SmtpMailer::new(&settings, "Booth", "booth@example.com").unwrap();
        let mail = OutgoingMail::final_image("not-an-address", "Booth", None, None);
        assert_eq!(mailer.build_message(mail).unwrap_err().category(), "validation");
    }

    #[tokio::test]
    async fn disabled_mailer_refuses() {
        let mail = OutgoingMail::final_image("a@x.com", "Booth", Some("http://b/a.jpg"), None);
        assert!(!DisabledMailer.is_enabled());
        assert!(DisabledMailer.send(mail).await.is_err());
    }
}
