//! # Notification Module
//!
//! Delivers finished photos to visitors: by email (gated against rapid duplicate
//! sends) and as a scannable code pointing at the image URL.

pub mod gate;
pub mod mail;
pub mod qr;

use std::{sync::Arc, time::Duration};

use tracing::{info, instrument};

pub use gate::{GateDecision, SendGate};
pub use mail::{Attachment, DisabledMailer, Mailer, OutgoingMail, SmtpMailer};
pub use qr::qr_data_uri;

use crate::{error::BoothResult, utils::with_deadline};

/// What happened to a send request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message was handed to the relay.
    Sent,
    /// A send to this recipient succeeded recently; nothing was transmitted.
    Suppressed { since: Duration },
}

impl Delivery {
    pub fn transmitted(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

/// Email and scannable-code delivery behind the duplicate-send gate.
pub struct NotificationGateway {
    mailer: Arc<dyn Mailer>,
    gate: Arc<SendGate>,
    brand: String,
    timeout: Duration,
}

impl NotificationGateway {
    pub fn new(mailer: Arc<dyn Mailer>, gate: Arc<SendGate>, brand: impl Into<String>, timeout: Duration) -> Self {
        Self {
            mailer,
            gate,
            brand: brand.into(),
            timeout,
        }
    }

    pub fn email_enabled(&self) -> bool {
        self.mailer.is_enabled()
    }

    pub fn gate(&self) -> &SendGate {
        &self.gate
    }

    /// Email a finished image, unless the same recipient got one within the cooldown.
    ///
    /// The gate timestamp moves only after the relay accepts the message, so a
    /// failed send leaves the next attempt free to transmit.
    #[instrument(skip(self, attachment), fields(attached = attachment.is_some()))]
    pub async fn send_final_image(
        &self,
        recipient: &str,
        image_url: Option<&str>,
        attachment: Option<Attachment>,
    ) -> BoothResult<Delivery> {
        if let GateDecision::Suppress { since } = self.gate.check(recipient) {
            info!(since_ms = since.as_millis() as u64, "Duplicate send suppressed");
            return Ok(Delivery::Suppressed { since });
        }

        let mail = OutgoingMail::final_image(recipient, &self.brand, image_url, attachment);
        with_deadline("mail transmission", self.timeout, self.mailer.send(mail)).await?;
        self.gate.record(recipient);

        info!("Final image emailed");
        Ok(Delivery::Sent)
    }

    /// PNG data URI encoding `url`.
    pub fn qr_code(&self, url: &str) -> BoothResult<String> {
        qr_data_uri(url)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::BoothError;

    #[derive(Default)]
    struct CountingMailer {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Mailer for CountingMailer {
        async fn send(&self, _mail: OutgoingMail) -> BoothResult<()> {
            if self.fail {
                return Err(BoothError::upstream("smtp", "relay refused"));
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StalledMailer;

    #[async_trait]
    impl Mailer for StalledMailer {
        async fn send(&self, _mail: OutgoingMail) -> BoothResult<()> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    fn gateway(mailer: Arc<dyn Mailer>, timeout: Duration) -> NotificationGateway {
        NotificationGateway::new(
            mailer,
            Arc::new(SendGate::new(Duration::from_secs(15))),
            "Art Photobooth",
            timeout,
        )
    }

    #[tokio::test]
    async fn second_send_inside_cooldown_is_acknowledged_without_transmitting() {
        let mailer = Arc::new(CountingMailer::default());
        let gw = gateway(mailer.clone(), Duration::from_secs(5));

        let first = gw.send_final_image("asha@x.com", Some("http://b/a.jpg"), None).await.unwrap();
        let second = gw.send_final_image("asha@x.com", Some("http://b/a.jpg"), None).await.unwrap();

        assert_eq!(first, Delivery::Sent);
        assert!(matches!(second, Delivery::Suppressed { .. }));
        assert_eq!(mailer.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_send_does_not_arm_the_gate() {
        let mailer = Arc::new(CountingMailer { fail: true, ..Default::default() });
        let gw = gateway(mailer, Duration::from_secs(5));

        assert!(gw.send_final_image("asha@x.com", Some("http://b/a.jpg"), None).await.is_err());
        assert!(gw.gate().is_empty());
    }

    #[tokio::test]
    async fn stalled_relay_times_out() {
        let gw = gateway(Arc::new(StalledMailer), Duration::from_millis(20));
        let err = gw.send_final_image("asha@x.com", Some("http://b/a.jpg"), None).await.unwrap_err();
        assert_eq!(err.category(), "timeout");
        assert!(gw.gate().is_empty());
    }
}
