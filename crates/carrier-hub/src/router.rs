use tracing::{debug, warn};

use carrier_types::{Envelope, MessageKind, PaymentRequest};

use crate::error::FrameError;
use crate::hub::Delivery;
use crate::payment::PaymentSupervisor;
use crate::queue::QueueTier;

/// What the relay did with one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the recipient's live buffer.
    Delivered,
    /// Recipient offline or its buffer full; stored in the given tier.
    Queued(QueueTier),
    /// Payment recorded and running under the supervisor.
    PaymentAccepted,
    /// Payment refused up front; the payer was sent a negative ack.
    PaymentRejected,
    /// Malformed or forbidden frame, logged and discarded.
    Dropped,
}

#[derive(Clone)]
pub struct Router {
    delivery: Delivery,
    payments: PaymentSupervisor,
}

impl Router {
    pub fn new(delivery: Delivery, payments: PaymentSupervisor) -> Self {
        Self { delivery, payments }
    }

    pub async fn process_message(&self, sender: &str, raw: &str) -> RouteOutcome {
        let envelope = match parse_frame(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("{} bad frame: {} -- raw: {}", sender, e, preview(raw));
                return RouteOutcome::Dropped;
            }
        };

        if !envelope.sender_id.is_empty() && envelope.sender_id != sender {
            debug!("{} claimed sender '{}', overwriting", sender, envelope.sender_id);
        }
        let envelope = envelope.stamped(sender, chrono::Utc::now().timestamp());

        match envelope.kind {
            MessageKind::Payment => self.dispatch_payment(envelope).await,
            _ => self.delivery.deliver(envelope).await,
        }
    }

    async fn dispatch_payment(&self, envelope: Envelope) -> RouteOutcome {
        let request: PaymentRequest = match serde_json::from_slice(&envelope.payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("{} {}", envelope.sender_id, FrameError::MalformedPayment(e));
                return RouteOutcome::Dropped;
            }
        };

        match self.payments.submit(request.clone(), &envelope.sender_id).await {
            Ok(()) => RouteOutcome::PaymentAccepted,
            Err(e) => {
                warn!("Payment from {} rejected: {}", envelope.sender_id, e);
                self.payments
                    .notify_rejected(&request, &envelope.sender_id, &e.to_string())
                    .await;
                RouteOutcome::PaymentRejected
            }
        }
    }
}

fn parse_frame(raw: &str) -> Result<Envelope, FrameError> {
    let envelope = Envelope::from_json(raw)?;

    match envelope.kind {
        MessageKind::PaymentAck => Err(FrameError::ServerOnly(envelope.kind)),
        // Payments are addressed to the relay itself.
        MessageKind::Payment => Ok(envelope),
        _ if envelope.recipient.trim().is_empty() => Err(FrameError::MissingRecipient),
        _ => Ok(envelope),
    }
}

fn preview(raw: &str) -> String {
    raw.chars().take(200).collect()
}
