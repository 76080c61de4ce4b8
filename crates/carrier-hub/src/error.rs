use thiserror::Error;

use carrier_types::MessageKind;

/// Why an inbound frame was dropped.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("envelope has no recipient")]
    MissingRecipient,

    #[error("clients may not send {0} messages")]
    ServerOnly(MessageKind),

    #[error("malformed payment request: {0}")]
    MalformedPayment(serde_json::Error),
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment reference '{0}' was already submitted")]
    DuplicateReference(String),

    #[error("invalid payment request: {0}")]
    Invalid(String),

    #[error("payment store error: {0}")]
    Storage(#[from] anyhow::Error),
}
