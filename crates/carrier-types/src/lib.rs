pub mod api;
pub mod envelope;
pub mod payment;

pub use envelope::{Envelope, MessageKind};
pub use payment::{PaymentConfirmation, PaymentRequest};
