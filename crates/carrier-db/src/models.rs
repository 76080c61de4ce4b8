//! Database row types, mapped directly from SQLite rows.
//! Distinct from carrier-types wire models to keep the DB layer independent.

/// Result of a prekey fetch: the long-lived keys plus at most one consumed
/// one-time prekey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundleRow {
    pub identity_pub: Vec<u8>,
    pub signed_prekey: Vec<u8>,
    pub one_time_prekey: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessageRow {
    pub id: i64,
    pub recipient: String,
    pub sender: String,
    pub payload: Vec<u8>,
    pub kind: String,
    pub message_id: String,
    pub timestamp: i64,
}

/// Insert shape for `queued_messages`; the id is assigned by SQLite.
#[derive(Debug, Clone, Copy)]
pub struct NewQueuedMessage<'a> {
    pub recipient: &'a str,
    pub sender: &'a str,
    pub payload: &'a [u8],
    pub kind: &'a str,
    pub message_id: &'a str,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPaymentRow {
    pub reference: String,
    pub sender: String,
    /// JSON-encoded push request.
    pub request: String,
    pub status: String,
    pub created_at: String,
}

/// Insert/upsert shape for `users`. Only the digest of the bearer token is
/// stored.
#[derive(Debug, Clone, Copy)]
pub struct NewUser<'a> {
    pub id: &'a str,
    pub phone: &'a str,
    pub display_name: &'a str,
    pub identity_pub: &'a [u8],
    pub signed_prekey: &'a [u8],
    pub token_digest: &'a str,
}
