use serde::{Deserialize, Serialize};

// -- Registration --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub id: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub display_name: String,
    /// Standard base64.
    pub identity_pub: String,
    /// Standard base64.
    pub signed_prekey: String,
    #[serde(default)]
    pub one_time_prekeys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub status: String,
    pub id: String,
    pub token: String,
}

// -- Prekey bootstrap --

/// Key bundle handed to a peer that wants to start a session with `user`.
/// `one_time_prekey` is null once the user's pool is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysResponse {
    pub identity_pub: String,
    pub signed_prekey: String,
    pub one_time_prekey: Option<String>,
}

// -- Status --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: i64,
    pub clients: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub online_clients: usize,
    /// Transient plus durable backlog.
    pub queued_messages: usize,
    pub transient_messages: usize,
    pub durable_messages: usize,
    pub pending_payments: usize,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}
