use serde::{Deserialize, Serialize};

fn default_push_type() -> String {
    "stk_push".to_string()
}

/// Push-payment request carried in the payload of a `payment` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    #[serde(rename = "type", default = "default_push_type")]
    pub kind: String,
    #[serde(default)]
    pub phone_number: String,
    pub amount: i64,
    pub reference: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub callback_url: String,
}

/// Payload of the `payment_ack` message sent back to the payer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    #[serde(rename = "type")]
    pub kind: String,
    pub success: bool,
    pub reference: String,
    pub amount: i64,
    pub timestamp: i64,
    pub description: String,
}

impl PaymentConfirmation {
    pub fn new(request: &PaymentRequest, success: bool, description: impl Into<String>, timestamp: i64) -> Self {
        Self {
            kind: "payment_confirmation".to_string(),
            success,
            reference: request.reference.clone(),
            amount: request.amount,
            timestamp,
            description: description.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_push_type() {
        let req: PaymentRequest =
            serde_json::from_str(r#"{"amount":100,"reference":"R1","phone_number":"254700000000"}"#).unwrap();
        assert_eq!(req.kind, "stk_push");
        assert_eq!(req.amount, 100);
        assert!(req.callback_url.is_empty());
    }

    #[test]
    fn confirmation_carries_reference() {
        let req: PaymentRequest = serde_json::from_str(r#"{"amount":7,"reference":"R9"}"#).unwrap();
        let ack = PaymentConfirmation::new(&req, true, "ok", 10);
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["type"], "payment_confirmation");
        assert_eq!(json["reference"], "R9");
        assert_eq!(json["amount"], 7);
        assert_eq!(json["success"], true);
    }
}
