use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use carrier_db::Database;
use carrier_db::models::PaymentStatus;
use carrier_types::envelope::SERVER_SENDER;
use carrier_types::{Envelope, MessageKind, PaymentConfirmation, PaymentRequest};

use crate::error::PaymentError;
use crate::hub::Delivery;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub success: bool,
    pub description: String,
}

/// External push-payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn push(&self, request: &PaymentRequest) -> anyhow::Result<PaymentOutcome>;
}

/// Stand-in for the mobile-money STK push: waits, then always succeeds.
pub struct SimulatedGateway {
    delay: Duration,
}

impl SimulatedGateway {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn push(&self, request: &PaymentRequest) -> anyhow::Result<PaymentOutcome> {
        debug!(
            "Simulated {} push: {} for {} ({})",
            request.kind, request.amount, request.phone_number, request.reference
        );
        tokio::time::sleep(self.delay).await;
        Ok(PaymentOutcome {
            success: true,
            description: "Payment processed successfully (simulated)".to_string(),
        })
    }
}

/// Runs payment requests as tracked tasks. Every request is recorded as
/// pending before its task starts, so a restart can `reconcile` what a
/// shutdown or crash interrupted.
#[derive(Clone)]
pub struct PaymentSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    db: Arc<Database>,
    delivery: Delivery,
    gateway: Arc<dyn PaymentGateway>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl PaymentSupervisor {
    pub fn new(db: Arc<Database>, delivery: Delivery, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                db,
                delivery,
                gateway,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Record and start a push request. A reference seen before, in any
    /// state, is rejected.
    pub async fn submit(&self, request: PaymentRequest, sender: &str) -> Result<(), PaymentError> {
        validate(&request)?;

        let raw = serde_json::to_string(&request).map_err(|e| PaymentError::Invalid(e.to_string()))?;
        let db = self.inner.db.clone();
        let reference = request.reference.clone();
        let owner = sender.to_string();
        let inserted = tokio::task::spawn_blocking(move || db.insert_pending_payment(&reference, &owner, &raw))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

        if !inserted {
            return Err(PaymentError::DuplicateReference(request.reference));
        }

        if self.inner.shutdown.is_cancelled() {
            info!("Payment {} recorded during shutdown, resumes on restart", request.reference);
            return Ok(());
        }

        self.spawn(request, sender.to_string());
        Ok(())
    }

    /// Restart every payment still marked pending. Returns how many resumed.
    pub async fn reconcile(&self) -> Result<usize, PaymentError> {
        let db = self.inner.db.clone();
        let rows = tokio::task::spawn_blocking(move || db.pending_payments())
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))??;

        let mut resumed = 0;
        for row in rows {
            match serde_json::from_str::<PaymentRequest>(&row.request) {
                Ok(request) => {
                    info!("Resuming pending payment {} for {}", row.reference, row.sender);
                    self.spawn(request, row.sender);
                    resumed += 1;
                }
                Err(e) => {
                    warn!("Pending payment {} is unreadable ({}), marking failed", row.reference, e);
                    mark(&self.inner.db, row.reference, PaymentStatus::Failed).await;
                }
            }
        }
        Ok(resumed)
    }

    /// Tell the payer their request was refused before reaching the gateway.
    pub async fn notify_rejected(&self, request: &PaymentRequest, sender: &str, reason: &str) {
        let ack = confirmation(request, sender, false, reason);
        self.inner.delivery.deliver(ack).await;
    }

    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Wait for every running payment to finish.
    pub async fn wait_idle(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Give running payments `grace` to finish, then cancel the rest. Cancelled
    /// payments stay pending in the store.
    pub async fn shutdown(&self, grace: Duration) {
        if tokio::time::timeout(grace, self.wait_idle()).await.is_err() {
            info!("Cancelling {} in-flight payments", self.in_flight());
        }
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    fn spawn(&self, request: PaymentRequest, sender: String) {
        let inner = self.inner.clone();
        self.inner.tracker.spawn(async move {
            run_payment(inner, request, sender).await;
        });
    }
}

async fn run_payment(inner: Arc<SupervisorInner>, request: PaymentRequest, sender: String) {
    info!("Processing payment {} ({}) from {}", request.reference, request.amount, sender);

    let result = tokio::select! {
        _ = inner.shutdown.cancelled() => {
            info!("Payment {} interrupted by shutdown, left pending", request.reference);
            return;
        }
        result = inner.gateway.push(&request) => result,
    };

    let (success, description) = match result {
        Ok(outcome) => (outcome.success, outcome.description),
        Err(e) => {
            warn!("Payment gateway failed for {}: {}", request.reference, e);
            (false, e.to_string())
        }
    };

    let outcome = inner
        .delivery
        .deliver(confirmation(&request, &sender, success, description))
        .await;
    debug!("Payment ack for {} to {}: {:?}", request.reference, sender, outcome);

    let status = if success {
        PaymentStatus::Completed
    } else {
        PaymentStatus::Failed
    };
    mark(&inner.db, request.reference, status).await;
}

async fn mark(db: &Arc<Database>, reference: String, status: PaymentStatus) {
    let db = db.clone();
    match tokio::task::spawn_blocking(move || db.set_payment_status(&reference, status)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Failed to record payment status: {}", e),
        Err(e) => error!("spawn_blocking join error: {}", e),
    }
}

fn confirmation(request: &PaymentRequest, recipient: &str, success: bool, description: impl Into<String>) -> Envelope {
    let now = chrono::Utc::now().timestamp();
    let payload = PaymentConfirmation::new(request, success, description, now);
    let payload = serde_json::to_vec(&payload).unwrap_or_default();
    Envelope::new(MessageKind::PaymentAck, SERVER_SENDER, recipient, payload).stamped(SERVER_SENDER, now)
}

fn validate(request: &PaymentRequest) -> Result<(), PaymentError> {
    if request.reference.trim().is_empty() {
        return Err(PaymentError::Invalid("missing reference".to_string()));
    }
    if request.amount <= 0 {
        return Err(PaymentError::Invalid(format!("amount must be positive, got {}", request.amount)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, HubConfig};

    struct FailingGateway;

    #[async_trait]
    impl PaymentGateway for FailingGateway {
        async fn push(&self, _request: &PaymentRequest) -> anyhow::Result<PaymentOutcome> {
            Err(anyhow!("gateway unreachable"))
        }
    }

    fn request(reference: &str) -> PaymentRequest {
        PaymentRequest {
            kind: "stk_push".to_string(),
            phone_number: "254700000000".to_string(),
            amount: 250,
            reference: reference.to_string(),
            description: "Groceries".to_string(),
            callback_url: String::new(),
        }
    }

    fn hub_with(gateway: Arc<dyn PaymentGateway>) -> (Arc<Database>, Hub) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let hub = Hub::with_gateway(db.clone(), HubConfig::default(), gateway);
        (db, hub)
    }

    #[tokio::test]
    async fn offline_payer_gets_ack_queued() {
        let (db, hub) = hub_with(Arc::new(SimulatedGateway::new(Duration::from_millis(10))));

        hub.payments().submit(request("R1"), "alice").await.unwrap();
        hub.payments().wait_idle().await;

        assert_eq!(db.payment_status("R1").unwrap().as_deref(), Some("completed"));
        let rows = db.queued_messages_after("alice", 0, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "payment_ack");
        assert_eq!(rows[0].sender, SERVER_SENDER);
        let ack: PaymentConfirmation = serde_json::from_slice(&rows[0].payload).unwrap();
        assert!(ack.success);
        assert_eq!(ack.reference, "R1");
        assert_eq!(ack.amount, 250);
    }

    #[tokio::test]
    async fn duplicate_reference_is_rejected() {
        let (_db, hub) = hub_with(Arc::new(SimulatedGateway::new(Duration::from_millis(10))));

        hub.payments().submit(request("R1"), "alice").await.unwrap();
        let err = hub.payments().submit(request("R1"), "alice").await.unwrap_err();
        assert!(matches!(err, PaymentError::DuplicateReference(r) if r == "R1"));
        hub.payments().wait_idle().await;
    }

    #[tokio::test]
    async fn invalid_requests_never_reach_the_store() {
        let (db, hub) = hub_with(Arc::new(SimulatedGateway::new(Duration::ZERO)));

        let mut zero = request("R2");
        zero.amount = 0;
        assert!(matches!(hub.payments().submit(zero, "alice").await, Err(PaymentError::Invalid(_))));
        assert!(matches!(hub.payments().submit(request(" "), "alice").await, Err(PaymentError::Invalid(_))));
        assert_eq!(db.pending_payment_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn gateway_failure_sends_negative_ack() {
        let (db, hub) = hub_with(Arc::new(FailingGateway));

        hub.payments().submit(request("R3"), "alice").await.unwrap();
        hub.payments().wait_idle().await;

        assert_eq!(db.payment_status("R3").unwrap().as_deref(), Some("failed"));
        let rows = db.queued_messages_after("alice", 0, 10).unwrap();
        let ack: PaymentConfirmation = serde_json::from_slice(&rows[0].payload).unwrap();
        assert!(!ack.success);
        assert!(ack.description.contains("unreachable"));
    }

    #[tokio::test]
    async fn shutdown_leaves_payment_pending_and_reconcile_resumes_it() {
        let db = Arc::new(Database::open_in_memory().unwrap());

        let slow = Hub::with_gateway(
            db.clone(),
            HubConfig::default(),
            Arc::new(SimulatedGateway::new(Duration::from_secs(3600))),
        );
        slow.payments().submit(request("R4"), "alice").await.unwrap();
        assert_eq!(slow.payments().in_flight(), 1);
        slow.payments().shutdown(Duration::from_millis(10)).await;

        assert_eq!(slow.payments().in_flight(), 0);
        assert_eq!(db.payment_status("R4").unwrap().as_deref(), Some("pending"));

        let restarted = Hub::with_gateway(
            db.clone(),
            HubConfig::default(),
            Arc::new(SimulatedGateway::new(Duration::from_millis(5))),
        );
        assert_eq!(restarted.payments().reconcile().await.unwrap(), 1);
        restarted.payments().wait_idle().await;

        assert_eq!(db.payment_status("R4").unwrap().as_deref(), Some("completed"));
        assert_eq!(db.queued_count_for("alice").unwrap(), 1);
    }
}
