use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use carrier_db::Database;
use carrier_types::Envelope;

use crate::payment::{PaymentGateway, PaymentSupervisor, SimulatedGateway};
use crate::queue::{FlushReport, OfflineQueue};
use crate::registry::{ClientRegistry, SessionHandle};
use crate::router::{RouteOutcome, Router};

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each session's outbound buffer.
    pub outbound_capacity: usize,
    /// Delay of the simulated push-payment gateway.
    pub payment_delay: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            payment_delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub online_clients: usize,
    pub transient_messages: usize,
    pub durable_messages: usize,
    pub pending_payments: usize,
}

/// What a new session received while going live.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Activation {
    pub backlog: usize,
    pub transient: usize,
    pub displaced_previous: bool,
}

/// The single immediate-or-persist decision shared by the router and the
/// payment flow.
#[derive(Clone)]
pub struct Delivery {
    registry: Arc<ClientRegistry>,
    queue: Arc<OfflineQueue>,
}

impl Delivery {
    pub fn new(registry: Arc<ClientRegistry>, queue: Arc<OfflineQueue>) -> Self {
        Self { registry, queue }
    }

    pub async fn deliver(&self, envelope: Envelope) -> RouteOutcome {
        let text = match envelope.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode message {}: {}", envelope.message_id, e);
                return RouteOutcome::Dropped;
            }
        };

        if self.registry.send(&envelope.recipient, text).await {
            debug!(
                "Message {} delivered from {} to {}",
                envelope.message_id, envelope.sender_id, envelope.recipient
            );
            return RouteOutcome::Delivered;
        }

        let sender = envelope.sender_id.clone();
        let recipient = envelope.recipient.clone();
        let tier = self.queue.enqueue(envelope).await;
        info!("Message from {} to {} queued ({:?})", sender, recipient, tier);
        RouteOutcome::Queued(tier)
    }
}

/// Owning service object for all relay state. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    db: Arc<Database>,
    registry: Arc<ClientRegistry>,
    queue: Arc<OfflineQueue>,
    delivery: Delivery,
    router: Router,
    payments: PaymentSupervisor,
}

impl Hub {
    pub fn new(db: Arc<Database>, config: HubConfig) -> Self {
        let gateway = Arc::new(SimulatedGateway::new(config.payment_delay));
        Self::with_gateway(db, config, gateway)
    }

    pub fn with_gateway(db: Arc<Database>, config: HubConfig, gateway: Arc<dyn PaymentGateway>) -> Self {
        let registry = Arc::new(ClientRegistry::new(config.outbound_capacity));
        let queue = Arc::new(OfflineQueue::new(db.clone()));
        let delivery = Delivery::new(registry.clone(), queue.clone());
        let payments = PaymentSupervisor::new(db.clone(), delivery.clone(), gateway);
        let router = Router::new(delivery.clone(), payments.clone());

        Self {
            inner: Arc::new(HubInner {
                db,
                registry,
                queue,
                delivery,
                router,
                payments,
            }),
        }
    }

    /// Create an unpublished session for `user_id`. Start draining the
    /// returned receiver, then call [`Hub::activate`].
    pub fn open_session(&self, user_id: &str) -> (Arc<SessionHandle>, mpsc::Receiver<String>) {
        self.inner.registry.open_session(user_id)
    }

    /// Bring a session live: hand over its durable backlog, register it
    /// (closing any older session for the same id), replay the in-memory
    /// tier, then pick up rows persisted while the first pass ran.
    pub async fn activate(&self, session: &Arc<SessionHandle>) -> Activation {
        let user_id = session.user_id();
        let mut activation = Activation::default();

        activation.backlog += self.flush_backlog(session).await.delivered;
        activation.displaced_previous = self.inner.registry.register(session.clone()).await.is_some();
        activation.transient = self.inner.queue.flush_transient(&self.inner.registry, user_id).await;
        activation.backlog += self.flush_backlog(session).await.delivered;

        activation
    }

    pub async fn disconnect(&self, session: &SessionHandle) -> bool {
        self.inner
            .registry
            .unregister(session.user_id(), session.conn_id())
            .await
    }

    /// Route one raw inbound frame from an authenticated sender.
    pub async fn process_message(&self, sender: &str, raw: &str) -> RouteOutcome {
        self.inner.router.process_message(sender, raw).await
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.inner.registry
    }

    pub fn payments(&self) -> &PaymentSupervisor {
        &self.inner.payments
    }

    pub async fn online_count(&self) -> usize {
        self.inner.registry.online_count().await
    }

    pub async fn stats(&self) -> anyhow::Result<HubStats> {
        let db = self.inner.db.clone();
        let pending_payments = tokio::task::spawn_blocking(move || db.pending_payment_count())
            .await
            .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))??;

        Ok(HubStats {
            online_clients: self.inner.registry.online_count().await,
            transient_messages: self.inner.queue.transient_len().await,
            durable_messages: self.inner.queue.durable_len().await?,
            pending_payments,
        })
    }

    async fn flush_backlog(&self, session: &SessionHandle) -> FlushReport {
        match self.inner.queue.flush_durable(session).await {
            Ok(report) => report,
            Err(e) => {
                error!("Backlog flush for {} failed: {}", session.user_id(), e);
                FlushReport::default()
            }
        }
    }
}
