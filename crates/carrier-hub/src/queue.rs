use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use carrier_db::Database;
use carrier_db::models::{NewQueuedMessage, QueuedMessageRow};
use carrier_types::{Envelope, MessageKind};

use crate::registry::{ClientRegistry, SessionHandle};

/// Rows read per backlog page during a flush.
const FLUSH_PAGE: u32 = 64;

/// Which tier accepted an undeliverable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTier {
    Durable,
    Transient,
}

/// Outcome of handing a recipient's durable backlog to a session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub deleted: usize,
    /// False when the hand-over stopped early; the rest stays persisted.
    pub complete: bool,
}

/// In-memory backlog per recipient. Lost on restart.
#[derive(Default)]
pub struct TransientQueue {
    entries: RwLock<HashMap<String, VecDeque<Envelope>>>,
}

impl TransientQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, envelope: Envelope) {
        self.entries
            .write()
            .await
            .entry(envelope.recipient.clone())
            .or_default()
            .push_back(envelope);
    }

    /// Remove and return everything queued for `recipient`, oldest first.
    pub async fn take(&self, recipient: &str) -> Vec<Envelope> {
        self.entries
            .write()
            .await
            .remove(recipient)
            .map(Vec::from)
            .unwrap_or_default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.values().map(VecDeque::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Durable-first offline queue. A message the live path could not take is
/// persisted before `enqueue` returns; the transient tier only holds messages
/// the store refused.
pub struct OfflineQueue {
    db: Arc<Database>,
    transient: TransientQueue,
}

impl OfflineQueue {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            transient: TransientQueue::new(),
        }
    }

    pub async fn enqueue(&self, envelope: Envelope) -> QueueTier {
        match self.enqueue_durable(&envelope).await {
            Ok(id) => {
                debug!(
                    "Queued message {} for offline client {} (row {})",
                    envelope.message_id, envelope.recipient, id
                );
                QueueTier::Durable
            }
            Err(e) => {
                error!(
                    "Failed to persist message {} for {}: {}; holding it in memory",
                    envelope.message_id, envelope.recipient, e
                );
                self.enqueue_transient(envelope).await;
                QueueTier::Transient
            }
        }
    }

    pub async fn enqueue_durable(&self, envelope: &Envelope) -> anyhow::Result<i64> {
        let db = self.db.clone();
        let envelope = envelope.clone();
        tokio::task::spawn_blocking(move || {
            db.enqueue_message(&NewQueuedMessage {
                recipient: &envelope.recipient,
                sender: &envelope.sender_id,
                payload: &envelope.payload,
                kind: envelope.kind.as_str(),
                message_id: &envelope.message_id,
                timestamp: envelope.timestamp,
            })
        })
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
    }

    pub async fn enqueue_transient(&self, envelope: Envelope) {
        self.transient.push(envelope).await;
    }

    /// Hand the session's durable backlog over in insertion order. After each
    /// page, rows up to the last one handed over are deleted; a failed
    /// hand-over stops the flush and leaves the remainder for next time.
    pub async fn flush_durable(&self, session: &SessionHandle) -> anyhow::Result<FlushReport> {
        let user_id = session.user_id().to_string();
        let mut report = FlushReport::default();
        let mut cursor = 0;

        loop {
            let page = self.load_page(&user_id, cursor).await?;
            let page_len = page.len();
            let mut watermark = None;
            let mut stalled = false;

            for row in page {
                let row_id = row.id;
                cursor = row_id;

                let Some(text) = encode_row(row) else {
                    // Unreadable rows can never be delivered; drop them with the batch.
                    watermark = Some(row_id);
                    continue;
                };

                if session.send_waiting(text).await {
                    watermark = Some(row_id);
                    report.delivered += 1;
                } else {
                    stalled = true;
                    break;
                }
            }

            if let Some(mark) = watermark {
                report.deleted += self.delete_through(&user_id, mark).await?;
            }

            if stalled {
                warn!(
                    "Backlog flush for {} stopped after {} messages; remainder kept",
                    user_id, report.delivered
                );
                return Ok(report);
            }

            if page_len < FLUSH_PAGE as usize {
                report.complete = true;
                if report.delivered > 0 {
                    info!("Delivered {} persisted messages to {}", report.delivered, user_id);
                }
                return Ok(report);
            }
        }
    }

    /// Best-effort replay of the in-memory tier through the live path. Each
    /// attempt is independent and a failed one is dropped.
    pub async fn flush_transient(&self, registry: &ClientRegistry, user_id: &str) -> usize {
        let pending = self.transient.take(user_id).await;
        if pending.is_empty() {
            return 0;
        }

        info!("Delivering {} in-memory queued messages to {}", pending.len(), user_id);
        let mut delivered = 0;
        for envelope in pending {
            let text = match envelope.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode queued message {}: {}", envelope.message_id, e);
                    continue;
                }
            };
            if registry.send(user_id, text).await {
                delivered += 1;
            } else {
                warn!("Failed to deliver in-memory queued message {} to {}", envelope.message_id, user_id);
            }
        }
        delivered
    }

    pub async fn transient_len(&self) -> usize {
        self.transient.len().await
    }

    pub async fn durable_len(&self) -> anyhow::Result<usize> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.queued_message_count())
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
    }

    async fn load_page(&self, recipient: &str, after_id: i64) -> anyhow::Result<Vec<QueuedMessageRow>> {
        let db = self.db.clone();
        let recipient = recipient.to_string();
        tokio::task::spawn_blocking(move || db.queued_messages_after(&recipient, after_id, FLUSH_PAGE))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
    }

    async fn delete_through(&self, recipient: &str, watermark: i64) -> anyhow::Result<usize> {
        let db = self.db.clone();
        let recipient = recipient.to_string();
        tokio::task::spawn_blocking(move || db.delete_queued_through(&recipient, watermark))
            .await
            .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
    }
}

fn encode_row(row: QueuedMessageRow) -> Option<String> {
    let kind = match row.kind.parse::<MessageKind>() {
        Ok(kind) => kind,
        Err(e) => {
            warn!("Queued row {} for {}: {}", row.id, row.recipient, e);
            return None;
        }
    };

    let envelope = Envelope {
        kind,
        message_id: row.message_id,
        sender_id: row.sender,
        recipient: row.recipient,
        payload: row.payload,
        timestamp: row.timestamp,
    };

    match envelope.to_json() {
        Ok(text) => Some(text),
        Err(e) => {
            warn!("Failed to encode queued row {}: {}", row.id, e);
            None
        }
    }
}
