use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::entities::{DeliveryStatus, StockKey};
use crate::errors::ServiceError;
use crate::provenance::Reference;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Sends an event for an operation that has already committed; failures are only logged.
    pub async fn publish(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Domain event dropped after commit");
        }
    }
}

/// Things that happened to the ledger or to an order, emitted after the owning transaction commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    // Ledger events
    StockEntryAppended {
        entry_id: i32,
        key: StockKey,
        previous_quantity: i32,
        quantity: i32,
        reference: Reference,
    },
    StockEntriesVoided {
        reference: Reference,
        count: usize,
    },
    StockSynced {
        reference: Reference,
        voided: usize,
        appended: usize,
    },

    // Return / wastage events
    ReturnCreated(i32),
    ReturnUpdated(i32),
    ReturnDeleted(i32),
    WastageCreated(i32),
    WastageUpdated(i32),
    WastageDeleted(i32),

    // Order events
    OrderCreated(i32),
    OrderApproved {
        order_id: i32,
        approved_by: i32,
    },
    OrderRejected {
        order_id: i32,
        reason: String,
    },
    OrderDeliveryAdvanced {
        order_id: i32,
        from: DeliveryStatus,
        to: DeliveryStatus,
    },
    OrderCompleted {
        order_id: i32,
        completed_by: i32,
    },
    MixedOrderCompleted {
        group: String,
        order_ids: Vec<i32>,
    },
}

/// Drains the event channel, logging each event until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::StockEntryAppended {
                entry_id,
                key,
                previous_quantity,
                quantity,
                reference,
            } => {
                info!(
                    entry_id,
                    product_id = key.product_id,
                    site_id = ?key.site_id,
                    previous_quantity,
                    quantity,
                    %reference,
                    "Stock entry appended"
                );
            }
            Event::StockEntriesVoided { reference, count } => {
                info!(%reference, count, "Stock entries voided");
            }
            Event::StockSynced {
                reference,
                voided,
                appended,
            } => {
                info!(%reference, voided, appended, "Stock synced");
            }
            Event::OrderRejected { order_id, reason } => {
                warn!(order_id, reason = %reason, "Order rejected");
            }
            Event::OrderDeliveryAdvanced { order_id, from, to } => {
                info!(order_id, %from, %to, "Order delivery advanced");
            }
            Event::MixedOrderCompleted { group, order_ids } => {
                info!(group = %group, ?order_ids, "Mixed order completed");
            }
            other => {
                info!("Received event: {:?}", other);
            }
        }
    }

    warn!("Event processing loop has ended");
}
