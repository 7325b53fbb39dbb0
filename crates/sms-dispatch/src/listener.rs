//! Acknowledgement listener
//!
//! Drains the gateway's event channel and applies each acknowledgement to
//! the record its token was issued for.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sms_common::{now_timestamp, GatewayEvent, GatewayEventKind, SentResult};

use crate::correlation::CorrelationTable;
use crate::gateway::GatewayEvents;
use crate::store::RecordStore;

pub struct AckListener {
    store: RecordStore,
    correlation: Arc<CorrelationTable>,
}

impl AckListener {
    pub fn new(store: RecordStore, correlation: Arc<CorrelationTable>) -> Self {
        Self { store, correlation }
    }

    /// Apply one acknowledgement. Returns true if a record changed.
    pub fn apply(&self, event: GatewayEvent) -> bool {
        let Some(index) = self.correlation.resolve(event.token) else {
            debug!(token = %event.token, "Dropping acknowledgement for unknown token");
            return false;
        };

        let result = match event.kind {
            GatewayEventKind::Sent(sent) => {
                if sent != SentResult::Ok {
                    warn!(index, token = %event.token, result = ?sent, "Carrier reported send failure");
                }
                self.store.apply_sent(index, sent, now_timestamp())
            }
            GatewayEventKind::Delivered(delivered) => self.store.apply_delivered(index, delivered),
        };

        match result {
            Ok(applied) => {
                debug!(index, token = %event.token, kind = ?event.kind, applied, "Acknowledgement processed");
                applied
            }
            Err(e) => {
                warn!(index, token = %event.token, error = %e, "Acknowledgement could not be applied");
                false
            }
        }
    }

    /// Run until every gateway-side sender is gone
    pub fn spawn(self, mut events: GatewayEvents) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.apply(event);
            }
            debug!("Acknowledgement channel closed");
        })
    }
}
