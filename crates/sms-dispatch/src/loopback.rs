//! Loopback Gateway
//!
//! In-process carrier simulator. Accepts every routable recipient and
//! acknowledges it after configurable delays, unless a per-recipient script
//! says otherwise. Used for dry runs and tests.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use sms_common::{CorrelationToken, DeliveredResult, SentResult};
use sms_config::GatewayConfig;

use crate::gateway::{validate_recipient, EventSink, TransmissionAdapter};
use crate::segment::segment_message;
use crate::SendError;

#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    pub sent_delay: Duration,
    pub delivered_delay: Duration,
    pub report_delivery: bool,
    pub segment_limit: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self::from(&GatewayConfig::default())
    }
}

impl From<&GatewayConfig> for LoopbackConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            sent_delay: Duration::from_millis(config.loopback.sent_delay_ms),
            delivered_delay: Duration::from_millis(config.loopback.delivered_delay_ms),
            report_delivery: config.loopback.report_delivery,
            segment_limit: config.segment_limit,
        }
    }
}

/// Scripted behaviour for one recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackOutcome {
    /// Refuse synchronously with this message
    pub reject: Option<String>,
    /// `None` means the sent acknowledgement never arrives
    pub sent: Option<SentResult>,
    /// `None` means no delivery report
    pub delivered: Option<DeliveredResult>,
    /// Overrides the configured sent delay
    pub sent_delay: Option<Duration>,
}

impl LoopbackOutcome {
    pub fn accept() -> Self {
        Self {
            reject: None,
            sent: Some(SentResult::Ok),
            delivered: Some(DeliveredResult::Delivered),
            sent_delay: None,
        }
    }

    pub fn sent(result: SentResult) -> Self {
        Self { sent: Some(result), ..Self::accept() }
    }

    pub fn not_delivered() -> Self {
        Self { delivered: Some(DeliveredResult::NotDelivered), ..Self::accept() }
    }

    pub fn silent() -> Self {
        Self { sent: None, delivered: None, ..Self::accept() }
    }

    pub fn reject(message: impl Into<String>) -> Self {
        Self { reject: Some(message.into()), ..Self::accept() }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.sent_delay = Some(delay);
        self
    }
}

/// A message handed to the loopback gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transmission {
    pub recipient: String,
    pub segments: Vec<String>,
    pub token: CorrelationToken,
}

pub struct LoopbackGateway {
    config: LoopbackConfig,
    sink: EventSink,
    scripts: DashMap<String, LoopbackOutcome>,
    transmissions: Mutex<Vec<Transmission>>,
}

impl LoopbackGateway {
    pub fn new(config: LoopbackConfig, sink: EventSink) -> Self {
        Self {
            config,
            sink,
            scripts: DashMap::new(),
            transmissions: Mutex::new(Vec::new()),
        }
    }

    /// Script the outcome for every message sent to `recipient`
    pub fn script(&self, recipient: impl Into<String>, outcome: LoopbackOutcome) {
        self.scripts.insert(recipient.into(), outcome);
    }

    /// Everything transmitted so far, in send order
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.transmissions.lock().clone()
    }

    fn transmit(
        &self,
        recipient: &str,
        segments: Vec<String>,
        token: CorrelationToken,
    ) -> Result<(), SendError> {
        validate_recipient(recipient)?;
        if segments.iter().all(|s| s.is_empty()) {
            return Err(SendError::EmptyBody);
        }

        let outcome = self
            .scripts
            .get(recipient)
            .map(|entry| entry.clone())
            .unwrap_or_else(LoopbackOutcome::accept);

        if let Some(message) = outcome.reject {
            return Err(SendError::Rejected(message));
        }

        debug!(recipient, %token, segments = segments.len(), "Loopback transmission");
        self.transmissions.lock().push(Transmission {
            recipient: recipient.to_string(),
            segments,
            token,
        });

        let sink = self.sink.clone();
        let sent_delay = outcome.sent_delay.unwrap_or(self.config.sent_delay);
        let delivered_delay = self.config.delivered_delay;
        let delivered = if self.config.report_delivery { outcome.delivered } else { None };

        tokio::spawn(async move {
            let Some(sent) = outcome.sent else {
                return;
            };
            tokio::time::sleep(sent_delay).await;
            sink.sent(token, sent);

            if sent != SentResult::Ok {
                return;
            }
            if let Some(delivered) = delivered {
                tokio::time::sleep(delivered_delay).await;
                sink.delivered(token, delivered);
            }
        });

        Ok(())
    }
}

#[async_trait]
impl TransmissionAdapter for LoopbackGateway {
    fn name(&self) -> &str {
        "loopback"
    }

    fn segment(&self, body: &str) -> Vec<String> {
        segment_message(body, self.config.segment_limit)
    }

    async fn send_text(
        &self,
        recipient: &str,
        body: &str,
        token: CorrelationToken,
    ) -> Result<(), SendError> {
        self.transmit(recipient, vec![body.to_string()], token)
    }

    async fn send_multipart(
        &self,
        recipient: &str,
        segments: &[String],
        token: CorrelationToken,
    ) -> Result<(), SendError> {
        self.transmit(recipient, segments.to_vec(), token)
    }
}
