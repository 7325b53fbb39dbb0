//! Transmission Adapter contract
//!
//! A gateway accepts a recipient plus message and acknowledges it later,
//! twice at most: once when the carrier accepted (or refused) the message
//! and once when the handset confirmed delivery. Both acknowledgements flow
//! through one multiplexed [`EventSink`] keyed by [`CorrelationToken`].
//! They can arrive in any order relative to later sends, or never.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use sms_common::{CorrelationToken, DeliveredResult, GatewayEvent, SentResult};

use crate::segment::segment_message;
use crate::SendError;

#[async_trait]
pub trait TransmissionAdapter: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Split a body into the segments this transport would transmit
    fn segment(&self, body: &str) -> Vec<String> {
        segment_message(body, 160)
    }

    /// Initiate a single-part transmission. Returns as soon as the message
    /// has been handed off; an `Err` means nothing was sent.
    async fn send_text(
        &self,
        recipient: &str,
        body: &str,
        token: CorrelationToken,
    ) -> Result<(), SendError>;

    /// Initiate a multipart transmission. Every segment shares `token`, so
    /// the acknowledgements map back to one record.
    async fn send_multipart(
        &self,
        recipient: &str,
        segments: &[String],
        token: CorrelationToken,
    ) -> Result<(), SendError>;
}

/// Sending half of the acknowledgement channel, held by gateways
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl EventSink {
    /// Returns false if nobody is listening any more
    pub fn emit(&self, event: GatewayEvent) -> bool {
        if self.tx.send(event).is_err() {
            warn!(token = %event.token, "Acknowledgement dropped: listener has stopped");
            return false;
        }
        true
    }

    pub fn sent(&self, token: CorrelationToken, result: SentResult) -> bool {
        self.emit(GatewayEvent::sent(token, result))
    }

    pub fn delivered(&self, token: CorrelationToken, result: DeliveredResult) -> bool {
        self.emit(GatewayEvent::delivered(token, result))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of the acknowledgement channel, consumed by the dispatcher
#[derive(Debug)]
pub struct GatewayEvents {
    rx: mpsc::UnboundedReceiver<GatewayEvent>,
}

impl GatewayEvents {
    pub async fn recv(&mut self) -> Option<GatewayEvent> {
        self.rx.recv().await
    }
}

pub fn gateway_channel() -> (EventSink, GatewayEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, GatewayEvents { rx })
}

/// Reject recipients no carrier could route.
///
/// Accepts an optional leading `+` followed by digits, spaces, dashes and
/// parentheses, with at least three digits.
pub fn validate_recipient(recipient: &str) -> Result<(), SendError> {
    let trimmed = recipient.trim();
    let rest = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let allowed = rest
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'));
    let digits = rest.chars().filter(|c| c.is_ascii_digit()).count();

    if rest.is_empty() || !allowed || digits < 3 {
        return Err(SendError::InvalidRecipient(recipient.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_recipient() {
        assert!(validate_recipient("+5511999999999").is_ok());
        assert!(validate_recipient("(11) 9999-9999").is_ok());
        assert!(validate_recipient("911").is_ok());

        assert_eq!(
            validate_recipient("juan@example.com"),
            Err(SendError::InvalidRecipient("juan@example.com".to_string()))
        );
        assert!(validate_recipient("").is_err());
        assert!(validate_recipient("+").is_err());
        assert!(validate_recipient("12").is_err());
    }

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (sink, mut events) = gateway_channel();
        let token = CorrelationToken(1);

        assert!(sink.sent(token, SentResult::Ok));
        assert!(sink.delivered(token, DeliveredResult::Delivered));

        assert_eq!(events.recv().await, Some(GatewayEvent::sent(token, SentResult::Ok)));
        assert_eq!(
            events.recv().await,
            Some(GatewayEvent::delivered(token, DeliveredResult::Delivered))
        );
    }

    #[tokio::test]
    async fn test_emit_after_listener_dropped() {
        let (sink, events) = gateway_channel();
        drop(events);
        assert!(sink.is_closed());
        assert!(!sink.sent(CorrelationToken(1), SentResult::Ok));
    }
}
