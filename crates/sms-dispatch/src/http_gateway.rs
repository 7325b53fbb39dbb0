//! HTTP Gateway - provider API transmission
//!
//! POSTs each message to a provider endpoint as
//! `{"to": "...", "parts": ["..."], "reference": 17}` and converts the
//! response into acknowledgements:
//! - 2xx -> sent ok; a `"delivered": bool` field in the body also yields a
//!   delivery report
//! - 503 or connect/timeout failure -> no-service
//! - 400 / 422 -> null-payload
//! - anything else -> generic-failure
//!
//! The request itself runs in a spawned task so `send_*` returns as soon as
//! the message has been validated and handed off.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use sms_common::{CorrelationToken, DeliveredResult, SentResult};
use sms_config::GatewayConfig;

use crate::gateway::{validate_recipient, EventSink, TransmissionAdapter};
use crate::segment::segment_message;
use crate::{DispatchError, SendError};

#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    pub url: String,
    pub auth_token: Option<String>,
    pub timeout: Duration,
    pub segment_limit: usize,
}

impl From<&GatewayConfig> for HttpGatewayConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            url: config.http.url.clone(),
            auth_token: config.http.auth_token.clone(),
            timeout: Duration::from_millis(config.http.timeout_ms),
            segment_limit: config.segment_limit,
        }
    }
}

#[derive(Debug, Serialize)]
struct SendPayload {
    to: String,
    parts: Vec<String>,
    reference: u64,
}

#[derive(Debug, Deserialize, Default)]
struct ProviderResponse {
    #[serde(default)]
    delivered: Option<bool>,
}

pub struct HttpGateway {
    config: Arc<HttpGatewayConfig>,
    client: Client,
    sink: EventSink,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig, sink: EventSink) -> Result<Self, DispatchError> {
        if config.url.trim().is_empty() {
            return Err(DispatchError::Config("HTTP gateway URL is empty".to_string()));
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config: Arc::new(config),
            client,
            sink,
        })
    }

    fn transmit(
        &self,
        recipient: &str,
        parts: Vec<String>,
        token: CorrelationToken,
    ) -> Result<(), SendError> {
        validate_recipient(recipient)?;
        if parts.iter().all(|p| p.is_empty()) {
            return Err(SendError::EmptyBody);
        }

        let payload = SendPayload {
            to: recipient.to_string(),
            parts,
            reference: token.0,
        };
        let client = self.client.clone();
        let config = Arc::clone(&self.config);
        let sink = self.sink.clone();

        tokio::spawn(async move {
            let mut request = client.post(&config.url).json(&payload);
            if let Some(auth_token) = &config.auth_token {
                request = request.bearer_auth(auth_token);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let sent = classify_status(status);
                    debug!(%token, status = status.as_u16(), ?sent, "Provider responded");

                    if sent != SentResult::Ok {
                        sink.sent(token, sent);
                        return;
                    }

                    // An empty or non-JSON body is a plain acceptance
                    let body = response.json::<ProviderResponse>().await.unwrap_or_default();
                    sink.sent(token, SentResult::Ok);
                    match body.delivered {
                        Some(true) => {
                            sink.delivered(token, DeliveredResult::Delivered);
                        }
                        Some(false) => {
                            sink.delivered(token, DeliveredResult::NotDelivered);
                        }
                        None => {}
                    }
                }
                Err(e) => {
                    warn!(%token, error = %e, "Provider request failed");
                    sink.sent(token, classify_transport_error(&e));
                }
            }
        });

        Ok(())
    }
}

fn classify_status(status: StatusCode) -> SentResult {
    if status.is_success() {
        SentResult::Ok
    } else if status == StatusCode::SERVICE_UNAVAILABLE {
        SentResult::NoService
    } else if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
        SentResult::NullPayload
    } else {
        SentResult::GenericFailure
    }
}

fn classify_transport_error(error: &reqwest::Error) -> SentResult {
    if error.is_connect() || error.is_timeout() {
        SentResult::NoService
    } else {
        SentResult::Unknown
    }
}

#[async_trait]
impl TransmissionAdapter for HttpGateway {
    fn name(&self) -> &str {
        "http"
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
