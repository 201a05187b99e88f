//! Order Gateway HTTP Adapter
//!
//! REST client for the trading backend: order submission and the
//! securities directory. Submission failures never escape as errors; they
//! are folded into a [`SubmissionResult`].

use async_trait::async_trait;
use reqwest::Client;

use crate::ClientConfig;
use crate::application::ports::{GatewayError, OrderGateway, SecuritiesDirectory};
use crate::domain::orders::{Order, SubmissionResult};
use crate::domain::streaming::Security;
use crate::infrastructure::config::GatewaySettings;
use crate::infrastructure::metrics;

/// Message for an accepted submission.
pub const ORDER_PLACED: &str = "Order placed successfully";

/// Message for a rejected submission with an empty body.
pub const ORDER_FAILED: &str = "Failed to place order";

/// Message for a submission that never reached the backend.
pub const NETWORK_ERROR: &str = "Network error";

/// HTTP client for the trading backend.
#[derive(Debug, Clone)]
pub struct HttpOrderGateway {
    client: Client,
    base_url: String,
}

impl HttpOrderGateway {
    /// Create a gateway for `base_url` (`http(s)://host[:port]`, no trailing slash).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, settings: &GatewaySettings) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Create a gateway from `ClientConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_client_config(config: &ClientConfig) -> Result<Self, GatewayError> {
        Self::new(config.api_base_url(), &config.gateway)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl OrderGateway for HttpOrderGateway {
    async fn submit_orders(&self, orders: &[Order]) -> SubmissionResult {
        let url = self.url("/orders");

        let response = match self.client.post(&url).json(orders).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, url = %url, count = orders.len(), "Order submission failed");
                metrics::record_orders(false, orders.len());
                return SubmissionResult::failed(0, NETWORK_ERROR);
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::info!(count = orders.len(), status = status.as_u16(), "Orders accepted");
            metrics::record_orders(true, orders.len());
            return SubmissionResult::accepted(orders.len(), ORDER_PLACED);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            status = status.as_u16(),
            body = %body,
            count = orders.len(),
            "Orders rejected"
        );
        metrics::record_orders(false, orders.len());

        let message = if body.trim().is_empty() {
            ORDER_FAILED.to_string()
        } else {
            body
        };
        SubmissionResult::failed(0, message)
    }
}

#[async_trait]
impl SecuritiesDirectory for HttpOrderGateway {
    async fn list_securities(&self) -> Result<Vec<Security>, GatewayError> {
        let url = self.url("/securities");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let securities: Vec<Security> =
            serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))?;
        tracing::debug!(count = securities.len(), "Fetched securities");
        Ok(securities)
    }
}
