//! SaleBot callback client
//!
//! One GET per incoming webhook against the configured callback URL.
//! The request carries the configured timeout and is never retried.

use reqwest::Client;
use thiserror::Error;

use crate::config::Config;
use crate::extractor::OutboundParams;

#[derive(Debug, Error)]
pub enum ForwardError {
    /// Connection refused, DNS failure, timeout, or a client build failure
    #[error("Error calling Chatter API: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Status and body returned by SaleBot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamResponse {
    pub status: u16,
    pub body: String,
}

impl DownstreamResponse {
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    callback_url: String,
}

impl Forwarder {
    pub fn new(config: &Config) -> Result<Self, ForwardError> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            callback_url: config.callback_url(),
        })
    }

    pub async fn forward(&self, params: &OutboundParams) -> Result<DownstreamResponse, ForwardError> {
        tracing::info!(
            client_id = %params.client_id,
            contract_id = %params.contract_id,
            days_add = ?params.days_add,
            "Forwarding to Chatter"
        );

        let response = self
            .client
            .get(&self.callback_url)
            .query(&params.pairs())
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!(downstream_status = status, "Chatter responded");

        Ok(DownstreamResponse { status, body })
    }
}
