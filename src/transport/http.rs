//! reqwest-backed transport

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{RequestDescriptor, Transport, TransportResponse};
use crate::error::Result;

/// JSON-over-HTTP transport for the content services
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: RequestDescriptor) -> Result<TransportResponse> {
        debug!(url = %request.url, "Content service request");

        let response = self
            .client
            .post(request.url)
            .json(&request.body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(TransportResponse { status, body })
    }
}
