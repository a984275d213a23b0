//! Content services transport
//!
//! Turns a topic into get/subscribe/unsubscribe requests and interprets the
//! handshake responses. The HTTP client itself sits behind [`Transport`].

mod http;

pub use http::HttpTransport;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, SyncError};
use crate::subscription::Unsubscriber;
use crate::topic::{ContentIdentifier, RawContentId};

/// Body marker the get service uses for a missing topic
pub const CONTENT_NOT_FOUND: &str = "CONTENT_NOT_FOUND";

/// Content service call for one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Get {
        identifier: ContentIdentifier,
        session_token: Option<String>,
    },
    Subscribe {
        identifier: ContentIdentifier,
        session_token: String,
    },
    Unsubscribe {
        identifier: ContentIdentifier,
        session_token: String,
    },
}

impl Endpoint {
    fn path(&self) -> &'static str {
        match self {
            Endpoint::Get { .. } => "services/content/get",
            Endpoint::Subscribe { .. } => "services/content/subscribe",
            Endpoint::Unsubscribe { .. } => "services/content/unsubscribe",
        }
    }

    fn identifier(&self) -> &ContentIdentifier {
        match self {
            Endpoint::Get { identifier, .. }
            | Endpoint::Subscribe { identifier, .. }
            | Endpoint::Unsubscribe { identifier, .. } => identifier,
        }
    }

    fn session_token(&self) -> Option<&str> {
        match self {
            Endpoint::Get { session_token, .. } => session_token.as_deref(),
            Endpoint::Subscribe { session_token, .. }
            | Endpoint::Unsubscribe { session_token, .. } => Some(session_token),
        }
    }

    /// Build the request; fails locally with `InvalidRequestFormat`
    pub fn request(&self, base: &str, language: &str) -> Result<RequestDescriptor> {
        let identifier = self.identifier();
        if identifier.content_route().full_route().trim().is_empty() {
            return Err(SyncError::InvalidRequestFormat(format!(
                "empty route for {}",
                identifier.content_type().as_str()
            )));
        }
        if let Some(token) = self.session_token() {
            if token.is_empty() {
                return Err(SyncError::InvalidRequestFormat(
                    "empty session token".to_string(),
                ));
            }
        }

        let base = if base.ends_with('/') {
            Url::parse(base)?
        } else {
            Url::parse(&format!("{}/", base))?
        };
        let url = base.join(self.path())?;

        let body = serde_json::to_value(RequestBody {
            subscriber_id: self.session_token(),
            content_id: RawContentId::from(identifier.clone()),
            client_context: ClientContext {
                language,
                ip_address: "127.0.0.1",
            },
        })
        .map_err(|e| SyncError::InvalidRequestFormat(e.to_string()))?;

        Ok(RequestDescriptor { url, body })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    subscriber_id: Option<&'a str>,
    content_id: RawContentId,
    client_context: ClientContext<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClientContext<'a> {
    language: &'a str,
    ip_address: &'a str,
}

/// A ready-to-send content service request (always a JSON POST)
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub url: Url,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes content service requests
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: RequestDescriptor) -> Result<TransportResponse>;
}

/// Builds and executes the handshake calls for topics
#[derive(Clone)]
pub struct ContentClient {
    transport: Arc<dyn Transport>,
    base: String,
    language: String,
    probe_retries: u32,
}

impl ContentClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        base: impl Into<String>,
        language: impl Into<String>,
        probe_retries: u32,
    ) -> Self {
        Self {
            transport,
            base: base.into(),
            language: language.into(),
            probe_retries,
        }
    }

    /// Existence probe
    ///
    /// A body carrying the not-found marker fails at once; transport failures
    /// are retried `probe_retries` times before giving up.
    pub async fn probe(&self, identifier: &ContentIdentifier, session_token: &str) -> Result<()> {
        let request = Endpoint::Get {
            identifier: identifier.clone(),
            session_token: Some(session_token.to_string()),
        }
        .request(&self.base, &self.language)?;

        let mut attempt = 0;
        loop {
            match self.transport.execute(request.clone()).await {
                Ok(response) if response.body.contains(CONTENT_NOT_FOUND) => {
                    debug!(identifier = %identifier, "Topic not found");
                    return Err(SyncError::ResourceUnavailableOrDeleted);
                }
                Ok(response) if response.is_success() => return Ok(()),
                Ok(response) => {
                    warn!(identifier = %identifier, status = response.status, attempt, "Probe rejected");
                }
                Err(e) => {
                    warn!(identifier = %identifier, error = %e, attempt, "Probe failed");
                }
            }
            if attempt >= self.probe_retries {
                return Err(SyncError::ResourceUnavailableOrDeleted);
            }
            attempt += 1;
        }
    }

    /// Subscribe handshake; `Ok(false)` when acknowledged with version 0
    pub async fn subscribe(
        &self,
        identifier: &ContentIdentifier,
        session_token: &str,
    ) -> Result<bool> {
        let request = Endpoint::Subscribe {
            identifier: identifier.clone(),
            session_token: session_token.to_string(),
        }
        .request(&self.base, &self.language)?;

        let response = self.transport.execute(request).await.map_err(|e| {
            warn!(identifier = %identifier, error = %e, "Subscribe request failed");
            SyncError::OnSubscribe
        })?;
        parse_subscribe_ack(&response)
    }

    pub async fn unsubscribe(&self, identifier: &ContentIdentifier, session_token: &str) -> Result<()> {
        let request = Endpoint::Unsubscribe {
            identifier: identifier.clone(),
            session_token: session_token.to_string(),
        }
        .request(&self.base, &self.language)?;

        let response = self.transport.execute(request).await?;
        if !response.is_success() {
            return Err(SyncError::Transport(format!(
                "unsubscribe returned status {}",
                response.status
            )));
        }
        Ok(())
    }
}

/// Read the version marker of a subscribe acknowledgment
pub fn parse_subscribe_ack(response: &TransportResponse) -> Result<bool> {
    if !response.is_success() {
        return Err(SyncError::OnSubscribe);
    }
    let ack: Value = serde_json::from_str(&response.body).map_err(|_| SyncError::OnSubscribe)?;
    let version = ack.get("version").ok_or(SyncError::OnSubscribe)?;

    let version = match version {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| SyncError::InvalidResponse(format!("unreadable version {}", version)))?;

    Ok(version != 0)
}

/// Fire-and-forget unsubscribe through a [`ContentClient`]
pub struct ClientUnsubscriber {
    client: ContentClient,
}

impl ClientUnsubscriber {
    pub fn new(client: ContentClient) -> Self {
        Self { client }
    }
}

impl Unsubscriber for ClientUnsubscriber {
    fn unsubscribe(&self, identifier: &ContentIdentifier, session_token: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(identifier = %identifier, "No runtime to unsubscribe on");
            return;
        };
        let client = self.client.clone();
        let identifier = identifier.clone();
        let session_token = session_token.to_string();
        handle.spawn(async move {
            match client.unsubscribe(&identifier, &session_token).await {
                Ok(()) => debug!(identifier = %identifier, "Unsubscribed"),
                Err(e) => warn!(identifier = %identifier, error = %e, "Unsubscribe failed"),
            }
        });
    }
}
