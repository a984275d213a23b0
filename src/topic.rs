//! Topic identity
//!
//! A `ContentIdentifier` names one subscribable topic. It is the argument of
//! every subscribe/unsubscribe call and the routing key of every inbound delta,
//! so equality and hashing are purely structural.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SyncError;

/// Coarse kind of a topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentType {
    EventLiveData,
    EventMainMarket,
    EventSecondaryMarkets,
    Market,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::EventLiveData => "eventLiveData",
            ContentType::EventMainMarket => "eventMainMarket",
            ContentType::EventSecondaryMarkets => "eventSecondaryMarkets",
            ContentType::Market => "market",
        }
    }
}

/// The specific ids a topic is about
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContentRoute {
    EventLiveData { event_id: String },
    EventMainMarket { event_id: String },
    EventSecondaryMarkets { event_id: String },
    Market { market_id: String },
}

impl ContentRoute {
    /// Route as sent on the wire
    pub fn full_route(&self) -> &str {
        match self {
            ContentRoute::EventLiveData { event_id }
            | ContentRoute::EventMainMarket { event_id }
            | ContentRoute::EventSecondaryMarkets { event_id } => event_id,
            ContentRoute::Market { market_id } => market_id,
        }
    }

    fn content_type(&self) -> ContentType {
        match self {
            ContentRoute::EventLiveData { .. } => ContentType::EventLiveData,
            ContentRoute::EventMainMarket { .. } => ContentType::EventMainMarket,
            ContentRoute::EventSecondaryMarkets { .. } => ContentType::EventSecondaryMarkets,
            ContentRoute::Market { .. } => ContentType::Market,
        }
    }

    fn from_parts(content_type: ContentType, id: String) -> Self {
        match content_type {
            ContentType::EventLiveData => ContentRoute::EventLiveData { event_id: id },
            ContentType::EventMainMarket => ContentRoute::EventMainMarket { event_id: id },
            ContentType::EventSecondaryMarkets => {
                ContentRoute::EventSecondaryMarkets { event_id: id }
            }
            ContentType::Market => ContentRoute::Market { market_id: id },
        }
    }
}

/// Topic name: content type plus route
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawContentId", into = "RawContentId")]
pub struct ContentIdentifier {
    content_type: ContentType,
    content_route: ContentRoute,
}

impl ContentIdentifier {
    /// Build an identifier, rejecting a route that belongs to another type
    pub fn new(content_type: ContentType, content_route: ContentRoute) -> Result<Self, SyncError> {
        if content_route.content_type() != content_type {
            return Err(SyncError::InvalidRequestFormat(format!(
                "route {:?} does not match content type {}",
                content_route,
                content_type.as_str()
            )));
        }
        Ok(Self {
            content_type,
            content_route,
        })
    }

    pub fn event_live_data(event_id: impl Into<String>) -> Self {
        Self::from_route(ContentRoute::EventLiveData {
            event_id: event_id.into(),
        })
    }

    pub fn event_main_market(event_id: impl Into<String>) -> Self {
        Self::from_route(ContentRoute::EventMainMarket {
            event_id: event_id.into(),
        })
    }

    pub fn event_secondary_markets(event_id: impl Into<String>) -> Self {
        Self::from_route(ContentRoute::EventSecondaryMarkets {
            event_id: event_id.into(),
        })
    }

    pub fn market(market_id: impl Into<String>) -> Self {
        Self::from_route(ContentRoute::Market {
            market_id: market_id.into(),
        })
    }

    fn from_route(content_route: ContentRoute) -> Self {
        Self {
            content_type: content_route.content_type(),
            content_route,
        }
    }

    pub fn content_type(&self) -> ContentType {
        self.content_type
    }

    pub fn content_route(&self) -> &ContentRoute {
        &self.content_route
    }
}

impl fmt::Display for ContentIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.content_type.as_str(),
            self.content_route.full_route()
        )
    }
}

/// Wire shape `{"type": ..., "id": ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawContentId {
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub id: String,
}

impl TryFrom<RawContentId> for ContentIdentifier {
    type Error = String;

    fn try_from(raw: RawContentId) -> Result<Self, Self::Error> {
        if raw.id.is_empty() {
            return Err("content id must not be empty".to_string());
        }
        Ok(Self::from_route(ContentRoute::from_parts(
            raw.content_type,
            raw.id,
        )))
    }
}

impl From<ContentIdentifier> for RawContentId {
    fn from(identifier: ContentIdentifier) -> Self {
        RawContentId {
            content_type: identifier.content_type,
            id: identifier.content_route.full_route().to_string(),
        }
    }
}
