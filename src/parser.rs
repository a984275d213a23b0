//! Parser module for live feed frames
//!
//! Decodes session announcements, keep-alives and content deltas. Every delta
//! is tagged with the topic it applies to and carries only the fields that
//! changed.

use serde::{Deserialize, Deserializer};

use crate::model::{Event, EventLiveData, Market, Status};
use crate::topic::ContentIdentifier;

/// One incremental change addressed to a topic
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentUpdate {
    #[serde(rename = "contentId")]
    pub identifier: ContentIdentifier,
    pub delta: Delta,
}

impl ContentUpdate {
    pub fn new(identifier: ContentIdentifier, delta: Delta) -> Self {
        Self { identifier, delta }
    }
}

/// Closed set of delta kinds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Delta {
    /// Full event snapshot
    EventDetails(Event),
    /// Full live-data snapshot of the topic's event
    EventLiveData(EventLiveData),
    /// Full market snapshot
    MarketDetails(Market),
    #[serde(rename_all = "camelCase")]
    UpdateOutcomeOdd {
        #[serde(alias = "selectionId")]
        outcome_id: String,
        #[serde(default, deserialize_with = "deserialize_lenient_u32")]
        numerator: Option<u32>,
        #[serde(default, deserialize_with = "deserialize_lenient_u32")]
        denominator: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateOutcomeTradability {
        #[serde(alias = "selectionId")]
        outcome_id: String,
        is_tradable: bool,
    },
    #[serde(rename_all = "camelCase")]
    UpdateMarketTradability { market_id: String, is_tradable: bool },
    AddMarket(Market),
    #[serde(rename_all = "camelCase")]
    EnableMarket { market_id: String },
    #[serde(rename_all = "camelCase")]
    RemoveMarket { market_id: String },
    #[serde(rename_all = "camelCase")]
    RemoveEvent { event_id: String },
    #[serde(rename_all = "camelCase")]
    UpdateEventState { event_id: String, status: Status },
    #[serde(rename_all = "camelCase")]
    UpdateEventTime { event_id: String, match_time: String },
    #[serde(rename_all = "camelCase")]
    UpdateEventScore {
        event_id: String,
        #[serde(default, deserialize_with = "deserialize_lenient_u32")]
        home: Option<u32>,
        #[serde(default, deserialize_with = "deserialize_lenient_u32")]
        away: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateEventLiveDataExtended {
        event_id: String,
        live_data: EventLiveData,
    },
    #[serde(rename_all = "camelCase")]
    UpdateEventMarketCount { event_id: String, count: u32 },
}

impl Delta {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Delta::EventDetails(_) => "eventDetails",
            Delta::EventLiveData(_) => "eventLiveData",
            Delta::MarketDetails(_) => "marketDetails",
            Delta::UpdateOutcomeOdd { .. } => "updateOutcomeOdd",
            Delta::UpdateOutcomeTradability { .. } => "updateOutcomeTradability",
            Delta::UpdateMarketTradability { .. } => "updateMarketTradability",
            Delta::AddMarket(_) => "addMarket",
            Delta::EnableMarket { .. } => "enableMarket",
            Delta::RemoveMarket { .. } => "removeMarket",
            Delta::RemoveEvent { .. } => "removeEvent",
            Delta::UpdateEventState { .. } => "updateEventState",
            Delta::UpdateEventTime { .. } => "updateEventTime",
            Delta::UpdateEventScore { .. } => "updateEventScore",
            Delta::UpdateEventLiveDataExtended { .. } => "updateEventLiveDataExtended",
            Delta::UpdateEventMarketCount { .. } => "updateEventMarketCount",
        }
    }
}

/// Frame envelope as sent on the socket
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum Envelope {
    Session { token: String },
    Content(ContentUpdate),
    Ping,
}

/// Parsed socket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// Session token announced by the server
    Session { token: String },
    Content(ContentUpdate),
    Ping,
    Unknown(String),
}

impl FeedMessage {
    /// Parse a raw text frame
    ///
    /// Frames that are valid JSON but not a known envelope decode to
    /// `Unknown`. A known envelope with a malformed body is an error.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        let known = value
            .get("type")
            .and_then(|t| t.as_str())
            .map(|t| matches!(t, "session" | "content" | "ping"))
            .unwrap_or(false);
        if !known {
            return Ok(FeedMessage::Unknown(raw.to_string()));
        }

        // an unknown delta kind on a content frame is not fatal either
        if let Some(kind) = value
            .get("delta")
            .and_then(|d| d.get("kind"))
            .and_then(|k| k.as_str())
        {
            if !is_known_kind(kind) {
                return Ok(FeedMessage::Unknown(raw.to_string()));
            }
        }

        Ok(match serde_json::from_value::<Envelope>(value)? {
            Envelope::Session { token } => FeedMessage::Session { token },
            Envelope::Content(update) => FeedMessage::Content(update),
            Envelope::Ping => FeedMessage::Ping,
        })
    }
}

fn is_known_kind(kind: &str) -> bool {
    matches!(
        kind,
        "eventDetails"
            | "eventLiveData"
            | "marketDetails"
            | "updateOutcomeOdd"
            | "updateOutcomeTradability"
            | "updateMarketTradability"
            | "addMarket"
            | "enableMarket"
            | "removeMarket"
            | "removeEvent"
            | "updateEventState"
            | "updateEventTime"
            | "updateEventScore"
            | "updateEventLiveDataExtended"
            | "updateEventMarketCount"
    )
}

/// Numbers sometimes arrive as strings; accept both, and null as absent
fn deserialize_lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}
