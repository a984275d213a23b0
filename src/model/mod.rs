//! Entity model
//!
//! Plain data for events, their markets and the markets' outcomes. Ownership
//! is strictly top-down: an event owns its markets, a market owns its outcomes.

mod odd;

pub use odd::Odd;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Match status of an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    #[default]
    Unknown,
    NotStarted,
    InProgress(String),
    Ended,
}

impl Status {
    /// Map a feed status string
    pub fn from_feed(raw: &str) -> Self {
        let value = raw.trim();
        match value.to_lowercase().as_str() {
            "" => Status::Unknown,
            "pending" | "not started" | "not_started" | "notstarted" | "scheduled" => {
                Status::NotStarted
            }
            "ended" | "finished" | "closed" | "interrupted" | "canceled" | "cancelled"
            | "walkover" | "abandoned" | "retired" => Status::Ended,
            _ => Status::InProgress(value.to_string()),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Status::InProgress(_))
    }
}

impl From<String> for Status {
    fn from(raw: String) -> Self {
        Status::from_feed(&raw)
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        match status {
            Status::Unknown => String::new(),
            Status::NotStarted => "not_started".to_string(),
            Status::InProgress(detail) => detail,
            Status::Ended => "ended".to_string(),
        }
    }
}

/// A priced selection of a market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub id: String,
    /// Translated display name
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub odd: Odd,
    #[serde(default = "tradable_by_default")]
    pub is_tradable: bool,
}

/// A market and its outcomes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "tradable_by_default")]
    pub is_tradable: bool,
    /// Set for the event's main market
    #[serde(default)]
    pub is_main: bool,
    #[serde(default)]
    pub outcomes: Vec<Outcome>,
}

impl Market {
    pub fn outcome(&self, outcome_id: &str) -> Option<&Outcome> {
        self.outcomes.iter().find(|o| o.id == outcome_id)
    }
}

/// A sporting event with its live data and markets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub home_participant: String,
    #[serde(default)]
    pub away_participant: String,
    #[serde(default)]
    pub competition: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub home_score: Option<u32>,
    #[serde(default)]
    pub away_score: Option<u32>,
    /// Free-text match clock, e.g. `45'`
    #[serde(default)]
    pub match_time: Option<String>,
    #[serde(default)]
    pub market_count: Option<u32>,
    #[serde(default)]
    pub markets: Vec<Market>,
}

impl Event {
    /// Bare event carrying only its id
    pub fn shell(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn market(&self, market_id: &str) -> Option<&Market> {
        self.markets.iter().find(|m| m.id == market_id)
    }

    pub fn main_market(&self) -> Option<&Market> {
        self.markets.iter().find(|m| m.is_main)
    }
}

/// Partial live-data bundle; absent fields mean "unchanged"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLiveData {
    #[serde(default)]
    pub status: Option<Status>,
    #[serde(default)]
    pub match_time: Option<String>,
    #[serde(default)]
    pub home_score: Option<u32>,
    #[serde(default)]
    pub away_score: Option<u32>,
}

impl EventLiveData {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.match_time.is_none()
            && self.home_score.is_none()
            && self.away_score.is_none()
    }
}

fn tradable_by_default() -> bool {
    true
}
