//! Live Sync - sports market data synchronization
//!
//! This crate keeps a local store of events, markets and outcomes in sync
//! with a live content feed, and hands out per-topic feeds of entity
//! snapshots to consumers.

pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod model;
pub mod parser;
pub mod provider;
pub mod session;
pub mod store;
pub mod subscription;
pub mod topic;
pub mod transport;
pub mod websocket;

pub use config::Config;
pub use coordinator::{
    FeedStream, LiveDataCoordinator, MarketDetailsCoordinator, SecondaryMarketsCoordinator,
};
pub use error::{Result, SyncError};
pub use model::{Event, EventLiveData, Market, Odd, Outcome, Status};
pub use parser::{ContentUpdate, Delta, FeedMessage};
pub use provider::{ConnectorState, EventsProvider};
pub use session::SessionTokens;
pub use store::EntityStore;
pub use subscription::{SubscribableContent, SubscriptionRef};
pub use topic::{ContentIdentifier, ContentType};
pub use transport::{ContentClient, HttpTransport, Transport};
pub use websocket::WebSocketManager;
