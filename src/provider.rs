//! Events provider
//!
//! Entry point for consumers: hands out coordinator feeds (reusing an active
//! coordinator for the same topic), entity snapshots from the store, and the
//! feed connection state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::Stream;
use tracing::{debug, info};

use crate::config::Config;
use crate::coordinator::{
    CoordinatorContext, FeedStream, LiveDataCoordinator, MarketDetailsCoordinator,
    SecondaryMarketsCoordinator,
};
use crate::dispatcher::FeedDispatcher;
use crate::error::{Result, SyncError};
use crate::model::{Event, Market, Outcome};
use crate::session::SessionTokens;
use crate::store::EntityStore;
use crate::subscription::Unsubscriber;
use crate::transport::{ClientUnsubscriber, ContentClient, Transport};

/// Connection state of the live feed socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Default)]
struct Registry {
    live_data: HashMap<String, Arc<LiveDataCoordinator>>,
    secondary_markets: HashMap<String, Arc<SecondaryMarketsCoordinator>>,
    market_details: HashMap<String, Arc<MarketDetailsCoordinator>>,
}

impl Registry {
    fn prune(&mut self) {
        self.live_data.retain(|_, c| c.is_active());
        self.secondary_markets.retain(|_, c| c.is_active());
        self.market_details.retain(|_, c| c.is_active());
    }

    fn active_count(&self) -> usize {
        self.live_data.len() + self.secondary_markets.len() + self.market_details.len()
    }
}

/// Remove `coordinator` from the registry unless the key was reassigned
fn forget<T>(coordinators: &mut HashMap<String, Arc<T>>, key: &str, coordinator: &Arc<T>) {
    if coordinators
        .get(key)
        .is_some_and(|current| Arc::ptr_eq(current, coordinator))
    {
        coordinators.remove(key);
    }
}

/// Facade over the store, the coordinators and the connector state
pub struct EventsProvider {
    ctx: CoordinatorContext,
    registry: Mutex<Registry>,
    connector: watch::Sender<ConnectorState>,
}

impl EventsProvider {
    pub fn new(ctx: CoordinatorContext) -> Self {
        let (connector, _) = watch::channel(ConnectorState::Disconnected);
        Self {
            ctx,
            registry: Mutex::new(Registry::default()),
            connector,
        }
    }

    /// Wire a provider over a transport using the configured endpoints
    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let client = ContentClient::new(
            transport,
            config.rest_endpoint.clone(),
            config.language.clone(),
            config.probe_retries,
        );
        let unsubscriber: Arc<dyn Unsubscriber> = Arc::new(ClientUnsubscriber::new(client.clone()));
        Self::new(CoordinatorContext {
            client,
            unsubscriber,
            tokens: SessionTokens::new(),
            store: Arc::new(EntityStore::new()),
            dispatcher: Arc::new(FeedDispatcher::new()),
            watchdog_timeout: config.watchdog_timeout(),
        })
    }

    pub fn tokens(&self) -> &SessionTokens {
        &self.ctx.tokens
    }

    pub fn dispatcher(&self) -> &Arc<FeedDispatcher> {
        &self.ctx.dispatcher
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.ctx.store
    }

    fn require_session(&self) -> Result<()> {
        match self.ctx.tokens.current() {
            Some(_) => Ok(()),
            None => Err(SyncError::UserSessionNotFound),
        }
    }

    // ---- topic feeds -----------------------------------------------------

    // A topic the server acknowledges with version 0 is not subscribed: the
    // request yields `Ok(None)`, the coordinator is dropped, and the caller
    // may ask again.

    /// Live data feed of an event
    pub async fn subscribe_live_data(
        &self,
        event_id: &str,
    ) -> Result<Option<FeedStream<Arc<Event>>>> {
        self.require_session()?;
        let (coordinator, created) = {
            let mut registry = self.registry.lock();
            registry.prune();
            match registry.live_data.get(event_id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let coordinator = LiveDataCoordinator::live_data(event_id, self.ctx.clone());
                    registry
                        .live_data
                        .insert(event_id.to_string(), coordinator.clone());
                    (coordinator, true)
                }
            }
        };

        if created {
            debug!(event_id = %event_id, "Starting live data topic");
            if let Ok(false) = coordinator.start().await {
                forget(&mut self.registry.lock().live_data, event_id, &coordinator);
                info!(event_id = %event_id, "Live data topic not subscribed");
                return Ok(None);
            }
        }
        Ok(Some(coordinator.feed()))
    }

    /// Secondary markets feed of an event
    pub async fn subscribe_event_markets(
        &self,
        event_id: &str,
    ) -> Result<Option<FeedStream<Arc<Event>>>> {
        self.require_session()?;
        let (coordinator, created) = {
            let mut registry = self.registry.lock();
            registry.prune();
            match registry.secondary_markets.get(event_id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let coordinator = SecondaryMarketsCoordinator::new(event_id, self.ctx.clone());
                    registry
                        .secondary_markets
                        .insert(event_id.to_string(), coordinator.clone());
                    (coordinator, true)
                }
            }
        };

        if created {
            debug!(event_id = %event_id, "Starting secondary markets topic");
            if let Ok(false) = coordinator.start().await {
                forget(&mut self.registry.lock().secondary_markets, event_id, &coordinator);
                info!(event_id = %event_id, "Secondary markets topic not subscribed");
                return Ok(None);
            }
        }
        Ok(Some(coordinator.feed()))
    }

    /// Details feed of a market owned by `event_id`
    pub async fn subscribe_market_details(
        &self,
        market_id: &str,
        event_id: &str,
    ) -> Result<Option<FeedStream<Arc<Market>>>> {
        self.require_session()?;
        let (coordinator, created) = {
            let mut registry = self.registry.lock();
            registry.prune();
            match registry.market_details.get(market_id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let coordinator = MarketDetailsCoordinator::market_details(
                        market_id,
                        event_id,
                        self.ctx.clone(),
                    );
                    registry
                        .market_details
                        .insert(market_id.to_string(), coordinator.clone());
                    (coordinator, true)
                }
            }
        };

        if created {
            debug!(market_id = %market_id, "Starting market details topic");
            if let Ok(false) = coordinator.start().await {
                forget(&mut self.registry.lock().market_details, market_id, &coordinator);
                info!(market_id = %market_id, "Market details topic not subscribed");
                return Ok(None);
            }
        }
        Ok(Some(coordinator.feed()))
    }

    pub fn unsubscribe_live_data(&self, event_id: &str) {
        if let Some(coordinator) = self.registry.lock().live_data.remove(event_id) {
            coordinator.release();
        }
    }

    pub fn unsubscribe_event_markets(&self, event_id: &str) {
        if let Some(coordinator) = self.registry.lock().secondary_markets.remove(event_id) {
            coordinator.release();
        }
    }

    pub fn unsubscribe_market_details(&self, market_id: &str) {
        if let Some(coordinator) = self.registry.lock().market_details.remove(market_id) {
            coordinator.release();
        }
    }

    /// Coordinators currently subscribing or subscribed
    pub fn active_topics(&self) -> usize {
        let mut registry = self.registry.lock();
        registry.prune();
        registry.active_count()
    }

    /// Release every topic
    pub fn shutdown(&self) {
        let registry = std::mem::take(&mut *self.registry.lock());
        let released = registry.active_count();
        for coordinator in registry.live_data.values() {
            coordinator.release();
        }
        for coordinator in registry.secondary_markets.values() {
            coordinator.release();
        }
        for coordinator in registry.market_details.values() {
            coordinator.release();
        }
        info!(released, "All topics released");
    }

    // ---- store views -----------------------------------------------------

    pub fn observe_event(&self, event_id: &str) -> impl Stream<Item = Arc<Event>> + Send + Unpin {
        self.ctx.store.observe_event(event_id)
    }

    pub fn observe_market(&self, market_id: &str) -> impl Stream<Item = Arc<Market>> + Send + Unpin {
        self.ctx.store.observe_market(market_id)
    }

    pub fn observe_outcome(
        &self,
        outcome_id: &str,
    ) -> impl Stream<Item = Arc<Outcome>> + Send + Unpin {
        self.ctx.store.observe_outcome(outcome_id)
    }

    pub fn contains_event(&self, event_id: &str) -> bool {
        self.ctx.store.contains_event(event_id)
    }

    pub fn contains_market(&self, market_id: &str) -> bool {
        self.ctx.store.contains_market(market_id)
    }

    pub fn contains_outcome(&self, outcome_id: &str) -> bool {
        self.ctx.store.contains_outcome(outcome_id)
    }

    // ---- connector state -------------------------------------------------

    pub fn connector_state(&self) -> ConnectorState {
        *self.connector.borrow()
    }

    pub fn watch_connector_state(&self) -> watch::Receiver<ConnectorState> {
        self.connector.subscribe()
    }

    pub fn set_connector_state(&self, state: ConnectorState) {
        self.connector.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            info!(from = ?current, to = ?state, "Connector state changed");
            *current = state;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::testing::harness;
    use crate::model::{EventLiveData, Status};
    use crate::parser::{ContentUpdate, Delta};
    use crate::subscription::SubscribableContent;
    use crate::topic::ContentIdentifier;
    use futures_util::StreamExt;

    #[tokio::test(start_paused = true)]
    async fn test_requires_session() {
        let mut h = harness();
        h.ctx.tokens = SessionTokens::new();
        let provider = EventsProvider::new(h.ctx.clone());

        assert!(matches!(
            provider.subscribe_live_data("E1").await,
            Err(SyncError::UserSessionNotFound)
        ));
        assert!(h.transport.requests.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_topic_is_reused() {
        let h = harness();
        h.transport.push_handshake(1);
        let provider = EventsProvider::new(h.ctx.clone());

        let mut first = provider.subscribe_live_data("E1").await.unwrap().unwrap();
        let mut second = provider.subscribe_live_data("E1").await.unwrap().unwrap();
        assert_eq!(provider.active_topics(), 1);
        assert_eq!(h.transport.paths().len(), 2);

        h.ctx.dispatcher.dispatch(&ContentUpdate::new(
            ContentIdentifier::event_live_data("E1"),
            Delta::EventLiveData(EventLiveData {
                status: Some(Status::InProgress("1st half".to_string())),
                ..Default::default()
            }),
        ));

        for feed in [&mut first, &mut second] {
            let mut last = None;
            while let Some(Some(item)) = futures_util::FutureExt::now_or_never(feed.next()) {
                last = Some(item);
            }
            assert!(matches!(last, Some(Ok(SubscribableContent::ContentUpdate(_)))));
        }
        assert!(provider.contains_event("E1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_topic_is_replaced() {
        let h = harness();
        h.transport.push_ok("CONTENT_NOT_FOUND");
        let provider = EventsProvider::new(h.ctx.clone());

        let mut feed = provider.subscribe_live_data("E1").await.unwrap().unwrap();
        assert_eq!(
            feed.next().await,
            Some(Err(SyncError::ResourceUnavailableOrDeleted))
        );
        assert_eq!(provider.active_topics(), 0);

        h.transport.push_handshake(1);
        let mut feed = provider.subscribe_live_data("E1").await.unwrap().unwrap();
        assert!(matches!(
            feed.next().await,
            Some(Ok(SubscribableContent::Connected(_)))
        ));
        assert_eq!(provider.active_topics(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_releases_topic() {
        let h = harness();
        h.transport.push_handshake(1);
        let provider = EventsProvider::new(h.ctx.clone());
        assert!(provider
            .subscribe_market_details("M1", "E1")
            .await
            .unwrap()
            .is_some());

        provider.unsubscribe_market_details("M1");
        assert_eq!(provider.active_topics(), 0);
        assert_eq!(h.unsubscriber.calls.lock().len(), 1);
    }

    #[test]
    fn test_connector_state_transitions() {
        let h = harness();
        let provider = EventsProvider::new(h.ctx);
        let mut rx = provider.watch_connector_state();

        provider.set_connector_state(ConnectorState::Disconnected);
        assert!(!rx.has_changed().unwrap());
        provider.set_connector_state(ConnectorState::Connecting);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), ConnectorState::Connecting);
        assert_eq!(provider.connector_state(), ConnectorState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_version_zero_is_reported_to_caller() {
        let h = harness();
        h.transport.push_handshake(0);
        let provider = EventsProvider::new(h.ctx.clone());

        assert!(provider.subscribe_live_data("E1").await.unwrap().is_none());
        assert_eq!(provider.active_topics(), 0);
        assert_eq!(h.ctx.dispatcher.route_count(), 0);

        h.transport.push_handshake(1);
        let mut feed = provider.subscribe_live_data("E1").await.unwrap().unwrap();
        assert!(matches!(
            feed.next().await,
            Some(Ok(SubscribableContent::Connected(_)))
        ));
        assert_eq!(provider.active_topics(), 1);
    }
}
