//! Secondary markets coordinator
//!
//! Subscribes an event's secondary-markets topic together with its
//! main-market topic. The public feed re-emits the store's view of the event
//! whenever either the event or this topic's status changes, but only while
//! the topic is connected.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::trace;

use super::{Coordinator, CoordinatorContext, FeedStream, MergeResult, TopicScope};
use crate::error::Result;
use crate::model::{Event, Market};
use crate::parser::Delta;
use crate::store::EntityStore;
use crate::subscription::{ContentFeed, SubscribableContent};
use crate::topic::{ContentIdentifier, ContentType};

#[derive(Debug, Clone)]
pub struct SecondaryMarketsScope {
    event_id: String,
}

impl SecondaryMarketsScope {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl TopicScope for SecondaryMarketsScope {
    type Content = Arc<Event>;

    fn primary(&self) -> ContentIdentifier {
        ContentIdentifier::event_secondary_markets(&self.event_id)
    }

    fn associated(&self) -> Vec<ContentIdentifier> {
        vec![ContentIdentifier::event_main_market(&self.event_id)]
    }

    fn apply(&self, store: &EntityStore, identifier: &ContentIdentifier, delta: &Delta) -> MergeResult {
        let main_topic = identifier.content_type() == ContentType::EventMainMarket;
        match delta {
            Delta::EventDetails(event) if event.id == self.event_id => {
                store.store_event(event.clone()).into()
            }
            Delta::AddMarket(market) => {
                let market = Market {
                    is_tradable: true,
                    is_main: market.is_main || main_topic,
                    ..market.clone()
                };
                store.add_market(&self.event_id, market).into()
            }
            Delta::MarketDetails(market) => {
                let market = Market {
                    is_main: market.is_main || main_topic,
                    ..market.clone()
                };
                store.add_market(&self.event_id, market).into()
            }
            Delta::EnableMarket { market_id } => {
                store.update_market_tradability(market_id, true).into()
            }
            Delta::RemoveMarket { market_id } => {
                store.update_market_tradability(market_id, false).into()
            }
            Delta::UpdateMarketTradability {
                market_id,
                is_tradable,
            } => store.update_market_tradability(market_id, *is_tradable).into(),
            Delta::UpdateOutcomeOdd {
                outcome_id,
                numerator,
                denominator,
            } => store
                .update_outcome_odd(outcome_id, *numerator, *denominator)
                .into(),
            Delta::UpdateOutcomeTradability {
                outcome_id,
                is_tradable,
            } => store
                .update_outcome_tradability(outcome_id, *is_tradable)
                .into(),
            Delta::UpdateEventMarketCount { event_id, count } => {
                store.update_event_market_count(event_id, *count).into()
            }
            Delta::RemoveEvent { event_id } if *event_id == self.event_id => {
                store.remove_event(event_id);
                MergeResult::Removed
            }
            Delta::RemoveEvent { .. }
            | Delta::EventDetails(_)
            | Delta::EventLiveData(_)
            | Delta::UpdateEventState { .. }
            | Delta::UpdateEventTime { .. }
            | Delta::UpdateEventScore { .. }
            | Delta::UpdateEventLiveDataExtended { .. } => {
                trace!(event_id = %self.event_id, kind = delta.kind(), "Delta ignored by markets topic");
                MergeResult::Unchanged
            }
        }
    }

    fn snapshot(&self, store: &EntityStore) -> Option<Arc<Event>> {
        store.event(&self.event_id)
    }

    fn reset(&self, store: &EntityStore) {
        store.remove_event(&self.event_id);
    }
}

/// Secondary markets of one event, combined with the store's event view
pub struct SecondaryMarketsCoordinator {
    inner: Arc<Coordinator<SecondaryMarketsScope>>,
    feed: Arc<ContentFeed<Arc<Event>>>,
    combiner: JoinHandle<()>,
}

impl SecondaryMarketsCoordinator {
    /// Must be called within a tokio runtime
    pub fn new(event_id: impl Into<String>, ctx: CoordinatorContext) -> Arc<Self> {
        let scope = SecondaryMarketsScope::new(event_id);
        let events = ctx.store.watch_event(scope.event_id());
        let inner = Coordinator::new(scope, ctx);
        let feed = Arc::new(ContentFeed::new());

        let combiner = tokio::spawn(combine(inner.feed(), events, feed.clone()));

        Arc::new(Self {
            inner,
            feed,
            combiner,
        })
    }

    pub fn event_id(&self) -> &str {
        self.inner.scope().event_id()
    }

    pub fn identifier(&self) -> ContentIdentifier {
        self.inner.identifier()
    }

    pub async fn start(&self) -> Result<bool> {
        self.inner.start().await
    }

    pub fn feed(&self) -> FeedStream<Arc<Event>> {
        self.feed.subscribe()
    }

    pub fn current(&self) -> Result<SubscribableContent<Arc<Event>>> {
        self.feed.current()
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_active()
    }

    /// Releases the secondary-markets and main-market subscriptions together
    pub fn release(&self) {
        self.inner.release();
    }

    pub fn coordinator(&self) -> &Arc<Coordinator<SecondaryMarketsScope>> {
        &self.inner
    }
}

impl Drop for SecondaryMarketsCoordinator {
    fn drop(&mut self) {
        self.combiner.abort();
        self.inner.release();
    }
}

async fn combine(
    mut status: FeedStream<Arc<Event>>,
    mut events: watch::Receiver<Option<Arc<Event>>>,
    feed: Arc<ContentFeed<Arc<Event>>>,
) {
    let mut current = SubscribableContent::Disconnected;
    loop {
        tokio::select! {
            next = status.next() => match next {
                Some(Ok(state)) => current = state,
                Some(Err(e)) => {
                    feed.fail(e);
                    return;
                }
                None => return,
            },
            changed = events.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }

        let event = events.borrow_and_update().clone();
        match (&current, event) {
            (SubscribableContent::Disconnected, _) => {
                feed.publish(SubscribableContent::Disconnected);
            }
            (_, Some(event)) => {
                feed.publish(SubscribableContent::ContentUpdate(event));
            }
            (SubscribableContent::Connected(subscription), None) => {
                feed.publish(SubscribableContent::Connected(subscription.clone()));
            }
            // event reset by a reconnect; wait for the rebuild
            (SubscribableContent::ContentUpdate(_), None) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::testing::{harness, settle, Harness};
    use crate::coordinator::MarketDetailsCoordinator;
    use crate::model::{Odd, Outcome, Status};
    use crate::parser::ContentUpdate;

    fn secondary(delta: Delta) -> ContentUpdate {
        ContentUpdate::new(ContentIdentifier::event_secondary_markets("E1"), delta)
    }

    fn main_market(delta: Delta) -> ContentUpdate {
        ContentUpdate::new(ContentIdentifier::event_main_market("E1"), delta)
    }

    fn event() -> Event {
        Event {
            id: "E1".to_string(),
            home_participant: "Lions".to_string(),
            away_participant: "Tigers".to_string(),
            status: Status::NotStarted,
            ..Default::default()
        }
    }

    fn totals() -> Market {
        Market {
            id: "M2".to_string(),
            name: "Total Goals".to_string(),
            is_tradable: false,
            is_main: false,
            outcomes: vec![
                Outcome {
                    id: "O3".to_string(),
                    name: "Over 2.5".to_string(),
                    odd: Odd::fraction(4, 5),
                    is_tradable: true,
                },
                Outcome {
                    id: "O4".to_string(),
                    name: "Under 2.5".to_string(),
                    odd: Odd::fraction(1, 1),
                    is_tradable: true,
                },
            ],
        }
    }

    async fn started(h: &Harness) -> Arc<SecondaryMarketsCoordinator> {
        h.transport.push_handshake(1);
        h.transport.push_ok(r#"{"version":1}"#);
        let coordinator = SecondaryMarketsCoordinator::new("E1", h.ctx.clone());
        assert_eq!(coordinator.start().await, Ok(true));
        settle().await;
        coordinator
    }

    #[tokio::test(start_paused = true)]
    async fn test_market_retract_then_reinstate() {
        let h = harness();
        let _coordinator = started(&h).await;
        h.ctx.dispatcher.dispatch(&secondary(Delta::EventDetails(event())));
        h.ctx.dispatcher.dispatch(&secondary(Delta::AddMarket(totals())));

        let added = h.ctx.store.market("M2").unwrap();
        assert!(added.is_tradable);

        h.ctx.dispatcher.dispatch(&secondary(Delta::RemoveMarket {
            market_id: "M2".to_string(),
        }));
        let retracted = h.ctx.store.market("M2").unwrap();
        assert!(!retracted.is_tradable);
        assert_eq!(retracted.outcomes, added.outcomes);

        h.ctx.dispatcher.dispatch(&secondary(Delta::EnableMarket {
            market_id: "M2".to_string(),
        }));
        let reinstated = h.ctx.store.market("M2").unwrap();
        assert!(reinstated.is_tradable);
        assert_eq!(reinstated.outcomes, added.outcomes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_follows_writes_from_other_topics() {
        let h = harness();
        let coordinator = started(&h).await;
        h.ctx.dispatcher.dispatch(&secondary(Delta::EventDetails(event())));
        settle().await;
        assert!(coordinator.current().unwrap().content().is_some());

        // a live data topic updates the same event
        h.ctx.store.update_event_score("E1", Some(2), Some(1));
        settle().await;
        let state = coordinator.current().unwrap();
        assert_eq!(state.content().unwrap().home_score, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_content_while_disconnected() {
        let h = harness();
        let coordinator = SecondaryMarketsCoordinator::new("E1", h.ctx.clone());
        h.ctx.store.store_event(event());
        settle().await;
        assert_eq!(coordinator.current(), Ok(SubscribableContent::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_main_market_topic_flags_market() {
        let h = harness();
        let _coordinator = started(&h).await;
        h.ctx.dispatcher.dispatch(&secondary(Delta::EventDetails(event())));
        h.ctx.dispatcher.dispatch(&main_market(Delta::AddMarket(Market {
            id: "M1".to_string(),
            ..totals()
        })));

        let event = h.ctx.store.event("E1").unwrap();
        assert_eq!(event.main_market().map(|m| m.id.as_str()), Some("M1"));
        assert!(!event.market("M1").unwrap().outcomes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_unsubscribes_both_topics() {
        let h = harness();
        let coordinator = started(&h).await;
        coordinator.release();
        coordinator.release();

        let calls = h.unsubscriber.calls.lock().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls
            .iter()
            .any(|(id, _)| *id == ContentIdentifier::event_main_market("E1")));
        assert_eq!(h.ctx.dispatcher.route_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_data_topic_is_not_routed_here() {
        let h = harness();
        let _coordinator = started(&h).await;
        h.ctx.dispatcher.dispatch(&secondary(Delta::EventDetails(event())));

        let delivered = h.ctx.dispatcher.dispatch(&ContentUpdate::new(
            ContentIdentifier::event_live_data("E1"),
            Delta::UpdateEventTime {
                event_id: "E1".to_string(),
                match_time: "10'".to_string(),
            },
        ));
        assert_eq!(delivered, 0);
        assert_eq!(h.ctx.store.event("E1").unwrap().match_time, None);

        // a live-data delta on this topic is ignored as well
        h.ctx.dispatcher.dispatch(&secondary(Delta::UpdateEventTime {
            event_id: "E1".to_string(),
            match_time: "10'".to_string(),
        }));
        assert_eq!(h.ctx.store.event("E1").unwrap().match_time, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_market_topic_snapshot_keeps_main_flag() {
        let h = harness();
        let _coordinator = started(&h).await;
        h.ctx.dispatcher.dispatch(&secondary(Delta::EventDetails(event())));
        h.ctx.dispatcher.dispatch(&main_market(Delta::AddMarket(Market {
            id: "M1".to_string(),
            ..totals()
        })));

        h.transport.push_handshake(1);
        let details = MarketDetailsCoordinator::market_details("M1", "E1", h.ctx.clone());
        assert_eq!(details.start().await, Ok(true));
        h.ctx.dispatcher.dispatch(&ContentUpdate::new(
            ContentIdentifier::market("M1"),
            Delta::MarketDetails(Market {
                id: "M1".to_string(),
                is_tradable: false,
                ..totals()
            }),
        ));

        let event = h.ctx.store.event("E1").unwrap();
        assert_eq!(event.main_market().map(|m| m.id.as_str()), Some("M1"));
        assert!(!event.market("M1").unwrap().is_tradable);
        assert!(details.current().unwrap().content().unwrap().is_main);
    }
}
