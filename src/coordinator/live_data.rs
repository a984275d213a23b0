//! Live data coordinator: score, clock and status of one event

use std::sync::Arc;

use tracing::trace;

use super::{Coordinator, CoordinatorContext, MergeResult, TopicScope};
use crate::model::Event;
use crate::parser::Delta;
use crate::store::EntityStore;
use crate::topic::ContentIdentifier;

pub type LiveDataCoordinator = Coordinator<LiveDataScope>;

#[derive(Debug, Clone)]
pub struct LiveDataScope {
    event_id: String,
}

impl LiveDataScope {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl Coordinator<LiveDataScope> {
    pub fn live_data(event_id: impl Into<String>, ctx: CoordinatorContext) -> Arc<Self> {
        Self::new(LiveDataScope::new(event_id), ctx)
    }
}

impl TopicScope for LiveDataScope {
    type Content = Arc<Event>;

    fn primary(&self) -> ContentIdentifier {
        ContentIdentifier::event_live_data(&self.event_id)
    }

    fn apply(&self, store: &EntityStore, _: &ContentIdentifier, delta: &Delta) -> MergeResult {
        match delta {
            Delta::EventLiveData(live_data) => {
                store.upsert_live_data(&self.event_id, live_data).into()
            }
            Delta::UpdateEventState { event_id, status } => {
                store.update_event_status(event_id, status).into()
            }
            Delta::UpdateEventTime {
                event_id,
                match_time,
            } => store.update_event_time(event_id, match_time).into(),
            Delta::UpdateEventScore {
                event_id,
                home,
                away,
            } => store.update_event_score(event_id, *home, *away).into(),
            Delta::UpdateEventLiveDataExtended {
                event_id,
                live_data,
            } => store.merge_live_data(event_id, live_data).into(),
            Delta::UpdateEventMarketCount { event_id, count } => {
                store.update_event_market_count(event_id, *count).into()
            }
            Delta::RemoveEvent { event_id } if *event_id == self.event_id => {
                store.remove_event(event_id);
                MergeResult::Removed
            }
            Delta::RemoveEvent { .. }
            | Delta::EventDetails(_)
            | Delta::MarketDetails(_)
            | Delta::UpdateOutcomeOdd { .. }
            | Delta::UpdateOutcomeTradability { .. }
            | Delta::UpdateMarketTradability { .. }
            | Delta::AddMarket(_)
            | Delta::EnableMarket { .. }
            | Delta::RemoveMarket { .. } => {
                trace!(event_id = %self.event_id, kind = delta.kind(), "Delta ignored by live data topic");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::testing::{harness, settle};
    use crate::dispatcher::ContentHandler;
    use crate::error::SyncError;
    use crate::model::{EventLiveData, Status};
    use crate::parser::ContentUpdate;
    use crate::subscription::{MockUnsubscriber, SubscribableContent};
    use crate::session::SessionTokens;
    use crate::transport::testing::ScriptedTransport;
    use crate::transport::{ContentClient, RequestDescriptor, Transport, TransportResponse};
    use futures_util::{FutureExt, StreamExt};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn live(delta: Delta) -> ContentUpdate {
        ContentUpdate::new(ContentIdentifier::event_live_data("E1"), delta)
    }

    fn kickoff() -> Delta {
        Delta::EventLiveData(EventLiveData {
            status: Some(Status::NotStarted),
            match_time: None,
            home_score: Some(0),
            away_score: Some(0),
        })
    }

    fn score(home: u32, away: u32) -> Delta {
        Delta::UpdateEventScore {
            event_id: "E1".to_string(),
            home: Some(home),
            away: Some(away),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_fails_silent_topic() {
        let h = harness();
        h.transport.push_handshake(1);
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());

        assert_eq!(coordinator.start().await, Ok(true));
        assert!(matches!(
            coordinator.current(),
            Ok(SubscribableContent::Connected(_))
        ));
        assert!(coordinator.is_active());

        tokio::time::sleep(Duration::from_millis(3_900)).await;
        assert!(coordinator.current().is_ok());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            coordinator.current(),
            Err(SyncError::NoResponseFromSocketOnContent)
        );
        assert!(!coordinator.is_active());
        assert_eq!(h.unsubscriber.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_payload_disarms_watchdog() {
        let h = harness();
        h.transport.push_handshake(1);
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());
        coordinator.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.ctx.dispatcher.dispatch(&live(kickoff())), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        let state = coordinator.current().unwrap();
        let event = state.content().unwrap();
        assert_eq!(event.status, Status::NotStarted);
        assert!(coordinator.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_noop_delta_is_not_republished() {
        let h = harness();
        h.transport.push_handshake(1);
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());
        coordinator.start().await.unwrap();
        h.ctx.dispatcher.dispatch(&live(kickoff()));

        let mut feed = coordinator.feed();
        assert!(matches!(
            feed.next().await,
            Some(Ok(SubscribableContent::ContentUpdate(_)))
        ));

        h.ctx.dispatcher.dispatch(&live(kickoff()));
        h.ctx.dispatcher.dispatch(&live(score(0, 0)));
        assert!(feed.next().now_or_never().is_none());

        h.ctx.dispatcher.dispatch(&live(score(1, 0)));
        let Some(Ok(SubscribableContent::ContentUpdate(event))) = feed.next().await else {
            panic!("Expected content update");
        };
        assert_eq!(event.home_score, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_only_bundle_keeps_score_and_status() {
        let h = harness();
        h.transport.push_handshake(1);
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());
        coordinator.start().await.unwrap();
        h.ctx.dispatcher.dispatch(&live(kickoff()));

        h.ctx
            .dispatcher
            .dispatch(&live(Delta::UpdateEventLiveDataExtended {
                event_id: "E1".to_string(),
                live_data: EventLiveData {
                    match_time: Some("45'".to_string()),
                    ..Default::default()
                },
            }));

        let event = h.ctx.store.event("E1").unwrap();
        assert_eq!(event.status, Status::NotStarted);
        assert_eq!(event.home_score, Some(0));
        assert_eq!(event.away_score, Some(0));
        assert_eq!(event.match_time.as_deref(), Some("45'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_event_delta_is_ignored() {
        let h = harness();
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());
        coordinator.handle_content_update(&live(Delta::UpdateEventTime {
            event_id: "E404".to_string(),
            match_time: "12'".to_string(),
        }));

        assert!(!h.ctx.store.contains_event("E404"));
        assert_eq!(coordinator.current(), Ok(SubscribableContent::Disconnected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resets_and_remerges() {
        let h = harness();
        h.transport.push_handshake(1);
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());
        coordinator.start().await.unwrap();
        h.ctx.dispatcher.dispatch(&live(kickoff()));
        h.ctx.dispatcher.dispatch(&live(score(1, 0)));
        assert_eq!(h.ctx.store.event("E1").unwrap().home_score, Some(1));

        h.transport.push_ok(r#"{"version":2}"#);
        h.ctx.tokens.rotate("tok-2");
        settle().await;

        assert!(!h.ctx.store.contains_event("E1"));
        assert_eq!(coordinator.subscription_tokens(), vec!["tok-2".to_string()]);
        assert_eq!(
            h.unsubscriber.calls.lock().as_slice(),
            &[(ContentIdentifier::event_live_data("E1"), "tok-1".to_string())]
        );
        assert!(coordinator.is_active());

        // the same delta merges again once the snapshot is back
        h.ctx.dispatcher.dispatch(&live(kickoff()));
        assert_eq!(h.ctx.store.event("E1").unwrap().home_score, Some(0));
        h.ctx.dispatcher.dispatch(&live(score(1, 0)));
        assert_eq!(h.ctx.store.event("E1").unwrap().home_score, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resubscribe_keeps_feed_open() {
        let h = harness();
        h.transport.push_handshake(1);
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());
        coordinator.start().await.unwrap();
        h.ctx.dispatcher.dispatch(&live(kickoff()));

        h.transport.push_ok("oops");
        h.ctx.tokens.rotate("tok-2");
        settle().await;

        assert!(coordinator.current().is_ok());
        assert!(coordinator.is_active());
        assert_eq!(coordinator.subscription_tokens(), vec!["tok-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_unsubscribes_once_and_stops_routing() {
        let mut h = harness();
        let mut unsubscriber = MockUnsubscriber::new();
        unsubscriber.expect_unsubscribe().times(1).return_const(());
        h.ctx.unsubscriber = Arc::new(unsubscriber);

        h.transport.push_handshake(1);
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());
        coordinator.start().await.unwrap();

        coordinator.release();
        coordinator.release();
        assert_eq!(h.ctx.dispatcher.dispatch(&live(kickoff())), 0);
        assert!(!h.ctx.store.contains_event("E1"));
        assert_eq!(coordinator.current(), Ok(SubscribableContent::Disconnected));
        drop(coordinator);
    }

    #[tokio::test(start_paused = true)]
    async fn test_version_zero_is_not_subscribed() {
        let h = harness();
        h.transport.push_handshake(0);
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());

        assert_eq!(coordinator.start().await, Ok(false));
        assert_eq!(coordinator.current(), Ok(SubscribableContent::Disconnected));
        assert!(!coordinator.is_active());
        assert!(h.unsubscriber.calls.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_topic_terminates_feed() {
        let h = harness();
        h.transport.push_ok("CONTENT_NOT_FOUND");
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());
        let mut feed = coordinator.feed();

        assert_eq!(
            coordinator.start().await,
            Err(SyncError::ResourceUnavailableOrDeleted)
        );
        assert_eq!(
            feed.next().await,
            Some(Err(SyncError::ResourceUnavailableOrDeleted))
        );
        assert_eq!(feed.next().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_rejection_terminates_feed() {
        let h = harness();
        h.transport.push_ok("{}");
        h.transport.push(Ok(crate::transport::TransportResponse {
            status: 503,
            body: String::new(),
        }));
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());

        assert_eq!(coordinator.start().await, Err(SyncError::OnSubscribe));
        assert!(!coordinator.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_event_releases_topic() {
        let h = harness();
        h.transport.push_handshake(1);
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());
        coordinator.start().await.unwrap();
        h.ctx.dispatcher.dispatch(&live(kickoff()));

        h.ctx.dispatcher.dispatch(&live(Delta::RemoveEvent {
            event_id: "E1".to_string(),
        }));

        assert!(!h.ctx.store.contains_event("E1"));
        assert_eq!(coordinator.current(), Ok(SubscribableContent::Disconnected));
        assert!(!coordinator.is_active());
        assert_eq!(h.unsubscriber.calls.lock().len(), 1);
    }

    /// Rotates the session token while the subscribe call is in flight
    struct RotatingTransport {
        inner: Arc<ScriptedTransport>,
        tokens: SessionTokens,
        rotated: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Transport for RotatingTransport {
        async fn execute(&self, request: RequestDescriptor) -> Result<TransportResponse, SyncError> {
            if request.url.path().ends_with("/subscribe") && !self.rotated.swap(true, Ordering::SeqCst) {
                self.tokens.rotate("tok-2");
            }
            self.inner.execute(request).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotation_during_handshake_resubscribes() {
        let mut h = harness();
        let transport = Arc::new(RotatingTransport {
            inner: h.transport.clone(),
            tokens: h.ctx.tokens.clone(),
            rotated: AtomicBool::new(false),
        });
        h.ctx.client = ContentClient::new(transport, "https://feeds.test", "en", 1);
        h.transport.push_handshake(1);
        h.transport.push_ok(r#"{"version":2}"#);

        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());
        assert_eq!(coordinator.start().await, Ok(true));
        settle().await;

        assert_eq!(h.ctx.tokens.current().as_deref(), Some("tok-2"));
        assert_eq!(coordinator.subscription_tokens(), vec!["tok-2".to_string()]);
        assert_eq!(
            h.unsubscriber.calls.lock().as_slice(),
            &[(ContentIdentifier::event_live_data("E1"), "tok-1".to_string())]
        );
        assert!(coordinator.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_topic_is_not_restarted() {
        let h = harness();
        h.transport.push_handshake(1);
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());
        coordinator.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(coordinator.current().is_err());

        h.transport.push_handshake(1);
        assert_eq!(
            coordinator.start().await,
            Err(SyncError::NoResponseFromSocketOnContent)
        );
        assert_eq!(h.transport.paths().len(), 2);
        assert!(coordinator.subscription_tokens().is_empty());
        assert!(!coordinator.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_deltas_publish_latest_snapshot() {
        let h = harness();
        h.transport.push_handshake(1);
        let coordinator = LiveDataCoordinator::live_data("E1", h.ctx.clone());
        coordinator.start().await.unwrap();
        h.ctx.dispatcher.dispatch(&live(kickoff()));

        std::thread::scope(|scope| {
            for side in 0..2u32 {
                let dispatcher = h.ctx.dispatcher.clone();
                scope.spawn(move || {
                    for goals in 1..=200 {
                        let (home, away) = if side == 0 {
                            (Some(goals), None)
                        } else {
                            (None, Some(goals))
                        };
                        dispatcher.dispatch(&live(Delta::UpdateEventScore {
                            event_id: "E1".to_string(),
                            home,
                            away,
                        }));
                    }
                });
            }
        });

        let stored = h.ctx.store.event("E1").unwrap();
        assert_eq!((stored.home_score, stored.away_score), (Some(200), Some(200)));
        let state = coordinator.current().unwrap();
        assert_eq!(state.content(), Some(&stored));
    }
}
