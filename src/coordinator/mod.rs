//! Topic coordinators
//!
//! A coordinator owns one topic's subscription lifecycle: the probe and
//! subscribe handshake, the first-payload watchdog, resubscribing after a
//! session token rotation, and routing matching deltas into the entity store.
//! What differs between topics (identifiers, accepted deltas, store slice) is
//! captured by a [`TopicScope`].

mod live_data;
mod market_details;
mod secondary_markets;
mod watchdog;

pub use live_data::{LiveDataCoordinator, LiveDataScope};
pub use market_details::{MarketDetailsCoordinator, MarketDetailsScope};
pub use secondary_markets::{SecondaryMarketsCoordinator, SecondaryMarketsScope};

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::stream::BoxStream;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{ContentHandler, FeedDispatcher, RegistrationId};
use crate::error::{Result, SyncError};
use crate::metrics;
use crate::parser::{ContentUpdate, Delta};
use crate::session::SessionTokens;
use crate::store::EntityStore;
use crate::subscription::{
    ContentFeed, SubscribableContent, Subscription, SubscriptionRef, Unsubscriber,
};
use crate::topic::ContentIdentifier;
use crate::transport::ContentClient;
use watchdog::Watchdog;

/// State feed handed to consumers
pub type FeedStream<T> = BoxStream<'static, Result<SubscribableContent<T>>>;

/// Effect of one delta on the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResult {
    Changed,
    Unchanged,
    /// The topic's event was removed
    Removed,
}

impl From<bool> for MergeResult {
    fn from(changed: bool) -> Self {
        if changed {
            MergeResult::Changed
        } else {
            MergeResult::Unchanged
        }
    }
}

/// What a coordinator subscribes to and how its deltas land in the store
pub trait TopicScope: Send + Sync + 'static {
    type Content: Clone + PartialEq + Send + Sync + 'static;

    /// Topic whose lifecycle drives the feed
    fn primary(&self) -> ContentIdentifier;

    /// Extra topics subscribed and released together with the primary one
    fn associated(&self) -> Vec<ContentIdentifier> {
        Vec::new()
    }

    fn apply(&self, store: &EntityStore, identifier: &ContentIdentifier, delta: &Delta)
        -> MergeResult;

    /// Current aggregate published on the feed
    fn snapshot(&self, store: &EntityStore) -> Option<Self::Content>;

    /// Drop the store slice this topic rebuilds after a reconnect
    fn reset(&self, store: &EntityStore);
}

/// Collaborators shared by every coordinator
#[derive(Clone)]
pub struct CoordinatorContext {
    pub client: ContentClient,
    pub unsubscriber: Arc<dyn Unsubscriber>,
    pub tokens: SessionTokens,
    pub store: Arc<EntityStore>,
    pub dispatcher: Arc<FeedDispatcher>,
    pub watchdog_timeout: Duration,
}

#[derive(Default)]
struct LifecycleState {
    session_token: Option<String>,
    /// Primary subscription first, associated ones after it
    subscriptions: Vec<Arc<Subscription>>,
    registrations: Vec<RegistrationId>,
    starting: bool,
    payload_seen: bool,
    watchdog: Option<Watchdog>,
    rotation_listener: Option<JoinHandle<()>>,
    generation: u64,
    released: bool,
}

/// Lifecycle owner for one topic
pub struct Coordinator<S: TopicScope> {
    scope: S,
    ctx: CoordinatorContext,
    feed: ContentFeed<S::Content>,
    state: Mutex<LifecycleState>,
    /// Held from merge to publish so snapshots reach the feed in merge order
    merging: Mutex<()>,
    this: Weak<Self>,
}

impl<S: TopicScope> Coordinator<S> {
    /// Create a coordinator and route its topics to it
    pub fn new(scope: S, ctx: CoordinatorContext) -> Arc<Self> {
        let coordinator = Arc::new_cyclic(|this| Self {
            scope,
            ctx,
            feed: ContentFeed::new(),
            state: Mutex::new(LifecycleState::default()),
            merging: Mutex::new(()),
            this: this.clone(),
        });

        let handler: Arc<dyn ContentHandler> = coordinator.clone();
        let mut registrations = Vec::new();
        for identifier in coordinator.identifiers() {
            registrations.push(
                coordinator
                    .ctx
                    .dispatcher
                    .register(identifier, Arc::downgrade(&handler)),
            );
        }
        coordinator.state.lock().registrations = registrations;
        coordinator
    }

    pub fn scope(&self) -> &S {
        &self.scope
    }

    pub fn identifier(&self) -> ContentIdentifier {
        self.scope.primary()
    }

    fn identifiers(&self) -> Vec<ContentIdentifier> {
        let mut identifiers = vec![self.scope.primary()];
        identifiers.extend(self.scope.associated());
        identifiers
    }

    /// Replay-latest state feed
    pub fn feed(&self) -> FeedStream<S::Content> {
        self.feed.subscribe()
    }

    pub fn current(&self) -> Result<SubscribableContent<S::Content>> {
        self.feed.current()
    }

    /// Subscribing, or holding a subscription that has not failed
    pub fn is_active(&self) -> bool {
        let state = self.state.lock();
        !state.released
            && !self.feed.is_failed()
            && (state.starting || !state.subscriptions.is_empty())
    }

    /// Probe, subscribe, then wait for the first payload under the watchdog
    ///
    /// `Ok(false)` means the server acknowledged with version 0; the
    /// coordinator stays disconnected and inactive.
    ///
    /// A coordinator whose feed already failed is not restarted; a fresh
    /// attempt needs a new coordinator.
    pub async fn start(&self) -> Result<bool> {
        if let Err(e) = self.feed.current() {
            return Err(e);
        }
        // taken before the handshake so a rotation during it is not missed
        let rotations = self.ctx.tokens.rotations();
        let Some(token) = rotations.borrow().clone() else {
            self.terminate(SyncError::UserSessionNotFound);
            return Err(SyncError::UserSessionNotFound);
        };
        {
            let mut state = self.state.lock();
            if state.released || state.starting {
                return Ok(false);
            }
            if !state.subscriptions.is_empty() {
                return Ok(true);
            }
            state.starting = true;
        }

        match self.handshake(&token).await {
            Ok(Some(subscriptions)) => Ok(self.install(token, subscriptions, rotations)),
            Ok(None) => {
                self.state.lock().starting = false;
                info!(identifier = %self.identifier(), "Subscribe acknowledged with version 0");
                Ok(false)
            }
            Err(e) => {
                self.state.lock().starting = false;
                self.terminate(e.clone());
                Err(e)
            }
        }
    }

    async fn handshake(&self, token: &str) -> Result<Option<Vec<Arc<Subscription>>>> {
        let primary = self.scope.primary();
        self.ctx.client.probe(&primary, token).await?;
        if !self.ctx.client.subscribe(&primary, token).await? {
            return Ok(None);
        }

        let mut subscriptions = vec![self.subscription(primary, token)];
        for associated in self.scope.associated() {
            match self.ctx.client.subscribe(&associated, token).await {
                Ok(true) => subscriptions.push(self.subscription(associated, token)),
                Ok(false) => warn!(identifier = %associated, "Associated topic not subscribed"),
                Err(e) => warn!(identifier = %associated, error = %e, "Associated subscribe failed"),
            }
        }
        Ok(Some(subscriptions))
    }

    fn subscription(&self, identifier: ContentIdentifier, token: &str) -> Arc<Subscription> {
        Arc::new(Subscription::new(
            identifier,
            token,
            self.ctx.unsubscriber.clone(),
        ))
    }

    fn install(
        &self,
        token: String,
        subscriptions: Vec<Arc<Subscription>>,
        rotations: watch::Receiver<Option<String>>,
    ) -> bool {
        let Some(primary) = subscriptions.first().map(SubscriptionRef::new) else {
            return false;
        };

        let mut state = self.state.lock();
        state.starting = false;
        if state.released {
            // released while subscribing; dropping the handles unsubscribes
            drop(state);
            drop(subscriptions);
            return false;
        }
        state.session_token = Some(token);
        state.subscriptions = subscriptions;
        if !state.payload_seen {
            let this = self.this.clone();
            state.watchdog = Some(Watchdog::arm(self.ctx.watchdog_timeout, move || {
                if let Some(coordinator) = this.upgrade() {
                    coordinator.watchdog_expired();
                }
            }));
        }
        state.rotation_listener = Some(self.listen_for_rotations(rotations));
        drop(state);

        metrics::get().active_coordinators.inc();
        if matches!(self.feed.current(), Ok(SubscribableContent::Disconnected)) {
            self.feed.publish(SubscribableContent::Connected(primary));
        }
        info!(identifier = %self.identifier(), "Topic subscribed");
        true
    }

    fn watchdog_expired(&self) {
        let subscriptions = {
            let mut state = self.state.lock();
            if state.released || state.payload_seen || state.subscriptions.is_empty() {
                return;
            }
            state.watchdog = None;
            if let Some(listener) = state.rotation_listener.take() {
                listener.abort();
            }
            std::mem::take(&mut state.subscriptions)
        };
        drop(subscriptions);

        metrics::get().watchdog_timeouts.inc();
        metrics::get().active_coordinators.dec();
        error!(identifier = %self.identifier(), "No payload after subscribe");
        self.feed.fail(SyncError::NoResponseFromSocketOnContent);
    }

    fn terminate(&self, error: SyncError) {
        error!(identifier = %self.identifier(), error = %error, "Topic failed");
        self.feed.fail(error);
    }

    fn listen_for_rotations(&self, mut rotations: watch::Receiver<Option<String>>) -> JoinHandle<()> {
        let this = self.this.clone();
        tokio::spawn(async move {
            while rotations.changed().await.is_ok() {
                let Some(token) = rotations.borrow_and_update().clone() else {
                    continue;
                };
                match this.upgrade() {
                    Some(coordinator) => coordinator.reconnect(token),
                    None => break,
                }
            }
        })
    }

    /// Resubscribe under a new session token
    ///
    /// The topic's store slice is reset first so the snapshot that follows
    /// the resubscribe rebuilds it. Failures are logged and the coordinator
    /// stays active.
    pub fn reconnect(&self, token: String) {
        let generation = {
            let mut state = self.state.lock();
            if state.released || state.subscriptions.is_empty() {
                return;
            }
            if state.session_token.as_deref() == Some(token.as_str()) {
                return;
            }
            state.session_token = Some(token.clone());
            state.generation += 1;
            state.generation
        };

        metrics::get().reconnects.inc();
        info!(identifier = %self.identifier(), generation, "Reconnecting topic");
        self.scope.reset(&self.ctx.store);

        let this = self.this.clone();
        let client = self.ctx.client.clone();
        let identifiers = self.identifiers();
        tokio::spawn(async move {
            let mut renewed = Vec::new();
            for identifier in identifiers {
                match client.subscribe(&identifier, &token).await {
                    Ok(true) => renewed.push(identifier),
                    Ok(false) => warn!(identifier = %identifier, "Resubscribe not acknowledged"),
                    Err(e) => warn!(identifier = %identifier, error = %e, "Resubscribe failed"),
                }
            }
            if let Some(coordinator) = this.upgrade() {
                coordinator.renew(generation, &token, renewed);
            }
        });
    }

    /// Swap in subscriptions made under the rotated token
    ///
    /// A response for a superseded generation is discarded; its handles are
    /// dropped, which unsubscribes them.
    fn renew(&self, generation: u64, token: &str, identifiers: Vec<ContentIdentifier>) {
        if identifiers.is_empty() {
            return;
        }
        let fresh: Vec<_> = identifiers
            .into_iter()
            .map(|identifier| self.subscription(identifier, token))
            .collect();

        let replaced = {
            let mut state = self.state.lock();
            if state.released || state.generation != generation || state.subscriptions.is_empty() {
                debug!(identifier = %self.identifier(), generation, "Discarding stale resubscribe");
                drop(state);
                drop(fresh);
                return;
            }
            let mut replaced = Vec::new();
            for subscription in fresh {
                let position = state
                    .subscriptions
                    .iter()
                    .position(|s| s.identifier() == subscription.identifier());
                match position {
                    Some(index) => replaced.push(std::mem::replace(
                        &mut state.subscriptions[index],
                        subscription,
                    )),
                    None => state.subscriptions.push(subscription),
                }
            }
            replaced
        };
        drop(replaced);
        info!(identifier = %self.identifier(), generation, "Topic resubscribed");
    }

    /// Unsubscribe every topic and stop routing deltas here
    pub fn release(&self) {
        let (subscriptions, registrations, watchdog, listener, was_active) = {
            let mut state = self.state.lock();
            if state.released {
                return;
            }
            state.released = true;
            let was_active = !state.subscriptions.is_empty();
            (
                std::mem::take(&mut state.subscriptions),
                std::mem::take(&mut state.registrations),
                state.watchdog.take(),
                state.rotation_listener.take(),
                was_active,
            )
        };

        for id in registrations {
            self.ctx.dispatcher.unregister(id);
        }
        if let Some(watchdog) = watchdog {
            watchdog.disarm();
        }
        if let Some(listener) = listener {
            listener.abort();
        }
        for subscription in &subscriptions {
            subscription.release();
        }
        if was_active {
            metrics::get().active_coordinators.dec();
        }
        self.feed.publish(SubscribableContent::Disconnected);
        info!(identifier = %self.identifier(), "Topic released");
    }

    #[cfg(test)]
    pub(crate) fn subscription_tokens(&self) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .iter()
            .map(|s| s.session_token().to_string())
            .collect()
    }
}

impl<S: TopicScope> ContentHandler for Coordinator<S> {
    fn handle_content_update(&self, update: &ContentUpdate) {
        if !self.identifiers().contains(&update.identifier) || self.feed.is_failed() {
            return;
        }
        {
            let mut state = self.state.lock();
            if state.released {
                return;
            }
            state.payload_seen = true;
            if let Some(watchdog) = state.watchdog.take() {
                watchdog.disarm();
            }
        }

        debug!(identifier = %update.identifier, kind = update.delta.kind(), "Applying delta");
        let _merging = self.merging.lock();
        match self
            .scope
            .apply(&self.ctx.store, &update.identifier, &update.delta)
        {
            MergeResult::Changed => {
                if let Some(snapshot) = self.scope.snapshot(&self.ctx.store) {
                    self.feed.publish(SubscribableContent::ContentUpdate(snapshot));
                }
            }
            MergeResult::Unchanged => {}
            MergeResult::Removed => self.release(),
        }
    }
}

impl<S: TopicScope> Drop for Coordinator<S> {
    fn drop(&mut self) {
        self.release();
    }
}
