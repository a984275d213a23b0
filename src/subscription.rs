//! Subscription handles and per-topic state feeds

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::stream::{self, BoxStream};
use tokio::sync::watch;
use tracing::debug;

use crate::error::SyncError;
use crate::topic::ContentIdentifier;

/// Issues the unsubscribe call for a topic
#[cfg_attr(test, mockall::automock)]
pub trait Unsubscriber: Send + Sync {
    fn unsubscribe(&self, identifier: &ContentIdentifier, session_token: &str);
}

/// A server-acknowledged topic
///
/// Owned by exactly one coordinator. Releasing it, explicitly or by dropping
/// it, fires the unsubscribe call once.
pub struct Subscription {
    identifier: ContentIdentifier,
    session_token: String,
    unsubscriber: Arc<dyn Unsubscriber>,
    released: AtomicBool,
}

impl Subscription {
    pub fn new(
        identifier: ContentIdentifier,
        session_token: impl Into<String>,
        unsubscriber: Arc<dyn Unsubscriber>,
    ) -> Self {
        Self {
            identifier,
            session_token: session_token.into(),
            unsubscriber,
            released: AtomicBool::new(false),
        }
    }

    pub fn identifier(&self) -> &ContentIdentifier {
        &self.identifier
    }

    /// Token that was current when the topic was subscribed
    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Unsubscribe; later calls are no-ops
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(identifier = %self.identifier, "Releasing subscription");
        self.unsubscriber
            .unsubscribe(&self.identifier, &self.session_token);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("identifier", &self.identifier)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Non-owning reference to a subscription, handed out on `Connected`
#[derive(Clone)]
pub struct SubscriptionRef(Weak<Subscription>);

impl SubscriptionRef {
    pub fn new(subscription: &Arc<Subscription>) -> Self {
        Self(Arc::downgrade(subscription))
    }

    pub fn identifier(&self) -> Option<ContentIdentifier> {
        self.0.upgrade().map(|s| s.identifier().clone())
    }

    /// Release the subscription if its owner still holds it
    pub fn release(&self) {
        if let Some(subscription) = self.0.upgrade() {
            subscription.release();
        }
    }

    pub fn is_live(&self) -> bool {
        self.0
            .upgrade()
            .map(|s| !s.is_released())
            .unwrap_or(false)
    }
}

impl PartialEq for SubscriptionRef {
    fn eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SubscriptionRef {}

impl fmt::Debug for SubscriptionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscriptionRef")
            .field(&self.identifier())
            .finish()
    }
}

/// Lifecycle state of one topic
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribableContent<T> {
    Disconnected,
    Connected(SubscriptionRef),
    ContentUpdate(T),
}

impl<T> SubscribableContent<T> {
    pub fn content(&self) -> Option<&T> {
        match self {
            SubscribableContent::ContentUpdate(value) => Some(value),
            _ => None,
        }
    }

    /// Connected or carrying content
    pub fn is_subscribed(&self) -> bool {
        !matches!(self, SubscribableContent::Disconnected)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FeedSlot<T> {
    Open(SubscribableContent<T>),
    Failed(SyncError),
}

/// Replay-latest state feed of a coordinator
///
/// Terminates with an error at most once; nothing is published afterwards.
#[derive(Debug)]
pub struct ContentFeed<T> {
    tx: watch::Sender<FeedSlot<T>>,
}

impl<T> ContentFeed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (tx, _) = watch::channel(FeedSlot::Open(SubscribableContent::Disconnected));
        Self { tx }
    }

    /// Publish a state; equal states and anything after a failure are dropped
    pub fn publish(&self, state: SubscribableContent<T>) -> bool {
        self.tx.send_if_modified(|slot| match slot {
            FeedSlot::Open(current) if *current != state => {
                *current = state;
                true
            }
            _ => false,
        })
    }

    /// Terminate the feed with an error
    pub fn fail(&self, error: SyncError) -> bool {
        self.tx.send_if_modified(|slot| match slot {
            FeedSlot::Open(_) => {
                *slot = FeedSlot::Failed(error);
                true
            }
            FeedSlot::Failed(_) => false,
        })
    }

    pub fn current(&self) -> Result<SubscribableContent<T>, SyncError> {
        match &*self.tx.borrow() {
            FeedSlot::Open(state) => Ok(state.clone()),
            FeedSlot::Failed(error) => Err(error.clone()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(&*self.tx.borrow(), FeedSlot::Failed(_))
    }

    /// Current state followed by every change; ends after yielding the error
    pub fn subscribe(&self) -> BoxStream<'static, Result<SubscribableContent<T>, SyncError>> {
        let rx = self.tx.subscribe();
        Box::pin(stream::unfold(Some((rx, true)), |state| async move {
            let (mut rx, first) = state?;
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let slot = rx.borrow_and_update().clone();
            match slot {
                FeedSlot::Open(content) => Some((Ok(content), Some((rx, false)))),
                FeedSlot::Failed(error) => Some((Err(error), None)),
            }
        }))
    }
}

impl<T> Default for ContentFeed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
