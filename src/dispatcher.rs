//! Feed dispatcher
//!
//! Routes each decoded content update to the handlers registered for its
//! exact topic identifier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::trace;

use crate::parser::ContentUpdate;
use crate::topic::ContentIdentifier;

/// Receives the updates addressed to one topic
pub trait ContentHandler: Send + Sync {
    fn handle_content_update(&self, update: &ContentUpdate);
}

/// Handle returned by [`FeedDispatcher::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

type Routes = HashMap<ContentIdentifier, Vec<(RegistrationId, Weak<dyn ContentHandler>)>>;

/// Routing table keyed by topic identifier
#[derive(Default)]
pub struct FeedDispatcher {
    routes: RwLock<Routes>,
    next_id: AtomicU64,
}

impl FeedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        identifier: ContentIdentifier,
        handler: Weak<dyn ContentHandler>,
    ) -> RegistrationId {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.routes
            .write()
            .entry(identifier)
            .or_default()
            .push((id, handler));
        id
    }

    /// Stop routing to a handler; takes effect for the next dispatch
    pub fn unregister(&self, id: RegistrationId) {
        let mut routes = self.routes.write();
        routes.retain(|_, handlers| {
            handlers.retain(|(registered, _)| *registered != id);
            !handlers.is_empty()
        });
    }

    /// Deliver an update to every live handler of its topic
    ///
    /// Handlers run outside the table lock so they may unregister themselves.
    pub fn dispatch(&self, update: &ContentUpdate) -> usize {
        let handlers: Vec<Arc<dyn ContentHandler>> = {
            let routes = self.routes.read();
            match routes.get(&update.identifier) {
                Some(handlers) => handlers.iter().filter_map(|(_, h)| h.upgrade()).collect(),
                None => Vec::new(),
            }
        };

        if handlers.is_empty() {
            trace!(identifier = %update.identifier, "No handler for update");
        }
        for handler in &handlers {
            handler.handle_content_update(update);
        }
        handlers.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }
}
