//! Entity store
//!
//! Holds the single canonical copy of every event (and, through it, of every
//! market and outcome) and republishes immutable snapshots to any number of
//! observers per id. All writes go through one lock so a merge and the
//! publish that follows it form a single step.

mod merge;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, trace};

use crate::metrics;
use crate::model::{Event, EventLiveData, Market, Outcome, Status};

type Channel<T> = watch::Sender<Option<Arc<T>>>;

/// Thread-safe table of canonical events with per-id snapshot channels
#[derive(Debug, Default)]
pub struct EntityStore {
    state: Mutex<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    events: HashMap<String, Event>,
    /// market id -> owning event id
    market_index: HashMap<String, String>,
    /// outcome id -> owning event id
    outcome_index: HashMap<String, String>,
    revisions: HashMap<String, u64>,
    event_channels: HashMap<String, Channel<Event>>,
    market_channels: HashMap<String, Channel<Market>>,
    outcome_channels: HashMap<String, Channel<Outcome>>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- snapshot writes -------------------------------------------------

    /// Insert an event, or merge it into the canonical copy when already known
    pub fn store_event(&self, event: Event) -> bool {
        let mut state = self.state.lock();
        let event_id = event.id.clone();
        let changed = match state.events.get_mut(&event_id) {
            Some(existing) => merge::merge_snapshot(existing, event),
            None => {
                state.events.insert(event_id.clone(), event);
                true
            }
        };
        if changed {
            state.publish_replaced(&event_id);
        }
        changed
    }

    /// Merge a live-data snapshot, creating a bare event when unknown
    pub fn upsert_live_data(&self, event_id: &str, live_data: &EventLiveData) -> bool {
        let mut state = self.state.lock();
        let created = !state.events.contains_key(event_id);
        let event = state
            .events
            .entry(event_id.to_string())
            .or_insert_with(|| Event::shell(event_id));
        let changed = merge::apply_live_data(event, live_data) || created;
        if changed {
            state.publish(event_id);
        }
        changed
    }

    /// Insert or replace a market, creating a bare event when unknown
    pub fn upsert_market(&self, event_id: &str, market: Market) -> bool {
        let mut state = self.state.lock();
        let event = state
            .events
            .entry(event_id.to_string())
            .or_insert_with(|| Event::shell(event_id));
        let changed = merge::upsert_market(event, market);
        if changed {
            state.publish_replaced(event_id);
        }
        changed
    }

    // ---- delta writes: unknown ids are a no-op ---------------------------

    pub fn merge_live_data(&self, event_id: &str, live_data: &EventLiveData) -> bool {
        self.mutate_event(event_id, |event| merge::apply_live_data(event, live_data))
    }

    pub fn update_event_status(&self, event_id: &str, status: &Status) -> bool {
        self.mutate_event(event_id, |event| merge::set_status(event, status))
    }

    pub fn update_event_time(&self, event_id: &str, match_time: &str) -> bool {
        self.mutate_event(event_id, |event| merge::set_match_time(event, match_time))
    }

    pub fn update_event_score(&self, event_id: &str, home: Option<u32>, away: Option<u32>) -> bool {
        self.mutate_event(event_id, |event| merge::set_score(event, home, away))
    }

    pub fn update_event_market_count(&self, event_id: &str, count: u32) -> bool {
        self.mutate_event(event_id, |event| merge::set_market_count(event, count))
    }

    /// Add a market to a known event
    pub fn add_market(&self, event_id: &str, market: Market) -> bool {
        let mut state = self.state.lock();
        let Some(event) = state.events.get_mut(event_id) else {
            trace!(event_id = %event_id, "Market for unknown event ignored");
            return false;
        };
        if !merge::upsert_market(event, market) {
            metrics::get().noop_deltas.inc();
            return false;
        }
        state.publish_replaced(event_id);
        metrics::get().deltas_applied.inc();
        true
    }

    pub fn update_outcome_odd(
        &self,
        outcome_id: &str,
        numerator: Option<u32>,
        denominator: Option<u32>,
    ) -> bool {
        self.mutate_owner(
            |state| state.outcome_index.get(outcome_id).cloned(),
            |event| merge::update_outcome_odd(event, outcome_id, numerator, denominator),
        )
    }

    pub fn update_outcome_tradability(&self, outcome_id: &str, is_tradable: bool) -> bool {
        self.mutate_owner(
            |state| state.outcome_index.get(outcome_id).cloned(),
            |event| merge::update_outcome_tradability(event, outcome_id, is_tradable),
        )
    }

    pub fn update_market_tradability(&self, market_id: &str, is_tradable: bool) -> bool {
        self.mutate_owner(
            |state| state.market_index.get(market_id).cloned(),
            |event| merge::update_market_tradability(event, market_id, is_tradable),
        )
    }

    // ---- resets ----------------------------------------------------------

    /// Drop an event and everything it owns from the table
    ///
    /// Observers keep their last snapshot; nothing is published. Deltas for the
    /// removed ids are ignored until a fresh snapshot stores the event again.
    pub fn remove_event(&self, event_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(event) = state.events.remove(event_id) else {
            return false;
        };
        for market in &event.markets {
            state.market_index.remove(&market.id);
            for outcome in &market.outcomes {
                state.outcome_index.remove(&outcome.id);
            }
        }
        state.prune_channels();
        debug!(event_id = %event_id, "Event removed from store");
        true
    }

    /// Drop one market from its event without publishing
    pub fn remove_market(&self, market_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(event_id) = state.market_index.remove(market_id) else {
            return false;
        };
        let Some(event) = state.events.get_mut(&event_id) else {
            return false;
        };
        let Some(position) = event.markets.iter().position(|m| m.id == market_id) else {
            return false;
        };
        let market = event.markets.remove(position);
        for outcome in &market.outcomes {
            state.outcome_index.remove(&outcome.id);
        }
        state.prune_channels();
        debug!(market_id = %market_id, event_id = %event_id, "Market removed from store");
        true
    }

    // ---- reads -----------------------------------------------------------

    /// Current snapshot of an event, shared with every other reader
    pub fn event(&self, event_id: &str) -> Option<Arc<Event>> {
        let state = self.state.lock();
        if !state.events.contains_key(event_id) {
            return None;
        }
        state
            .event_channels
            .get(event_id)
            .and_then(|channel| channel.borrow().clone())
    }

    pub fn market(&self, market_id: &str) -> Option<Arc<Market>> {
        let state = self.state.lock();
        if !state.has_market(market_id) {
            return None;
        }
        state
            .market_channels
            .get(market_id)
            .and_then(|channel| channel.borrow().clone())
    }

    pub fn outcome(&self, outcome_id: &str) -> Option<Arc<Outcome>> {
        let state = self.state.lock();
        if !state.has_outcome(outcome_id) {
            return None;
        }
        state
            .outcome_channels
            .get(outcome_id)
            .and_then(|channel| channel.borrow().clone())
    }

    pub fn contains_event(&self, event_id: &str) -> bool {
        self.state.lock().events.contains_key(event_id)
    }

    pub fn contains_market(&self, market_id: &str) -> bool {
        self.state.lock().has_market(market_id)
    }

    pub fn contains_outcome(&self, outcome_id: &str) -> bool {
        self.state.lock().has_outcome(outcome_id)
    }

    /// Number of snapshots published for an event so far
    pub fn revision(&self, event_id: &str) -> u64 {
        self.state
            .lock()
            .revisions
            .get(event_id)
            .copied()
            .unwrap_or(0)
    }

    // ---- observation -----------------------------------------------------

    /// Raw replay-latest channel for an event; `None` until the event is known
    ///
    /// Channels left without receivers for ids the table no longer holds are
    /// dropped on the way.
    pub fn watch_event(&self, event_id: &str) -> watch::Receiver<Option<Arc<Event>>> {
        let mut state = self.state.lock();
        state.prune_channels();
        channel(&mut state.event_channels, event_id).subscribe()
    }

    pub fn watch_market(&self, market_id: &str) -> watch::Receiver<Option<Arc<Market>>> {
        let mut state = self.state.lock();
        state.prune_channels();
        channel(&mut state.market_channels, market_id).subscribe()
    }

    pub fn watch_outcome(&self, outcome_id: &str) -> watch::Receiver<Option<Arc<Outcome>>> {
        let mut state = self.state.lock();
        state.prune_channels();
        channel(&mut state.outcome_channels, outcome_id).subscribe()
    }

    /// Current event snapshot followed by every later one
    pub fn observe_event(&self, event_id: &str) -> impl Stream<Item = Arc<Event>> + Send + Unpin {
        WatchStream::new(self.watch_event(event_id)).filter_map(|snapshot| snapshot)
    }

    pub fn observe_market(&self, market_id: &str) -> impl Stream<Item = Arc<Market>> + Send + Unpin {
        WatchStream::new(self.watch_market(market_id)).filter_map(|snapshot| snapshot)
    }

    pub fn observe_outcome(
        &self,
        outcome_id: &str,
    ) -> impl Stream<Item = Arc<Outcome>> + Send + Unpin {
        WatchStream::new(self.watch_outcome(outcome_id)).filter_map(|snapshot| snapshot)
    }

    // ---- internals -------------------------------------------------------

    fn mutate_event<F>(&self, event_id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Event) -> bool,
    {
        self.mutate_owner(|_| Some(event_id.to_string()), mutate)
    }

    /// Single write path: resolve the owning event, merge, publish on change
    fn mutate_owner<R, F>(&self, resolve: R, mutate: F) -> bool
    where
        R: FnOnce(&StoreState) -> Option<String>,
        F: FnOnce(&mut Event) -> bool,
    {
        let mut state = self.state.lock();
        let Some(event_id) = resolve(&state) else {
            trace!("Delta for unknown id ignored");
            return false;
        };
        let Some(event) = state.events.get_mut(&event_id) else {
            trace!(event_id = %event_id, "Delta for unknown event ignored");
            return false;
        };
        if !mutate(event) {
            metrics::get().noop_deltas.inc();
            return false;
        }
        state.publish(&event_id);
        metrics::get().deltas_applied.inc();
        true
    }
}

impl StoreState {
    fn has_market(&self, market_id: &str) -> bool {
        self.market_index
            .get(market_id)
            .and_then(|event_id| self.events.get(event_id))
            .map(|event| event.market(market_id).is_some())
            .unwrap_or(false)
    }

    fn has_outcome(&self, outcome_id: &str) -> bool {
        self.outcome_index
            .get(outcome_id)
            .and_then(|event_id| self.events.get(event_id))
            .map(|event| {
                event
                    .markets
                    .iter()
                    .any(|m| m.outcome(outcome_id).is_some())
            })
            .unwrap_or(false)
    }

    /// Publish after markets may have been replaced: stale index entries and
    /// idle channels of dropped markets and outcomes go first
    fn publish_replaced(&mut self, event_id: &str) {
        self.forget_stale(event_id);
        self.prune_channels();
        self.publish(event_id);
    }

    /// Drop index entries owned by the event that it no longer holds
    fn forget_stale(&mut self, event_id: &str) {
        let Some(event) = self.events.get(event_id) else {
            return;
        };
        self.market_index
            .retain(|id, owner| owner != event_id || event.market(id).is_some());
        self.outcome_index.retain(|id, owner| {
            owner != event_id || event.markets.iter().any(|m| m.outcome(id).is_some())
        });
    }

    /// Reindex an event and push every changed snapshot it contains
    fn publish(&mut self, event_id: &str) {
        let Some(event) = self.events.get(event_id) else {
            return;
        };

        for market in &event.markets {
            self.market_index
                .insert(market.id.clone(), event_id.to_string());
            for outcome in &market.outcomes {
                self.outcome_index
                    .insert(outcome.id.clone(), event_id.to_string());
            }
        }

        let published = send_if_changed(channel(&mut self.event_channels, event_id), event);
        if published {
            *self.revisions.entry(event_id.to_string()).or_default() += 1;
        }

        for market in &event.markets {
            send_if_changed(channel(&mut self.market_channels, &market.id), market);
            for outcome in &market.outcomes {
                send_if_changed(channel(&mut self.outcome_channels, &outcome.id), outcome);
            }
        }
    }

    /// Forget channels nobody listens to and whose entity left the table
    fn prune_channels(&mut self) {
        let events = &self.events;
        self.event_channels
            .retain(|id, tx| tx.receiver_count() > 0 || events.contains_key(id));
        let markets = &self.market_index;
        self.market_channels
            .retain(|id, tx| tx.receiver_count() > 0 || markets.contains_key(id));
        let outcomes = &self.outcome_index;
        self.outcome_channels
            .retain(|id, tx| tx.receiver_count() > 0 || outcomes.contains_key(id));
    }
}

fn channel<'a, T>(channels: &'a mut HashMap<String, Channel<T>>, id: &str) -> &'a Channel<T> {
    channels
        .entry(id.to_string())
        .or_insert_with(|| watch::channel(None).0)
}

fn send_if_changed<T: Clone + PartialEq>(channel: &Channel<T>, value: &T) -> bool {
    channel.send_if_modified(|current| {
        if current.as_deref() == Some(value) {
            return false;
        }
        *current = Some(Arc::new(value.clone()));
        true
    })
}
