//! Market details coordinator: odds and tradability of a single market

use std::sync::Arc;

use tracing::trace;

use super::{Coordinator, CoordinatorContext, MergeResult, TopicScope};
use crate::model::Market;
use crate::parser::Delta;
use crate::store::EntityStore;
use crate::topic::ContentIdentifier;

pub type MarketDetailsCoordinator = Coordinator<MarketDetailsScope>;

#[derive(Debug, Clone)]
pub struct MarketDetailsScope {
    market_id: String,
    /// Event owning the market in the store
    event_id: String,
}

impl MarketDetailsScope {
    pub fn new(market_id: impl Into<String>, event_id: impl Into<String>) -> Self {
        Self {
            market_id: market_id.into(),
            event_id: event_id.into(),
        }
    }

    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }
}

impl Coordinator<MarketDetailsScope> {
    pub fn market_details(
        market_id: impl Into<String>,
        event_id: impl Into<String>,
        ctx: CoordinatorContext,
    ) -> Arc<Self> {
        Self::new(MarketDetailsScope::new(market_id, event_id), ctx)
    }
}

impl TopicScope for MarketDetailsScope {
    type Content = Arc<Market>;

    fn primary(&self) -> ContentIdentifier {
        ContentIdentifier::market(&self.market_id)
    }

    fn apply(&self, store: &EntityStore, _: &ContentIdentifier, delta: &Delta) -> MergeResult {
        match delta {
            Delta::MarketDetails(market) if market.id == self.market_id => {
                store.upsert_market(&self.event_id, market.clone()).into()
            }
            Delta::AddMarket(market) if market.id == self.market_id => {
                let market = Market {
                    is_tradable: true,
                    ..market.clone()
                };
                store.upsert_market(&self.event_id, market).into()
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
            Delta::RemoveEvent { event_id } if *event_id == self.event_id => {
                store.remove_event(event_id);
                MergeResult::Removed
            }
            Delta::MarketDetails(_)
            | Delta::AddMarket(_)
            | Delta::RemoveEvent { .. }
            | Delta::EventDetails(_)
            | Delta::EventLiveData(_)
            | Delta::UpdateEventState { .. }
            | Delta::UpdateEventTime { .. }
            | Delta::UpdateEventScore { .. }
            | Delta::UpdateEventLiveDataExtended { .. }
            | Delta::UpdateEventMarketCount { .. } => {
                trace!(market_id = %self.market_id, kind = delta.kind(), "Delta ignored by market topic");
                MergeResult::Unchanged
            }
        }
    }

    fn snapshot(&self, store: &EntityStore) -> Option<Arc<Market>> {
        store.market(&self.market_id)
    }

    fn reset(&self, store: &EntityStore) {
        store.remove_market(&self.market_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::testing::{harness, settle};
    use crate::model::{Odd, Outcome};
    use crate::parser::ContentUpdate;
    use crate::subscription::SubscribableContent;
    use rust_decimal_macros::dec;

    fn on_market(delta: Delta) -> ContentUpdate {
        ContentUpdate::new(ContentIdentifier::market("M1"), delta)
    }

    fn match_result() -> Market {
        Market {
            id: "M1".to_string(),
            name: "Match Result".to_string(),
            is_tradable: true,
            is_main: true,
            outcomes: vec![Outcome {
                id: "O1".to_string(),
                name: "Lions".to_string(),
                odd: Odd::fraction(5, 2),
                is_tradable: true,
            }],
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_odds_flow_into_feed() {
        let h = harness();
        h.transport.push_handshake(1);
        let coordinator = MarketDetailsCoordinator::market_details("M1", "E1", h.ctx.clone());
        coordinator.start().await.unwrap();

        h.ctx
            .dispatcher
            .dispatch(&on_market(Delta::MarketDetails(match_result())));
        h.ctx.dispatcher.dispatch(&on_market(Delta::UpdateOutcomeOdd {
            outcome_id: "O1".to_string(),
            numerator: Some(3),
            denominator: None,
        }));

        let state = coordinator.current().unwrap();
        let market = state.content().unwrap();
        let odd = market.outcome("O1").unwrap().odd;
        assert_eq!(odd, Odd::fraction(3, 2));
        assert_eq!(odd.decimal(), Some(dec!(2.5)));
        assert!(h.ctx.store.contains_event("E1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_outcome_is_ignored() {
        let h = harness();
        h.transport.push_handshake(1);
        let coordinator = MarketDetailsCoordinator::market_details("M1", "E1", h.ctx.clone());
        coordinator.start().await.unwrap();
        h.ctx
            .dispatcher
            .dispatch(&on_market(Delta::MarketDetails(match_result())));
        let before = coordinator.current();

        h.ctx.dispatcher.dispatch(&on_market(Delta::UpdateOutcomeTradability {
            outcome_id: "O99".to_string(),
            is_tradable: false,
        }));
        assert_eq!(coordinator.current(), before);
        assert!(!h.ctx.store.contains_outcome("O99"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_drops_only_the_market() {
        let h = harness();
        h.transport.push_handshake(1);
        let coordinator = MarketDetailsCoordinator::market_details("M1", "E1", h.ctx.clone());
        coordinator.start().await.unwrap();
        h.ctx
            .dispatcher
            .dispatch(&on_market(Delta::MarketDetails(match_result())));

        h.transport.push_ok(r#"{"version":5}"#);
        h.ctx.tokens.rotate("tok-2");
        settle().await;

        assert!(h.ctx.store.contains_event("E1"));
        assert!(!h.ctx.store.contains_market("M1"));
        assert!(matches!(
            coordinator.current(),
            Ok(SubscribableContent::ContentUpdate(_))
        ));
    }
}
