//! Field-level merges on the canonical event
//!
//! Every function returns `true` only when a field actually changed. Absent
//! values in a partial update never clear an existing field.

use crate::model::{Event, EventLiveData, Market, Status};

pub(crate) fn set_status(event: &mut Event, status: &Status) -> bool {
    if event.status == *status {
        return false;
    }
    event.status = status.clone();
    true
}

pub(crate) fn set_match_time(event: &mut Event, match_time: &str) -> bool {
    if event.match_time.as_deref() == Some(match_time) {
        return false;
    }
    event.match_time = Some(match_time.to_string());
    true
}

pub(crate) fn set_score(event: &mut Event, home: Option<u32>, away: Option<u32>) -> bool {
    let mut changed = false;
    if let Some(home) = home {
        if event.home_score != Some(home) {
            event.home_score = Some(home);
            changed = true;
        }
    }
    if let Some(away) = away {
        if event.away_score != Some(away) {
            event.away_score = Some(away);
            changed = true;
        }
    }
    changed
}

pub(crate) fn set_market_count(event: &mut Event, count: u32) -> bool {
    if event.market_count == Some(count) {
        return false;
    }
    event.market_count = Some(count);
    true
}

/// Merge every field present in the bundle
pub(crate) fn apply_live_data(event: &mut Event, live_data: &EventLiveData) -> bool {
    let mut changed = false;
    if let Some(status) = &live_data.status {
        changed |= set_status(event, status);
    }
    if let Some(match_time) = &live_data.match_time {
        changed |= set_match_time(event, match_time);
    }
    changed |= set_score(event, live_data.home_score, live_data.away_score);
    changed
}

pub(crate) fn update_outcome_odd(
    event: &mut Event,
    outcome_id: &str,
    numerator: Option<u32>,
    denominator: Option<u32>,
) -> bool {
    if numerator.is_none() && denominator.is_none() {
        return false;
    }
    let Some(outcome) = event
        .markets
        .iter_mut()
        .flat_map(|m| m.outcomes.iter_mut())
        .find(|o| o.id == outcome_id)
    else {
        return false;
    };

    let odd = outcome.odd.with_fraction_parts(numerator, denominator);
    if odd == outcome.odd {
        return false;
    }
    outcome.odd = odd;
    true
}

pub(crate) fn update_outcome_tradability(
    event: &mut Event,
    outcome_id: &str,
    is_tradable: bool,
) -> bool {
    match event
        .markets
        .iter_mut()
        .flat_map(|m| m.outcomes.iter_mut())
        .find(|o| o.id == outcome_id)
    {
        Some(outcome) if outcome.is_tradable != is_tradable => {
            outcome.is_tradable = is_tradable;
            true
        }
        _ => false,
    }
}

pub(crate) fn update_market_tradability(event: &mut Event, market_id: &str, is_tradable: bool) -> bool {
    match event.markets.iter_mut().find(|m| m.id == market_id) {
        Some(market) if market.is_tradable != is_tradable => {
            market.is_tradable = is_tradable;
            true
        }
        _ => false,
    }
}

/// Insert a market, replacing any market with the same id in place
///
/// The main-market flag is owned by the main-market topic, so a snapshot that
/// does not set it keeps the existing value.
pub(crate) fn upsert_market(event: &mut Event, market: Market) -> bool {
    match event.markets.iter_mut().find(|m| m.id == market.id) {
        Some(existing) => {
            let market = Market {
                is_main: market.is_main || existing.is_main,
                ..market
            };
            if *existing == market {
                return false;
            }
            *existing = market;
            true
        }
        None => {
            event.markets.push(market);
            true
        }
    }
}

/// Merge a full event snapshot into the canonical copy
///
/// Descriptive fields are taken from the snapshot, live fields only where the
/// snapshot carries them, and markets are upserted by id.
pub(crate) fn merge_snapshot(event: &mut Event, snapshot: Event) -> bool {
    let Event {
        id: _,
        home_participant,
        away_participant,
        competition,
        start_date,
        status,
        home_score,
        away_score,
        match_time,
        market_count,
        markets,
    } = snapshot;

    let mut changed = false;

    if event.home_participant != home_participant {
        event.home_participant = home_participant;
        changed = true;
    }
    if event.away_participant != away_participant {
        event.away_participant = away_participant;
        changed = true;
    }
    if competition.is_some() && event.competition != competition {
        event.competition = competition;
        changed = true;
    }
    if start_date.is_some() && event.start_date != start_date {
        event.start_date = start_date;
        changed = true;
    }
    if status != Status::Unknown {
        changed |= set_status(event, &status);
    }
    if let Some(match_time) = &match_time {
        changed |= set_match_time(event, match_time);
    }
    changed |= set_score(event, home_score, away_score);
    if let Some(count) = market_count {
        changed |= set_market_count(event, count);
    }
    for market in markets {
        changed |= upsert_market(event, market);
    }

    changed
}
