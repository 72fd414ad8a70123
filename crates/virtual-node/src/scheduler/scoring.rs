//! Offer scoring and ranking.
//!
//! Every admitted offer gets a score in `[0, 1]` built from four weighted
//! components. Ranking is fully deterministic: ties on score are broken by
//! price, then reliability, then offer id.

use std::cmp::Ordering;

use api_types::InstanceOffer;
use api_types::SearchCriteria;

pub const PRICE_WEIGHT: f64 = 0.40;
pub const RELIABILITY_WEIGHT: f64 = 0.40;
pub const BANDWIDTH_WEIGHT: f64 = 0.15;
pub const REGION_WEIGHT: f64 = 0.05;

/// Bandwidth reference used when the criteria set no floor.
const REFERENCE_BANDWIDTH_MBPS: f64 = 100.0;

/// A scored offer together with a human readable breakdown.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceScore {
    pub offer: InstanceOffer,
    pub score: f64,
    pub notes: Vec<String>,
}

/// Score a single offer against the criteria.
///
/// Does not check hard constraints; callers filter with
/// [`SearchCriteria::admits`] first.
pub fn score_offer(offer: &InstanceOffer, criteria: &SearchCriteria) -> InstanceScore {
    let price = price_component(offer.dph_total, criteria.max_price_per_hour);
    let reliability = offer.reliability.clamp(0.0, 1.0);
    let bandwidth = bandwidth_component(offer, criteria);
    let region = region_component(offer, criteria);

    let score = PRICE_WEIGHT * price
        + RELIABILITY_WEIGHT * reliability
        + BANDWIDTH_WEIGHT * bandwidth
        + REGION_WEIGHT * region;

    let mut notes = vec![
        format!("price ${:.3}/h ({price:.2})", offer.dph_total),
        format!("reliability {reliability:.3}"),
        format!(
            "bandwidth {:.0}/{:.0} Mbps ({bandwidth:.2})",
            offer.inet_up_mbps, offer.inet_down_mbps
        ),
    ];
    if region > 0.0 {
        notes.push(format!(
            "preferred region {}",
            offer.geolocation.as_deref().unwrap_or_default()
        ));
    }

    InstanceScore {
        offer: offer.clone(),
        score,
        notes,
    }
}

/// Filter offers by the criteria and order them best first.
pub fn rank_offers(offers: &[InstanceOffer], criteria: &SearchCriteria) -> Vec<InstanceScore> {
    let mut scored: Vec<InstanceScore> = offers
        .iter()
        .filter(|offer| criteria.admits(offer))
        .map(|offer| score_offer(offer, criteria))
        .collect();
    scored.sort_by(compare_scores);
    scored
}

fn compare_scores(a: &InstanceScore, b: &InstanceScore) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.offer.dph_total.total_cmp(&b.offer.dph_total))
        .then_with(|| b.offer.reliability.total_cmp(&a.offer.reliability))
        .then_with(|| a.offer.id.cmp(&b.offer.id))
}

fn price_component(price: f64, max_price: f64) -> f64 {
    if max_price <= 0.0 || !max_price.is_finite() {
        return 0.0;
    }
    (1.0 - price / max_price).clamp(0.0, 1.0)
}

/// Saturates once both directions reach twice their floor.
fn bandwidth_component(offer: &InstanceOffer, criteria: &SearchCriteria) -> f64 {
    let floor = |min: f64| {
        if min > 0.0 {
            min
        } else {
            REFERENCE_BANDWIDTH_MBPS
        }
    };
    let up = offer.inet_up_mbps / floor(criteria.min_inet_up_mbps);
    let down = offer.inet_down_mbps / floor(criteria.min_inet_down_mbps);
    (up.min(down) / 2.0).clamp(0.0, 1.0)
}

fn region_component(offer: &InstanceOffer, criteria: &SearchCriteria) -> f64 {
    let regions = criteria.preferred_regions.len();
    match criteria.region_rank(offer.geolocation.as_deref()) {
        Some(rank) if regions > 0 => 1.0 - rank as f64 / regions as f64,
        _ => 0.0,
    }
}
