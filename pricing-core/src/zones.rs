//! Partitioning of scored candidates into acceptance-probability zones.
//!
//! Four bands: green at 70% and above, two yellow bands down to 30% and red
//! below that. A zone is only emitted when the scan produced at least one
//! candidate in its band; zones are reported in ascending price order.

use crate::scan::Candidate;

const NORM_GUARD: f64 = 1e-9;

/// Probability band boundaries, also documented in the response contract.
pub const GREEN_THRESHOLD: f64 = 0.70;
pub const YELLOW_LOW_THRESHOLD: f64 = 0.50;
pub const YELLOW_HIGH_THRESHOLD: f64 = 0.30;

/// Identifier of the zone the optimum defaults to when nothing else fits.
const DEFAULT_OPTIMAL_ZONE: u8 = 3;

/// One non-empty probability band over the scanned candidates.
#[derive(Clone, Debug, PartialEq)]
pub struct Zone {
    pub zone_id: u8,
    pub zone_name: &'static str,
    pub price_min: f64,
    pub price_max: f64,
    pub avg_probability: f64,
    pub avg_normalized_probability: f64,
    pub avg_expected_value: f64,
}

fn band(probability: f64) -> (u8, &'static str) {
    if probability >= GREEN_THRESHOLD {
        (3, "zone_3_green")
    } else if probability >= YELLOW_LOW_THRESHOLD {
        (2, "zone_2_yellow_low")
    } else if probability >= YELLOW_HIGH_THRESHOLD {
        (4, "zone_4_yellow_high")
    } else {
        (1, "zone_1_red_low")
    }
}

/// Groups the scanned candidates into zones, sorted by ascending minimum
/// price. `max_probability` is the scan-wide maximum used for the
/// normalised aggregate.
pub fn assign(candidates: &[Candidate], max_probability: f64) -> Vec<Zone> {
    let norm = max_probability.max(NORM_GUARD);
    let mut zones = Vec::with_capacity(4);
    for &(zone_id, zone_name) in &[
        (1, "zone_1_red_low"),
        (2, "zone_2_yellow_low"),
        (3, "zone_3_green"),
        (4, "zone_4_yellow_high"),
    ] {
        let members: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| band(c.probability).0 == zone_id)
            .collect();
        if members.is_empty() {
            continue;
        }
        let count = members.len() as f64;
        let avg_probability = members.iter().map(|c| c.probability).sum::<f64>() / count;
        zones.push(Zone {
            zone_id,
            zone_name,
            price_min: members.iter().map(|c| c.price).fold(f64::MAX, f64::min),
            price_max: members.iter().map(|c| c.price).fold(f64::MIN, f64::max),
            avg_probability,
            avg_normalized_probability: avg_probability / norm,
            avg_expected_value: members.iter().map(|c| c.expected_value).sum::<f64>() / count,
        });
    }
    zones.sort_by(|a, b| a.price_min.partial_cmp(&b.price_min).unwrap());
    zones
}

/// Zone the optimum falls into: its probability band when that band was
/// emitted, otherwise the emitted zone with the highest average probability,
/// defaulting to green when nothing was emitted at all.
pub fn optimal_zone_id(zones: &[Zone], optimum_probability: f64) -> u8 {
    let (band_id, _) = band(optimum_probability);
    if zones.iter().any(|z| z.zone_id == band_id) {
        return band_id;
    }
    zones
        .iter()
        .max_by(|a, b| a.avg_probability.partial_cmp(&b.avg_probability).unwrap())
        .map(|z| z.zone_id)
        .unwrap_or(DEFAULT_OPTIMAL_ZONE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn candidate(price: f64, probability: f64) -> Candidate {
        Candidate {
            price,
            probability,
            expected_value: price * probability,
        }
    }

    /// Probability decays with price through all four bands.
    fn full_spread() -> Vec<Candidate> {
        vec![
            candidate(100.0, 0.95),
            candidate(120.0, 0.75),
            candidate(140.0, 0.65),
            candidate(160.0, 0.55),
            candidate(180.0, 0.45),
            candidate(200.0, 0.35),
            candidate(220.0, 0.20),
            candidate(240.0, 0.05),
        ]
    }

    #[test]
    fn band_boundaries_are_inclusive_lower() {
        assert_eq!(band(0.70).0, 3);
        assert_eq!(band(0.50).0, 2);
        assert_eq!(band(0.30).0, 4);
        assert_eq!(band(0.299_999).0, 1);
        assert_eq!(band(1.0).0, 3);
        assert_eq!(band(0.0).0, 1);
    }

    #[test]
    fn emits_only_populated_zones_in_price_order() {
        let zones = assign(&full_spread(), 0.95);
        assert_eq!(zones.len(), 4);
        let ids: Vec<u8> = zones.iter().map(|z| z.zone_id).collect();
        assert_eq!(ids, vec![3, 2, 4, 1]);
        for pair in zones.windows(2) {
            assert!(pair[0].price_min <= pair[1].price_min);
        }
        for zone in &zones {
            assert!(zone.price_min <= zone.price_max);
        }
    }

    #[test]
    fn zone_aggregates() {
        let zones = assign(&full_spread(), 0.95);
        let green = zones.iter().find(|z| z.zone_id == 3).unwrap();
        assert_approx_eq!(green.price_min, 100.0);
        assert_approx_eq!(green.price_max, 120.0);
        assert_approx_eq!(green.avg_probability, 0.85);
        assert_approx_eq!(green.avg_normalized_probability, 0.85 / 0.95);
        assert_approx_eq!(green.avg_expected_value, (95.0 + 90.0) / 2.0);
    }

    #[test]
    fn sparse_scan_emits_fewer_zones() {
        let candidates = vec![candidate(100.0, 0.8), candidate(200.0, 0.75)];
        let zones = assign(&candidates, 0.8);
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].zone_id, 3);
        assert_approx_eq!(zones[0].price_min, 100.0);
        assert_approx_eq!(zones[0].price_max, 200.0);
    }

    #[test]
    fn optimum_lands_in_its_band() {
        let zones = assign(&full_spread(), 0.95);
        assert_eq!(optimal_zone_id(&zones, 0.72), 3);
        assert_eq!(optimal_zone_id(&zones, 0.55), 2);
        assert_eq!(optimal_zone_id(&zones, 0.40), 4);
        assert_eq!(optimal_zone_id(&zones, 0.10), 1);
    }

    #[test]
    fn missing_band_falls_back_to_highest_average_probability() {
        // No candidate reaches the green band.
        let candidates = vec![
            candidate(100.0, 0.60),
            candidate(150.0, 0.40),
            candidate(200.0, 0.10),
        ];
        let zones = assign(&candidates, 0.60);
        assert_eq!(optimal_zone_id(&zones, 0.71), 2);
    }

    #[test]
    fn no_zones_defaults_to_green() {
        assert_eq!(optimal_zone_id(&[], 0.5), 3);
    }

    #[test]
    fn zero_probability_scan_is_one_red_zone() {
        let candidates = vec![candidate(100.0, 0.0), candidate(200.0, 0.0)];
        let zones = assign(&candidates, 0.0);
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].zone_id, 1);
        assert_approx_eq!(zones[0].avg_normalized_probability, 0.0);
    }
}
