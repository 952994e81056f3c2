//! Canned recommendation served when the model artefact is unavailable and
//! the stub fallback is enabled. The payload is schema-identical to a real
//! recommendation; only the timestamp and the start price are patched per
//! request.

use crate::models::{
    Analysis, FuelEconomicsPayload, ModelResponse, OptimalPrice, PriceRange, ScanRange,
    ZoneMetrics, ZonePayload, ZoneThresholds,
};
use chrono::{DateTime, Utc};
use pricing_core::util::round2;

const STUB_SCAN_MAX: f64 = 450.0;

pub fn stub_response(price_start_local: f64, now: DateTime<Utc>) -> ModelResponse {
    let start_price = round2(price_start_local);
    ModelResponse {
        zones: vec![
            ZonePayload {
                zone_id: 3,
                zone_name: "zone_3_green",
                price_range: PriceRange {
                    min: 180.0,
                    max: 225.0,
                },
                metrics: ZoneMetrics {
                    avg_probability_percent: 78.4,
                    avg_normalized_probability_percent: 96.2,
                    avg_expected_value: 158.73,
                },
            },
            ZonePayload {
                zone_id: 2,
                zone_name: "zone_2_yellow_low",
                price_range: PriceRange {
                    min: 226.36,
                    max: 301.82,
                },
                metrics: ZoneMetrics {
                    avg_probability_percent: 58.92,
                    avg_normalized_probability_percent: 72.3,
                    avg_expected_value: 155.61,
                },
            },
            ZonePayload {
                zone_id: 4,
                zone_name: "zone_4_yellow_high",
                price_range: PriceRange {
                    min: 303.18,
                    max: 381.36,
                },
                metrics: ZoneMetrics {
                    avg_probability_percent: 39.77,
                    avg_normalized_probability_percent: 48.8,
                    avg_expected_value: 136.14,
                },
            },
            ZonePayload {
                zone_id: 1,
                zone_name: "zone_1_red_low",
                price_range: PriceRange {
                    min: 382.73,
                    max: 450.0,
                },
                metrics: ZoneMetrics {
                    avg_probability_percent: 21.15,
                    avg_normalized_probability_percent: 25.95,
                    avg_expected_value: 88.06,
                },
            },
        ],
        optimal_price: OptimalPrice {
            price: 264.55,
            probability_percent: 62.4,
            normalized_probability_percent: 76.56,
            expected_value: 165.08,
            zone_id: 2,
            net_profit: 148.23,
        },
        zone_thresholds: ZoneThresholds::default(),
        fuel_economics: FuelEconomicsPayload {
            fuel_cost: 16.85,
            fuel_liters: 0.31,
            distance_km: 3.4,
            fuel_price_per_liter: 55.0,
            consumption_per_100km: 9.0,
            min_profitable_price: 21.9,
            net_profit_from_optimal: 148.23,
        },
        analysis: Analysis {
            start_price,
            max_probability_percent: 81.5,
            max_probability_price: 180.0,
            scan_range: ScanRange {
                min: start_price.min(STUB_SCAN_MAX),
                max: STUB_SCAN_MAX,
            },
            timestamp: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            price_increment: 1.36,
        },
    }
}
