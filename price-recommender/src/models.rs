//! Wire contract of the pricing endpoint: the inbound order request with
//! its validation rules and the response payload. Response structs are
//! declared in the exact key order the web UI consumes; serde serialises
//! fields in declaration order, which the schema-stability tests pin down.

use chrono::{DateTime, NaiveDate, Utc};
use pricing_core::engine::Recommendation;
use pricing_core::features::{self, OrderContext, Platform};
use pricing_core::util::round2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An order as submitted by the driver's client.
#[derive(Clone, Debug, Deserialize)]
pub struct OrderRequest {
    pub order_timestamp: i64,
    pub distance_in_meters: u64,
    pub duration_in_seconds: u64,
    pub pickup_in_meters: u64,
    pub pickup_in_seconds: u64,
    pub driver_rating: f64,
    pub platform: Platform,
    pub price_start_local: f64,
    #[serde(default)]
    pub carname: Option<String>,
    #[serde(default)]
    pub carmodel: Option<String>,
    #[serde(default)]
    pub driver_reg_date: Option<String>,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub driver_id: Option<u64>,
}

/// A constraint violation in the request body, reported with the offending
/// field.
#[derive(Clone, Debug)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> ValidationError {
    ValidationError {
        field,
        message: message.into(),
    }
}

impl OrderRequest {
    /// Enforces the constraints the type system cannot express. The engine
    /// is only entered with a request that passed this check.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.order_timestamp <= 0 {
            return Err(invalid(
                "order_timestamp",
                "must be a positive Unix timestamp in seconds",
            ));
        }
        if !self.driver_rating.is_finite()
            || self.driver_rating < 1.0
            || self.driver_rating > 5.0
        {
            return Err(invalid("driver_rating", "must lie in [1.0, 5.0]"));
        }
        if !self.price_start_local.is_finite() || self.price_start_local < 0.0 {
            return Err(invalid("price_start_local", "must be a non-negative number"));
        }
        Ok(())
    }

    /// Translates the request into the engine's context, substituting the
    /// documented defaults for every omitted (or unparseable) optional
    /// field.
    pub fn to_context(&self) -> OrderContext {
        let mut ctx = OrderContext::new(
            self.order_timestamp,
            self.distance_in_meters as f64,
            self.duration_in_seconds as f64,
            self.pickup_in_meters as f64,
            self.pickup_in_seconds as f64,
            self.price_start_local,
        );
        ctx.driver_rating = self.driver_rating;
        ctx.platform = self.platform;
        if let Some(carname) = &self.carname {
            ctx.carname = carname.clone();
        }
        if let Some(carmodel) = &self.carmodel {
            ctx.carmodel = carmodel.clone();
        }
        if let Some(date) = &self.driver_reg_date {
            ctx.driver_reg_date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .unwrap_or_else(|_| features::default_driver_reg_date());
        }
        ctx.user_id = self.user_id;
        ctx.driver_id = self.driver_id;
        ctx
    }
}

#[derive(Debug, Serialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Serialize)]
pub struct ZoneMetrics {
    pub avg_probability_percent: f64,
    pub avg_normalized_probability_percent: f64,
    pub avg_expected_value: f64,
}

#[derive(Debug, Serialize)]
pub struct ZonePayload {
    pub zone_id: u8,
    pub zone_name: &'static str,
    pub price_range: PriceRange,
    pub metrics: ZoneMetrics,
}

#[derive(Debug, Serialize)]
pub struct OptimalPrice {
    pub price: f64,
    pub probability_percent: f64,
    pub normalized_probability_percent: f64,
    pub expected_value: f64,
    pub zone_id: u8,
    pub net_profit: f64,
}

/// Opaque descriptions of the four probability bands; clients must not
/// parse these.
#[derive(Debug, Serialize)]
pub struct ZoneThresholds {
    pub green_zone: &'static str,
    pub yellow_low_zone: &'static str,
    pub yellow_high_zone: &'static str,
    pub red_zone: &'static str,
}

impl Default for ZoneThresholds {
    fn default() -> Self {
        Self {
            green_zone: "acceptance probability 70% or higher",
            yellow_low_zone: "acceptance probability between 50% and 70%",
            yellow_high_zone: "acceptance probability between 30% and 50%",
            red_zone: "acceptance probability below 30%",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FuelEconomicsPayload {
    pub fuel_cost: f64,
    pub fuel_liters: f64,
    pub distance_km: f64,
    pub fuel_price_per_liter: f64,
    pub consumption_per_100km: f64,
    pub min_profitable_price: f64,
    pub net_profit_from_optimal: f64,
}

#[derive(Debug, Serialize)]
pub struct ScanRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Serialize)]
pub struct Analysis {
    pub start_price: f64,
    pub max_probability_percent: f64,
    pub max_probability_price: f64,
    pub scan_range: ScanRange,
    pub timestamp: String,
    pub price_increment: f64,
}

/// The successful response of the pricing endpoint. Key order is part of
/// the contract.
#[derive(Debug, Serialize)]
pub struct ModelResponse {
    pub zones: Vec<ZonePayload>,
    pub optimal_price: OptimalPrice,
    pub zone_thresholds: ZoneThresholds,
    pub fuel_economics: FuelEconomicsPayload,
    pub analysis: Analysis,
}

impl ModelResponse {
    /// Assembles the payload from an engine recommendation, applying the
    /// two-decimal rounding of the contract.
    pub fn from_recommendation(recommendation: &Recommendation, now: DateTime<Utc>) -> Self {
        let optimum = &recommendation.optimum;
        let fuel = &recommendation.fuel;
        let analysis = &recommendation.analysis;
        // Net profit is derived from the rounded wire values so the fuel law
        // holds exactly on the emitted payload.
        let expected_value = round2(optimum.expected_value);
        let fuel_cost = round2(fuel.fuel_cost);
        let net_profit = round2(expected_value - fuel_cost);
        Self {
            zones: recommendation
                .zones
                .iter()
                .map(|zone| ZonePayload {
                    zone_id: zone.zone_id,
                    zone_name: zone.zone_name,
                    price_range: PriceRange {
                        min: round2(zone.price_min),
                        max: round2(zone.price_max),
                    },
                    metrics: ZoneMetrics {
                        avg_probability_percent: round2(zone.avg_probability * 100.0),
                        avg_normalized_probability_percent: round2(
                            zone.avg_normalized_probability * 100.0,
                        ),
                        avg_expected_value: round2(zone.avg_expected_value),
                    },
                })
                .collect(),
            optimal_price: OptimalPrice {
                price: round2(optimum.price),
                probability_percent: round2(optimum.probability * 100.0),
                normalized_probability_percent: round2(optimum.normalized_probability * 100.0),
                expected_value,
                zone_id: optimum.zone_id,
                net_profit,
            },
            zone_thresholds: ZoneThresholds::default(),
            fuel_economics: FuelEconomicsPayload {
                fuel_cost,
                fuel_liters: round2(fuel.fuel_liters),
                distance_km: round2(fuel.distance_km),
                fuel_price_per_liter: round2(fuel.price_per_liter),
                consumption_per_100km: round2(fuel.consumption_per_100km),
                min_profitable_price: round2(fuel.min_profitable_price),
                net_profit_from_optimal: net_profit,
            },
            analysis: Analysis {
                start_price: round2(analysis.start_price),
                max_probability_percent: round2(analysis.max_probability * 100.0),
                max_probability_price: round2(analysis.max_probability_price),
                scan_range: ScanRange {
                    min: round2(analysis.scan_min),
                    max: round2(analysis.scan_max),
                },
                timestamp: now.format("%Y-%m-%d %H:%M:%S").to_string(),
                price_increment: round2(analysis.price_increment),
            },
        }
    }
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// Body of a successful token request.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}
