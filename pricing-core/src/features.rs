//! Feature construction for the acceptance classifier.
//!
//! Translates one `(order, candidate price)` pair into a numeric row in the
//! exact column order the model was trained with. The builder is pure: the
//! same context and price always produce the same row. Columns the model
//! does not know are dropped, columns the builder does not produce stay at
//! `0.0`, so artefacts with shuffled or reduced feature lists score
//! identically to the canonical layout.

pub mod vehicle;

use self::vehicle::{detect_taxi_type, TaxiType};
use crate::fuel;
use crate::history::HistoryFeatures;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::Deserialize;
use std::collections::HashMap;
use std::f64::consts::PI;

/// Epsilon added to denominators so ratios stay finite on degenerate trips.
const EPS: f64 = 0.1;
/// Every cell is clipped into this range after non-finite replacement.
const VALUE_CLIP: f64 = 1e10;
/// Driver response time is unknown at recommendation time; the model was
/// trained with this substitute.
const DEFAULT_RESPONSE_TIME_SECONDS: f64 = 30.0;

pub const DEFAULT_CARNAME: &str = "Renault";
pub const DEFAULT_CARMODEL: &str = "Logan";
pub const DEFAULT_DRIVER_RATING: f64 = 5.0;

/// Registration date substituted when the order does not carry one.
pub fn default_driver_reg_date() -> NaiveDate {
    NaiveDate::from_ymd(2020, 1, 1)
}

/// Client platform of the rider placing the order.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
    Web,
}

/// Validated order attributes together with the defaults for everything the
/// request may omit. This is the engine's view of a request; the HTTP layer
/// owns the wire contract.
#[derive(Clone, Debug)]
pub struct OrderContext {
    pub order_timestamp: i64,
    pub distance_in_meters: f64,
    pub duration_in_seconds: f64,
    pub pickup_in_meters: f64,
    pub pickup_in_seconds: f64,
    pub driver_rating: f64,
    pub platform: Platform,
    pub price_start_local: f64,
    pub carname: String,
    pub carmodel: String,
    pub driver_reg_date: NaiveDate,
    pub user_id: Option<u64>,
    pub driver_id: Option<u64>,
}

impl OrderContext {
    /// Creates a context from the required order attributes, substituting
    /// the documented defaults for everything optional.
    pub fn new(
        order_timestamp: i64,
        distance_in_meters: f64,
        duration_in_seconds: f64,
        pickup_in_meters: f64,
        pickup_in_seconds: f64,
        price_start_local: f64,
    ) -> Self {
        Self {
            order_timestamp,
            distance_in_meters,
            duration_in_seconds,
            pickup_in_meters,
            pickup_in_seconds,
            driver_rating: DEFAULT_DRIVER_RATING,
            platform: Platform::Android,
            price_start_local,
            carname: DEFAULT_CARNAME.to_owned(),
            carmodel: DEFAULT_CARMODEL.to_owned(),
            driver_reg_date: default_driver_reg_date(),
            user_id: None,
            driver_id: None,
        }
    }
}

/// Calendar fields extracted from the order timestamp (UTC).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeParts {
    pub hour: u32,
    /// Monday is 0, Sunday is 6.
    pub weekday: u32,
    pub day_of_month: u32,
}

impl TimeParts {
    pub fn is_weekend(&self) -> bool {
        self.weekday >= 5
    }

    pub fn is_night(&self) -> bool {
        self.hour < 6 || self.hour >= 22
    }

    pub fn is_morning_peak(&self) -> bool {
        (7..=9).contains(&self.hour)
    }

    pub fn is_evening_peak(&self) -> bool {
        (17..=20).contains(&self.hour)
    }

    pub fn is_peak(&self) -> bool {
        self.is_morning_peak() || self.is_evening_peak()
    }
}

/// Splits a Unix timestamp into the calendar parts the pipeline keys off.
pub fn time_parts(timestamp: i64) -> TimeParts {
    let datetime = NaiveDateTime::from_timestamp_opt(timestamp, 0)
        .unwrap_or_else(|| NaiveDateTime::from_timestamp(0, 0));
    TimeParts {
        hour: datetime.hour(),
        weekday: datetime.weekday().num_days_from_monday(),
        day_of_month: datetime.day(),
    }
}

/// Column-name-to-index map derived from the artefact's `feature_names`.
#[derive(Clone, Debug)]
pub struct FeatureSchema {
    index: HashMap<String, usize>,
    width: usize,
}

impl FeatureSchema {
    pub fn new(feature_names: &[String]) -> Self {
        Self {
            index: feature_names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect(),
            width: feature_names.len(),
        }
    }

    /// Number of columns the model expects.
    pub fn width(&self) -> usize {
        self.width
    }

    fn slot(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }
}

/// Dense row-major matrix handed to the model in one batch.
#[derive(Clone, Debug)]
pub struct FeatureMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    pub fn zeroed(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.cols..(i + 1) * self.cols]
    }
}

/// The full derived feature set in canonical training order. The artefact's
/// own `feature_names` list is authoritative at inference; this list seeds
/// the offline trainer and the test fixtures.
pub const CANONICAL_FEATURE_NAMES: &[&str] = &[
    "price_bid_local",
    "price_start_local",
    "price_increase_abs",
    "price_increase_pct",
    "is_price_increased",
    "price_per_km",
    "price_per_minute",
    "hour_sin",
    "hour_cos",
    "day_of_week",
    "day_sin",
    "day_cos",
    "is_weekend",
    "is_morning_peak",
    "is_evening_peak",
    "is_peak_hour",
    "is_night",
    "is_lunch_time",
    "distance_in_meters",
    "duration_in_seconds",
    "distance_km",
    "duration_min",
    "avg_speed_kmh",
    "is_traffic_jam",
    "is_highway",
    "is_short_trip",
    "is_medium_trip",
    "is_long_trip",
    "pickup_in_meters",
    "pickup_in_seconds",
    "pickup_km",
    "pickup_speed_kmh",
    "pickup_to_trip_ratio",
    "pickup_time_ratio",
    "total_distance",
    "total_time",
    "driver_rating",
    "driver_experience_days",
    "driver_experience_years",
    "is_new_driver",
    "is_experienced_driver",
    "has_perfect_rating",
    "rating_deviation",
    "response_time_seconds",
    "response_time_log",
    "is_fast_response",
    "is_slow_response",
    "taxi_type_economy",
    "taxi_type_comfort",
    "taxi_type_business",
    "platform_android",
    "platform_ios",
    "price_inc_x_distance",
    "price_inc_x_night",
    "price_inc_x_peak",
    "price_inc_x_weekend",
    "distance_x_night",
    "distance_x_weekend",
    "distance_x_peak",
    "speed_x_peak",
    "rating_x_price_inc",
    "experience_x_price_inc",
    "fuel_cost_rub",
    "fuel_liters",
    "price_to_fuel_ratio",
    "min_profitable_price",
    "price_above_min_profitable",
    "price_above_min_profitable_pct",
    "is_highly_profitable",
    "is_profitable",
    "is_unprofitable",
    "net_profit",
    "net_profit_per_km",
    "net_profit_per_minute",
    "fuel_ratio_x_distance",
    "fuel_ratio_x_peak",
    "net_profit_x_rating",
    "user_order_count",
    "user_acceptance_rate",
    "user_avg_price_ratio",
    "user_is_new",
    "user_is_vip",
    "user_is_price_sensitive",
    "driver_bid_count",
    "driver_acceptance_rate",
    "driver_avg_bid_ratio",
    "driver_is_active",
    "driver_is_aggressive",
    "driver_is_flexible",
    "user_driver_match_score",
    "price_vs_user_avg",
    "price_vs_driver_avg",
    "route_efficiency",
    "is_very_short",
    "is_very_long",
    "pickup_burden",
    "day_of_month",
    "is_month_start",
    "is_month_end",
    "hour_quartile",
];

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.max(-VALUE_CLIP).min(VALUE_CLIP)
    } else {
        0.0
    }
}

/// Builds the feature matrix for a batch of candidate prices over one order.
pub fn build_matrix(
    schema: &FeatureSchema,
    ctx: &OrderContext,
    history: &HistoryFeatures,
    candidate_prices: &[f64],
) -> FeatureMatrix {
    let mut matrix = FeatureMatrix::zeroed(candidate_prices.len(), schema.width());
    for (i, &price) in candidate_prices.iter().enumerate() {
        build_row(schema, ctx, history, price, matrix.row_mut(i));
    }
    matrix
}

/// Writes the feature row for a single candidate price. `row` must have
/// `schema.width()` entries; slots for columns the builder does not produce
/// are left untouched (zero in a fresh matrix).
pub fn build_row(
    schema: &FeatureSchema,
    ctx: &OrderContext,
    history: &HistoryFeatures,
    candidate_price: f64,
    row: &mut [f64],
) {
    debug_assert_eq!(row.len(), schema.width());
    let mut set = |name: &str, value: f64| {
        if let Some(slot) = schema.slot(name) {
            row[slot] = sanitize(value);
        }
    };

    let bid = candidate_price;
    let start = ctx.price_start_local;
    let time = time_parts(ctx.order_timestamp);
    let hour = time.hour as f64;
    let weekday = time.weekday as f64;

    let distance_km = ctx.distance_in_meters / 1000.0;
    let duration_min = ctx.duration_in_seconds / 60.0;
    let pickup_km = ctx.pickup_in_meters / 1000.0;

    // Price family.
    let price_increase_pct = (bid - start) / (start + EPS) * 100.0;
    set("price_bid_local", bid);
    set("price_start_local", start);
    set("price_increase_abs", bid - start);
    set("price_increase_pct", price_increase_pct);
    set("is_price_increased", flag(price_increase_pct > 0.0));
    set("price_per_km", bid / (distance_km + EPS));
    set("price_per_minute", bid / (duration_min + EPS));

    // Time family.
    let is_weekend = flag(time.is_weekend());
    let is_peak = flag(time.is_peak());
    let is_night = flag(time.is_night());
    set("hour_sin", (2.0 * PI * hour / 24.0).sin());
    set("hour_cos", (2.0 * PI * hour / 24.0).cos());
    set("day_of_week", weekday);
    set("day_sin", (2.0 * PI * weekday / 7.0).sin());
    set("day_cos", (2.0 * PI * weekday / 7.0).cos());
    set("is_weekend", is_weekend);
    set("is_morning_peak", flag(time.is_morning_peak()));
    set("is_evening_peak", flag(time.is_evening_peak()));
    set("is_peak_hour", is_peak);
    set("is_night", is_night);
    set("is_lunch_time", flag((12..=14).contains(&time.hour)));

    // Trip family.
    let avg_speed_kmh = (ctx.distance_in_meters / (ctx.duration_in_seconds + EPS) * 3.6)
        .max(0.0)
        .min(150.0);
    set("distance_in_meters", ctx.distance_in_meters);
    set("duration_in_seconds", ctx.duration_in_seconds);
    set("distance_km", distance_km);
    set("duration_min", duration_min);
    set("avg_speed_kmh", avg_speed_kmh);
    set("is_traffic_jam", flag(avg_speed_kmh < 15.0));
    set("is_highway", flag(avg_speed_kmh > 50.0));
    set("is_short_trip", flag(distance_km < 2.0));
    set(
        "is_medium_trip",
        flag((2.0..10.0).contains(&distance_km)),
    );
    set("is_long_trip", flag(distance_km >= 10.0));

    // Pickup family.
    let pickup_speed_kmh = (ctx.pickup_in_meters / (ctx.pickup_in_seconds + EPS) * 3.6)
        .max(0.0)
        .min(150.0);
    set("pickup_in_meters", ctx.pickup_in_meters);
    set("pickup_in_seconds", ctx.pickup_in_seconds);
    set("pickup_km", pickup_km);
    set("pickup_speed_kmh", pickup_speed_kmh);
    set(
        "pickup_to_trip_ratio",
        (ctx.pickup_in_meters / (ctx.distance_in_meters + 1.0))
            .max(0.0)
            .min(10.0),
    );
    set(
        "pickup_time_ratio",
        (ctx.pickup_in_seconds / (ctx.duration_in_seconds + 1.0))
            .max(0.0)
            .min(10.0),
    );
    set("total_distance", ctx.pickup_in_meters + ctx.distance_in_meters);
    set("total_time", ctx.pickup_in_seconds + ctx.duration_in_seconds);

    // Driver family.
    let order_date = NaiveDateTime::from_timestamp_opt(ctx.order_timestamp, 0)
        .unwrap_or_else(|| NaiveDateTime::from_timestamp(0, 0))
        .date();
    let experience_days = ((order_date - ctx.driver_reg_date).num_days() as f64)
        .max(0.0)
        .min(3650.0);
    let experience_years = experience_days / 365.25;
    let response_time = DEFAULT_RESPONSE_TIME_SECONDS.max(0.0).min(600.0);
    set("driver_rating", ctx.driver_rating);
    set("driver_experience_days", experience_days);
    set("driver_experience_years", experience_years);
    set("is_new_driver", flag(experience_days < 30.0));
    set("is_experienced_driver", flag(experience_days > 365.0));
    set("has_perfect_rating", flag(ctx.driver_rating == 5.0));
    set("rating_deviation", 5.0 - ctx.driver_rating);
    set("response_time_seconds", response_time);
    set("response_time_log", response_time.ln_1p());
    set("is_fast_response", flag(response_time < 10.0));
    set("is_slow_response", flag(response_time > 60.0));

    // Vehicle family.
    let taxi_type = detect_taxi_type(&ctx.carname, &ctx.carmodel);
    set("taxi_type_economy", flag(taxi_type == TaxiType::Economy));
    set("taxi_type_comfort", flag(taxi_type == TaxiType::Comfort));
    set("taxi_type_business", flag(taxi_type == TaxiType::Business));
    set("platform_android", flag(ctx.platform == Platform::Android));
    set("platform_ios", flag(ctx.platform == Platform::Ios));

    // Interactions.
    set("price_inc_x_distance", price_increase_pct * distance_km);
    set("price_inc_x_night", price_increase_pct * is_night);
    set("price_inc_x_peak", price_increase_pct * is_peak);
    set("price_inc_x_weekend", price_increase_pct * is_weekend);
    set("distance_x_night", distance_km * is_night);
    set("distance_x_weekend", distance_km * is_weekend);
    set("distance_x_peak", distance_km * is_peak);
    set("speed_x_peak", avg_speed_kmh * is_peak);
    set("rating_x_price_inc", ctx.driver_rating * price_increase_pct);
    set("experience_x_price_inc", experience_years * price_increase_pct);

    // Fuel family.
    let fuel = fuel::FuelEconomics::for_distance(ctx.distance_in_meters);
    let net_profit = bid - fuel.fuel_cost;
    let price_to_fuel_ratio = bid / (fuel.fuel_cost + EPS);
    set("fuel_cost_rub", fuel.fuel_cost);
    set("fuel_liters", fuel.fuel_liters);
    set("price_to_fuel_ratio", price_to_fuel_ratio);
    set("min_profitable_price", fuel.min_profitable_price);
    set(
        "price_above_min_profitable",
        bid - fuel.min_profitable_price,
    );
    set(
        "price_above_min_profitable_pct",
        (bid - fuel.min_profitable_price) / (fuel.min_profitable_price + EPS) * 100.0,
    );
    set(
        "is_highly_profitable",
        flag(bid >= fuel.min_profitable_price * 2.0),
    );
    set("is_profitable", flag(bid >= fuel.min_profitable_price));
    set("is_unprofitable", flag(bid < fuel.min_profitable_price));
    set("net_profit", net_profit);
    set("net_profit_per_km", net_profit / (distance_km + EPS));
    set("net_profit_per_minute", net_profit / (duration_min + EPS));
    set("fuel_ratio_x_distance", price_to_fuel_ratio * distance_km);
    set("fuel_ratio_x_peak", price_to_fuel_ratio * is_peak);
    set("net_profit_x_rating", net_profit * ctx.driver_rating);

    // History family.
    let user = &history.user;
    let driver = &history.driver;
    set("user_order_count", user.order_count);
    set("user_acceptance_rate", user.acceptance_rate);
    set("user_avg_price_ratio", user.avg_price_ratio);
    set("user_is_new", user.is_new);
    set("user_is_vip", user.is_vip);
    set("user_is_price_sensitive", user.is_price_sensitive);
    set("driver_bid_count", driver.bid_count);
    set("driver_acceptance_rate", driver.acceptance_rate);
    set("driver_avg_bid_ratio", driver.avg_bid_ratio);
    set("driver_is_active", driver.is_active);
    set("driver_is_aggressive", driver.is_aggressive);
    set("driver_is_flexible", driver.is_flexible);
    set(
        "user_driver_match_score",
        user.acceptance_rate * driver.acceptance_rate,
    );
    set(
        "price_vs_user_avg",
        bid / (user.avg_bid.unwrap_or(bid) + EPS),
    );
    set(
        "price_vs_driver_avg",
        bid / (driver.avg_bid.unwrap_or(bid) + EPS),
    );

    // Route quality.
    set("route_efficiency", distance_km / (duration_min + EPS));
    set("is_very_short", flag(distance_km < 1.0));
    set("is_very_long", flag(distance_km > 20.0));
    set("pickup_burden", pickup_km / (distance_km + EPS));

    // Calendar.
    let day_of_month = time.day_of_month as f64;
    set("day_of_month", day_of_month);
    set("is_month_start", flag(day_of_month <= 5.0));
    set("is_month_end", flag(day_of_month >= 25.0));
    set("hour_quartile", (time.hour / 6) as f64);
}
