//! Candidate price scan and optimum selection.
//!
//! Derives the scan range from the starting price and the order's hour and
//! weekday, scores every candidate in one model batch and selects the
//! optimum under a weighted objective. Pure expected value drifts the
//! recommendation into the low-probability tail, so the score blends the
//! normalised expected value with the normalised acceptance probability.

use crate::features::{self, FeatureSchema, OrderContext};
use crate::history::HistoryFeatures;
use crate::model::{AcceptanceModel, ModelError};
use crate::util::linspace;

/// Weight of expected value in the selection objective; the remainder goes
/// to acceptance probability.
pub const EV_WEIGHT: f64 = 0.7;
/// The scan never evaluates fewer candidates than this.
pub const MIN_SCAN_POINTS: usize = 20;
/// Recommended scan resolution.
pub const DEFAULT_SCAN_POINTS: usize = 200;
/// Extra candidates appended when the optimum crowds the scan ceiling.
const EDGE_EXTENSION_POINTS: usize = 50;

const NORM_GUARD: f64 = 1e-9;
const SCORE_TIE_EPS: f64 = 1e-12;

/// Scan resolution, clamped to the enforced minimum.
#[derive(Clone, Copy, Debug)]
pub struct ScanConfig {
    points: usize,
}

impl ScanConfig {
    pub fn new(points: usize) -> Self {
        Self {
            points: points.max(MIN_SCAN_POINTS),
        }
    }

    pub fn points(&self) -> usize {
        self.points
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_POINTS)
    }
}

/// One scored candidate price.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    pub price: f64,
    pub probability: f64,
    pub expected_value: f64,
}

/// The scored scan with the selected optimum and analysis metadata.
#[derive(Clone, Debug)]
pub struct ScanOutcome {
    pub candidates: Vec<Candidate>,
    /// Index of the optimum in `candidates`.
    pub best: usize,
    pub max_probability: f64,
    pub max_probability_price: f64,
    pub scan_min: f64,
    /// Highest price actually scanned; exceeds the policy ceiling when the
    /// edge extension ran.
    pub scan_max: f64,
    pub price_increment: f64,
}

impl ScanOutcome {
    pub fn optimum(&self) -> &Candidate {
        &self.candidates[self.best]
    }

    /// Probability of the optimum relative to the scan maximum.
    pub fn normalized_probability(&self, probability: f64) -> f64 {
        probability / self.max_probability.max(NORM_GUARD)
    }
}

/// Upper scan multiplier for the given hour and weekday (Monday = 0).
/// Night rides scan the widest corridor after weekday peaks; weekends sit
/// between peak and the off-peak default.
pub fn upper_multiplier(hour: u32, weekday: u32) -> f64 {
    let time = features::TimeParts {
        hour,
        weekday,
        day_of_month: 1,
    };
    if time.is_night() {
        2.00
    } else if time.is_peak() && !time.is_weekend() {
        2.20
    } else if time.is_weekend() {
        1.80
    } else {
        1.60
    }
}

/// Scan interval `[min, max]` for the given starting price and order time.
pub fn scan_bounds(price_start_local: f64, hour: u32, weekday: u32) -> (f64, f64) {
    let min_scan = (price_start_local * 0.6).max(1.0);
    let max_scan = (price_start_local * upper_multiplier(hour, weekday)).max(min_scan + 1.0);
    (min_scan, max_scan)
}

/// Runs the full scan for one order: grid, batch scoring, optimum selection
/// and the optional edge extension.
pub fn run(
    model: &dyn AcceptanceModel,
    schema: &FeatureSchema,
    ctx: &OrderContext,
    history: &HistoryFeatures,
    config: ScanConfig,
) -> Result<ScanOutcome, ModelError> {
    let time = features::time_parts(ctx.order_timestamp);
    let (scan_min, scan_max) = scan_bounds(ctx.price_start_local, time.hour, time.weekday);

    let prices = linspace(scan_min, scan_max, config.points());
    let price_increment = prices[1] - prices[0];
    let mut candidates = score(model, schema, ctx, history, &prices)?;

    let mut best = select_optimum(&candidates, ctx.price_start_local);

    // Optimum crowding the ceiling hints that the true maximum lies outside
    // the policy corridor; probe a bounded strip above it once.
    if candidates[best].price >= scan_max * 0.95 {
        let extension_max = (candidates[best].price * 1.20).min(scan_max * 1.15);
        if extension_max > scan_max {
            let step = (extension_max - scan_max) / EDGE_EXTENSION_POINTS as f64;
            let extra_prices: Vec<f64> = (1..=EDGE_EXTENSION_POINTS)
                .map(|i| scan_max + step * i as f64)
                .collect();
            let extra = score(model, schema, ctx, history, &extra_prices)?;
            candidates.extend(extra);
            best = select_optimum(&candidates, ctx.price_start_local);
        }
    }

    let (max_probability, max_probability_price) = max_probability(&candidates);
    let scan_max = candidates
        .iter()
        .map(|c| c.price)
        .fold(scan_max, f64::max);

    Ok(ScanOutcome {
        candidates,
        best,
        max_probability,
        max_probability_price,
        scan_min,
        scan_max,
        price_increment,
    })
}

fn score(
    model: &dyn AcceptanceModel,
    schema: &FeatureSchema,
    ctx: &OrderContext,
    history: &HistoryFeatures,
    prices: &[f64],
) -> Result<Vec<Candidate>, ModelError> {
    let matrix = features::build_matrix(schema, ctx, history, prices);
    let probabilities = model.predict_proba(&matrix)?;
    Ok(prices
        .iter()
        .zip(probabilities)
        .map(|(&price, probability)| Candidate {
            price,
            probability,
            expected_value: price * probability,
        })
        .collect())
}

/// Picks the optimum among candidates at or above the starting price (all
/// candidates when that set is empty) by the weighted objective. Ties go to
/// the higher probability, then to the lower price.
fn select_optimum(candidates: &[Candidate], price_start_local: f64) -> usize {
    let max_ev = candidates
        .iter()
        .map(|c| c.expected_value)
        .fold(f64::MIN, f64::max)
        .max(NORM_GUARD);
    let max_prob = candidates
        .iter()
        .map(|c| c.probability)
        .fold(f64::MIN, f64::max)
        .max(NORM_GUARD);

    let score = |c: &Candidate| {
        EV_WEIGHT * (c.expected_value / max_ev) + (1.0 - EV_WEIGHT) * (c.probability / max_prob)
    };

    let valid: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].price >= price_start_local)
        .collect();
    let indices = if valid.is_empty() {
        (0..candidates.len()).collect()
    } else {
        valid
    };

    let mut best = indices[0];
    for &i in &indices[1..] {
        let (candidate, incumbent) = (&candidates[i], &candidates[best]);
        let delta = score(candidate) - score(incumbent);
        let better = if delta > SCORE_TIE_EPS {
            true
        } else if delta < -SCORE_TIE_EPS {
            false
        } else if candidate.probability != incumbent.probability {
            candidate.probability > incumbent.probability
        } else {
            candidate.price < incumbent.price
        };
        if better {
            best = i;
        }
    }
    best
}

fn max_probability(candidates: &[Candidate]) -> (f64, f64) {
    let mut max = &candidates[0];
    for candidate in candidates {
        if candidate.probability > max.probability {
            max = candidate;
        }
    }
    (max.probability, max.price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::CANONICAL_FEATURE_NAMES;
    use crate::model::AcceptanceModel;
    use assert_approx_eq::assert_approx_eq;
    use chrono::NaiveDate;

    /// Deterministic stand-in scoring candidates by their price column.
    struct PriceCurve {
        names: Vec<String>,
        curve: fn(f64) -> f64,
    }

    impl PriceCurve {
        fn new(curve: fn(f64) -> f64) -> Self {
            Self {
                names: CANONICAL_FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                curve,
            }
        }

        fn schema(&self) -> FeatureSchema {
            FeatureSchema::new(&self.names)
        }
    }

    impl AcceptanceModel for PriceCurve {
        fn feature_names(&self) -> &[String] {
            &self.names
        }

        fn predict_proba(
            &self,
            features: &crate::features::FeatureMatrix,
        ) -> Result<Vec<f64>, ModelError> {
            let price_column = self
                .names
                .iter()
                .position(|n| n == "price_bid_local")
                .unwrap();
            Ok((0..features.rows())
                .map(|i| (self.curve)(features.row(i)[price_column]).max(0.0).min(1.0))
                .collect())
        }
    }

    fn timestamp(y: i32, m: u32, d: u32, h: u32) -> i64 {
        NaiveDate::from_ymd(y, m, d).and_hms(h, 0, 0).timestamp()
    }

    fn order(start_price: f64, ts: i64) -> OrderContext {
        OrderContext::new(ts, 5000.0, 600.0, 1000.0, 120.0, start_price)
    }

    #[test]
    fn multipliers_by_time_of_day() {
        // Night beats everything else.
        assert_approx_eq!(upper_multiplier(2, 1), 2.00);
        assert_approx_eq!(upper_multiplier(23, 5), 2.00);
        // Weekday peaks.
        assert_approx_eq!(upper_multiplier(8, 2), 2.20);
        assert_approx_eq!(upper_multiplier(19, 4), 2.20);
        // Weekend, including weekend peak hours.
        assert_approx_eq!(upper_multiplier(14, 5), 1.80);
        assert_approx_eq!(upper_multiplier(19, 6), 1.80);
        // Plain weekday off-peak.
        assert_approx_eq!(upper_multiplier(11, 1), 1.60);
    }

    #[test]
    fn bounds_for_seed_scenarios() {
        // Weekday evening, start 400: ceiling 400 * 2.2.
        let (min, max) = scan_bounds(400.0, 19, 4);
        assert_approx_eq!(min, 240.0);
        assert_approx_eq!(max, 880.0);
        // Night, start 250.
        let (_, max) = scan_bounds(250.0, 2, 2);
        assert_approx_eq!(max, 500.0);
        // Saturday afternoon, start 300.
        let (_, max) = scan_bounds(300.0, 14, 5);
        assert_approx_eq!(max, 540.0);
    }

    #[test]
    fn bounds_never_collapse() {
        let (min, max) = scan_bounds(0.0, 11, 1);
        assert_approx_eq!(min, 1.0);
        assert_approx_eq!(max, 2.0);
    }

    #[test]
    fn grid_size_and_increment() {
        let model = PriceCurve::new(|p| 1.0 - p / 1000.0);
        let outcome = run(
            &model,
            &model.schema(),
            &order(200.0, timestamp(2025, 10, 15, 11)),
            &HistoryFeatures::default(),
            ScanConfig::new(200),
        )
        .unwrap();
        assert_eq!(outcome.candidates.len(), 200);
        let expected_step = (outcome.candidates[1].price - outcome.candidates[0].price).abs();
        assert_approx_eq!(outcome.price_increment, expected_step);
        assert_approx_eq!(outcome.candidates[0].price, 120.0);
        assert_approx_eq!(outcome.candidates[199].price, 320.0);
    }

    #[test]
    fn scan_points_minimum_is_enforced() {
        assert_eq!(ScanConfig::new(5).points(), MIN_SCAN_POINTS);
        assert_eq!(ScanConfig::new(120).points(), 120);
    }

    #[test]
    fn optimum_not_below_start_price() {
        // Probability decays with price, so unconstrained EV would peak
        // below the starting price.
        let model = PriceCurve::new(|p| (1.0 - p / 400.0).max(0.05));
        let start = 200.0;
        let outcome = run(
            &model,
            &model.schema(),
            &order(start, timestamp(2025, 10, 15, 11)),
            &HistoryFeatures::default(),
            ScanConfig::default(),
        )
        .unwrap();
        assert!(outcome.optimum().price >= start);
        assert!(outcome.optimum().price <= outcome.scan_max);
    }

    #[test]
    fn expected_value_consistency() {
        let model = PriceCurve::new(|p| 1.0 / (1.0 + p / 300.0));
        let outcome = run(
            &model,
            &model.schema(),
            &order(180.0, timestamp(2025, 10, 15, 11)),
            &HistoryFeatures::default(),
            ScanConfig::default(),
        )
        .unwrap();
        for candidate in &outcome.candidates {
            assert_approx_eq!(
                candidate.expected_value,
                candidate.price * candidate.probability
            );
        }
    }

    #[test]
    fn weighted_objective_resists_the_probability_tail() {
        // EV grows without bound here, so a pure-EV optimum would sit at the
        // very top of the corridor; the probability term pulls it back.
        let model = PriceCurve::new(|p| (1.2 - p / 500.0).max(0.01));
        let outcome = run(
            &model,
            &model.schema(),
            &order(200.0, timestamp(2025, 10, 15, 11)),
            &HistoryFeatures::default(),
            ScanConfig::default(),
        )
        .unwrap();
        let pure_ev_best = outcome
            .candidates
            .iter()
            .cloned()
            .fold(outcome.candidates[0], |a, b| {
                if b.expected_value > a.expected_value {
                    b
                } else {
                    a
                }
            });
        assert!(outcome.optimum().price <= pure_ev_best.price);
    }

    #[test]
    fn flat_zero_probability_ties_break_to_lowest_valid_price() {
        let model = PriceCurve::new(|_| 0.0);
        let start = 150.0;
        let outcome = run(
            &model,
            &model.schema(),
            &order(start, timestamp(2025, 10, 15, 11)),
            &HistoryFeatures::default(),
            ScanConfig::default(),
        )
        .unwrap();
        let lowest_valid = outcome
            .candidates
            .iter()
            .map(|c| c.price)
            .filter(|&p| p >= start)
            .fold(f64::MAX, f64::min);
        assert_approx_eq!(outcome.optimum().price, lowest_valid);
    }

    #[test]
    fn normalisation_against_max_probability() {
        let model = PriceCurve::new(|p| (1.0 - p / 1000.0).max(0.0));
        let outcome = run(
            &model,
            &model.schema(),
            &order(250.0, timestamp(2025, 10, 15, 11)),
            &HistoryFeatures::default(),
            ScanConfig::default(),
        )
        .unwrap();
        // The cheapest candidate has the highest probability on this curve.
        assert_approx_eq!(outcome.max_probability_price, outcome.candidates[0].price);
        assert_approx_eq!(outcome.normalized_probability(outcome.max_probability), 1.0);
        for candidate in &outcome.candidates {
            let norm = outcome.normalized_probability(candidate.probability);
            assert!((0.0..=1.0).contains(&norm));
        }
    }

    #[test]
    fn edge_extension_probes_above_the_ceiling() {
        // Probability rises with price, so the optimum hugs the ceiling and
        // the extension must fire.
        let model = PriceCurve::new(|p| (p / 1000.0).min(1.0));
        let ts = timestamp(2025, 10, 15, 11);
        let outcome = run(
            &model,
            &model.schema(),
            &order(200.0, ts),
            &HistoryFeatures::default(),
            ScanConfig::new(200),
        )
        .unwrap();
        let (_, policy_max) = scan_bounds(200.0, 11, 2);
        assert_eq!(outcome.candidates.len(), 200 + 50);
        assert!(outcome.optimum().price > policy_max);
        assert!(outcome.scan_max > policy_max);
        assert!(outcome.scan_max <= policy_max * 1.15 + 1e-9);
        assert!(outcome.optimum().price <= outcome.scan_max);
    }

    #[test]
    fn interior_optimum_skips_the_extension() {
        let model = PriceCurve::new(|p| (1.0 - p / 420.0).max(0.0));
        let outcome = run(
            &model,
            &model.schema(),
            &order(180.0, timestamp(2025, 10, 15, 11)),
            &HistoryFeatures::default(),
            ScanConfig::new(200),
        )
        .unwrap();
        assert_eq!(outcome.candidates.len(), 200);
        let (_, policy_max) = scan_bounds(180.0, 11, 2);
        assert_approx_eq!(outcome.scan_max, policy_max);
    }

    #[test]
    fn zero_start_price_scans_the_floor_corridor() {
        let model = PriceCurve::new(|_| 0.5);
        let outcome = run(
            &model,
            &model.schema(),
            &order(0.0, timestamp(2025, 10, 15, 11)),
            &HistoryFeatures::default(),
            ScanConfig::default(),
        )
        .unwrap();
        assert_approx_eq!(outcome.scan_min, 1.0);
        assert!(outcome.optimum().price >= 0.0);
    }

    #[test]
    fn model_failure_propagates() {
        struct Failing {
            names: Vec<String>,
        }
        impl AcceptanceModel for Failing {
            fn feature_names(&self) -> &[String] {
                &self.names
            }
            fn predict_proba(
                &self,
                _: &crate::features::FeatureMatrix,
            ) -> Result<Vec<f64>, ModelError> {
                Err(ModelError::Inference("boom".to_owned()))
            }
        }
        let model = Failing {
            names: vec!["price_bid_local".to_owned()],
        };
        let schema = FeatureSchema::new(&model.names);
        let result = run(
            &model,
            &schema,
            &order(180.0, timestamp(2025, 10, 15, 11)),
            &HistoryFeatures::default(),
            ScanConfig::default(),
        );
        assert!(matches!(result, Err(ModelError::Inference(_))));
    }
}
