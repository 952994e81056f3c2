//! The request-level pipeline: scan, zones, fuel economics.
//!
//! An `Engine` owns every read-only artefact a recommendation needs and is
//! shared across all in-flight requests. The computation itself is
//! synchronous; callers on an async runtime fetch the model handle first and
//! run `recommend_with` on a blocking-friendly executor.

use crate::features::{FeatureSchema, OrderContext};
use crate::fuel::FuelEconomics;
use crate::history::HistoryCache;
use crate::metrics::EngineMetrics;
use crate::model::{AcceptanceModel, LazyModel, Model, ModelError};
use crate::scan::{self, ScanConfig};
use crate::zones::{self, Zone};
use std::sync::Arc;

/// The chosen bid with its scores, placed into its zone.
#[derive(Clone, Debug)]
pub struct Optimum {
    pub price: f64,
    pub probability: f64,
    pub normalized_probability: f64,
    pub expected_value: f64,
    pub zone_id: u8,
    pub net_profit: f64,
}

/// Scan metadata reported alongside the recommendation.
#[derive(Clone, Debug)]
pub struct Analysis {
    pub start_price: f64,
    pub max_probability: f64,
    pub max_probability_price: f64,
    pub scan_min: f64,
    pub scan_max: f64,
    pub price_increment: f64,
}

/// Everything the response assembler needs, unrounded.
#[derive(Clone, Debug)]
pub struct Recommendation {
    pub zones: Vec<Zone>,
    pub optimum: Optimum,
    pub fuel: FuelEconomics,
    pub analysis: Analysis,
}

pub struct Engine {
    model: LazyModel,
    history: HistoryCache,
    scan_config: ScanConfig,
    metrics: EngineMetrics,
}

impl Engine {
    pub fn new(
        model: LazyModel,
        history: HistoryCache,
        scan_config: ScanConfig,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            model,
            history,
            scan_config,
            metrics,
        }
    }

    /// The memoised acceptance model; the first caller pays for the load.
    pub async fn model(&self) -> Result<Arc<Model>, ModelError> {
        self.model.get().await
    }

    /// Runs the full pipeline for one order against an already-loaded model.
    pub fn recommend_with(
        &self,
        model: &dyn AcceptanceModel,
        ctx: &OrderContext,
    ) -> Result<Recommendation, ModelError> {
        let schema = FeatureSchema::new(model.feature_names());
        let history = self.history.lookup(ctx.user_id, ctx.driver_id);
        let outcome = scan::run(model, &schema, ctx, &history, self.scan_config).map_err(
            |err| {
                self.metrics.inference_failed();
                err
            },
        )?;

        let zones = zones::assign(&outcome.candidates, outcome.max_probability);
        let best = outcome.optimum();
        let fuel = FuelEconomics::for_distance(ctx.distance_in_meters);
        let optimum = Optimum {
            price: best.price,
            probability: best.probability,
            normalized_probability: outcome.normalized_probability(best.probability),
            expected_value: best.expected_value,
            zone_id: zones::optimal_zone_id(&zones, best.probability),
            net_profit: fuel.net_profit(best.expected_value),
        };
        let analysis = Analysis {
            start_price: ctx.price_start_local,
            max_probability: outcome.max_probability,
            max_probability_price: outcome.max_probability_price,
            scan_min: outcome.scan_min,
            scan_max: outcome.scan_max,
            price_increment: outcome.price_increment,
        };

        self.metrics.recommendation_computed(outcome.candidates.len());
        Ok(Recommendation {
            zones,
            optimum,
            fuel,
            analysis,
        })
    }

    /// Convenience entry point that loads the model and recommends in one
    /// await; the HTTP layer splits the two to keep the CPU work off the
    /// reactor.
    pub async fn recommend(&self, ctx: &OrderContext) -> Result<Recommendation, ModelError> {
        let model = self.model().await?;
        self.recommend_with(model.as_ref(), ctx)
    }
}
