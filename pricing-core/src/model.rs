//! Acceptance model artefact: loading, validation and batch inference.
//!
//! The offline trainer serialises the calibrated gradient-boosted forest to
//! a language-neutral JSON artefact: the ordered feature-name list, a base
//! score and one flat node array per tree, plus the sigmoid calibration
//! fitted on the validation split. The in-process evaluator walks each tree
//! per row and squashes the accumulated margin through the calibration, so
//! `predict_proba` always lands in `[0, 1]`.

use crate::features::FeatureMatrix;
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model artefact not found at {}", path.display())]
    ArtefactMissing { path: PathBuf },
    #[error("model artefact is invalid: {0}")]
    ArtefactInvalid(String),
    #[error("model inference failed: {0}")]
    Inference(String),
}

/// Anything that can score a feature matrix. The engine depends on this seam
/// so tests can substitute deterministic stand-ins for the trained forest.
pub trait AcceptanceModel: Send + Sync {
    /// Column names, in the exact order the rows must be laid out.
    fn feature_names(&self) -> &[String];

    /// Returns `P(accepted)` for every row of the matrix.
    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>, ModelError>;
}

/// One node of a decision tree. Leaves have `feature < 0` and carry the
/// margin contribution in `value`; split nodes route `x[feature] < threshold`
/// to `left`, everything else to `right`.
#[derive(Clone, Debug, Deserialize)]
pub struct TreeNode {
    #[serde(default = "leaf_feature")]
    pub feature: i64,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub left: usize,
    #[serde(default)]
    pub right: usize,
    #[serde(default)]
    pub value: f64,
}

fn leaf_feature() -> i64 {
    -1
}

impl TreeNode {
    fn is_leaf(&self) -> bool {
        self.feature < 0
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    fn evaluate(&self, row: &[f64]) -> Result<f64, ModelError> {
        let mut index = 0;
        // The artefact is validated at load; the step bound only guards
        // against cyclic child links.
        for _ in 0..=self.nodes.len() {
            let node = &self.nodes[index];
            if node.is_leaf() {
                return Ok(node.value);
            }
            let value = row[node.feature as usize];
            index = if value < node.threshold {
                node.left
            } else {
                node.right
            };
        }
        Err(ModelError::Inference(
            "tree traversal did not reach a leaf".to_owned(),
        ))
    }
}

/// Platt-style sigmoid calibration fitted by the trainer.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct Calibration {
    pub slope: f64,
    pub intercept: f64,
}

#[derive(Deserialize)]
struct Artefact {
    feature_names: Vec<String>,
    #[serde(default)]
    base_score: f64,
    trees: Vec<Tree>,
    #[serde(default)]
    calibration: Option<Calibration>,
}

/// The loaded, validated acceptance model.
pub struct Model {
    feature_names: Vec<String>,
    base_score: f64,
    trees: Vec<Tree>,
    calibration: Option<Calibration>,
}

impl Model {
    /// Reads and validates an artefact from a JSON stream.
    pub fn read(read: impl Read) -> Result<Self, ModelError> {
        let artefact: Artefact = serde_json::from_reader(read)
            .map_err(|err| ModelError::ArtefactInvalid(err.to_string()))?;
        Self::from_artefact(artefact)
    }

    /// Reads and validates an artefact from the given file.
    pub fn from_filestore(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|_| ModelError::ArtefactMissing {
            path: path.to_owned(),
        })?;
        Self::read(file)
    }

    fn from_artefact(artefact: Artefact) -> Result<Self, ModelError> {
        if artefact.feature_names.is_empty() {
            return Err(ModelError::ArtefactInvalid(
                "feature name list is empty".to_owned(),
            ));
        }
        if artefact.trees.is_empty() {
            return Err(ModelError::ArtefactInvalid(
                "artefact contains no trees".to_owned(),
            ));
        }
        for (i, tree) in artefact.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(ModelError::ArtefactInvalid(format!(
                    "tree {} has no nodes",
                    i
                )));
            }
            for node in &tree.nodes {
                if node.is_leaf() {
                    if !node.value.is_finite() {
                        return Err(ModelError::ArtefactInvalid(format!(
                            "tree {} has a non-finite leaf value",
                            i
                        )));
                    }
                    continue;
                }
                if node.feature as usize >= artefact.feature_names.len() {
                    return Err(ModelError::ArtefactInvalid(format!(
                        "tree {} references feature index {} outside the schema",
                        i, node.feature
                    )));
                }
                if node.left >= tree.nodes.len() || node.right >= tree.nodes.len() {
                    return Err(ModelError::ArtefactInvalid(format!(
                        "tree {} has a child index outside the node array",
                        i
                    )));
                }
                if !node.threshold.is_finite() {
                    return Err(ModelError::ArtefactInvalid(format!(
                        "tree {} has a non-finite split threshold",
                        i
                    )));
                }
            }
        }
        Ok(Self {
            feature_names: artefact.feature_names,
            base_score: artefact.base_score,
            trees: artefact.trees,
            calibration: artefact.calibration,
        })
    }

    fn margin(&self, row: &[f64]) -> Result<f64, ModelError> {
        let mut margin = self.base_score;
        for tree in &self.trees {
            margin += tree.evaluate(row)?;
        }
        if margin.is_finite() {
            Ok(margin)
        } else {
            Err(ModelError::Inference("non-finite margin".to_owned()))
        }
    }
}

impl AcceptanceModel for Model {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn predict_proba(&self, features: &FeatureMatrix) -> Result<Vec<f64>, ModelError> {
        if features.cols() != self.feature_names.len() {
            return Err(ModelError::Inference(format!(
                "expected {} feature columns, got {}",
                self.feature_names.len(),
                features.cols()
            )));
        }
        let mut probabilities = Vec::with_capacity(features.rows());
        for i in 0..features.rows() {
            let margin = self.margin(features.row(i))?;
            let logit = match self.calibration {
                Some(calibration) => calibration.slope * margin + calibration.intercept,
                None => margin,
            };
            probabilities.push(sigmoid(logit));
        }
        Ok(probabilities)
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Process-wide memoised model handle. Concurrent first callers await a
/// single load and share the immutable result; a failed load is retried on
/// the next call instead of being cached.
pub struct LazyModel {
    path: PathBuf,
    loaded: futures::lock::Mutex<Option<Arc<Model>>>,
}

impl LazyModel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            loaded: futures::lock::Mutex::new(None),
        }
    }

    /// A handle that skips loading entirely, for wiring tests.
    pub fn preloaded(model: Model) -> Self {
        Self {
            path: PathBuf::new(),
            loaded: futures::lock::Mutex::new(Some(Arc::new(model))),
        }
    }

    pub async fn get(&self) -> Result<Arc<Model>, ModelError> {
        let mut loaded = self.loaded.lock().await;
        if let Some(model) = &*loaded {
            return Ok(model.clone());
        }
        let model = Arc::new(Model::from_filestore(&self.path)?);
        log::info!(
            "loaded acceptance model from {} ({} features, {} trees)",
            self.path.display(),
            model.feature_names.len(),
            model.trees.len()
        );
        *loaded = Some(model.clone());
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use futures::executor::block_on;

    fn artefact_json(names: &[&str], price_index: usize) -> String {
        // A stump over the price column plus a constant corrective tree.
        format!(
            r#"{{
                "feature_names": [{}],
                "base_score": 0.0,
                "trees": [
                    {{"nodes": [
                        {{"feature": {}, "threshold": 200.0, "left": 1, "right": 2}},
                        {{"value": 1.0}},
                        {{"value": -1.0}}
                    ]}},
                    {{"nodes": [{{"value": 0.5}}]}}
                ],
                "calibration": {{"slope": 1.0, "intercept": 0.0}}
            }}"#,
            names
                .iter()
                .map(|n| format!("\"{}\"", n))
                .collect::<Vec<_>>()
                .join(", "),
            price_index
        )
    }

    fn matrix_from_rows(rows: &[Vec<f64>]) -> FeatureMatrix {
        let cols = rows[0].len();
        let mut matrix = FeatureMatrix::zeroed(rows.len(), cols);
        for (i, row) in rows.iter().enumerate() {
            matrix.row_mut(i).copy_from_slice(row);
        }
        matrix
    }

    #[test]
    fn scores_stump_on_both_sides_of_the_split() {
        let model =
            Model::read(artefact_json(&["price_bid_local", "other"], 0).as_bytes()).unwrap();
        let matrix = matrix_from_rows(&[vec![150.0, 0.0], vec![250.0, 0.0]]);
        let probabilities = model.predict_proba(&matrix).unwrap();
        assert_approx_eq!(probabilities[0], sigmoid(1.5));
        assert_approx_eq!(probabilities[1], sigmoid(-0.5));
    }

    #[test]
    fn probabilities_stay_in_unit_interval() {
        let model =
            Model::read(artefact_json(&["price_bid_local", "other"], 0).as_bytes()).unwrap();
        let matrix = matrix_from_rows(&[vec![1e9, 0.0], vec![-1e9, 0.0]]);
        for p in model.predict_proba(&matrix).unwrap() {
            assert!((0.0..=1.0).contains(&p));
        }
    }

    #[test]
    fn shuffled_feature_list_scores_identically() {
        // The same stump expressed against a permuted schema; rows are laid
        // out by each artefact's own column order, as the builder does.
        let canonical =
            Model::read(artefact_json(&["price_bid_local", "other"], 0).as_bytes()).unwrap();
        let shuffled =
            Model::read(artefact_json(&["other", "price_bid_local"], 1).as_bytes()).unwrap();

        let canonical_rows = matrix_from_rows(&[vec![120.0, 7.0], vec![260.0, 7.0]]);
        let shuffled_rows = matrix_from_rows(&[vec![7.0, 120.0], vec![7.0, 260.0]]);

        assert_eq!(
            canonical.predict_proba(&canonical_rows).unwrap(),
            shuffled.predict_proba(&shuffled_rows).unwrap(),
        );
    }

    #[test]
    fn uncalibrated_artefact_uses_raw_margin() {
        let json = r#"{
            "feature_names": ["x"],
            "trees": [{"nodes": [{"value": 2.0}]}]
        }"#;
        let model = Model::read(json.as_bytes()).unwrap();
        let probabilities = model
            .predict_proba(&matrix_from_rows(&[vec![0.0]]))
            .unwrap();
        assert_approx_eq!(probabilities[0], sigmoid(2.0));
    }

    #[test]
    fn missing_file_is_artefact_missing() {
        match Model::from_filestore("/nonexistent/model.json") {
            Err(ModelError::ArtefactMissing { path }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/model.json"))
            }
            other => panic!("unexpected result: {:?}", other.err()),
        }
    }

    #[test]
    fn invalid_artefacts_are_rejected() {
        let cases: &[&str] = &[
            "not json",
            r#"{"feature_names": [], "trees": [{"nodes": [{"value": 0.0}]}]}"#,
            r#"{"feature_names": ["x"], "trees": []}"#,
            r#"{"feature_names": ["x"], "trees": [{"nodes": []}]}"#,
            // Split feature outside the schema.
            r#"{"feature_names": ["x"], "trees": [{"nodes": [
                {"feature": 3, "threshold": 0.0, "left": 1, "right": 2},
                {"value": 0.0}, {"value": 0.0}]}]}"#,
            // Child index outside the node array.
            r#"{"feature_names": ["x"], "trees": [{"nodes": [
                {"feature": 0, "threshold": 0.0, "left": 5, "right": 1},
                {"value": 0.0}]}]}"#,
        ];
        for case in cases {
            assert!(
                matches!(Model::read(case.as_bytes()), Err(ModelError::ArtefactInvalid(_))),
                "accepted invalid artefact: {}",
                case
            );
        }
    }

    #[test]
    fn column_count_mismatch_is_inference_error() {
        let model = Model::read(artefact_json(&["a", "b"], 0).as_bytes()).unwrap();
        let matrix = matrix_from_rows(&[vec![1.0]]);
        assert!(matches!(
            model.predict_proba(&matrix),
            Err(ModelError::Inference(_))
        ));
    }

    #[test]
    fn lazy_model_loads_once_and_shares() {
        let path = std::env::temp_dir().join(format!(
            "pricing-core-model-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, artefact_json(&["price_bid_local", "other"], 0)).unwrap();

        let lazy = LazyModel::new(&path);
        let first = block_on(lazy.get()).unwrap();
        let second = block_on(lazy.get()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        std::fs::remove_file(&path).unwrap();
        // Already memoised; removing the file must not invalidate the handle.
        assert!(block_on(lazy.get()).is_ok());
    }

    #[test]
    fn lazy_model_retries_after_failure() {
        let path = std::env::temp_dir().join(format!(
            "pricing-core-model-retry-{}.json",
            std::process::id()
        ));
        let lazy = LazyModel::new(&path);
        assert!(matches!(
            block_on(lazy.get()),
            Err(ModelError::ArtefactMissing { .. })
        ));

        std::fs::write(&path, artefact_json(&["price_bid_local"], 0)).unwrap();
        assert!(block_on(lazy.get()).is_ok());
        std::fs::remove_file(&path).unwrap();
    }
}
