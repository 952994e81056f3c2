//! Custom warp rejection carrying the error kind of a failed request.

use crate::models::ValidationError;
use pricing_core::model::ModelError;
use warp::reject::{self, Reject, Rejection};

#[derive(Debug)]
pub enum RejectionReason {
    /// Missing, invalid or expired credentials; answered with a bearer
    /// challenge.
    Unauthorized(&'static str),
    /// The request body violated an OrderRequest constraint.
    Validation(ValidationError),
    /// The engine could not produce a recommendation.
    Engine(ModelError),
    /// Plumbing failure outside the request contract.
    Internal(anyhow::Error),
}

impl Reject for RejectionReason {}

pub fn reject(reason: RejectionReason) -> Rejection {
    reject::custom(reason)
}
