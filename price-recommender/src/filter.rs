//! Routes of the recommendation service.
//!
//! Every route is a small filter constructor feeding a handler function;
//! all custom rejections are recovered into `{ "detail": ... }` bodies with
//! the status code mandated by the error contract.

use crate::auth::{Authenticator, TokenForm};
use crate::error::{self, RejectionReason};
use crate::models::{ErrorBody, ModelResponse, OrderRequest, TokenResponse};
use crate::stub;
use chrono::Utc;
use pricing_core::engine::Engine;
use pricing_core::health::HealthReporting;
use pricing_core::metrics::MetricsHandler;
use pricing_core::model::ModelError;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use warp::http::{header, HeaderValue, Response, StatusCode};
use warp::{Filter, Rejection, Reply};

/// Everything the routes need, shared across all in-flight requests.
#[derive(Clone)]
pub struct AppContext {
    pub engine: Arc<Engine>,
    pub auth: Arc<Authenticator>,
    pub health: Arc<dyn HealthReporting>,
    pub metrics: Arc<MetricsHandler>,
    pub stub_fallback: bool,
    pub webui_dir: Option<PathBuf>,
}

/// Handles all supported requests.
pub fn all(ctx: AppContext) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    auth_token(ctx.auth.clone())
        .or(price_recommendation(
            ctx.engine.clone(),
            ctx.auth.clone(),
            ctx.stub_fallback,
        ))
        .or(health(ctx.health.clone()))
        .or(metrics(ctx.metrics.clone()))
        .or(index(ctx.webui_dir.clone()))
        .recover(handle_rejection)
}

/// `POST /auth/token` with a form-encoded username and password.
fn auth_token(
    auth: Arc<Authenticator>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("auth" / "token")
        .and(warp::post())
        .and(warp::body::form())
        .and(warp::any().map(move || auth.clone()))
        .and_then(issue_token)
        .with(warp::log("price_recommender::api::auth"))
}

/// `POST /api/v1/orders/price-recommendation` behind bearer auth.
fn price_recommendation(
    engine: Arc<Engine>,
    auth: Arc<Authenticator>,
    stub_fallback: bool,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "v1" / "orders" / "price-recommendation")
        .and(warp::post())
        .and(authenticated(auth))
        .and(warp::body::json())
        .and(warp::any().map(move || engine.clone()))
        .and(warp::any().map(move || stub_fallback))
        .and_then(recommend)
        .with(warp::log("price_recommender::api::price_recommendation"))
}

fn health(
    health: Arc<dyn HealthReporting>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("health")
        .and(warp::get())
        .and(warp::any().map(move || health.clone()))
        .and_then(report_health)
}

fn metrics(
    metrics: Arc<MetricsHandler>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("metrics")
        .and(warp::get())
        .and(warp::any().map(move || metrics.clone()))
        .and_then(encode_metrics)
}

/// `GET /` serves the optional static web UI; the UI itself is hosted
/// elsewhere, this only covers single-process deployments.
fn index(
    webui_dir: Option<PathBuf>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .and(warp::any().map(move || webui_dir.clone()))
        .and_then(serve_index)
}

/// Resolves the bearer token to the stored subject before the body is even
/// parsed, so credential failures always answer 401.
fn authenticated(
    auth: Arc<Authenticator>,
) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and(warp::any().map(move || auth.clone()))
        .and_then(|header: Option<String>, auth: Arc<Authenticator>| async move {
            auth.verify(header.as_deref()).map_err(|_| {
                error::reject(RejectionReason::Unauthorized("Could not validate credentials"))
            })
        })
}

async fn issue_token(
    form: TokenForm,
    auth: Arc<Authenticator>,
) -> Result<impl Reply, Rejection> {
    match auth.issue(&form.username, &form.password) {
        Ok(access_token) => Ok(warp::reply::json(&TokenResponse {
            access_token,
            token_type: "bearer",
        })),
        Err(_) => Err(error::reject(RejectionReason::Unauthorized(
            "Incorrect username or password",
        ))),
    }
}

async fn recommend(
    _subject: String,
    order: OrderRequest,
    engine: Arc<Engine>,
    stub_fallback: bool,
) -> Result<impl Reply, Rejection> {
    order
        .validate()
        .map_err(|err| error::reject(RejectionReason::Validation(err)))?;

    let model = match engine.model().await {
        Ok(model) => model,
        Err(err)
            if stub_fallback
                && matches!(
                    err,
                    ModelError::ArtefactMissing { .. } | ModelError::ArtefactInvalid(_)
                ) =>
        {
            log::warn!("model artefact unavailable, serving stub payload: {}", err);
            return Ok(warp::reply::json(&stub::stub_response(
                order.price_start_local,
                Utc::now(),
            )));
        }
        Err(err) => return Err(error::reject(RejectionReason::Engine(err))),
    };

    // The scan is CPU bound; keep it off the reactor threads.
    let ctx = order.to_context();
    let engine_for_scan = engine.clone();
    let recommendation =
        tokio::task::spawn_blocking(move || engine_for_scan.recommend_with(model.as_ref(), &ctx))
            .await
            .map_err(|err| error::reject(RejectionReason::Internal(err.into())))?
            .map_err(|err| error::reject(RejectionReason::Engine(err)))?;

    Ok(warp::reply::json(&ModelResponse::from_recommendation(
        &recommendation,
        Utc::now(),
    )))
}

async fn report_health(health: Arc<dyn HealthReporting>) -> Result<impl Reply, Rejection> {
    if health.is_ready() {
        Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "status": "ok" })),
            StatusCode::OK,
        ))
    } else {
        Ok(warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "detail": "service starting" })),
            StatusCode::SERVICE_UNAVAILABLE,
        ))
    }
}

async fn encode_metrics(metrics: Arc<MetricsHandler>) -> Result<impl Reply, Rejection> {
    let (content_type, body) = metrics
        .encode()
        .map_err(|err| error::reject(RejectionReason::Internal(err)))?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .map_err(|err| error::reject(RejectionReason::Internal(err.into())))
}

async fn serve_index(webui_dir: Option<PathBuf>) -> Result<impl Reply, Rejection> {
    let dir = webui_dir.ok_or_else(warp::reject::not_found)?;
    match tokio::fs::read_to_string(dir.join("index.html")).await {
        Ok(html) => Ok(warp::reply::html(html)),
        Err(_) => Err(warp::reject::not_found()),
    }
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (code, detail, challenge) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "invalid url path".to_owned(), false)
    } else if let Some(reason) = err.find::<RejectionReason>() {
        match reason {
            RejectionReason::Unauthorized(detail) => {
                (StatusCode::UNAUTHORIZED, (*detail).to_owned(), true)
            }
            RejectionReason::Validation(err) => {
                (StatusCode::UNPROCESSABLE_ENTITY, err.to_string(), false)
            }
            RejectionReason::Engine(err) => (
                StatusCode::BAD_GATEWAY,
                format!("Failed to retrieve recommendation: {}", err),
                false,
            ),
            RejectionReason::Internal(err) => {
                log::error!("internal error serving request: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "unexpected internal error".to_owned(),
                    false,
                )
            }
        }
    } else if let Some(err) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::UNPROCESSABLE_ENTITY, err.to_string(), false)
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed".to_owned(),
            false,
        )
    } else {
        log::warn!("unhandled rejection: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "unexpected internal error".to_owned(),
            false,
        )
    };

    let mut response =
        warp::reply::with_status(warp::reply::json(&ErrorBody { detail }), code).into_response();
    if challenge {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    Ok(response)
}
