mod auth;
mod error;
mod filter;
mod metrics;
mod models;
mod stub;

use auth::Authenticator;
use filter::AppContext;
use metrics::Metrics;
use pricing_core::engine::Engine;
use pricing_core::health::{HealthReporting, HttpHealthEndpoint};
use pricing_core::history::HistoryCache;
use pricing_core::logging;
use pricing_core::metrics::{EngineMetrics, MetricsHandler};
use pricing_core::model::LazyModel;
use pricing_core::scan::ScanConfig;
use prometheus::Registry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use structopt::StructOpt;
use tokio::runtime;
use warp::Filter;

#[derive(Debug, StructOpt)]
#[structopt(name = "price recommender", rename_all = "kebab")]
struct Options {
    /// The log filter to use.
    ///
    /// This follows the `slog-envlogger` syntax (e.g. 'info,price_recommender=debug').
    #[structopt(
        long,
        env = "LOG_FILTER",
        default_value = "warn,price_recommender=info,pricing_core=info,warp::filters::log=info"
    )]
    log_filter: String,

    #[structopt(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: SocketAddr,

    /// Symmetric secret signing the issued bearer tokens.
    #[structopt(long, env = "SECRET_KEY", default_value = "super-secret-key", hide_env_values = true)]
    secret_key: String,

    #[structopt(long, env = "ACCESS_TOKEN_EXPIRE_MINUTES", default_value = "60")]
    access_token_expire_minutes: i64,

    #[structopt(long, env = "TEST_USER_EMAIL", default_value = "demo@example.com")]
    test_user_email: String,

    #[structopt(
        long,
        env = "TEST_USER_PASSWORD",
        default_value = "demo",
        hide_env_values = true
    )]
    test_user_password: String,

    /// Origins allowed to call the API from a browser; '*' allows any.
    #[structopt(
        long,
        env = "BACKEND_ALLOW_ORIGINS",
        default_value = "*",
        use_delimiter = true
    )]
    allow_origins: Vec<String>,

    /// Path to the serialised acceptance model artefact.
    #[structopt(
        long,
        env = "PRICING_MODEL_PATH",
        default_value = "model_enhanced.json",
        parse(from_os_str)
    )]
    model_path: PathBuf,

    /// Optional rider history table produced by the offline cache builder.
    #[structopt(long, env = "PRICING_USER_HISTORY_PATH", parse(from_os_str))]
    user_history_path: Option<PathBuf>,

    /// Optional driver history table produced by the offline cache builder.
    #[structopt(long, env = "PRICING_DRIVER_HISTORY_PATH", parse(from_os_str))]
    driver_history_path: Option<PathBuf>,

    /// Number of candidate prices scored per scan; values below 20 are
    /// raised to 20.
    #[structopt(long, env = "PRICING_SCAN_POINTS", default_value = "200")]
    scan_points: usize,

    /// Serve a documented static payload instead of failing when the model
    /// artefact is missing or invalid.
    #[structopt(
        long,
        env = "PRICING_ML_ALLOW_STUB_FALLBACK",
        default_value = "false",
        parse(try_from_str)
    )]
    ml_allow_stub_fallback: bool,

    /// Directory with the static web UI to serve on '/'.
    #[structopt(long, env = "WEBUI_DIR", parse(from_os_str))]
    webui_dir: Option<PathBuf>,
}

fn main() {
    let options = Options::from_args();
    let (_, _guard) = logging::init(&options.log_filter);
    log::info!(
        "starting price recommender on {} (model {}, {} scan points, stub fallback {})",
        options.bind_address,
        options.model_path.display(),
        options.scan_points,
        options.ml_allow_stub_fallback,
    );

    let registry = Arc::new(Registry::new());
    let engine_metrics =
        EngineMetrics::new(&registry).expect("failed to register engine metrics");
    let http_metrics =
        Arc::new(Metrics::new(&registry).expect("failed to register http metrics"));
    let health = Arc::new(HttpHealthEndpoint::new());

    let history = HistoryCache::load(
        options.user_history_path.as_deref(),
        options.driver_history_path.as_deref(),
    );
    let engine = Arc::new(Engine::new(
        LazyModel::new(&options.model_path),
        history,
        ScanConfig::new(options.scan_points),
        engine_metrics,
    ));
    let auth = Arc::new(Authenticator::new(
        &options.secret_key,
        options.access_token_expire_minutes,
        &options.test_user_email,
        &options.test_user_password,
    ));

    let mut runtime = runtime::Builder::new()
        .threaded_scheduler()
        .enable_all()
        .build()
        .expect("failed to build the runtime");

    // Warm the model so the first request does not pay for the load; a
    // missing artefact is surfaced per request (or covered by the stub).
    match runtime.block_on(engine.model()) {
        Ok(_) => log::info!("acceptance model ready"),
        Err(err) if options.ml_allow_stub_fallback => {
            log::warn!("model artefact unavailable, stub fallback enabled: {}", err)
        }
        Err(err) => log::error!(
            "model artefact unavailable, pricing requests will fail: {}",
            err
        ),
    }

    let context = AppContext {
        engine,
        auth,
        health: health.clone(),
        metrics: Arc::new(MetricsHandler::new(registry)),
        stub_fallback: options.ml_allow_stub_fallback,
        webui_dir: options.webui_dir.clone(),
    };

    let cors = cors(&options.allow_origins);
    let routes = filter::all(context)
        .with(warp::log::custom(move |info| {
            http_metrics.handle_response(info)
        }))
        .with(warp::log("price_recommender"))
        .with(cors);

    let serve_task = runtime.spawn(warp::serve(routes).run(options.bind_address));

    log::info!("server ready on {}", options.bind_address);
    runtime.block_on(async move {
        health.notify_ready();
        if serve_task.await.is_err() {
            log::error!("serve task exited");
        }
    });
}

fn cors(allow_origins: &[String]) -> warp::filters::cors::Cors {
    let builder = warp::cors()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["authorization", "content-type"]);
    if allow_origins.iter().any(|origin| origin == "*") || allow_origins.is_empty() {
        builder.allow_any_origin().build()
    } else {
        builder
            .allow_origins(allow_origins.iter().map(String::as_str))
            .build()
    }
}
