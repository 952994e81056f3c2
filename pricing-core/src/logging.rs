//! Process-wide logger setup.
//!
//! Builds an async terminal drain filtered by an env-logger style directive
//! string and bridges the `log` crate so every module can use the `log::`
//! macros.

use slog::{o, Drain, Logger};
use slog_scope::GlobalLoggerGuard;

/// Initializes the global logger from the given filter (e.g.
/// 'info,price_recommender=debug'). Returns the root logger and the guard
/// that keeps it installed; the caller holds on to the guard for the process
/// lifetime.
pub fn init(filter: &str) -> (Logger, GlobalLoggerGuard) {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::LogBuilder::new(drain).parse(filter).build();
    let drain = slog_async::Async::new(drain.fuse())
        .chan_size(4096)
        .build()
        .fuse();

    let logger = Logger::root(drain, o!());
    let guard = slog_scope::set_global_logger(logger.clone());
    slog_stdlog::init().expect("failed to register the log backend");

    (logger, guard)
}
