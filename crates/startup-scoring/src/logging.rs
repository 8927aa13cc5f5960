//! `env_logger` setup shared by the demos.
use log::LevelFilter;

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "SCORING_LOG";
pub const DEFAULT_FILTER: &str = "warn,startup_scoring=info";

/// Initialise logging from `SCORING_LOG`. Calling it again is a no-op.
pub fn init_logging() {
    let _ = env_logger::Builder::default()
        .filter_level(LevelFilter::Warn)
        .parse_env(env_logger::Env::default().filter_or(LOG_ENV, DEFAULT_FILTER))
        .try_init();
}
