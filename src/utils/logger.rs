use env_logger::{Builder, Env};

/// Initializes the logger, honoring RUST_LOG over the configured default.
pub fn setup_logger(default_level: &str) {
    let env = Env::default().default_filter_or(default_level);
    Builder::from_env(env).init();
}
