//! logger setup. RUST_LOG wins over `logging.level` from the config file.

use crate::config::LoggingConfig;

pub fn init(config: &LoggingConfig) {
    let env = env_logger::Env::default().default_filter_or(config.level.as_str());
    if let Err(e) = env_logger::Builder::from_env(env)
        .format_target(false)
        .try_init()
    {
        eprintln!("[LOGGING] logger already initialised: {}", e);
    }
}
