use std::path::PathBuf;

pub const LOG_ENV: &str = "EDUCAD_LOG";
pub const WORKSPACE_ENV: &str = "EDUCAD_WORKSPACE";
const DEFAULT_LOG_FILTER: &str = "info";

/// Startup configuration read from the environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub workspace: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let workspace = lookup(WORKSPACE_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self { workspace }
    }
}

/// Logs go to stderr; stdout carries protocol responses only.
pub fn init_logging() {
    let env = env_logger::Env::new().filter_or(LOG_ENV, DEFAULT_LOG_FILTER);
    let _ = env_logger::Builder::from_env(env)
        .target(env_logger::Target::Stderr)
        .try_init();
}
