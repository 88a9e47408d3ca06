// ⚙️ Configuration - environment (+ optional .env) and logging setup

use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_DATABASE_PATH: &str = "next_school.db";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";
pub const DEFAULT_LOG_FILTER: &str = "next_school=info,tower_http=info";
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(8 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// NEXT_DATABASE_PATH
    pub database_path: PathBuf,

    /// NEXT_AUDIT_PATH - defaults to the roster database
    pub audit_path: PathBuf,

    /// NEXT_BIND_ADDRESS
    pub bind_address: String,

    /// NEXT_STAFF_FILE - JSON staff directory; fixture accounts when unset
    pub staff_file: Option<PathBuf>,

    /// NEXT_SEED_DEMO - load the demo roster into an empty database
    pub seed_demo: bool,

    /// NEXT_SESSION_TTL_MINUTES - bearer token lifetime
    pub session_ttl: Duration,
}

impl AppConfig {
    /// Load `.env` if present, then read the process environment
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_path = non_empty("NEXT_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH));
        let audit_path = non_empty("NEXT_AUDIT_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| database_path.clone());

        AppConfig {
            audit_path,
            database_path,
            bind_address: non_empty("NEXT_BIND_ADDRESS")
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            staff_file: non_empty("NEXT_STAFF_FILE").map(PathBuf::from),
            seed_demo: non_empty("NEXT_SEED_DEMO")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            session_ttl: non_empty("NEXT_SESSION_TTL_MINUTES")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|minutes| *minutes > 0)
                .map(|minutes| Duration::from_secs(minutes * 60))
                .unwrap_or(DEFAULT_SESSION_TTL),
        }
    }
}

/// Install the global subscriber. RUST_LOG overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // A second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
