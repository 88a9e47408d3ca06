// NEXT School - Web Server
// REST API with Axum

use anyhow::{Context, Result};
use next_school::api::{router, AppState};
use next_school::config::{init_tracing, AppConfig, DEFAULT_LOG_FILTER};
use next_school::{
    seed, CredentialVerifier, Identity, School, SqliteAuditLog, SqliteStore, StaticDirectory,
    TracingNotifier,
};
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env();
    init_tracing(DEFAULT_LOG_FILTER);

    info!("🌐 NEXT School - Web Server");

    // Open stores
    let store = SqliteStore::open(&config.database_path).with_context(|| {
        format!("Failed to open database {}", config.database_path.display())
    })?;
    let empty = store.is_empty()?;
    let audit = SqliteAuditLog::open(&config.audit_path).with_context(|| {
        format!("Failed to open audit log {}", config.audit_path.display())
    })?;
    info!(database = %config.database_path.display(), audit = %config.audit_path.display(), "stores opened");

    // Staff directory
    let directory: Arc<dyn CredentialVerifier> = match &config.staff_file {
        Some(path) => {
            let directory = StaticDirectory::from_json_file(path)?;
            info!(accounts = directory.len(), path = %path.display(), "staff directory loaded");
            Arc::new(directory)
        }
        None => {
            warn!("NEXT_STAFF_FILE not set, using development staff accounts");
            Arc::new(StaticDirectory::fixture())
        }
    };

    let school = School::open(
        Arc::new(store),
        Arc::new(audit),
        directory,
        Arc::new(TracingNotifier),
    )
    .context("Failed to load roster")?;

    if empty && config.seed_demo {
        school
            .reseed(&Identity::system(), seed::demo_roster()?)
            .context("Failed to seed demo roster")?;
        info!("demo roster seeded");
    }

    let app = router(AppState::new(Arc::new(school)).with_session_ttl(config.session_ttl));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;

    info!("🚀 Server running on http://{}", config.bind_address);
    info!("   API: http://{}/api/health", config.bind_address);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
