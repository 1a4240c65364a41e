//! `runnerd`: the HTTP/SSE control surface over the runner supervisor core.

mod auth;
mod error;
mod routes;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use runner_core::{Broker, Notifier, Sequencer, Supervisor};
use store::{Envelope, SqliteStore};

use crate::state::{AppState, BasicAuthConfig};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("RUNNERD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let db_path = PathBuf::from(env_or("RUNNERD_DB_PATH", "./runnerd.db"));
    let bind_addr = env_or("RUNNERD_BIND_ADDR", "127.0.0.1:8080");
    let log_dir = PathBuf::from(env_or("RUNNERD_LOG_DIR", "./logs"));
    let credential_key = std::env::var("RUNNERD_CREDENTIAL_KEY").ok();
    let auth = match (std::env::var("RUNNERD_AUTH_USER"), std::env::var("RUNNERD_AUTH_PASS")) {
        (Ok(user), Ok(pass)) => Some(BasicAuthConfig { user, pass }),
        _ => None,
    };
    if auth.is_none() {
        tracing::warn!("RUNNERD_AUTH_USER/RUNNERD_AUTH_PASS not set; control surface is unauthenticated");
    }

    let envelope = Envelope::from_hex_key(credential_key.as_deref());
    let store = Arc::new(SqliteStore::open(&db_path, envelope)?);

    let broker = Broker::default();
    let transport: Arc<dyn runner_core::NotificationTransport> = Arc::new(transport::PushoverTransport::new());
    let notifier = Arc::new(Notifier::new(broker.clone(), transport.clone(), store.clone(), store.clone()));
    let supervisor = Supervisor::new(broker.clone(), notifier, log_dir.clone(), store.clone());
    let sequencer = Sequencer::new(supervisor.clone(), broker.clone());

    let state = AppState {
        broker,
        supervisor,
        sequencer,
        store,
        transport,
        log_dir,
        auth,
    };

    let app = routes::build(state);
    let listener = tokio::net::TcpListener::bind(bind_addr.as_str()).await?;
    tracing::info!(%bind_addr, "runnerd listening");
    axum::serve(listener, app).await?;
    Ok(())
}
