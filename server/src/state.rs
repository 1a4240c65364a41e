use std::path::PathBuf;
use std::sync::Arc;

use runner_core::NotificationTransport;
use runner_core::{Broker, Sequencer, Supervisor};
use store::SqliteStore;

#[derive(Clone)]
pub struct BasicAuthConfig {
    pub user: String,
    pub pass: String,
}

#[derive(Clone)]
pub struct AppState {
    pub broker: Broker,
    pub supervisor: Supervisor,
    pub sequencer: Sequencer,
    pub store: Arc<SqliteStore>,
    pub transport: Arc<dyn NotificationTransport>,
    pub log_dir: PathBuf,
    pub auth: Option<BasicAuthConfig>,
}
