//! Persistence façade: the SQLite-backed configuration document, the
//! bounded notification journal, and per-runner runtime-status checkpoints.
//!
//! This crate is one of the external collaborators the core treats as
//! opaque — it implements `runner_core::{NotifyProfileDirectory,
//! JournalSink, RuntimeStatusSink}` and exposes a small document CRUD API
//! consumed by the HTTP surface.

mod crypto;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;

use runner_core::document::{normalise, StateDocument};
use runner_core::notifier::{
    Delivery, JournalRow, JournalSink, NotifyProfileDirectory, NotifyProfileView,
};
use runner_core::supervisor::RuntimeStatusSink;

pub use crypto::Envelope;

pub const JOURNAL_CAP: i64 = 5000;

/// Mirrors `notifier::AUTO_DISABLE_THRESHOLD` — the directory owns the
/// counters, so it decides the disable edge too.
const AUTO_DISABLE_THRESHOLD: u32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialisation error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage-agnostic document persistence, so the core and `server` can be
/// exercised against `MemDocumentStore` without a SQLite file on disk.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_document(&self) -> Result<StateDocument>;
    async fn save_document(&self, doc: StateDocument) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct JournalRowRecord {
    pub ts: String,
    pub runner_id: String,
    pub profile_id: String,
    pub profile_name: String,
    pub delivery: Delivery,
    pub title: String,
    pub message: String,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<StdMutex<Connection>>,
    envelope: Envelope,
}

impl SqliteStore {
    pub fn open(path: &Path, envelope: Envelope) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
            envelope,
        })
    }

    #[cfg(test)]
    pub fn open_in_memory(envelope: Envelope) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(StdMutex::new(conn)),
            envelope,
        })
    }

    async fn with_conn<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Connection) -> T + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|p| p.into_inner());
            f(&guard)
        })
        .await
        .expect("sqlite worker task panicked")
    }

    pub async fn list_notifications(&self, limit: i64) -> Result<Vec<JournalRowRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT ts, runner_id, profile_id, profile_name, delivery, title, message, error
                 FROM notification_journal ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    let delivery: String = row.get(4)?;
                    Ok(JournalRowRecord {
                        ts: row.get(0)?,
                        runner_id: row.get(1)?,
                        profile_id: row.get(2)?,
                        profile_name: row.get(3)?,
                        delivery: if delivery == "success" { Delivery::Success } else { Delivery::Error },
                        title: row.get(5)?,
                        message: row.get(6)?,
                        error: row.get(7)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn clear_notifications(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM notification_journal", [])?;
            Ok(())
        })
        .await
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL);
         CREATE TABLE IF NOT EXISTS runtime_status (
             runner_id TEXT PRIMARY KEY,
             last_case TEXT NOT NULL,
             last_case_ts TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS notification_journal (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             ts TEXT NOT NULL,
             runner_id TEXT NOT NULL,
             profile_id TEXT NOT NULL,
             profile_name TEXT NOT NULL,
             delivery TEXT NOT NULL,
             title TEXT NOT NULL,
             message TEXT NOT NULL,
             error TEXT
         );",
    )?;
    Ok(())
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn load_document(&self) -> Result<StateDocument> {
        let envelope = self.envelope.clone();
        self.with_conn(move |conn| {
            let raw: Option<String> = conn
                .query_row("SELECT value FROM kv WHERE key = 'state'", [], |row| row.get(0))
                .optional()?;
            let mut doc: StateDocument = match raw {
                Some(text) => serde_json::from_str(&text).unwrap_or_else(|err| {
                    tracing::warn!(error = %err, "persisted document failed to parse, falling back to default");
                    StateDocument::default()
                }),
                None => StateDocument::default(),
            };
            open_document(&mut doc, &envelope);
            Ok(normalise(doc))
        })
        .await
    }

    async fn save_document(&self, doc: StateDocument) -> Result<()> {
        let envelope = self.envelope.clone();
        self.with_conn(move |conn| {
            let mut sealed = normalise(doc);
            seal_document(&mut sealed, &envelope);
            let text = serde_json::to_string(&sealed)?;
            conn.execute(
                "INSERT INTO kv (key, value) VALUES ('state', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![text],
            )?;
            Ok(())
        })
        .await
    }
}

/// In-memory `DocumentStore`, for tests that need the trait without a
/// SQLite file on disk — mirrors the `MemKV`/`SqliteKV` split.
#[derive(Clone, Default)]
pub struct MemDocumentStore {
    doc: Arc<StdMutex<Option<StateDocument>>>,
}

impl MemDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemDocumentStore {
    async fn load_document(&self) -> Result<StateDocument> {
        let guard = self.doc.lock().unwrap_or_else(|p| p.into_inner());
        Ok(normalise(guard.clone().unwrap_or_default()))
    }

    async fn save_document(&self, doc: StateDocument) -> Result<()> {
        let mut guard = self.doc.lock().unwrap_or_else(|p| p.into_inner());
        *guard = Some(normalise(doc));
        Ok(())
    }
}

fn seal_document(doc: &mut StateDocument, envelope: &Envelope) {
    for profile in &mut doc.notify_profiles {
        profile.config.user_key = envelope.seal(&profile.config.user_key);
        profile.config.api_token = envelope.seal(&profile.config.api_token);
    }
    if let Some(key) = &doc.pushover_user_key {
        doc.pushover_user_key = Some(envelope.seal(key));
    }
    if let Some(token) = &doc.pushover_api_token {
        doc.pushover_api_token = Some(envelope.seal(token));
    }
}

fn open_document(doc: &mut StateDocument, envelope: &Envelope) {
    for profile in &mut doc.notify_profiles {
        profile.config.user_key = envelope.open(&profile.config.user_key);
        profile.config.api_token = envelope.open(&profile.config.api_token);
    }
    if let Some(key) = &doc.pushover_user_key {
        doc.pushover_user_key = Some(envelope.open(key));
    }
    if let Some(token) = &doc.pushover_api_token {
        doc.pushover_api_token = Some(envelope.open(token));
    }
}

#[async_trait]
impl RuntimeStatusSink for SqliteStore {
    async fn checkpoint(&self, runner_id: &str, last_case: &str, last_case_ts: &str) {
        let runner_id = runner_id.to_string();
        let last_case = last_case.to_string();
        let last_case_ts = last_case_ts.to_string();
        let result = self
            .with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO runtime_status (runner_id, last_case, last_case_ts) VALUES (?1, ?2, ?3)
                     ON CONFLICT(runner_id) DO UPDATE SET last_case = excluded.last_case, last_case_ts = excluded.last_case_ts",
                    params![runner_id, last_case, last_case_ts],
                )
            })
            .await;
        if let Err(err) = result {
            tracing::warn!(%err, "failed to checkpoint runtime status");
        }
    }
}

#[async_trait]
impl NotifyProfileDirectory for SqliteStore {
    async fn lookup(&self, profile_id: &str) -> Option<NotifyProfileView> {
        let doc = match self.load_document().await {
            Ok(doc) => doc,
            Err(err) => {
                tracing::warn!(%err, "failed to load document for profile lookup");
                return None;
            }
        };
        doc.notify_profiles
            .into_iter()
            .find(|p| p.id == profile_id)
            .map(|p| NotifyProfileView {
                id: p.id,
                name: p.name,
                kind: p.kind,
                active: p.active,
                user_key: p.config.user_key,
                api_token: p.config.api_token,
            })
    }

    async fn record_delivery(
        &self,
        profile_id: &str,
        success: bool,
    ) -> runner_core::notifier::DeliveryCountersUpdate {
        let profile_id = profile_id.to_string();
        let envelope = self.envelope.clone();
        let result = self
            .with_conn(move |conn| -> Result<runner_core::notifier::DeliveryCountersUpdate> {
                let raw: Option<String> = conn
                    .query_row("SELECT value FROM kv WHERE key = 'state'", [], |row| row.get(0))
                    .optional()?;
                let mut doc: StateDocument = match raw {
                    Some(text) => serde_json::from_str(&text)?,
                    None => StateDocument::default(),
                };

                let mut update = runner_core::notifier::DeliveryCountersUpdate {
                    failure_count: 0,
                    sent_count: 0,
                    active: false,
                    just_auto_disabled: false,
                };
                if let Some(profile) = doc.notify_profiles.iter_mut().find(|p| p.id == profile_id) {
                    if success {
                        profile.failure_count = 0;
                        profile.sent_count += 1;
                    } else {
                        profile.failure_count += 1;
                        if profile.failure_count >= AUTO_DISABLE_THRESHOLD && profile.active {
                            profile.active = false;
                            update.just_auto_disabled = true;
                        }
                    }
                    update.failure_count = profile.failure_count;
                    update.sent_count = profile.sent_count;
                    update.active = profile.active;
                }

                let mut sealed = doc.clone();
                seal_document(&mut sealed, &envelope);
                let text = serde_json::to_string(&sealed)?;
                conn.execute(
                    "INSERT INTO kv (key, value) VALUES ('state', ?1)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![text],
                )?;
                Ok(update)
            })
            .await;
        result.unwrap_or(runner_core::notifier::DeliveryCountersUpdate {
            failure_count: 0,
            sent_count: 0,
            active: false,
            just_auto_disabled: false,
        })
    }
}

#[async_trait]
impl JournalSink for SqliteStore {
    async fn record(&self, row: JournalRow) {
        let result = self
            .with_conn(move |conn| -> Result<()> {
                let delivery = match row.delivery {
                    Delivery::Success => "success",
                    Delivery::Error => "error",
                };
                conn.execute(
                    "INSERT INTO notification_journal (ts, runner_id, profile_id, profile_name, delivery, title, message, error)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![row.ts, row.runner_id, row.profile_id, row.profile_name, delivery, row.title, row.message, row.error],
                )?;
                conn.execute(
                    "DELETE FROM notification_journal WHERE id NOT IN (
                         SELECT id FROM notification_journal ORDER BY id DESC LIMIT ?1
                     )",
                    params![JOURNAL_CAP],
                )?;
                Ok(())
            })
            .await;
        if let Err(err) = result {
            tracing::warn!(%err, "failed to record notification journal row");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runner_core::document::{NotifyProfile, PushoverConfig};

    #[tokio::test]
    async fn save_then_load_round_trips_and_encrypts_credentials() {
        let store = SqliteStore::open_in_memory(Envelope::from_hex_key(Some(&hex::encode([3u8; 32])))).unwrap();
        let mut doc = StateDocument::default();
        doc.notify_profiles.push(NotifyProfile {
            id: "notify_a".to_string(),
            config: PushoverConfig {
                user_key: "u123".to_string(),
                api_token: "t456".to_string(),
            },
            ..Default::default()
        });
        store.save_document(doc).await.unwrap();

        let raw: String = store
            .with_conn(|conn| conn.query_row("SELECT value FROM kv WHERE key='state'", [], |r| r.get(0)).unwrap())
            .await;
        assert!(!raw.contains("u123"), "credential must not be stored in plaintext");

        let loaded = store.load_document().await.unwrap();
        assert_eq!(loaded.notify_profiles[0].config.user_key, "u123");
    }

    #[tokio::test]
    async fn record_delivery_auto_disables_after_three_failures() {
        let store = SqliteStore::open_in_memory(Envelope::none()).unwrap();
        let mut doc = StateDocument::default();
        doc.notify_profiles.push(NotifyProfile {
            id: "notify_a".to_string(),
            ..Default::default()
        });
        store.save_document(doc).await.unwrap();

        for _ in 0..2 {
            let update = store.record_delivery("notify_a", false).await;
            assert!(!update.just_auto_disabled);
        }
        let update = store.record_delivery("notify_a", false).await;
        assert!(update.just_auto_disabled);
        assert!(!update.active);
    }

    #[tokio::test]
    async fn journal_keeps_only_newest_entries() {
        let store = SqliteStore::open_in_memory(Envelope::none()).unwrap();
        for i in 0..10 {
            store
                .record(JournalRow {
                    ts: format!("t{i}"),
                    runner_id: "r".to_string(),
                    profile_id: "p".to_string(),
                    profile_name: "P".to_string(),
                    delivery: Delivery::Success,
                    title: "title".to_string(),
                    message: "m".to_string(),
                    error: None,
                })
                .await;
        }
        let rows = store.list_notifications(100).await.unwrap();
        assert_eq!(rows.len(), 10);
    }

    #[tokio::test]
    async fn mem_store_normalises_on_load_and_save() {
        let store = MemDocumentStore::new();
        let mut doc = StateDocument::default();
        doc.runners.push(runner_core::document::Runner {
            id: "bad id!!".to_string(),
            ..Default::default()
        });
        store.save_document(doc).await.unwrap();
        let loaded = store.load_document().await.unwrap();
        assert_ne!(loaded.runners[0].id, "bad id!!");
    }
}
