//! Notification Worker (C2): single-consumer dispatch queue that drives
//! the external transport, tracks per-profile counters, auto-disables a
//! profile after repeated failures, and records a delivery journal.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::broker::Broker;
use crate::config::NotifyTarget;
use crate::events::{now_iso, Event, NotifyProfileAutoDisabledEvent, NotifyProfileStatusEvent};

pub const QUEUE_CAPACITY: usize = 7000;
const MAX_MESSAGE_LEN: usize = 1024;
const AUTO_DISABLE_THRESHOLD: u32 = 3;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport error: {0}")]
    Failed(String),
}

/// The external collaborator: an opaque `send` operation. `PushoverTransport`
/// in the `transport` crate is the real implementation; tests use a fake.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(
        &self,
        user_key: &str,
        api_token: &str,
        title: &str,
        message: &str,
    ) -> Result<(), TransportError>;
}

#[derive(Debug, Clone)]
pub struct NotifyProfileView {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub active: bool,
    pub user_key: String,
    pub api_token: String,
}

#[derive(Debug, Clone, Copy)]
pub struct DeliveryCountersUpdate {
    pub failure_count: u32,
    pub sent_count: u32,
    pub active: bool,
    pub just_auto_disabled: bool,
}

/// Re-reads and updates profile state. Implemented by the persistence
/// façade so counter updates go through its single-writer discipline.
#[async_trait]
pub trait NotifyProfileDirectory: Send + Sync {
    async fn lookup(&self, profile_id: &str) -> Option<NotifyProfileView>;
    async fn record_delivery(&self, profile_id: &str, success: bool) -> DeliveryCountersUpdate;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Success,
    Error,
}

#[derive(Debug, Clone)]
pub struct JournalRow {
    pub ts: String,
    pub runner_id: String,
    pub profile_id: String,
    pub profile_name: String,
    pub delivery: Delivery,
    pub title: String,
    pub message: String,
    pub error: Option<String>,
}

#[async_trait]
pub trait JournalSink: Send + Sync {
    async fn record(&self, row: JournalRow);
}

struct QueueEntry {
    profile_id: String,
    profile_name: String,
    only_updates: bool,
    message: String,
    title: String,
    runner_id: String,
    #[allow(dead_code)]
    pattern: String,
}

fn clamp_message(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.chars().count() <= MAX_MESSAGE_LEN {
        trimmed.to_string()
    } else {
        trimmed.chars().take(MAX_MESSAGE_LEN).collect()
    }
}

pub struct Notifier {
    tx: mpsc::Sender<QueueEntry>,
}

impl Notifier {
    pub fn new(
        broker: Broker,
        transport: Arc<dyn NotificationTransport>,
        directory: Arc<dyn NotifyProfileDirectory>,
        journal: Arc<dyn JournalSink>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(run_consumer(rx, broker, transport, directory, journal));
        Self { tx }
    }

    /// Enqueues a notification for every eligible target. Targets that are
    /// inactive or lack credentials are skipped up front; a full queue
    /// drops the entry and reports a `case_error`.
    pub fn enqueue(
        &self,
        broker: &Broker,
        targets: &[NotifyTarget],
        message: &str,
        title: &str,
        runner_id: &str,
        pattern: &str,
    ) {
        for target in targets {
            if !target.active || (target.user_key.is_empty() && target.api_token.is_empty()) {
                continue;
            }
            let entry = QueueEntry {
                profile_id: target.profile_id.clone(),
                profile_name: target.profile_name.clone(),
                only_updates: target.only_updates,
                message: message.to_string(),
                title: title.to_string(),
                runner_id: runner_id.to_string(),
                pattern: pattern.to_string(),
            };
            if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(entry) {
                broker.publish(Event::CaseError {
                    ts: now_iso(),
                    runner_id: runner_id.to_string(),
                    pattern: pattern.to_string(),
                    error: "notification queue full, dropped".to_string(),
                });
            }
        }
    }
}

async fn run_consumer(
    mut rx: mpsc::Receiver<QueueEntry>,
    broker: Broker,
    transport: Arc<dyn NotificationTransport>,
    directory: Arc<dyn NotifyProfileDirectory>,
    journal: Arc<dyn JournalSink>,
) {
    // (runner_id, profile_id) -> last message sent, for `only_updates` suppression.
    let mut last_sent: HashMap<(String, String), String> = HashMap::new();

    while let Some(entry) = rx.recv().await {
        let Some(profile) = directory.lookup(&entry.profile_id).await else {
            continue;
        };
        if !profile.active || profile.kind != "pushover" {
            continue;
        }
        if profile.user_key.is_empty() && profile.api_token.is_empty() {
            continue;
        }

        if entry.only_updates {
            let key = (entry.runner_id.clone(), entry.profile_id.clone());
            if last_sent.get(&key) == Some(&entry.message) {
                continue;
            }
        }

        let message = clamp_message(&entry.message);
        let result = transport
            .send(&profile.user_key, &profile.api_token, &entry.title, &message)
            .await;

        match result {
            Ok(()) => {
                last_sent.insert(
                    (entry.runner_id.clone(), entry.profile_id.clone()),
                    entry.message.clone(),
                );
                directory.record_delivery(&entry.profile_id, true).await;
                journal
                    .record(JournalRow {
                        ts: now_iso(),
                        runner_id: entry.runner_id.clone(),
                        profile_id: entry.profile_id.clone(),
                        profile_name: entry.profile_name.clone(),
                        delivery: Delivery::Success,
                        title: entry.title.clone(),
                        message: message.clone(),
                        error: None,
                    })
                    .await;
                broker.publish(Event::NotifyProfileStatus(NotifyProfileStatusEvent {
                    ts: now_iso(),
                    profile_id: entry.profile_id.clone(),
                    delivery: "success".to_string(),
                    auto_disabled: None,
                    error: None,
                }));
            }
            Err(err) => {
                let update = directory.record_delivery(&entry.profile_id, false).await;
                journal
                    .record(JournalRow {
                        ts: now_iso(),
                        runner_id: entry.runner_id.clone(),
                        profile_id: entry.profile_id.clone(),
                        profile_name: entry.profile_name.clone(),
                        delivery: Delivery::Error,
                        title: entry.title.clone(),
                        message: message.clone(),
                        error: Some(err.to_string()),
                    })
                    .await;
                broker.publish(Event::NotifyProfileStatus(NotifyProfileStatusEvent {
                    ts: now_iso(),
                    profile_id: entry.profile_id.clone(),
                    delivery: "error".to_string(),
                    auto_disabled: Some(update.just_auto_disabled),
                    error: Some(err.to_string()),
                }));
                broker.publish(Event::CaseError {
                    ts: now_iso(),
                    runner_id: entry.runner_id.clone(),
                    pattern: entry.pattern.clone(),
                    error: err.to_string(),
                });
                if update.just_auto_disabled {
                    broker.publish(Event::NotifyProfileAutoDisabled(
                        NotifyProfileAutoDisabledEvent {
                            ts: now_iso(),
                            profile_id: entry.profile_id.clone(),
                            failure_count: update.failure_count,
                            reason: format!(
                                "auto-disabled after {} consecutive failures",
                                AUTO_DISABLE_THRESHOLD
                            ),
                        },
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeTransport {
        fail: AtomicBool,
    }

    #[async_trait]
    impl NotificationTransport for FakeTransport {
        async fn send(&self, _u: &str, _t: &str, _title: &str, _m: &str) -> Result<(), TransportError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(TransportError::Failed("boom".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct FakeDirectory {
        profiles: Mutex<HashMap<String, (NotifyProfileView, u32, u32)>>,
    }

    #[async_trait]
    impl NotifyProfileDirectory for FakeDirectory {
        async fn lookup(&self, id: &str) -> Option<NotifyProfileView> {
            self.profiles.lock().get(id).map(|(p, ..)| p.clone())
        }
        async fn record_delivery(&self, id: &str, success: bool) -> DeliveryCountersUpdate {
            let mut profiles = self.profiles.lock();
            let Some((profile, failure_count, sent_count)) = profiles.get_mut(id) else {
                return DeliveryCountersUpdate {
                    failure_count: 0,
                    sent_count: 0,
                    active: false,
                    just_auto_disabled: false,
                };
            };
            if success {
                *failure_count = 0;
                *sent_count += 1;
            } else {
                *failure_count += 1;
            }
            let mut just_auto_disabled = false;
            if *failure_count >= AUTO_DISABLE_THRESHOLD && profile.active {
                profile.active = false;
                just_auto_disabled = true;
            }
            DeliveryCountersUpdate {
                failure_count: *failure_count,
                sent_count: *sent_count,
                active: profile.active,
                just_auto_disabled,
            }
        }
    }

    struct FakeJournal {
        rows: Mutex<Vec<JournalRow>>,
    }
    #[async_trait]
    impl JournalSink for FakeJournal {
        async fn record(&self, row: JournalRow) {
            self.rows.lock().push(row);
        }
    }

    fn view(id: &str) -> NotifyProfileView {
        NotifyProfileView {
            id: id.to_string(),
            name: "p".to_string(),
            kind: "pushover".to_string(),
            active: true,
            user_key: "u".to_string(),
            api_token: "t".to_string(),
        }
    }

    #[tokio::test]
    async fn only_updates_profile_suppresses_repeated_identical_message() {
        let broker = Broker::new(10, 10);
        let transport = Arc::new(FakeTransport { fail: AtomicBool::new(false) });
        let mut profiles = HashMap::new();
        profiles.insert("a".to_string(), (view("a"), 0, 0));
        profiles.insert("b".to_string(), (view("b"), 0, 0));
        let directory = Arc::new(FakeDirectory { profiles: Mutex::new(profiles) });
        let journal = Arc::new(FakeJournal { rows: Mutex::new(Vec::new()) });
        let notifier = Notifier::new(broker.clone(), transport, directory, journal.clone());

        let targets = vec![
            NotifyTarget {
                profile_id: "a".to_string(),
                profile_name: "A".to_string(),
                only_updates: false,
                active: true,
                user_key: "u".to_string(),
                api_token: "t".to_string(),
            },
            NotifyTarget {
                profile_id: "b".to_string(),
                profile_name: "B".to_string(),
                only_updates: true,
                active: true,
                user_key: "u".to_string(),
                api_token: "t".to_string(),
            },
        ];

        notifier.enqueue(&broker, &targets, "same", "title", "r1", "p");
        notifier.enqueue(&broker, &targets, "same", "title", "r1", "p");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let rows = journal.rows.lock();
        let a_count = rows.iter().filter(|r| r.profile_id == "a").count();
        let b_count = rows.iter().filter(|r| r.profile_id == "b").count();
        assert_eq!(a_count, 2);
        assert_eq!(b_count, 1);
    }

    #[tokio::test]
    async fn auto_disables_after_three_failures() {
        let broker = Broker::new(10, 10);
        let transport = Arc::new(FakeTransport { fail: AtomicBool::new(true) });
        let mut profiles = HashMap::new();
        profiles.insert("a".to_string(), (view("a"), 0, 0));
        let directory = Arc::new(FakeDirectory { profiles: Mutex::new(profiles) });
        let journal = Arc::new(FakeJournal { rows: Mutex::new(Vec::new()) });
        let notifier = Notifier::new(broker.clone(), transport, directory.clone(), journal);

        let targets = vec![NotifyTarget {
            profile_id: "a".to_string(),
            profile_name: "A".to_string(),
            only_updates: false,
            active: true,
            user_key: "u".to_string(),
            api_token: "t".to_string(),
        }];
        for _ in 0..3 {
            notifier.enqueue(&broker, &targets, "m", "t", "r1", "p");
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let profiles = directory.profiles.lock();
        assert!(!profiles.get("a").unwrap().0.active);
    }

    #[test]
    fn clamp_trims_and_limits_length() {
        let long = "x".repeat(2000);
        let clamped = clamp_message(&format!("  {long}  "));
        assert_eq!(clamped.chars().count(), MAX_MESSAGE_LEN);
    }
}
