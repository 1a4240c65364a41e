//! Group Sequencer (C4): starts member runners one at a time through the
//! supervisor, observing their terminal status and propagating stop or
//! failure across the group. At most one sequence runs per group id.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::broker::Broker;
use crate::config;
use crate::document::StateDocument;
use crate::error::{Result, SupervisorError};
use crate::events::{now_iso, Event, GroupStatusEvent};
use crate::supervisor::{schedule_poll_interval, Supervisor};

struct GroupRuntime {
    group_id: String,
    group_name: String,
    runner_ids: Vec<String>,
    stop_requested: AtomicBool,
    current_runner_id: Mutex<String>,
    current_index: AtomicUsize,
    completed_count: AtomicUsize,
}

impl GroupRuntime {
    fn status_event(&self, status: &str, error: Option<String>) -> GroupStatusEvent {
        GroupStatusEvent {
            ts: now_iso(),
            group_id: self.group_id.clone(),
            group_name: self.group_name.clone(),
            status: status.to_string(),
            runner_ids: self.runner_ids.clone(),
            current_runner_id: self.current_runner_id.lock().clone(),
            current_index: self.current_index.load(Ordering::SeqCst),
            completed_count: self.completed_count.load(Ordering::SeqCst),
            total_count: self.runner_ids.len(),
            error,
        }
    }
}

#[derive(Clone)]
pub struct Sequencer {
    supervisor: Supervisor,
    broker: Broker,
    active: Arc<Mutex<HashMap<String, Arc<GroupRuntime>>>>,
}

impl Sequencer {
    pub fn new(supervisor: Supervisor, broker: Broker) -> Self {
        Self {
            supervisor,
            broker,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts the group's sequence. `doc` is the configuration snapshot the
    /// whole sequence runs against; a concurrent config change is picked up
    /// only by a subsequent `start_group` call.
    pub fn start_group(&self, doc: StateDocument, group_id: &str) -> Result<()> {
        let group = doc
            .runner_groups
            .iter()
            .find(|g| g.id == group_id)
            .ok_or_else(|| SupervisorError::not_found(format!("group {group_id}")))?;
        let runner_ids = group.runner_ids.clone();
        let group_name = group.name.clone();

        let mut active = self.active.lock();
        if active.contains_key(group_id) {
            return Err(SupervisorError::conflict(format!(
                "group {group_id} sequence already running"
            )));
        }

        let snapshot = self.supervisor.snapshot();
        let busy: Vec<&String> = runner_ids
            .iter()
            .filter(|rid| snapshot.get(*rid).is_some_and(|s| s.running || s.scheduled))
            .collect();
        if !busy.is_empty() {
            return Err(SupervisorError::conflict(format!(
                "group contains active/scheduled runners: {}",
                busy.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            )));
        }

        let runtime = Arc::new(GroupRuntime {
            group_id: group_id.to_string(),
            group_name,
            runner_ids,
            stop_requested: AtomicBool::new(false),
            current_runner_id: Mutex::new(String::new()),
            current_index: AtomicUsize::new(0),
            completed_count: AtomicUsize::new(0),
        });
        active.insert(group_id.to_string(), runtime.clone());
        drop(active);

        self.broker
            .publish(Event::GroupStatus(runtime.status_event("started", None)));

        let this = self.clone();
        tokio::spawn(async move { this.run_group(runtime, doc).await });
        Ok(())
    }

    /// Stops a running sequence if one is active, and unconditionally stops
    /// every id in `fallback_runner_ids` (used when no sequence is active
    /// but the caller still wants the group's members stopped).
    pub fn stop_group(&self, group_id: &str, group_name: &str, fallback_runner_ids: &[String]) {
        let runtime = self.active.lock().get(group_id).cloned();
        if let Some(runtime) = &runtime {
            runtime.stop_requested.store(true, Ordering::SeqCst);
            self.broker
                .publish(Event::GroupStatus(runtime.status_event("stopping", None)));
        }

        let stop_ids: Vec<String> = match &runtime {
            Some(runtime) => runtime.runner_ids.clone(),
            None => fallback_runner_ids.to_vec(),
        };
        for runner_id in &stop_ids {
            let _ = self.supervisor.stop(runner_id);
        }

        if runtime.is_none() {
            self.broker.publish(Event::GroupStatus(GroupStatusEvent {
                ts: now_iso(),
                group_id: group_id.to_string(),
                group_name: group_name.to_string(),
                status: "stopped".to_string(),
                runner_ids: stop_ids.clone(),
                current_runner_id: String::new(),
                current_index: 0,
                completed_count: 0,
                total_count: stop_ids.len(),
                error: None,
            }));
        }
    }

    fn finish(&self, runtime: &Arc<GroupRuntime>, status: &str, error: Option<String>) {
        self.broker
            .publish(Event::GroupStatus(runtime.status_event(status, error)));
        let mut active = self.active.lock();
        if let Some(current) = active.get(&runtime.group_id) {
            if Arc::ptr_eq(current, runtime) {
                active.remove(&runtime.group_id);
            }
        }
    }

    async fn run_group(&self, runtime: Arc<GroupRuntime>, doc: StateDocument) {
        for (idx, runner_id) in runtime.runner_ids.clone().into_iter().enumerate() {
            let index = idx + 1;
            if runtime.stop_requested.load(Ordering::SeqCst) {
                self.finish(&runtime, "stopped", None);
                return;
            }

            *runtime.current_runner_id.lock() = runner_id.clone();
            runtime.current_index.store(index, Ordering::SeqCst);
            self.broker
                .publish(Event::GroupStatus(runtime.status_event("running", None)));

            let cfg = match config::compile_runner_cfg(&doc, &runner_id, &self.broker) {
                Ok(cfg) => cfg,
                Err(err) => {
                    self.finish(
                        &runtime,
                        "error",
                        Some(format!("could not start runner {runner_id}: {err}")),
                    );
                    return;
                }
            };
            if let Err(err) = self.supervisor.start(cfg) {
                self.finish(
                    &runtime,
                    "error",
                    Some(format!("could not start runner {runner_id}: {err}")),
                );
                return;
            }

            loop {
                if runtime.stop_requested.load(Ordering::SeqCst) {
                    let _ = self.supervisor.stop(&runner_id);
                    self.finish(&runtime, "stopped", None);
                    return;
                }
                match self.supervisor.get_runner_status(&runner_id) {
                    Some(st) if !st.running && !st.scheduled => break,
                    None => break,
                    _ => {}
                }
                tokio::time::sleep(schedule_poll_interval()).await;
            }

            let status = self.supervisor.get_runner_status(&runner_id);
            runtime.completed_count.store(index, Ordering::SeqCst);
            self.broker
                .publish(Event::GroupStatus(runtime.status_event("running", None)));

            let (paused, stopped, last_exit_code) = status
                .map(|s| (s.paused, s.stopped, s.last_exit_code))
                .unwrap_or((false, false, None));
            let failed = paused || stopped || matches!(last_exit_code, Some(code) if code != 0);
            if failed {
                let error = if paused {
                    format!("runner {runner_id} paused")
                } else if stopped {
                    format!("runner {runner_id} stopped")
                } else {
                    format!("runner {runner_id} failed (exit={last_exit_code:?})")
                };
                self.finish(&runtime, "error", Some(error));
                return;
            }
        }

        self.finish(&runtime, "finished", None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Runner, RunnerGroup};
    use crate::notifier::{JournalRow, JournalSink, NotificationTransport, NotifyProfileDirectory, TransportError};
    use crate::supervisor::NullStatusSink;
    use async_trait::async_trait;

    struct NoopTransport;
    #[async_trait]
    impl NotificationTransport for NoopTransport {
        async fn send(&self, _u: &str, _t: &str, _title: &str, _m: &str) -> std::result::Result<(), TransportError> {
            Ok(())
        }
    }
    struct NoopDirectory;
    #[async_trait]
    impl NotifyProfileDirectory for NoopDirectory {
        async fn lookup(&self, _id: &str) -> Option<crate::notifier::NotifyProfileView> {
            None
        }
        async fn record_delivery(&self, _id: &str, _success: bool) -> crate::notifier::DeliveryCountersUpdate {
            crate::notifier::DeliveryCountersUpdate {
                failure_count: 0,
                sent_count: 0,
                active: true,
                just_auto_disabled: false,
            }
        }
    }
    struct NoopJournal;
    #[async_trait]
    impl JournalSink for NoopJournal {
        async fn record(&self, _row: JournalRow) {}
    }

    fn test_sequencer(tmp: &std::path::Path) -> Sequencer {
        let broker = Broker::new(10, 100);
        let notifier = Arc::new(crate::notifier::Notifier::new(
            broker.clone(),
            Arc::new(NoopTransport),
            Arc::new(NoopDirectory),
            Arc::new(NoopJournal),
        ));
        let supervisor = Supervisor::new(broker.clone(), notifier, tmp.to_path_buf(), Arc::new(NullStatusSink));
        Sequencer::new(supervisor, broker)
    }

    #[tokio::test]
    async fn group_with_failing_member_stops_before_later_members() {
        let tmp = std::env::temp_dir().join(format!("seqtest-{}", std::process::id()));
        let sequencer = test_sequencer(&tmp);
        let mut doc = StateDocument::default();
        doc.runners.push(Runner {
            id: "r1".to_string(),
            command: "exit 0".to_string(),
            max_runs: 1,
            ..Default::default()
        });
        doc.runners.push(Runner {
            id: "r2".to_string(),
            command: "exit 7".to_string(),
            max_runs: 1,
            ..Default::default()
        });
        doc.runners.push(Runner {
            id: "r3".to_string(),
            command: "touch /tmp/should-not-run-seqtest".to_string(),
            max_runs: 1,
            ..Default::default()
        });
        doc.runner_groups.push(RunnerGroup {
            id: "g1".to_string(),
            name: "g".to_string(),
            runner_ids: vec!["r1".to_string(), "r2".to_string(), "r3".to_string()],
        });

        let (_id, mut rx) = sequencer.broker.subscribe().unwrap();
        sequencer.start_group(doc, "g1").unwrap();

        let mut saw_error = false;
        for _ in 0..200 {
            match tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv()).await {
                Ok(Some(Event::GroupStatus(ev))) if ev.status == "error" => {
                    saw_error = true;
                    assert_eq!(ev.completed_count, 1);
                    break;
                }
                Ok(Some(_)) => continue,
                _ => break,
            }
        }
        assert!(saw_error, "expected group to end in error after r2 failed");
        assert!(!std::path::Path::new("/tmp/should-not-run-seqtest").exists());
    }
}
