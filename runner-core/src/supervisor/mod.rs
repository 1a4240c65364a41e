//! Runner Supervisor (C3): owns per-runner state machines, child
//! processes, and scheduling timers. Guarded by a single coarse lock per
//! §5 — every suspension point (process I/O, timer sleep, notifier
//! enqueue, status checkpointing) happens outside the lock.

mod alert;
mod logfile;
mod matcher;
mod process;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;

use crate::broker::Broker;
use crate::config::RunnerRuntimeConfig;
use crate::error::{Result, SupervisorError};
use crate::events::{now_iso, Event, StatusEvent};
use crate::notifier::Notifier;

use alert::AlertState;

pub use logfile::{clear_log, log_path, read_log};

const OUTPUT_RING_CAP: usize = 5000;
const SNAPSHOT_TAIL_LEN: usize = 200;
const SCHEDULE_POLL_MS: u64 = 200;

/// Checkpoints `(last_case, last_case_ts)` to disk on every case match, so
/// a restart can show the last known state before the first new match.
#[async_trait]
pub trait RuntimeStatusSink: Send + Sync {
    async fn checkpoint(&self, runner_id: &str, last_case: &str, last_case_ts: &str);
}

/// A sink that does nothing; useful for tests and for callers that don't
/// need the on-disk checkpoint.
pub struct NullStatusSink;

#[async_trait]
impl RuntimeStatusSink for NullStatusSink {
    async fn checkpoint(&self, _runner_id: &str, _last_case: &str, _last_case_ts: &str) {}
}

#[derive(Debug, Clone, Serialize)]
pub struct RunnerSnapshot {
    pub running: bool,
    pub stopped: bool,
    pub scheduled: bool,
    pub paused: bool,
    pub started_ts: Option<String>,
    pub active_ts: Option<String>,
    pub tail: Vec<String>,
    pub remaining: Option<i64>,
    pub run_count: u32,
    pub last_case: Option<String>,
    pub last_case_ts: Option<String>,
    pub consecutive_failures: u32,
    pub last_exit_code: Option<i32>,
    pub last_finish_ts: Option<String>,
}

struct RunnerSlot {
    cfg: RunnerRuntimeConfig,
    generation: u64,
    pgid: Option<i32>,
    started_ts: Option<String>,
    active_session_ts: Option<String>,
    output_ring: VecDeque<String>,
    last_nonempty_line: String,
    stopped: bool,
    scheduled: bool,
    paused: bool,
    /// `-1` means unbounded; otherwise remaining invocations in the
    /// current session, decremented on every dispatch.
    remaining: i64,
    run_count: u32,
    alert_state: AlertState,
    consecutive_failures: u32,
    last_exit_code: Option<i32>,
    last_finish_ts: Option<String>,
    last_case: Option<String>,
    last_case_ts: Option<String>,
    cancel: Arc<Notify>,
}

impl RunnerSlot {
    fn snapshot(&self) -> RunnerSnapshot {
        let tail_start = self.output_ring.len().saturating_sub(SNAPSHOT_TAIL_LEN);
        RunnerSnapshot {
            running: self.pgid.is_some(),
            stopped: self.stopped,
            scheduled: self.scheduled,
            paused: self.paused,
            started_ts: self.started_ts.clone(),
            active_ts: self.active_session_ts.clone(),
            tail: self.output_ring.iter().skip(tail_start).cloned().collect(),
            remaining: if self.remaining == -1 { None } else { Some(self.remaining) },
            run_count: self.run_count,
            last_case: self.last_case.clone(),
            last_case_ts: self.last_case_ts.clone(),
            consecutive_failures: self.consecutive_failures,
            last_exit_code: self.last_exit_code,
            last_finish_ts: self.last_finish_ts.clone(),
        }
    }
}

enum DriverOutcome {
    Stop,
    Reschedule(u64),
}

#[derive(Clone)]
pub struct Supervisor {
    slots: Arc<Mutex<HashMap<String, RunnerSlot>>>,
    broker: Broker,
    notifier: Arc<Notifier>,
    log_dir: PathBuf,
    status_sink: Arc<dyn RuntimeStatusSink>,
}

impl Supervisor {
    pub fn new(
        broker: Broker,
        notifier: Arc<Notifier>,
        log_dir: PathBuf,
        status_sink: Arc<dyn RuntimeStatusSink>,
    ) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            broker,
            notifier,
            log_dir,
            status_sink,
        }
    }

    pub fn snapshot(&self) -> HashMap<String, RunnerSnapshot> {
        self.slots
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), slot.snapshot()))
            .collect()
    }

    pub fn get_runner_status(&self, runner_id: &str) -> Option<RunnerSnapshot> {
        self.slots.lock().get(runner_id).map(RunnerSlot::snapshot)
    }

    /// Replaces a managed runner's compiled config in place, without
    /// disturbing the running state machine. A no-op if the runner has
    /// never been started (the next manual start supplies a fresh config).
    pub fn refresh_runtime_config(&self, cfg: RunnerRuntimeConfig) {
        if let Some(slot) = self.slots.lock().get_mut(&cfg.runner_id) {
            slot.cfg = cfg;
        }
    }

    /// Manual start (`reset_schedule=true` in the spec's terms — this
    /// supervisor never exposes a scheduled-start entry point; scheduling
    /// is internal to the per-runner driver loop). Fails with `Conflict`
    /// if the runner currently has a live child.
    pub fn start(&self, cfg: RunnerRuntimeConfig) -> Result<()> {
        let runner_id = cfg.runner_id.clone();
        let mut slots = self.slots.lock();

        if let Some(existing) = slots.get(&runner_id) {
            if existing.pgid.is_some() {
                return Err(SupervisorError::conflict(format!(
                    "runner {runner_id} already running"
                )));
            }
            existing.cancel.notify_waiters();
        }

        // Case-match history survives a restart; everything else about the
        // previous session does not.
        let (last_case, last_case_ts) = slots
            .get(&runner_id)
            .map(|s| (s.last_case.clone(), s.last_case_ts.clone()))
            .unwrap_or((None, None));
        let generation = slots.get(&runner_id).map_or(1, |s| s.generation + 1);
        let remaining = if cfg.max_runs == -1 { -1 } else { cfg.max_runs - 1 };
        let cancel = Arc::new(Notify::new());

        slots.insert(
            runner_id.clone(),
            RunnerSlot {
                cfg,
                generation,
                pgid: None,
                started_ts: None,
                active_session_ts: None,
                output_ring: VecDeque::new(),
                last_nonempty_line: String::new(),
                stopped: false,
                scheduled: false,
                paused: false,
                remaining,
                run_count: 1,
                alert_state: AlertState::default(),
                consecutive_failures: 0,
                last_exit_code: None,
                last_finish_ts: None,
                last_case,
                last_case_ts,
                cancel: cancel.clone(),
            },
        );
        drop(slots);

        self.spawn_driver(runner_id, generation);
        Ok(())
    }

    /// Signals the process group and cancels any pending timer. Idempotent:
    /// stopping an already-idle runner just clears its session markers.
    pub fn stop(&self, runner_id: &str) -> Result<()> {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(runner_id) else {
            return Ok(());
        };

        slot.cancel.notify_waiters();
        slot.stopped = true;
        slot.paused = false;
        slot.scheduled = false;
        slot.run_count = 0;
        let pgid = slot.pgid;

        if pgid.is_none() {
            slot.started_ts = None;
            slot.active_session_ts = None;
        }
        drop(slots);

        if let Some(pgid) = pgid {
            self.broker
                .publish(Event::Status(StatusEvent::new(runner_id, "stopping")));
            tokio::spawn(process::stop_gracefully(pgid));
        } else {
            self.broker
                .publish(Event::Status(StatusEvent::new(runner_id, "stopped")));
        }
        Ok(())
    }

    fn spawn_driver(&self, runner_id: String, generation: u64) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match this.dispatch_once(&runner_id, generation).await {
                    DriverOutcome::Stop => break,
                    DriverOutcome::Reschedule(interval_s) => {
                        let cancel = {
                            let mut slots = this.slots.lock();
                            match slots.get_mut(&runner_id) {
                                Some(slot) if slot.generation == generation => {
                                    slot.scheduled = true;
                                    slot.cancel.clone()
                                }
                                _ => break,
                            }
                        };
                        this.broker.publish(Event::Status(StatusEvent {
                            in_s: Some(interval_s),
                            ..StatusEvent::new(&runner_id, "scheduled")
                        }));

                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(interval_s)) => {}
                            _ = cancel.notified() => break,
                        }

                        let mut slots = this.slots.lock();
                        match slots.get_mut(&runner_id) {
                            Some(slot)
                                if slot.generation == generation
                                    && !slot.stopped
                                    && !slot.paused
                                    && slot.remaining != 0 =>
                            {
                                slot.scheduled = false;
                                slot.run_count += 1;
                                if slot.remaining > 0 {
                                    slot.remaining -= 1;
                                }
                            }
                            _ => break,
                        }
                    }
                }
            }
        });
    }

    /// Spawns, reads, matches, and reaps a single invocation. Publishes
    /// `started` and `finished`, and decides whether another dispatch
    /// should follow.
    async fn dispatch_once(&self, runner_id: &str, generation: u64) -> DriverOutcome {
        let cfg = {
            let slots = self.slots.lock();
            match slots.get(runner_id) {
                Some(slot) if slot.generation == generation => slot.cfg.clone(),
                _ => return DriverOutcome::Stop,
            }
        };

        let spawned = match process::spawn(&cfg.command) {
            Ok(s) => s,
            Err(err) => {
                self.broker.publish(Event::Status(StatusEvent {
                    error: Some(err.to_string()),
                    ..StatusEvent::new(runner_id, "error")
                }));
                return DriverOutcome::Stop;
            }
        };
        let mut child = spawned.child;
        let pgid = spawned.pgid;

        let (started_ts, active_ts, run_count, remaining) = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(runner_id) else {
                return DriverOutcome::Stop;
            };
            if slot.generation != generation {
                return DriverOutcome::Stop;
            }
            let ts = now_iso();
            slot.pgid = Some(pgid);
            slot.started_ts = Some(ts.clone());
            if slot.active_session_ts.is_none() {
                slot.active_session_ts = Some(ts.clone());
            }
            slot.output_ring.clear();
            slot.last_nonempty_line.clear();
            (
                ts,
                slot.active_session_ts.clone(),
                slot.run_count,
                slot.remaining,
            )
        };
        self.broker.publish(Event::Status(StatusEvent {
            ts: started_ts,
            active_ts,
            run_count: Some(run_count),
            remaining: if remaining == -1 { None } else { Some(remaining) },
            ..StatusEvent::new(runner_id, "started")
        }));

        let mut run_output = String::new();
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let with_newline = format!("{line}\n");
                run_output.push_str(&with_newline);
                self.record_line(runner_id, generation, &with_newline);
                self.match_line(runner_id, generation, &cfg, &with_newline).await;
            }
        }

        let exit_code = match child.wait().await {
            Ok(status) => status.code(),
            Err(_) => None,
        };
        let finished_ts = now_iso();

        let stopped = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(runner_id) else {
                return DriverOutcome::Stop;
            };
            if slot.generation != generation {
                return DriverOutcome::Stop;
            }
            slot.pgid = None;
            slot.started_ts = None;
            slot.last_exit_code = exit_code;
            slot.last_finish_ts = Some(finished_ts.clone());
            slot.stopped
        };

        if cfg.logging_enabled {
            let _ = logfile::append_run_log(
                &self.log_dir,
                runner_id,
                &cfg.runner_name,
                &cfg.command,
                exit_code,
                &run_output,
                stopped,
                &finished_ts,
            )
            .await;
        }

        if cfg.send_last_line_on_finish {
            self.notify_last_line(runner_id, generation, &cfg).await;
        }

        let consecutive_failures = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(runner_id) else {
                return DriverOutcome::Stop;
            };
            if !stopped {
                if exit_code == Some(0) {
                    slot.consecutive_failures = 0;
                } else {
                    slot.consecutive_failures += 1;
                }
            }
            slot.consecutive_failures
        };

        self.broker.publish(Event::Status(StatusEvent {
            ts: finished_ts.clone(),
            exit_code,
            stopped: Some(stopped),
            consecutive_failures: Some(consecutive_failures),
            ..StatusEvent::new(runner_id, "finished")
        }));

        if !stopped
            && cfg.failure_pause_threshold > 0
            && consecutive_failures >= cfg.failure_pause_threshold
        {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.get_mut(runner_id) {
                if slot.generation == generation {
                    slot.paused = true;
                    slot.stopped = true;
                    slot.active_session_ts = None;
                }
            }
            drop(slots);
            self.broker.publish(Event::Status(StatusEvent {
                reason: Some("auto_pause_failures".to_string()),
                consecutive_failures: Some(consecutive_failures),
                threshold: Some(cfg.failure_pause_threshold),
                ..StatusEvent::new(runner_id, "paused")
            }));
            return DriverOutcome::Stop;
        }

        let should_reschedule = {
            let slots = self.slots.lock();
            match slots.get(runner_id) {
                Some(slot) if slot.generation == generation => {
                    cfg.interval_s > 0 && !slot.stopped && !slot.paused && slot.remaining != 0
                }
                _ => false,
            }
        };

        if should_reschedule {
            DriverOutcome::Reschedule(cfg.interval_s)
        } else {
            let mut slots = self.slots.lock();
            if let Some(slot) = slots.get_mut(runner_id) {
                if slot.generation == generation {
                    slot.active_session_ts = None;
                }
            }
            DriverOutcome::Stop
        }
    }

    fn record_line(&self, runner_id: &str, generation: u64, line: &str) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(runner_id) {
            if slot.generation != generation {
                return;
            }
            slot.output_ring.push_back(line.to_string());
            while slot.output_ring.len() > OUTPUT_RING_CAP {
                slot.output_ring.pop_front();
            }
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                slot.last_nonempty_line = trimmed.to_string();
            }
        }
        drop(slots);
        self.broker.publish(Event::Output {
            ts: now_iso(),
            runner_id: runner_id.to_string(),
            line: line.to_string(),
        });
    }

    async fn match_line(&self, runner_id: &str, generation: u64, cfg: &RunnerRuntimeConfig, line: &str) {
        for case in &cfg.cases {
            let names: Vec<Option<&str>> = case.regex.capture_names().collect();
            for caps in case.regex.captures_iter(line) {
                let full_match = caps.get(0).map(|m| m.as_str()).unwrap_or("").to_string();
                let message = matcher::render_template(&case.message_template, &full_match, &caps, &names);
                let ts = now_iso();

                {
                    let mut slots = self.slots.lock();
                    if let Some(slot) = slots.get_mut(runner_id) {
                        if slot.generation != generation {
                            return;
                        }
                        slot.last_case = Some(message.clone());
                        slot.last_case_ts = Some(ts.clone());
                    }
                }
                self.status_sink.checkpoint(runner_id, &message, &ts).await;

                self.broker.publish(Event::CaseMatch {
                    ts,
                    runner_id: runner_id.to_string(),
                    pattern: case.pattern.clone(),
                    message: message.clone(),
                    state: case.state.clone(),
                });

                let notify_message = {
                    let mut slots = self.slots.lock();
                    let Some(slot) = slots.get_mut(runner_id) else { return };
                    if slot.generation != generation {
                        return;
                    }
                    alert::resolve(
                        &mut slot.alert_state,
                        &case.state,
                        &message,
                        Duration::from_secs(cfg.alert_cooldown_s),
                        Duration::from_secs(cfg.alert_escalation_s),
                        Instant::now(),
                    )
                };

                if let Some(notify_message) = notify_message {
                    if !cfg.notify_targets.is_empty() {
                        self.notifier.enqueue(
                            &self.broker,
                            &cfg.notify_targets,
                            &notify_message,
                            &cfg.runner_name,
                            runner_id,
                            &case.pattern,
                        );
                    }
                }
            }
        }
    }

    async fn notify_last_line(&self, runner_id: &str, generation: u64, cfg: &RunnerRuntimeConfig) {
        let (message, ts) = {
            let mut slots = self.slots.lock();
            let Some(slot) = slots.get_mut(runner_id) else { return };
            if slot.generation != generation {
                return;
            }
            let message = if slot.last_nonempty_line.is_empty() {
                "(no output)".to_string()
            } else {
                slot.last_nonempty_line.clone()
            };
            let ts = now_iso();
            slot.last_case = Some(message.clone());
            slot.last_case_ts = Some(ts.clone());
            (message, ts)
        };
        self.status_sink.checkpoint(runner_id, &message, &ts).await;

        self.broker.publish(Event::CaseMatch {
            ts,
            runner_id: runner_id.to_string(),
            pattern: "__on_finish__".to_string(),
            message: message.clone(),
            state: String::new(),
        });

        if !cfg.notify_targets.is_empty() {
            self.notifier.enqueue(
                &self.broker,
                &cfg.notify_targets,
                &message,
                &format!("{} (last line)", cfg.runner_name),
                runner_id,
                "__on_finish__",
            );
        }
    }
}

/// Polling interval the group sequencer (C4) uses to observe a runner's
/// terminal status; re-exported so that module stays in lockstep with C3.
pub const fn schedule_poll_interval() -> Duration {
    Duration::from_millis(SCHEDULE_POLL_MS)
}
