//! Wire event types published on the broker (C1) and consumed by the SSE
//! adaptor. Every event carries `type` and `ts` per the specification;
//! `type` is the serde enum tag.

use serde::Serialize;
use std::collections::HashMap;

use crate::supervisor::RunnerSnapshot;

pub fn now_iso() -> String {
    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    pub status: String,
    pub runner_ids: Vec<String>,
    pub current_runner_id: String,
    pub current_index: usize,
    pub completed_count: usize,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub ts: String,
    pub runner_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_ts: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consecutive_failures: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusEvent {
    pub fn new(runner_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            ts: now_iso(),
            runner_id: runner_id.into(),
            status: status.into(),
            active_ts: None,
            run_count: None,
            remaining: None,
            in_s: None,
            exit_code: None,
            stopped: None,
            consecutive_failures: None,
            reason: None,
            threshold: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupStatusEvent {
    pub ts: String,
    pub group_id: String,
    pub group_name: String,
    pub status: String,
    pub runner_ids: Vec<String>,
    pub current_runner_id: String,
    pub current_index: usize,
    pub completed_count: usize,
    pub total_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifyProfileStatusEvent {
    pub ts: String,
    pub profile_id: String,
    pub delivery: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_disabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifyProfileAutoDisabledEvent {
    pub ts: String,
    pub profile_id: String,
    pub failure_count: u32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Snapshot {
        ts: String,
        snapshot: HashMap<String, RunnerSnapshot>,
        group_snapshot: HashMap<String, GroupSnapshot>,
    },
    Output {
        ts: String,
        runner_id: String,
        line: String,
    },
    CaseMatch {
        ts: String,
        runner_id: String,
        pattern: String,
        message: String,
        state: String,
    },
    CaseError {
        ts: String,
        runner_id: String,
        pattern: String,
        error: String,
    },
    Status(StatusEvent),
    NotifyProfileStatus(NotifyProfileStatusEvent),
    NotifyProfileAutoDisabled(NotifyProfileAutoDisabledEvent),
    GroupStatus(GroupStatusEvent),
}
