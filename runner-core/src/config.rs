//! Configuration façade (C5): compiles the persisted document into the
//! immutable runtime configs consumed by the supervisor and sequencer.

use regex::Regex;
use std::cmp::{max, min};

use crate::broker::Broker;
use crate::document::StateDocument;
use crate::error::{Result, SupervisorError};
use crate::events::Event;

#[derive(Debug, Clone)]
pub struct CompiledCase {
    pub pattern: String,
    pub regex: Regex,
    pub message_template: String,
    pub state: String,
}

#[derive(Debug, Clone)]
pub struct NotifyTarget {
    pub profile_id: String,
    pub profile_name: String,
    pub only_updates: bool,
    pub active: bool,
    pub user_key: String,
    pub api_token: String,
}

#[derive(Debug, Clone)]
pub struct RunnerRuntimeConfig {
    pub runner_id: String,
    pub runner_name: String,
    pub command: String,
    pub logging_enabled: bool,
    pub interval_s: u64,
    /// `-1` denotes unbounded.
    pub max_runs: i64,
    pub alert_cooldown_s: u64,
    pub alert_escalation_s: u64,
    pub failure_pause_threshold: u32,
    pub send_last_line_on_finish: bool,
    pub cases: Vec<CompiledCase>,
    pub notify_targets: Vec<NotifyTarget>,
}

/// Compiles one runner's runtime config out of the document. Invalid
/// regexes are dropped and reported via a `case_error` event; they do not
/// fail the whole compilation.
pub fn compile_runner_cfg(
    doc: &StateDocument,
    runner_id: &str,
    broker: &Broker,
) -> Result<RunnerRuntimeConfig> {
    let runner = doc
        .runners
        .iter()
        .find(|r| r.id == runner_id)
        .ok_or_else(|| SupervisorError::not_found(format!("runner {runner_id}")))?;

    let interval_s = max(
        0,
        runner.schedule.hours * 3600 + runner.schedule.minutes * 60 + runner.schedule.seconds,
    ) as u64;

    let send_last_line_on_finish = runner
        .cases
        .iter()
        .any(|c| c.pattern.trim().is_empty() && c.message_template.trim().is_empty());

    let mut compiled = Vec::new();
    for case in &runner.cases {
        let pattern = case.pattern.trim().to_string();
        let template = case.message_template.trim().to_string();
        if pattern.is_empty() && template.is_empty() {
            continue; // sentinel, handled via send_last_line_on_finish
        }
        if pattern.is_empty() || template.is_empty() {
            continue; // half-empty: disabled
        }
        match Regex::new(&format!("(?m){pattern}")) {
            Ok(regex) => compiled.push(CompiledCase {
                pattern,
                regex,
                message_template: template,
                state: case.state.clone(),
            }),
            Err(err) => {
                broker.publish(Event::CaseError {
                    ts: crate::events::now_iso(),
                    runner_id: runner_id.to_string(),
                    pattern: pattern.clone(),
                    error: format!("invalid regex: {err}"),
                });
            }
        }
    }

    let max_runs = if runner.max_runs == -1 {
        -1
    } else {
        max(1, min(100, runner.max_runs))
    };

    let updates_only: std::collections::HashSet<&String> =
        runner.notify_profile_updates_only.iter().collect();
    let mut notify_targets = Vec::new();
    for profile_id in &runner.notify_profile_ids {
        if let Some(profile) = doc.notify_profiles.iter().find(|p| &p.id == profile_id) {
            if profile.kind == "pushover" {
                notify_targets.push(NotifyTarget {
                    profile_id: profile.id.clone(),
                    profile_name: profile.name.clone(),
                    only_updates: updates_only.contains(profile_id),
                    active: profile.active,
                    user_key: profile.config.user_key.clone(),
                    api_token: profile.config.api_token.clone(),
                });
            }
        }
    }

    let runner_name = {
        let trimmed = runner.name.trim();
        if trimmed.is_empty() {
            runner.id.clone()
        } else {
            trimmed.to_string()
        }
    };

    Ok(RunnerRuntimeConfig {
        runner_id: runner.id.clone(),
        runner_name,
        command: runner.command.clone(),
        logging_enabled: runner.logging_enabled,
        interval_s,
        max_runs,
        alert_cooldown_s: runner.alert_cooldown_s,
        alert_escalation_s: runner.alert_escalation_s,
        failure_pause_threshold: runner.failure_pause_threshold,
        send_last_line_on_finish,
        cases: compiled,
        notify_targets,
    })
}

/// Compiles runtime configs for every runner in the document, skipping
/// (and logging) any that fail — e.g. because the document is mid-edit.
pub fn compile_all(doc: &StateDocument, broker: &Broker) -> Vec<RunnerRuntimeConfig> {
    doc.runners
        .iter()
        .filter_map(|r| match compile_runner_cfg(doc, &r.id, broker) {
            Ok(cfg) => Some(cfg),
            Err(err) => {
                tracing::warn!(runner_id = %r.id, error = %err, "failed to compile runner config");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{CaseRule, Runner};

    #[test]
    fn sentinel_case_sets_send_last_line_on_finish() {
        let broker = Broker::new(10, 10);
        let mut doc = StateDocument::default();
        doc.runners.push(Runner {
            id: "r1".to_string(),
            cases: vec![CaseRule::default()],
            ..Default::default()
        });
        let cfg = compile_runner_cfg(&doc, "r1", &broker).unwrap();
        assert!(cfg.send_last_line_on_finish);
        assert!(cfg.cases.is_empty());
    }

    #[test]
    fn half_empty_case_is_disabled() {
        let broker = Broker::new(10, 10);
        let mut doc = StateDocument::default();
        doc.runners.push(Runner {
            id: "r1".to_string(),
            cases: vec![CaseRule {
                id: "c1".to_string(),
                pattern: "foo".to_string(),
                message_template: String::new(),
                state: String::new(),
            }],
            ..Default::default()
        });
        let cfg = compile_runner_cfg(&doc, "r1", &broker).unwrap();
        assert!(cfg.cases.is_empty());
        assert!(!cfg.send_last_line_on_finish);
    }

    #[test]
    fn max_runs_clamped() {
        let broker = Broker::new(10, 10);
        let mut doc = StateDocument::default();
        doc.runners.push(Runner {
            id: "r1".to_string(),
            max_runs: 500,
            ..Default::default()
        });
        let cfg = compile_runner_cfg(&doc, "r1", &broker).unwrap();
        assert_eq!(cfg.max_runs, 100);
    }

    #[test]
    fn unbounded_max_runs_preserved() {
        let broker = Broker::new(10, 10);
        let mut doc = StateDocument::default();
        doc.runners.push(Runner {
            id: "r1".to_string(),
            max_runs: -1,
            ..Default::default()
        });
        let cfg = compile_runner_cfg(&doc, "r1", &broker).unwrap();
        assert_eq!(cfg.max_runs, -1);
    }
}
