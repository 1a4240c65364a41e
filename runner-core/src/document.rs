//! The persisted configuration document and its normalisation.
//!
//! This is the shape the configuration façade (C5) reads from and writes
//! to the persistence store. It owns no runtime state — runtime configs
//! are compiled from it, never the other way around (see `config.rs`).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

fn is_valid_id(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 120
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

fn sanitise_id(raw: &str, prefix: &str, seen: &mut HashSet<String>) -> String {
    let mut id = raw.trim().to_string();
    if !is_valid_id(&id) {
        id = new_id(prefix);
    }
    while seen.contains(&id) {
        id = new_id(prefix);
    }
    seen.insert(id.clone());
    id
}

fn normalise_case_state(raw: &str) -> String {
    match raw.trim().to_ascii_uppercase().as_str() {
        s @ ("UP" | "DOWN" | "WARN" | "INFO") => s.to_string(),
        _ => String::new(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub hours: i64,
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub seconds: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseRule {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub message_template: String,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushoverConfig {
    #[serde(default)]
    pub user_key: String,
    #[serde(default)]
    pub api_token: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_profile_name")]
    pub name: String,
    #[serde(rename = "type", default = "default_profile_type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub sent_count: u32,
    #[serde(default)]
    pub config: PushoverConfig,
}

fn default_profile_name() -> String {
    "Pushover".to_string()
}

fn default_profile_type() -> String {
    "pushover".to_string()
}

impl Default for NotifyProfile {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: default_profile_name(),
            kind: default_profile_type(),
            active: true,
            failure_count: 0,
            sent_count: 0,
            config: PushoverConfig::default(),
        }
    }
}

fn default_max_runs() -> i64 {
    1
}
fn default_cooldown() -> u64 {
    300
}
fn default_escalation() -> u64 {
    1800
}
fn default_pause_threshold() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_runner_name")]
    pub name: String,
    #[serde(default)]
    pub command: String,
    #[serde(default = "default_true")]
    pub logging_enabled: bool,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default = "default_max_runs")]
    pub max_runs: i64,
    #[serde(default = "default_cooldown")]
    pub alert_cooldown_s: u64,
    #[serde(default = "default_escalation")]
    pub alert_escalation_s: u64,
    #[serde(default = "default_pause_threshold")]
    pub failure_pause_threshold: u32,
    #[serde(default)]
    pub cases: Vec<CaseRule>,
    #[serde(default)]
    pub notify_profile_ids: Vec<String>,
    #[serde(default)]
    pub notify_profile_updates_only: Vec<String>,
}

fn default_runner_name() -> String {
    "Runner".to_string()
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            id: String::new(),
            name: default_runner_name(),
            command: String::new(),
            logging_enabled: true,
            schedule: ScheduleConfig::default(),
            max_runs: default_max_runs(),
            alert_cooldown_s: default_cooldown(),
            alert_escalation_s: default_escalation(),
            failure_pause_threshold: default_pause_threshold(),
            cases: Vec::new(),
            notify_profile_ids: Vec::new(),
            notify_profile_updates_only: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerGroup {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub runner_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutItemType {
    Runner,
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutItem {
    #[serde(rename = "type")]
    pub kind: LayoutItemType,
    pub id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub notify_profiles: Vec<NotifyProfile>,
    #[serde(default)]
    pub runners: Vec<Runner>,
    #[serde(default)]
    pub runner_groups: Vec<RunnerGroup>,
    #[serde(default)]
    pub runner_layout: Vec<LayoutItem>,
    /// Legacy single-profile credentials, migrated to `notify_default` on load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushover_user_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushover_api_token: Option<String>,
}

/// Normalises a loaded document: sanitises ids, drops dangling references,
/// enforces single-group runner membership, and extends the layout to
/// cover every runner and group exactly once. Idempotent: normalising an
/// already-normalised document returns it unchanged.
pub fn normalise(mut doc: StateDocument) -> StateDocument {
    migrate_legacy_pushover(&mut doc);

    let mut seen_profile_ids = HashSet::new();
    for profile in &mut doc.notify_profiles {
        profile.id = sanitise_id(&profile.id, "notify_", &mut seen_profile_ids);
        profile.kind = "pushover".to_string();
        if profile.name.trim().is_empty() {
            profile.name = default_profile_name();
        }
    }
    let valid_profile_ids: HashSet<String> =
        doc.notify_profiles.iter().map(|p| p.id.clone()).collect();

    let mut seen_runner_ids = HashSet::new();
    for runner in &mut doc.runners {
        runner.id = sanitise_id(&runner.id, "runner_", &mut seen_runner_ids);
        if runner.name.trim().is_empty() {
            runner.name = default_runner_name();
        }

        let mut seen_case_ids = HashSet::new();
        for case in &mut runner.cases {
            case.id = sanitise_id(&case.id, "case_", &mut seen_case_ids);
            case.state = normalise_case_state(&case.state);
        }

        runner.notify_profile_ids = dedup_keep_order(&runner.notify_profile_ids)
            .into_iter()
            .filter(|id| is_valid_id(id) && valid_profile_ids.contains(id))
            .collect();
        let runner_profile_ids: HashSet<String> =
            runner.notify_profile_ids.iter().cloned().collect();
        runner.notify_profile_updates_only = dedup_keep_order(&runner.notify_profile_updates_only)
            .into_iter()
            .filter(|id| runner_profile_ids.contains(id))
            .collect();
    }
    let valid_runner_ids: HashSet<String> = doc.runners.iter().map(|r| r.id.clone()).collect();

    let mut seen_group_ids = HashSet::new();
    let mut assigned_runner_ids: HashSet<String> = HashSet::new();
    for group in &mut doc.runner_groups {
        group.id = sanitise_id(&group.id, "group_", &mut seen_group_ids);
        if group.name.trim().is_empty() {
            group.name = "Group".to_string();
        }
        let mut kept = Vec::new();
        for rid in dedup_keep_order(&group.runner_ids) {
            if !is_valid_id(&rid) || !valid_runner_ids.contains(&rid) {
                continue;
            }
            if assigned_runner_ids.contains(&rid) {
                continue;
            }
            assigned_runner_ids.insert(rid.clone());
            kept.push(rid);
        }
        group.runner_ids = kept;
    }

    let grouped_runner_ids: HashSet<String> = doc
        .runner_groups
        .iter()
        .flat_map(|g| g.runner_ids.iter().cloned())
        .collect();
    let valid_group_ids: HashSet<String> = doc.runner_groups.iter().map(|g| g.id.clone()).collect();

    let mut new_layout = Vec::new();
    let mut seen_layout_runners = HashSet::new();
    let mut seen_layout_groups = HashSet::new();
    for item in &doc.runner_layout {
        match item.kind {
            LayoutItemType::Runner => {
                if !valid_runner_ids.contains(&item.id)
                    || grouped_runner_ids.contains(&item.id)
                    || seen_layout_runners.contains(&item.id)
                {
                    continue;
                }
                seen_layout_runners.insert(item.id.clone());
                new_layout.push(item.clone());
            }
            LayoutItemType::Group => {
                if !valid_group_ids.contains(&item.id) || seen_layout_groups.contains(&item.id) {
                    continue;
                }
                seen_layout_groups.insert(item.id.clone());
                new_layout.push(item.clone());
            }
        }
    }
    for runner in &doc.runners {
        if grouped_runner_ids.contains(&runner.id) || seen_layout_runners.contains(&runner.id) {
            continue;
        }
        seen_layout_runners.insert(runner.id.clone());
        new_layout.push(LayoutItem {
            kind: LayoutItemType::Runner,
            id: runner.id.clone(),
        });
    }
    for group in &doc.runner_groups {
        if seen_layout_groups.contains(&group.id) {
            continue;
        }
        seen_layout_groups.insert(group.id.clone());
        new_layout.push(LayoutItem {
            kind: LayoutItemType::Group,
            id: group.id.clone(),
        });
    }
    doc.runner_layout = new_layout;

    doc
}

fn migrate_legacy_pushover(doc: &mut StateDocument) {
    let has_legacy = doc
        .pushover_user_key
        .as_ref()
        .is_some_and(|s| !s.is_empty())
        || doc
            .pushover_api_token
            .as_ref()
            .is_some_and(|s| !s.is_empty());
    if !has_legacy || !doc.notify_profiles.is_empty() {
        return;
    }
    let profile = NotifyProfile {
        id: "notify_default".to_string(),
        name: "Pushover (Standard)".to_string(),
        kind: "pushover".to_string(),
        active: true,
        failure_count: 0,
        sent_count: 0,
        config: PushoverConfig {
            user_key: doc.pushover_user_key.clone().unwrap_or_default(),
            api_token: doc.pushover_api_token.clone().unwrap_or_default(),
        },
    };
    doc.notify_profiles.push(profile);
    for runner in &mut doc.runners {
        if runner.notify_profile_ids.is_empty() {
            runner.notify_profile_ids.push("notify_default".to_string());
        }
    }
}

fn dedup_keep_order(values: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for v in values {
        let v = v.trim().to_string();
        if seen.insert(v.clone()) {
            out.push(v);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalise_is_idempotent() {
        let mut doc = StateDocument::default();
        doc.runners.push(Runner {
            id: "bad id!!".to_string(),
            ..Default::default()
        });
        doc.runners.push(Runner {
            id: "bad id!!".to_string(),
            ..Default::default()
        });
        let once = normalise(doc);
        let twice = normalise(once.clone());
        assert_eq!(
            serde_json::to_string(&once).unwrap(),
            serde_json::to_string(&twice).unwrap()
        );
    }

    #[test]
    fn runner_claimed_by_one_group_only() {
        let mut doc = StateDocument::default();
        doc.runners.push(Runner {
            id: "r1".to_string(),
            ..Default::default()
        });
        doc.runner_groups.push(RunnerGroup {
            id: "g1".to_string(),
            name: "A".to_string(),
            runner_ids: vec!["r1".to_string()],
        });
        doc.runner_groups.push(RunnerGroup {
            id: "g2".to_string(),
            name: "B".to_string(),
            runner_ids: vec!["r1".to_string()],
        });
        let normalised = normalise(doc);
        assert_eq!(normalised.runner_groups[0].runner_ids, vec!["r1"]);
        assert!(normalised.runner_groups[1].runner_ids.is_empty());
    }

    #[test]
    fn legacy_pushover_migrates_to_default_profile() {
        let mut doc = StateDocument::default();
        doc.pushover_user_key = Some("u".to_string());
        doc.pushover_api_token = Some("t".to_string());
        doc.runners.push(Runner {
            id: "r1".to_string(),
            ..Default::default()
        });
        let normalised = normalise(doc);
        assert_eq!(normalised.notify_profiles.len(), 1);
        assert_eq!(normalised.notify_profiles[0].id, "notify_default");
        assert_eq!(normalised.runners[0].notify_profile_ids, vec!["notify_default"]);
    }

    #[test]
    fn layout_covers_every_runner_and_group_once() {
        let mut doc = StateDocument::default();
        doc.runners.push(Runner {
            id: "r1".to_string(),
            ..Default::default()
        });
        doc.runner_groups.push(RunnerGroup {
            id: "g1".to_string(),
            name: "A".to_string(),
            runner_ids: vec![],
        });
        let normalised = normalise(doc);
        let ids: Vec<_> = normalised
            .runner_layout
            .iter()
            .map(|i| i.id.clone())
            .collect();
        assert!(ids.contains(&"r1".to_string()));
        assert!(ids.contains(&"g1".to_string()));
        assert_eq!(normalised.runner_layout.len(), 2);
    }
}
