//! Stateful alert resolver (§4.3.4): decides whether a case match should
//! produce a notification, and how it's worded, based on the runner's
//! previous alert state and the cooldown/escalation windows.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct AlertState {
    pub current: String,
    pub last_notify: Option<Instant>,
}

/// Returns the message to send, if any, updating `state` in place.
pub fn resolve(
    state: &mut AlertState,
    case_state: &str,
    message: &str,
    cooldown: Duration,
    escalation: Duration,
    now: Instant,
) -> Option<String> {
    if case_state.is_empty() {
        return Some(message.to_string());
    }

    if case_state != state.current {
        let previous = std::mem::replace(&mut state.current, case_state.to_string());
        state.last_notify = Some(now);
        return if matches!(previous.as_str(), "DOWN" | "WARN") && case_state == "UP" {
            Some(format!("RECOVERY: {message}"))
        } else {
            Some(message.to_string())
        };
    }

    match case_state {
        "UP" | "INFO" => None,
        "DOWN" | "WARN" => {
            let elapsed = state
                .last_notify
                .map(|t| now.saturating_duration_since(t))
                .unwrap_or(Duration::MAX);
            if elapsed < cooldown {
                return None;
            }
            if escalation.is_zero() || elapsed >= escalation {
                state.last_notify = Some(now);
                return Some(format!("ESCALATION ({case_state}): {message}"));
            }
            None
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_of_a_state_is_not_suppressed() {
        let mut state = AlertState::default();
        let now = Instant::now();
        let msg = resolve(&mut state, "DOWN", "m", Duration::from_secs(60), Duration::from_secs(300), now);
        assert_eq!(msg, Some("m".to_string()));
    }

    #[test]
    fn within_cooldown_is_suppressed() {
        let mut state = AlertState::default();
        let t0 = Instant::now();
        resolve(&mut state, "DOWN", "m", Duration::from_secs(60), Duration::from_secs(300), t0);
        let t1 = t0 + Duration::from_secs(10);
        let msg = resolve(&mut state, "DOWN", "m", Duration::from_secs(60), Duration::from_secs(300), t1);
        assert_eq!(msg, None);
    }

    #[test]
    fn past_escalation_emits_escalation_message() {
        let mut state = AlertState::default();
        let t0 = Instant::now();
        resolve(&mut state, "DOWN", "m", Duration::from_secs(60), Duration::from_secs(300), t0);
        let t1 = t0 + Duration::from_secs(301);
        let msg = resolve(&mut state, "DOWN", "m", Duration::from_secs(60), Duration::from_secs(300), t1);
        assert_eq!(msg, Some("ESCALATION (DOWN): m".to_string()));
    }

    #[test]
    fn recovery_message_on_transition_to_up() {
        let mut state = AlertState::default();
        let t0 = Instant::now();
        resolve(&mut state, "DOWN", "m", Duration::from_secs(60), Duration::from_secs(300), t0);
        let t1 = t0 + Duration::from_secs(400);
        let msg = resolve(&mut state, "UP", "m", Duration::from_secs(60), Duration::from_secs(300), t1);
        assert_eq!(msg, Some("RECOVERY: m".to_string()));
    }

    #[test]
    fn full_chain_matches_spec_example() {
        let mut state = AlertState::default();
        let cooldown = Duration::from_secs(60);
        let escalation = Duration::from_secs(300);
        let t0 = Instant::now();
        assert_eq!(
            resolve(&mut state, "DOWN", "m", cooldown, escalation, t0),
            Some("m".to_string())
        );
        let t1 = t0 + Duration::from_secs(30);
        assert_eq!(resolve(&mut state, "DOWN", "m", cooldown, escalation, t1), None);
        let t2 = t0 + Duration::from_secs(310);
        assert_eq!(
            resolve(&mut state, "DOWN", "m", cooldown, escalation, t2),
            Some("ESCALATION (DOWN): m".to_string())
        );
        let t3 = t2 + Duration::from_secs(1);
        assert_eq!(
            resolve(&mut state, "UP", "m", cooldown, escalation, t3),
            Some("RECOVERY: m".to_string())
        );
    }

    #[test]
    fn up_and_info_unchanged_state_are_suppressed() {
        let mut state = AlertState::default();
        let t0 = Instant::now();
        resolve(&mut state, "UP", "m", Duration::ZERO, Duration::ZERO, t0);
        assert_eq!(resolve(&mut state, "UP", "m", Duration::ZERO, Duration::ZERO, t0), None);
    }

    #[test]
    fn empty_state_is_never_suppressed() {
        let mut state = AlertState::default();
        let t0 = Instant::now();
        assert_eq!(
            resolve(&mut state, "", "m", Duration::ZERO, Duration::ZERO, t0),
            Some("m".to_string())
        );
        assert_eq!(
            resolve(&mut state, "", "m", Duration::ZERO, Duration::ZERO, t0),
            Some("m".to_string())
        );
    }
}
