//! Filter-matched and scheduled trigger firing with an async invocation
//! queue, drained between top-level actions — never re-entrant.

use std::collections::BTreeMap;

use agency_shared::{ArtifactId, PrincipalId};
use serde_json::Value;

use crate::artifact::ArtifactStore;

#[derive(Debug, Clone)]
pub struct ActiveTrigger {
    pub trigger_id: ArtifactId,
    pub owner: PrincipalId,
    pub filter: BTreeMap<String, Value>,
    pub callback_artifact: ArtifactId,
    pub callback_method: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ScheduledTrigger {
    pub trigger_id: ArtifactId,
    pub owner: PrincipalId,
    pub callback_artifact: ArtifactId,
    pub callback_method: String,
    pub target_event_number: u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PendingInvocation {
    pub trigger_id: String,
    pub callback_artifact: String,
    pub callback_method: String,
    pub event: Value,
    pub owner: String,
}

#[derive(Debug, Default)]
pub struct TriggerRegistry {
    active: Vec<ActiveTrigger>,
    scheduled: Vec<ScheduledTrigger>,
    pending: Vec<PendingInvocation>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans artifacts of type `trigger`, re-validating ownership-of-
    /// callback and enabled flags. Idempotent given a stable store.
    pub fn refresh(&mut self, store: &ArtifactStore, current_event_number: u64) {
        self.active.clear();
        self.scheduled.clear();
        for artifact in store.by_type("trigger") {
            let callback_artifact = artifact
                .metadata
                .get("callback_artifact")
                .and_then(|v| v.as_str())
                .map(ArtifactId::new);
            let callback_method = artifact
                .metadata
                .get("callback_method")
                .and_then(|v| v.as_str())
                .unwrap_or("run")
                .to_string();

            let Some(callback_artifact) = callback_artifact else {
                continue;
            };
            let Some(callback) = store.get_raw(&callback_artifact) else {
                continue;
            };
            // Spam prevention: a trigger is only valid if its creator also
            // created the callback artifact.
            if callback.created_by != artifact.created_by {
                continue;
            }

            if let Some(filter) = artifact.metadata.get("filter") {
                let enabled = artifact
                    .metadata
                    .get("enabled")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                if let Some(obj) = filter.as_object() {
                    self.active.push(ActiveTrigger {
                        trigger_id: artifact.id.clone(),
                        owner: artifact.created_by.clone(),
                        filter: obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                        callback_artifact,
                        callback_method,
                        enabled,
                    });
                }
            } else if let Some(target) = artifact.metadata.get("fire_at_event").and_then(|v| v.as_u64()) {
                // Scheduled triggers targeting a past event number are
                // ignored at refresh time.
                if target >= current_event_number {
                    self.scheduled.push(ScheduledTrigger {
                        trigger_id: artifact.id.clone(),
                        owner: artifact.created_by.clone(),
                        callback_artifact,
                        callback_method,
                        target_event_number: target,
                    });
                }
            } else if let (Some(after), Some(registered_at)) = (
                artifact.metadata.get("fire_after_events").and_then(|v| v.as_u64()),
                artifact.metadata.get("registered_at_event").and_then(|v| v.as_u64()),
            ) {
                let target = registered_at + after;
                if target >= current_event_number {
                    self.scheduled.push(ScheduledTrigger {
                        trigger_id: artifact.id.clone(),
                        owner: artifact.created_by.clone(),
                        callback_artifact,
                        callback_method,
                        target_event_number: target,
                    });
                }
            }
        }
    }

    /// Called on every event appended to the log; each matching trigger
    /// produces one pending invocation record.
    pub fn queue_matching_invocations(&mut self, event_type: &str, event: &Value) {
        for trigger in &self.active {
            if !trigger.enabled {
                continue;
            }
            if matches_filter(&trigger.filter, event_type, event) {
                self.pending.push(PendingInvocation {
                    trigger_id: trigger.trigger_id.as_str().to_string(),
                    callback_artifact: trigger.callback_artifact.as_str().to_string(),
                    callback_method: trigger.callback_method.clone(),
                    event: event.clone(),
                    owner: trigger.owner.as_str().to_string(),
                });
            }
        }
    }

    /// Called immediately after incrementing the event counter; triggers
    /// whose absolute target equals `n` are queued and removed from the
    /// schedule.
    pub fn fire_scheduled_triggers(&mut self, n: u64, event: &Value) {
        let (due, remaining): (Vec<_>, Vec<_>) =
            self.scheduled.drain(..).partition(|t| t.target_event_number == n);
        self.scheduled = remaining;
        for trigger in due {
            self.pending.push(PendingInvocation {
                trigger_id: trigger.trigger_id.as_str().to_string(),
                callback_artifact: trigger.callback_artifact.as_str().to_string(),
                callback_method: trigger.callback_method,
                event: event.clone(),
                owner: trigger.owner.as_str().to_string(),
            });
        }
    }

    /// Drains all pending invocations, to be enqueued as `invoke_artifact`
    /// intents whose caller is each trigger's owner.
    pub fn drain_pending(&mut self) -> Vec<PendingInvocation> {
        std::mem::take(&mut self.pending)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// A matcher is either a literal (implicit equality) or a single-key
/// operator map from `$eq`, `$ne`, `$in`, `$exists`. All conditions are
/// conjunctive; unknown operators fail closed.
fn matches_filter(filter: &BTreeMap<String, Value>, event_type: &str, event: &Value) -> bool {
    let mut envelope = serde_json::json!({"event_type": event_type});
    if let (Some(env_obj), Some(event_obj)) = (envelope.as_object_mut(), event.as_object()) {
        for (k, v) in event_obj {
            env_obj.insert(k.clone(), v.clone());
        }
    }
    filter.iter().all(|(path, matcher)| field_matches(&envelope, path, matcher))
}

fn field_matches(event: &Value, path: &str, matcher: &Value) -> bool {
    let field_value = lookup_path(event, path);
    match matcher {
        Value::Object(ops) if ops.len() == 1 => {
            let (op, operand) = ops.iter().next().unwrap();
            match op.as_str() {
                "$eq" => field_value == Some(operand),
                "$ne" => field_value != Some(operand),
                "$in" => match operand.as_array() {
                    Some(arr) => field_value.map(|v| arr.contains(v)).unwrap_or(false),
                    None => false,
                },
                "$exists" => {
                    let should_exist = operand.as_bool().unwrap_or(true);
                    field_value.is_some() == should_exist
                }
                // Unknown operators fail closed.
                _ => false,
            }
        }
        literal => field_value == Some(literal),
    }
}

fn lookup_path<'a>(event: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = event;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_operator_with_empty_list_is_always_false() {
        let mut filter = BTreeMap::new();
        filter.insert("event_type".to_string(), serde_json::json!({"$in": []}));
        assert!(!matches_filter(&filter, "anything", &serde_json::json!({})));
    }

    #[test]
    fn unknown_operator_fails_closed() {
        let mut filter = BTreeMap::new();
        filter.insert("event_type".to_string(), serde_json::json!({"$regex": "x"}));
        assert!(!matches_filter(&filter, "anything", &serde_json::json!({})));
    }

    #[test]
    fn eq_operator_matches_event_type() {
        let mut filter = BTreeMap::new();
        filter.insert("event_type".to_string(), serde_json::json!("artifact_purchased"));
        assert!(matches_filter(&filter, "artifact_purchased", &serde_json::json!({})));
        assert!(!matches_filter(&filter, "other", &serde_json::json!({})));
    }

    #[test]
    fn exists_operator_checks_field_presence() {
        let mut filter = BTreeMap::new();
        filter.insert("amount".to_string(), serde_json::json!({"$exists": true}));
        assert!(matches_filter(&filter, "t", &serde_json::json!({"amount": 5})));
        assert!(!matches_filter(&filter, "t", &serde_json::json!({})));
    }
}
