//! Auth signals and realtime event payloads.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Identity;

/// Server event emitted when an AI job finishes.
pub const AI_COMPLETED: &str = "ai:completed";

/// Transitions published by the auth state holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSignal {
    SignedIn(Identity),
    SignedOut,
    /// The server no longer honours the session. Views should route to sign-in.
    SessionExpired,
}

/// Payload of an `ai:completed` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiCompletion {
    pub task_id: String,
    /// Result fields, kept as sent by the server.
    #[serde(flatten)]
    pub result: Map<String, Value>,
}

impl AiCompletion {
    /// Parse a payload, returning `None` when it has no string `taskId`.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }

    #[must_use]
    pub fn is_for(&self, task_id: &str) -> bool {
        self.task_id == task_id
    }
}

/// Decoded server-pushed event.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    AiCompleted(AiCompletion),
    /// Any event this client has no typed shape for.
    Other { name: String, payload: Value },
}

impl RealtimeEvent {
    /// Build an event from its name and payload.
    #[must_use]
    pub fn from_parts(name: &str, payload: Value) -> Self {
        if name == AI_COMPLETED {
            if let Some(completion) = AiCompletion::from_payload(&payload) {
                return Self::AiCompleted(completion);
            }
        }
        Self::Other {
            name: name.to_string(),
            payload,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::AiCompleted(_) => AI_COMPLETED,
            Self::Other { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_ai_completion_keeps_result_fields() {
        let event = RealtimeEvent::from_parts(
            AI_COMPLETED,
            json!({"taskId": "t-1", "summary": "done", "subtasks": ["a", "b"]}),
        );
        let RealtimeEvent::AiCompleted(completion) = event else {
            panic!("expected ai completion");
        };
        assert!(completion.is_for("t-1"));
        assert_eq!(completion.result["summary"], "done");
        assert!(!completion.result.contains_key("taskId"));
    }

    #[test]
    fn test_malformed_completion_is_other() {
        let event = RealtimeEvent::from_parts(AI_COMPLETED, json!({"task": 4}));
        assert_eq!(event.name(), AI_COMPLETED);
        assert!(matches!(event, RealtimeEvent::Other { .. }));
    }
}
