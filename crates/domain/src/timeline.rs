//! Agent timelines: the ordered, append-only history of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a tool call on the timeline.
///
/// Legal transitions are `pending → running → completed | failed`.
/// Terminal states never transition again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ToolCallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ToolCallStatus::Completed | ToolCallStatus::Failed)
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: ToolCallStatus) -> bool {
        match (self, next) {
            (ToolCallStatus::Pending, ToolCallStatus::Running) => true,
            (ToolCallStatus::Pending, ToolCallStatus::Completed) => true,
            (ToolCallStatus::Pending, ToolCallStatus::Failed) => true,
            (ToolCallStatus::Running, ToolCallStatus::Completed) => true,
            (ToolCallStatus::Running, ToolCallStatus::Failed) => true,
            _ => false,
        }
    }
}

/// An inline image attached to a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    pub media_type: String,
    pub data_b64: String,
}

/// How a permission request was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionOutcome {
    Accepted,
    Denied,
}

/// One entry in an agent's visible history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineItem {
    UserMessage {
        id: String,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<ImageBlock>,
        at: DateTime<Utc>,
    },

    AssistantText {
        id: String,
        text: String,
        at: DateTime<Utc>,
    },

    ToolCall {
        call_id: String,
        name: String,
        status: ToolCallStatus,
        input: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        at: DateTime<Utc>,
    },

    PermissionRequest {
        request_id: String,
        tool_name: String,
        action: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<PermissionOutcome>,
        at: DateTime<Utc>,
    },

    Artifact {
        id: String,
        label: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        at: DateTime<Utc>,
    },

    System {
        id: String,
        text: String,
        at: DateTime<Utc>,
    },
}

impl TimelineItem {
    /// `call_id` for tool_call items, `None` otherwise.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            TimelineItem::ToolCall { call_id, .. } => Some(call_id),
            _ => None,
        }
    }
}

/// Append-only timeline owned by a managed agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timeline {
    pub items: Vec<TimelineItem>,
}

impl Timeline {
    pub fn push(&mut self, item: TimelineItem) {
        self.items.push(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Update the status of a tool call in place. Illegal transitions are
    /// ignored and reported as `false` so callers can log them.
    pub fn update_tool_call(
        &mut self,
        call_id: &str,
        status: ToolCallStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> bool {
        for item in self.items.iter_mut().rev() {
            if let TimelineItem::ToolCall {
                call_id: cid,
                status: st,
                output: out,
                error: err,
                ..
            } = item
            {
                if cid == call_id {
                    if !st.can_transition_to(status) {
                        return false;
                    }
                    *st = status;
                    if output.is_some() {
                        *out = output;
                    }
                    if error.is_some() {
                        *err = error;
                    }
                    return true;
                }
            }
        }
        false
    }

    /// Finalize every non-terminal tool call as failed with the given reason.
    /// Returns the call ids that were finalized.
    pub fn fail_open_tool_calls(&mut self, reason: &str) -> Vec<String> {
        let mut failed = Vec::new();
        for item in self.items.iter_mut() {
            if let TimelineItem::ToolCall {
                call_id,
                status,
                error,
                ..
            } = item
            {
                if !status.is_terminal() {
                    *status = ToolCallStatus::Failed;
                    *error = Some(reason.to_string());
                    failed.push(call_id.clone());
                }
            }
        }
        failed
    }

    /// Resolve a pending permission_request item.
    pub fn resolve_permission(&mut self, request_id: &str, outcome: PermissionOutcome) -> bool {
        for item in self.items.iter_mut().rev() {
            if let TimelineItem::PermissionRequest {
                request_id: rid,
                outcome: out,
                ..
            } = item
            {
                if rid == request_id && out.is_none() {
                    *out = Some(outcome);
                    return true;
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_call(call_id: &str, status: ToolCallStatus) -> TimelineItem {
        TimelineItem::ToolCall {
            call_id: call_id.into(),
            name: "shell".into(),
            status,
            input: serde_json::json!({"command": "ls"}),
            output: None,
            error: None,
            at: Utc::now(),
        }
    }

    #[test]
    fn legal_transitions() {
        assert!(ToolCallStatus::Pending.can_transition_to(ToolCallStatus::Running));
        assert!(ToolCallStatus::Running.can_transition_to(ToolCallStatus::Completed));
        assert!(ToolCallStatus::Running.can_transition_to(ToolCallStatus::Failed));
    }

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [ToolCallStatus::Completed, ToolCallStatus::Failed] {
            for next in [
                ToolCallStatus::Pending,
                ToolCallStatus::Running,
                ToolCallStatus::Completed,
                ToolCallStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn update_tool_call_rejects_illegal_transition() {
        let mut tl = Timeline::default();
        tl.push(tool_call("c1", ToolCallStatus::Completed));
        assert!(!tl.update_tool_call("c1", ToolCallStatus::Running, None, None));
    }

    #[test]
    fn update_tool_call_applies_output() {
        let mut tl = Timeline::default();
        tl.push(tool_call("c1", ToolCallStatus::Running));
        assert!(tl.update_tool_call(
            "c1",
            ToolCallStatus::Completed,
            Some(serde_json::json!({"stdout": "ok"})),
            None,
        ));
        match &tl.items[0] {
            TimelineItem::ToolCall { status, output, .. } => {
                assert_eq!(*status, ToolCallStatus::Completed);
                assert!(output.is_some());
            }
            _ => panic!("expected tool_call"),
        }
    }

    #[test]
    fn fail_open_tool_calls_skips_terminal() {
        let mut tl = Timeline::default();
        tl.push(tool_call("done", ToolCallStatus::Completed));
        tl.push(tool_call("pending", ToolCallStatus::Pending));
        tl.push(tool_call("running", ToolCallStatus::Running));

        let failed = tl.fail_open_tool_calls("cancelled");
        assert_eq!(failed, vec!["pending".to_string(), "running".to_string()]);
        match &tl.items[0] {
            TimelineItem::ToolCall { status, .. } => {
                assert_eq!(*status, ToolCallStatus::Completed)
            }
            _ => panic!(),
        }
    }

    #[test]
    fn resolve_permission_once() {
        let mut tl = Timeline::default();
        tl.push(TimelineItem::PermissionRequest {
            request_id: "p1".into(),
            tool_name: "shell".into(),
            action: serde_json::json!({"command": "rm -rf build"}),
            outcome: None,
            at: Utc::now(),
        });
        assert!(tl.resolve_permission("p1", PermissionOutcome::Accepted));
        // Already resolved.
        assert!(!tl.resolve_permission("p1", PermissionOutcome::Denied));
    }

    #[test]
    fn timeline_serde_round_trip() {
        let mut tl = Timeline::default();
        tl.push(TimelineItem::UserMessage {
            id: "m1".into(),
            text: "hello".into(),
            images: vec![],
            at: Utc::now(),
        });
        tl.push(tool_call("c1", ToolCallStatus::Pending));

        let json = serde_json::to_string(&tl).unwrap();
        let back: Timeline = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.items[1].call_id(), Some("c1"));
    }
}
