//! Background metadata generation.
//!
//! After `create_agent` with an initial prompt, a detached task asks the
//! cheap metadata model for a short title and an optional branch name.
//! Failures are non-fatal: the title falls back to a truncation of the
//! prompt.

use std::sync::Arc;

use serde::Deserialize;

use super::manager::AgentManager;

const MAX_TITLE_CHARS: usize = 72;

const SYSTEM_PROMPT: &str = "You name coding tasks. Reply with JSON only: \
{\"title\": \"<imperative, at most 72 chars>\", \"branch_name\": \"<kebab-case git branch or null>\"}";

#[derive(Deserialize)]
struct GeneratedMetadata {
    title: Option<String>,
    branch_name: Option<String>,
}

/// Fire-and-forget title/branch generation for a freshly created agent.
pub fn spawn_generate(manager: Arc<AgentManager>, agent_id: String, prompt: String) {
    tokio::spawn(async move {
        let generated = match manager.providers().metadata_model() {
            Some(model) => model.generate(SYSTEM_PROMPT, &prompt).await.ok(),
            None => None,
        };

        let (title, branch) = match generated.as_deref().and_then(parse_metadata) {
            Some((title, branch)) => (title, branch),
            None => {
                tracing::debug!(agent_id = %agent_id, "metadata generation fell back to prompt");
                (truncate_title(&prompt), None)
            }
        };

        manager.apply_metadata(&agent_id, Some(title), branch);
    });
}

fn parse_metadata(raw: &str) -> Option<(String, Option<String>)> {
    // Models wrap JSON in prose often enough; take the first object.
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    let parsed: GeneratedMetadata = serde_json::from_str(&raw[start..=end]).ok()?;

    let title = parsed.title.map(|t| truncate_title(&t)).filter(|t| !t.is_empty())?;
    let branch = parsed
        .branch_name
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty() && b.chars().all(|c| c.is_ascii_alphanumeric() || "._/-".contains(c)));
    Some((title, branch))
}

fn truncate_title(text: &str) -> String {
    let text = text.trim().replace('\n', " ");
    match text.char_indices().nth(MAX_TITLE_CHARS) {
        Some((idx, _)) => format!("{}…", &text[..idx].trim_end()),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_json() {
        let (title, branch) =
            parse_metadata(r#"{"title": "Fix dialer race", "branch_name": "fix-dialer-race"}"#)
                .unwrap();
        assert_eq!(title, "Fix dialer race");
        assert_eq!(branch.as_deref(), Some("fix-dialer-race"));
    }

    #[test]
    fn parse_json_wrapped_in_prose() {
        let raw = "Sure! Here you go:\n{\"title\": \"Add relay GC\", \"branch_name\": null}\nDone.";
        let (title, branch) = parse_metadata(raw).unwrap();
        assert_eq!(title, "Add relay GC");
        assert!(branch.is_none());
    }

    #[test]
    fn parse_rejects_bad_branch_chars() {
        let (_, branch) =
            parse_metadata(r#"{"title": "t", "branch_name": "has spaces"}"#).unwrap();
        assert!(branch.is_none());
    }

    #[test]
    fn parse_rejects_missing_title() {
        assert!(parse_metadata(r#"{"branch_name": "x"}"#).is_none());
        assert!(parse_metadata("no json here").is_none());
    }

    #[test]
    fn truncate_respects_limit() {
        let long = "a".repeat(200);
        let title = truncate_title(&long);
        assert!(title.chars().count() <= MAX_TITLE_CHARS + 1);
        assert!(title.ends_with('…'));

        assert_eq!(truncate_title("short task"), "short task");
    }
}
