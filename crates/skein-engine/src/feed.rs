//! Activity feed building.
//!
//! Every meaningful node outcome becomes a [`FeedPost`] on the run record:
//! a status-aware summary, the provenance of the node's inputs, and the
//! output attached as truncated markdown and JSON. Secret-looking values are
//! redacted before anything reaches an attachment. A [`FeedSink`] can mirror
//! posts to an external surface.

use async_trait::async_trait;
use serde_json::Value;
use skein_types::{
    FeedAttachment, FeedAttachmentKind, FeedEvidenceMeta, FeedInputKind, FeedInputSource,
    FeedPost, FeedPostStatus, NodeType,
};

use crate::graph::Node;
use crate::text::{extract_text, truncate_chars};

const MAX_SUMMARY_CHARS: usize = 200;
const MAX_ATTACHMENT_CHARS: usize = 4000;

/// Receives a copy of every feed post the engine appends.
#[async_trait]
pub trait FeedSink: Send + Sync {
    async fn post(&mut self, post: &FeedPost);
}

/// Provenance entry for the run question feeding an entry node.
pub fn question_source(question: &str) -> FeedInputSource {
    let (summary, _) = truncate_chars(question, MAX_SUMMARY_CHARS);
    FeedInputSource {
        kind: FeedInputKind::Question,
        node_id: None,
        agent_name: "question".into(),
        role_label: None,
        summary: Some(summary),
    }
}

/// Provenance entry for a parent node's output feeding this node.
pub fn node_source(parent: &Node, output: Option<&Value>) -> FeedInputSource {
    let summary = output.map(|value| truncate_chars(&extract_text(value), MAX_SUMMARY_CHARS).0);
    FeedInputSource {
        kind: FeedInputKind::Node,
        node_id: Some(parent.id.clone()),
        agent_name: parent.display_name().to_string(),
        role_label: Some(parent.role_label().to_string()),
        summary,
    }
}

/// Build the feed post for one node outcome.
pub fn build_feed_post(
    run_id: &str,
    node: &Node,
    is_final: bool,
    status: FeedPostStatus,
    message: &str,
    output: Option<&Value>,
    input_sources: Vec<FeedInputSource>,
    evidence: FeedEvidenceMeta,
) -> FeedPost {
    let summary = match status {
        FeedPostStatus::Done => output
            .map(|value| truncate_chars(&redact_secrets(&extract_text(value)), MAX_SUMMARY_CHARS).0)
            .unwrap_or_else(|| "completed".to_string()),
        FeedPostStatus::LowQuality => format!("Low quality output: {message}"),
        FeedPostStatus::Failed => format!("Failed: {message}"),
        FeedPostStatus::Cancelled => format!("Cancelled: {message}"),
    };

    let mut attachments = Vec::new();
    if let Some(value) = output {
        let markdown = redact_secrets(&extract_text(value));
        attachments.push(attachment(
            FeedAttachmentKind::Markdown,
            "output",
            &markdown,
        ));
        if !value.is_string() {
            let json_text = serde_json::to_string_pretty(value).unwrap_or_default();
            attachments.push(attachment(
                FeedAttachmentKind::Json,
                "output.json",
                &redact_secrets(&json_text),
            ));
        }
    }

    FeedPost {
        id: uuid::Uuid::new_v4().to_string(),
        run_id: run_id.to_string(),
        node_id: node.id.clone(),
        node_type: node.node_type(),
        is_final_document: is_final && node.node_type() == NodeType::Turn,
        agent_name: node.display_name().to_string(),
        role_label: node.role_label().to_string(),
        status,
        created_at: chrono::Utc::now(),
        summary,
        input_sources,
        evidence,
        attachments,
    }
}

fn attachment(kind: FeedAttachmentKind, title: &str, content: &str) -> FeedAttachment {
    let char_count = content.chars().count();
    let (body, truncated) = truncate_chars(content, MAX_ATTACHMENT_CHARS);
    FeedAttachment {
        kind,
        title: title.to_string(),
        content: body,
        truncated,
        char_count,
    }
}

/// Replace credential-looking values with a redaction marker.
pub fn redact_secrets(text: &str) -> String {
    match regex::Regex::new(r#"(?i)\b(api[_-]?key|token|secret|password)\b(\s*[:=]\s*)\S+"#) {
        Ok(re) => re.replace_all(text, "$1$2[redacted]").into_owned(),
        Err(_) => text.to_string(),
    }
}
