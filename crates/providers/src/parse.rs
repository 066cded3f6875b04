//! Lenient extraction from provider JSON.
//!
//! Providers are inconsistent about envelope shape and field names, so lookups
//! walk a short list of known locations and take the first hit.

use serde_json::Value;

use crate::types::{Artifact, PollStatus};

/// First non-empty string (or number) found at any of the given paths.
pub fn first_str(body: &Value, paths: &[&[&str]]) -> Option<String> {
    paths.iter().find_map(|path| {
        let mut cur = body;
        for key in *path {
            cur = cur.get(*key)?;
        }
        match cur {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    })
}

/// Correlation id of a callback or submit response:
/// `data.task_id`, then `task_id`, then `data.id`.
pub fn correlation_id(body: &Value) -> Option<String> {
    first_str(
        body,
        &[
            &["data", "task_id"],
            &["data", "taskId"],
            &["task_id"],
            &["taskId"],
            &["data", "id"],
            &["id"],
        ],
    )
}

/// Item list of a callback or record response: `data.data`, then `data`.
pub fn items(body: &Value) -> Value {
    let candidates = [
        body.pointer("/data/data"),
        body.pointer("/data/response/sunoData"),
        body.get("data"),
    ];
    candidates
        .into_iter()
        .flatten()
        .find(|v| !v.is_null())
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()))
}

/// First item of an array, or the value itself when it is an object.
pub fn first_item(items: &Value) -> Option<&Value> {
    match items {
        Value::Array(list) => list.first(),
        Value::Object(_) => Some(items),
        _ => None,
    }
}

/// Artifact described by one provider item.
pub fn artifact_from_item(item: &Value) -> Artifact {
    let duration_secs = item
        .get("duration")
        .and_then(Value::as_f64)
        .filter(|d| d.is_finite() && *d >= 0.0)
        .map(|d| d.round() as u32);

    Artifact {
        id: first_str(item, &[&["id"], &["audio_id"], &["audioId"]]),
        audio_url: first_str(
            item,
            &[&["audio_url"], &["audioUrl"], &["stream_audio_url"], &["streamAudioUrl"]],
        ),
        video_url: first_str(item, &[&["video_url"], &["videoUrl"], &["mp4_url"], &["mp4Url"]]),
        duration_secs,
        text: first_str(item, &[&["lyrics"], &["prompt"], &["text"]]),
    }
}

/// Interpret a status-bearing provider response.
///
/// Complete requires media; a complete status without any URL is still pending.
pub fn poll_status(body: &Value) -> PollStatus {
    let items = items(body);
    let item = first_item(&items);

    let status = item
        .and_then(|i| first_str(i, &[&["status"]]))
        .or_else(|| first_str(body, &[&["data", "status"], &["status"]]))
        .unwrap_or_default()
        .to_ascii_lowercase();

    if matches!(status.as_str(), "error" | "failed" | "create_task_failed" | "generate_audio_failed" | "sensitive_word_error") {
        let reason = item
            .and_then(|i| first_str(i, &[&["error_message"], &["errorMessage"]]))
            .or_else(|| first_str(body, &[&["data", "errorMessage"], &["msg"]]))
            .unwrap_or(status);
        return PollStatus::Error(reason);
    }

    let artifact = item.map(artifact_from_item).unwrap_or_default();
    let done = matches!(status.as_str(), "complete" | "completed" | "success" | "succeeded");
    if done && artifact.has_media() {
        PollStatus::Complete(artifact)
    } else {
        PollStatus::Pending
    }
}
