//! Typed parsing of the ComfyUI queue and history documents.
//!
//! Polling a prompt means reading two documents: `GET /history/{id}`
//! carries terminal results (outputs plus a status block), while
//! `GET /queue` distinguishes a running prompt from one still waiting.
//! A prompt present in neither has just been dequeued and its history
//! entry has not landed yet; callers treat that as still queued.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

// ---------------------------------------------------------------------------
// History document
// ---------------------------------------------------------------------------

/// One prompt's entry in the ComfyUI history document.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    #[serde(default)]
    pub status: Option<HistoryStatus>,
    /// Outputs keyed by node ID.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
}

/// Status block of a history entry.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    /// `"success"` or `"error"`.
    pub status_str: Option<String>,
    #[serde(default)]
    pub completed: bool,
    /// Raw execution messages; error details live in
    /// `["execution_error", {...}]` entries.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// Files produced by a single node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<OutputFile>,
    #[serde(default)]
    pub gifs: Vec<OutputFile>,
    #[serde(default)]
    pub videos: Vec<OutputFile>,
}

/// A single produced file reference.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputFile {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// `"output"` for persisted results, `"temp"` for previews.
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl HistoryEntry {
    /// True when the prompt completed without error.
    pub fn is_success(&self) -> bool {
        match &self.status {
            Some(status) => status.completed && status.status_str.as_deref() != Some("error"),
            None => false,
        }
    }

    /// True when the prompt reached a terminal error state.
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.status_str.as_deref() == Some("error"))
    }

    /// Extract the execution error message, if one was recorded.
    ///
    /// Messages have the shape `["execution_error", { "exception_message":
    /// "...", ... }]`.
    pub fn error_message(&self) -> Option<String> {
        let messages = &self.status.as_ref()?.messages;
        for message in messages {
            let Some(pair) = message.as_array() else {
                continue;
            };
            if pair.first().and_then(|k| k.as_str()) == Some("execution_error") {
                return pair
                    .get(1)
                    .and_then(|data| data.get("exception_message"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string);
            }
        }
        None
    }
}

/// Resolve a history entry's persisted output files against the backend's
/// output root directory, in node-ID order.
///
/// Preview (`temp`) files are excluded; only `output`-typed files are
/// addressable results.
pub fn resolve_output_paths(entry: &HistoryEntry, output_root: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for node_output in entry.outputs.values() {
        for file in node_output
            .videos
            .iter()
            .chain(&node_output.gifs)
            .chain(&node_output.images)
        {
            if file.kind != "output" {
                continue;
            }
            let mut path = output_root.to_path_buf();
            if !file.subfolder.is_empty() {
                path.push(&file.subfolder);
            }
            path.push(&file.filename);
            paths.push(path);
        }
    }
    paths
}

// ---------------------------------------------------------------------------
// Queue document
// ---------------------------------------------------------------------------

/// The ComfyUI `GET /queue` document.
///
/// Entries are heterogeneous arrays `[number, prompt_id, prompt, ...]`;
/// only the prompt ID at position 1 matters here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueDocument {
    #[serde(default)]
    pub queue_running: Vec<serde_json::Value>,
    #[serde(default)]
    pub queue_pending: Vec<serde_json::Value>,
}

impl QueueDocument {
    /// True when the prompt is currently executing.
    pub fn contains_running(&self, prompt_id: &str) -> bool {
        self.queue_running
            .iter()
            .any(|entry| entry_matches(entry, prompt_id))
    }

    /// True when the prompt is waiting in the queue.
    pub fn contains_pending(&self, prompt_id: &str) -> bool {
        self.queue_pending
            .iter()
            .any(|entry| entry_matches(entry, prompt_id))
    }
}

fn entry_matches(entry: &serde_json::Value, prompt_id: &str) -> bool {
    entry
        .as_array()
        .and_then(|fields| fields.get(1))
        .and_then(|id| id.as_str())
        == Some(prompt_id)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn success_entry() -> HistoryEntry {
        serde_json::from_value(serde_json::json!({
            "status": {
                "status_str": "success",
                "completed": true,
                "messages": []
            },
            "outputs": {
                "9": {
                    "gifs": [
                        { "filename": "clip_00001.mp4", "subfolder": "clips", "type": "output" }
                    ]
                },
                "12": {
                    "images": [
                        { "filename": "preview.png", "subfolder": "", "type": "temp" }
                    ]
                }
            }
        }))
        .unwrap()
    }

    fn error_entry() -> HistoryEntry {
        serde_json::from_value(serde_json::json!({
            "status": {
                "status_str": "error",
                "completed": false,
                "messages": [
                    ["execution_start", { "prompt_id": "abc" }],
                    ["execution_error", {
                        "prompt_id": "abc",
                        "node_id": "3",
                        "exception_message": "CUDA out of memory",
                        "exception_type": "RuntimeError"
                    }]
                ]
            },
            "outputs": {}
        }))
        .unwrap()
    }

    // -- history classification ----------------------------------------------

    #[test]
    fn success_entry_classified() {
        let entry = success_entry();
        assert!(entry.is_success());
        assert!(!entry.is_error());
    }

    #[test]
    fn error_entry_classified() {
        let entry = error_entry();
        assert!(entry.is_error());
        assert!(!entry.is_success());
    }

    #[test]
    fn incomplete_entry_is_neither() {
        let entry: HistoryEntry = serde_json::from_value(serde_json::json!({
            "status": { "status_str": null, "completed": false, "messages": [] },
            "outputs": {}
        }))
        .unwrap();
        assert!(!entry.is_success());
        assert!(!entry.is_error());
    }

    #[test]
    fn entry_without_status_block_is_neither() {
        let entry: HistoryEntry = serde_json::from_value(serde_json::json!({
            "outputs": {}
        }))
        .unwrap();
        assert!(!entry.is_success());
        assert!(!entry.is_error());
    }

    #[test]
    fn error_message_extracted() {
        let entry = error_entry();
        assert_eq!(entry.error_message().as_deref(), Some("CUDA out of memory"));
    }

    #[test]
    fn error_message_none_when_no_error_recorded() {
        let entry = success_entry();
        assert_eq!(entry.error_message(), None);
    }

    // -- output resolution ---------------------------------------------------

    #[test]
    fn resolve_outputs_joins_root_and_subfolder() {
        let entry = success_entry();
        let paths = resolve_output_paths(&entry, Path::new("/data/comfyui/output"));
        assert_eq!(
            paths,
            vec![PathBuf::from("/data/comfyui/output/clips/clip_00001.mp4")]
        );
    }

    #[test]
    fn resolve_outputs_excludes_temp_files() {
        let entry = success_entry();
        let paths = resolve_output_paths(&entry, Path::new("/out"));
        assert!(paths.iter().all(|p| !p.ends_with("preview.png")));
    }

    #[test]
    fn resolve_outputs_empty_for_error_entry() {
        let entry = error_entry();
        assert!(resolve_output_paths(&entry, Path::new("/out")).is_empty());
    }

    // -- queue classification ------------------------------------------------

    #[test]
    fn queue_running_and_pending_lookup() {
        let queue: QueueDocument = serde_json::from_value(serde_json::json!({
            "queue_running": [[0, "running-prompt", {}]],
            "queue_pending": [[1, "pending-prompt", {}]]
        }))
        .unwrap();

        assert!(queue.contains_running("running-prompt"));
        assert!(!queue.contains_running("pending-prompt"));
        assert!(queue.contains_pending("pending-prompt"));
        assert!(!queue.contains_pending("running-prompt"));
        assert!(!queue.contains_running("unknown"));
    }

    #[test]
    fn malformed_queue_entries_do_not_match() {
        let queue: QueueDocument = serde_json::from_value(serde_json::json!({
            "queue_running": ["not-an-array", [0], {"id": "x"}],
            "queue_pending": []
        }))
        .unwrap();

        assert!(!queue.contains_running("x"));
    }
}
