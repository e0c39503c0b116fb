//! Workflow template slot model.
//!
//! The generation backend executes an opaque workflow JSON document (an
//! object of nodes, each with `class_type` and `inputs`). The pipeline
//! never interprets that structure beyond a set of named parameter slots,
//! each bound to a specific node input. Bindings are validated up front so
//! a misconfigured template fails before any job is submitted.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Slot names
// ---------------------------------------------------------------------------

pub const SLOT_PROMPT: &str = "prompt";
pub const SLOT_WIDTH: &str = "width";
pub const SLOT_HEIGHT: &str = "height";
pub const SLOT_START_FRAME_PATH: &str = "start_frame_path";
pub const SLOT_FPS: &str = "fps";
pub const SLOT_DURATION_SECONDS: &str = "duration_seconds";
pub const SLOT_SEED: &str = "seed";

/// Every slot the pipeline fills. A template must bind all of them.
pub const REQUIRED_SLOTS: &[&str] = &[
    SLOT_PROMPT,
    SLOT_WIDTH,
    SLOT_HEIGHT,
    SLOT_START_FRAME_PATH,
    SLOT_FPS,
    SLOT_DURATION_SECONDS,
    SLOT_SEED,
];

// ---------------------------------------------------------------------------
// Frame rate bounds
// ---------------------------------------------------------------------------

/// Minimum accepted frame rate for the `fps` slot.
pub const MIN_FPS: u32 = 12;

/// Maximum accepted frame rate for the `fps` slot.
pub const MAX_FPS: u32 = 30;

/// Validate that a frame rate is within the accepted range.
pub fn validate_fps(fps: u32) -> Result<(), CoreError> {
    if !(MIN_FPS..=MAX_FPS).contains(&fps) {
        return Err(CoreError::Validation(format!(
            "fps must be between {MIN_FPS} and {MAX_FPS}, got {fps}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Template and bindings
// ---------------------------------------------------------------------------

/// Where a named slot lands inside the workflow document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotBinding {
    /// Node ID (object key) in the workflow document.
    pub node_id: String,
    /// Input field name within that node's `inputs` object.
    pub input_name: String,
}

impl SlotBinding {
    pub fn new(node_id: impl Into<String>, input_name: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            input_name: input_name.into(),
        }
    }
}

/// An opaque workflow document plus the named slots the pipeline fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    document: serde_json::Value,
    bindings: BTreeMap<String, SlotBinding>,
}

/// Concrete values for one segment's submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotValues {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub start_frame_path: PathBuf,
    pub fps: u32,
    pub duration_seconds: f64,
    pub seed: u64,
}

impl SlotValues {
    /// Pair each slot name with its JSON value, in `REQUIRED_SLOTS` order.
    fn as_pairs(&self) -> Vec<(&'static str, serde_json::Value)> {
        vec![
            (SLOT_PROMPT, serde_json::json!(self.prompt)),
            (SLOT_WIDTH, serde_json::json!(self.width)),
            (SLOT_HEIGHT, serde_json::json!(self.height)),
            (
                SLOT_START_FRAME_PATH,
                serde_json::json!(self.start_frame_path.to_string_lossy()),
            ),
            (SLOT_FPS, serde_json::json!(self.fps)),
            (SLOT_DURATION_SECONDS, serde_json::json!(self.duration_seconds)),
            (SLOT_SEED, serde_json::json!(self.seed)),
        ]
    }
}

impl WorkflowTemplate {
    /// Wrap a workflow document with its slot bindings.
    ///
    /// Structure is not checked here; call [`validate`](Self::validate)
    /// before the first submission.
    pub fn new(
        document: serde_json::Value,
        bindings: BTreeMap<String, SlotBinding>,
    ) -> Self {
        Self { document, bindings }
    }

    /// The underlying workflow document.
    pub fn document(&self) -> &serde_json::Value {
        &self.document
    }

    /// Check that the document and bindings are usable.
    ///
    /// - The document must be a non-empty JSON object.
    /// - Every slot in [`REQUIRED_SLOTS`] must be bound.
    /// - No binding may name an unknown slot.
    /// - Every binding must point at an existing node with an `inputs`
    ///   object.
    pub fn validate(&self) -> Result<(), CoreError> {
        let nodes = self.document.as_object().ok_or_else(|| {
            CoreError::Configuration("Workflow document must be a JSON object".to_string())
        })?;
        if nodes.is_empty() {
            return Err(CoreError::Configuration(
                "Workflow document must contain at least one node".to_string(),
            ));
        }

        for slot in REQUIRED_SLOTS {
            if !self.bindings.contains_key(*slot) {
                return Err(CoreError::Configuration(format!(
                    "Required slot '{slot}' is not bound"
                )));
            }
        }
        for slot in self.bindings.keys() {
            if !REQUIRED_SLOTS.contains(&slot.as_str()) {
                return Err(CoreError::Configuration(format!(
                    "Unknown slot '{slot}' in template bindings"
                )));
            }
        }

        for (slot, binding) in &self.bindings {
            let node = nodes.get(&binding.node_id).ok_or_else(|| {
                CoreError::Configuration(format!(
                    "Slot '{slot}' is bound to unknown node '{}'",
                    binding.node_id
                ))
            })?;
            if node.get("inputs").and_then(|i| i.as_object()).is_none() {
                return Err(CoreError::Configuration(format!(
                    "Slot '{slot}' is bound to node '{}' which has no inputs object",
                    binding.node_id
                )));
            }
        }

        Ok(())
    }

    /// Produce a submittable document with every slot filled.
    ///
    /// The template itself is left untouched; filling works on a copy.
    pub fn fill(&self, values: &SlotValues) -> Result<serde_json::Value, CoreError> {
        self.validate()?;
        let mut document = self.document.clone();

        for (slot, value) in values.as_pairs() {
            // validate() guarantees the binding and node exist.
            let binding = &self.bindings[slot];
            let inputs = document
                .get_mut(&binding.node_id)
                .and_then(|n| n.get_mut("inputs"))
                .and_then(|i| i.as_object_mut())
                .ok_or_else(|| {
                    CoreError::Configuration(format!(
                        "Slot '{slot}' binding became invalid during fill"
                    ))
                })?;
            inputs.insert(binding.input_name.clone(), value);
        }

        Ok(document)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
