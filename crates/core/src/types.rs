//! Shot-list input types.
//!
//! [`Shot`] and [`SelectionSet`] are read-only inputs sourced from the
//! storyboard and selection layers. The plan builder consumes them as-is;
//! nothing in this crate mutates them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A single storyboard shot to be generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    /// Unique, order-preserving identifier from the storyboard.
    pub shot_id: String,
    /// Base name used for the shot's output files.
    pub filename_base: String,
    /// Generation prompt text.
    pub prompt: String,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Requested duration in seconds. Must be positive.
    pub duration_seconds: f64,
    /// Motion metadata carried through to consumers unchanged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion: Option<serde_json::Value>,
}

/// The chosen source still image per shot.
///
/// A shot without an entry is unselected; the plan builder degrades it to
/// skipped segments instead of failing the whole plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionSet {
    entries: BTreeMap<String, PathBuf>,
}

impl SelectionSet {
    /// Create an empty selection set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the chosen source image for a shot, replacing any prior choice.
    pub fn select(&mut self, shot_id: impl Into<String>, source_image: impl Into<PathBuf>) {
        self.entries.insert(shot_id.into(), source_image.into());
    }

    /// The chosen source image for a shot, if one was selected.
    pub fn source_for(&self, shot_id: &str) -> Option<&Path> {
        self.entries.get(shot_id).map(PathBuf::as_path)
    }

    /// Number of shots with a selection.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no shot has a selection.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_lookup() {
        let mut selections = SelectionSet::new();
        selections.select("shot_010", "/stills/010.png");

        assert_eq!(
            selections.source_for("shot_010"),
            Some(Path::new("/stills/010.png"))
        );
        assert_eq!(selections.source_for("shot_020"), None);
        assert_eq!(selections.len(), 1);
    }

    #[test]
    fn reselect_replaces_prior_choice() {
        let mut selections = SelectionSet::new();
        selections.select("shot_010", "/stills/a.png");
        selections.select("shot_010", "/stills/b.png");

        assert_eq!(
            selections.source_for("shot_010"),
            Some(Path::new("/stills/b.png"))
        );
        assert_eq!(selections.len(), 1);
    }
}
