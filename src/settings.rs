//! Engine settings
//!
//! A single flat struct of tunables consumed by the core. Unlike the layout
//! constants these are user-visible knobs persisted to
//! `app/runtime/cache/user_settings.json` inside a workspace. Only
//! `strict_entity_inputs_wire_only` and the layout compaction/copy switches
//! change computed outputs; the verbose flags affect logging only.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Relative location of the persisted settings file inside a workspace.
pub const USER_SETTINGS_RELATIVE_PATH: &str = "app/runtime/cache/user_settings.json";

/// Layer-sort strategy for pure-data graphs.
///
/// Only `None` has pinned behavior; the other modes apply the documented
/// ordering keys but their tie-breaking is experimental.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataLayerSort {
    #[default]
    None,
    OutDegree,
    InDegree,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Bumped on incompatible layout changes; participates in the persistent
    /// cache fingerprint so stale entries stop matching.
    pub layout_algo_version: u32,

    /// Create per-block copies of data nodes shared across blocks.
    pub data_node_cross_block_copy: bool,

    /// Left-shift blocks within their column toward their parents.
    pub layout_tight_block_packing: bool,

    /// Pull data nodes toward their hard lower bound when slack is large.
    pub layout_compact_data_y_in_block: bool,

    /// Compaction pull factor in [0, 1]; 0 hugs the lower bound, 1 disables the pull.
    pub layout_data_y_compact_pull: f64,

    /// Slack in pixels above which the compaction pull triggers.
    pub layout_data_y_compact_slack_threshold: f64,

    /// Populate per-node Y-placement debug info in layout results.
    pub show_layout_y_debug: bool,

    /// Entity-typed inputs may only come from wires or event parameters.
    pub strict_entity_inputs_wire_only: bool,

    /// Verbose graph-editing diagnostics (logging only).
    pub graph_ui_verbose: bool,

    /// Verbose validator diagnostics (logging only).
    pub validator_verbose: bool,

    /// Pure-data layer ordering strategy.
    pub layout_data_layer_sort: DataLayerSort,

    /// Runtime cache root, relative to the workspace (or absolute).
    pub runtime_cache_root: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            layout_algo_version: 2,
            data_node_cross_block_copy: true,
            layout_tight_block_packing: true,
            layout_compact_data_y_in_block: true,
            layout_data_y_compact_pull: 0.6,
            layout_data_y_compact_slack_threshold: 200.0,
            show_layout_y_debug: false,
            strict_entity_inputs_wire_only: false,
            graph_ui_verbose: false,
            validator_verbose: false,
            layout_data_layer_sort: DataLayerSort::None,
            runtime_cache_root: "app/runtime/cache".to_string(),
        }
    }
}

impl Settings {
    /// Path of the settings file for a workspace.
    pub fn file_path(workspace: &Path) -> PathBuf {
        workspace.join(USER_SETTINGS_RELATIVE_PATH)
    }

    /// Load settings from a workspace; a missing file yields the defaults.
    ///
    /// Unknown keys in the file are ignored so settings written by newer
    /// versions still load.
    pub fn load_from_workspace(workspace: &Path) -> std::io::Result<Self> {
        let path = Self::file_path(workspace);
        if !path.exists() {
            log::info!("settings file {} missing, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&text) {
            Ok(loaded) => Ok(loaded),
            Err(err) => {
                log::warn!("settings file {} unreadable ({err}), using defaults", path.display());
                Ok(Self::default())
            }
        }
    }

    /// Persist settings into a workspace, creating parent directories.
    pub fn save_to_workspace(&self, workspace: &Path) -> std::io::Result<()> {
        let path = Self::file_path(workspace);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(&path, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let settings = Settings::default();
        assert_eq!(settings.layout_algo_version, 2);
        assert!(settings.data_node_cross_block_copy);
        assert!(settings.layout_tight_block_packing);
        assert!((settings.layout_data_y_compact_pull - 0.6).abs() < 1e-12);
        assert!((settings.layout_data_y_compact_slack_threshold - 200.0).abs() < 1e-12);
        assert!(!settings.strict_entity_inputs_wire_only);
        assert_eq!(settings.layout_data_layer_sort, DataLayerSort::None);
    }

    #[test]
    fn test_roundtrip_through_workspace_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = Settings::default();
        settings.show_layout_y_debug = true;
        settings.layout_data_y_compact_pull = 0.4;
        settings.save_to_workspace(dir.path()).expect("save");

        let loaded = Settings::load_from_workspace(dir.path()).expect("load");
        assert!(loaded.show_layout_y_debug);
        assert!((loaded.layout_data_y_compact_pull - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = Settings::load_from_workspace(dir.path()).expect("load");
        assert_eq!(loaded.layout_algo_version, Settings::default().layout_algo_version);
    }
}
