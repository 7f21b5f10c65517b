//! Persistent graph cache (disk)
//!
//! Parsed-graph results are cached on disk keyed by the graph id, guarded by
//! the source file's MD5 and the node-definition fingerprint. Writes are
//! atomic (temp file + rename); corrupted or structurally inconsistent
//! entries are deleted and reported as misses. This is distinct from the
//! in-process layout cache owned by `LayoutService`.

use crate::fingerprint::{file_md5, node_defs_fingerprint};
use crate::graph::ports::{is_flow_port_name, FLOW_PORT_PLACEHOLDER};
use crate::CacheError;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Cache directory relative to the workspace root.
pub const GRAPH_CACHE_RELATIVE_DIR: &str = "app/runtime/cache/graph_cache";

/// Disk cache manager for parsed graph results.
pub struct PersistentGraphCacheManager {
    workspace_path: PathBuf,
    /// Folded into the stored fingerprint so layout-semantics bumps
    /// invalidate existing entries.
    layout_algo_version: u32,
}

impl PersistentGraphCacheManager {
    pub fn new(workspace_path: impl Into<PathBuf>, layout_algo_version: u32) -> Self {
        Self {
            workspace_path: workspace_path.into(),
            layout_algo_version,
        }
    }

    fn cache_dir(&self) -> PathBuf {
        self.workspace_path.join(GRAPH_CACHE_RELATIVE_DIR)
    }

    fn cache_file(&self, graph_id: &str) -> PathBuf {
        self.cache_dir().join(format!("{graph_id}.json"))
    }

    fn current_fingerprint(&self) -> std::io::Result<String> {
        let base = node_defs_fingerprint(&self.workspace_path)?;
        Ok(format!("{base}|algo_v{}", self.layout_algo_version))
    }

    /// Try to load a cached result for a graph.
    ///
    /// A hit requires the stored file hash and node-defs fingerprint to match
    /// the current state and the payload to pass the structural self-check.
    /// Stale entries return a miss but stay on disk (the next save overwrites
    /// them); structurally inconsistent entries are deleted eagerly.
    pub fn load(&self, graph_id: &str, file_path: &Path) -> Result<Option<Value>, CacheError> {
        let cache_file = self.cache_file(graph_id);
        if !cache_file.exists() {
            return Ok(None);
        }

        // Interrupted writers can leave an empty file behind; treat it as absent.
        let cache_text = std::fs::read_to_string(&cache_file)?;
        if cache_text.trim().is_empty() {
            return Ok(None);
        }
        let payload: Value = match serde_json::from_str(&cache_text) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("graph cache {graph_id}: malformed JSON ({err}), deleting");
                std::fs::remove_file(&cache_file)?;
                return Ok(None);
            }
        };

        let required_present = ["file_hash", "node_defs_fp", "result_data"]
            .iter()
            .all(|key| payload.get(*key).is_some());
        if !required_present {
            log::warn!("graph cache {graph_id}: missing required keys, deleting");
            std::fs::remove_file(&cache_file)?;
            return Ok(None);
        }

        let current_hash = file_md5(file_path)?;
        let current_fp = self.current_fingerprint()?;
        if payload.get("file_hash").and_then(Value::as_str) != Some(current_hash.as_str()) {
            return Ok(None);
        }
        if payload.get("node_defs_fp").and_then(Value::as_str) != Some(current_fp.as_str()) {
            return Ok(None);
        }

        let Some(result_data) = payload.get("result_data").filter(|v| v.is_object()) else {
            std::fs::remove_file(&cache_file)?;
            return Ok(None);
        };
        if !is_result_data_structurally_consistent(result_data) {
            log::warn!("graph cache {graph_id}: structural self-check failed, deleting");
            std::fs::remove_file(&cache_file)?;
            return Ok(None);
        }
        Ok(Some(result_data.clone()))
    }

    /// Read the stored `result_data` without hash or fingerprint checks.
    /// Used for incremental updates when the caller already knows the entry
    /// is valid.
    pub fn read_result_data(&self, graph_id: &str) -> Result<Option<Value>, CacheError> {
        let cache_file = self.cache_file(graph_id);
        if !cache_file.exists() {
            return Ok(None);
        }
        let cache_text = std::fs::read_to_string(&cache_file)?;
        if cache_text.trim().is_empty() {
            return Ok(None);
        }
        let payload: Value = match serde_json::from_str(&cache_text) {
            Ok(payload) => payload,
            Err(_) => return Ok(None),
        };
        Ok(payload.get("result_data").filter(|v| v.is_object()).cloned())
    }

    /// Write or overwrite the cache entry for a graph.
    ///
    /// The payload goes to `<id>.json.tmp` first and is renamed over the
    /// target, so readers observe either the old file or the new one whole.
    pub fn save(
        &self,
        graph_id: &str,
        file_path: &Path,
        result_data: &Value,
    ) -> Result<(), CacheError> {
        let cache_dir = self.cache_dir();
        std::fs::create_dir_all(&cache_dir)?;
        let cache_file = self.cache_file(graph_id);
        let tmp_file = cache_dir.join(format!("{graph_id}.json.tmp"));
        log::info!("graph cache: writing {graph_id} -> {}", cache_file.display());

        let payload = json!({
            "file_hash": file_md5(file_path)?,
            "node_defs_fp": self.current_fingerprint()?,
            "result_data": result_data,
            "cached_at": chrono::Local::now().to_rfc3339(),
        });
        // External cleaners may remove the directory between mkdir and write.
        if let Some(parent) = tmp_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(&payload).map_err(std::io::Error::other)?;
        std::fs::write(&tmp_file, text)?;
        std::fs::rename(&tmp_file, &cache_file)?;
        Ok(())
    }

    /// Remove every cache entry; prunes the directory when it ends up empty.
    pub fn clear_all(&self) -> Result<usize, CacheError> {
        let cache_dir = self.cache_dir();
        if !cache_dir.exists() {
            return Ok(0);
        }
        let mut removed = 0usize;
        for entry in std::fs::read_dir(&cache_dir)? {
            let entry = entry?;
            if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                std::fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        if std::fs::read_dir(&cache_dir)?.next().is_none() {
            std::fs::remove_dir(&cache_dir)?;
        }
        Ok(removed)
    }

    /// Remove a single graph's cache entry.
    pub fn clear_for(&self, graph_id: &str) -> Result<usize, CacheError> {
        let cache_file = self.cache_file(graph_id);
        if !cache_file.exists() {
            return Ok(0);
        }
        std::fs::remove_file(&cache_file)?;
        let cache_dir = self.cache_dir();
        if std::fs::read_dir(&cache_dir)?.next().is_none() {
            std::fs::remove_dir(&cache_dir)?;
        }
        Ok(1)
    }
}

/// Structural self-check for cached `result_data`.
///
/// Every edge endpoint must resolve to an existing node and, except for the
/// flow placeholder and the flow-port alias sets, to a declared port name of
/// that node. Deliberately shallow: deeper semantics are revalidated after a
/// real parse.
pub fn is_result_data_structurally_consistent(result_data: &Value) -> bool {
    let Some(graph_data) = result_data.get("data").and_then(Value::as_object) else {
        return false;
    };
    let Some(nodes) = graph_data.get("nodes").and_then(Value::as_array) else {
        return false;
    };
    let Some(edges) = graph_data.get("edges").and_then(Value::as_array) else {
        return false;
    };

    let mut input_ports_by_node: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut output_ports_by_node: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for node in nodes {
        let Some(node) = node.as_object() else { return false };
        let Some(node_id) = node.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()) else {
            return false;
        };
        let port_set = |key: &str| -> Option<BTreeSet<&str>> {
            let raw = node.get(key)?;
            let list = raw.as_array()?;
            Some(list.iter().filter_map(Value::as_str).collect())
        };
        let (Some(inputs), Some(outputs)) = (
            port_set("inputs").or_else(|| node.get("inputs").is_none().then(BTreeSet::new)),
            port_set("outputs").or_else(|| node.get("outputs").is_none().then(BTreeSet::new)),
        ) else {
            return false;
        };
        input_ports_by_node.insert(node_id, inputs);
        output_ports_by_node.insert(node_id, outputs);
    }

    for edge in edges {
        let Some(edge) = edge.as_object() else { return false };
        let field = |key: &str| edge.get(key).and_then(Value::as_str);
        let (Some(src_node), Some(dst_node), Some(src_port), Some(dst_port)) = (
            field("src_node"),
            field("dst_node"),
            field("src_port"),
            field("dst_port"),
        ) else {
            return false;
        };
        if !input_ports_by_node.contains_key(src_node) || !input_ports_by_node.contains_key(dst_node) {
            return false;
        }

        if src_port != FLOW_PORT_PLACEHOLDER {
            let valid = output_ports_by_node
                .get(src_node)
                .map(|ports| ports.contains(src_port))
                .unwrap_or(false);
            if !valid && !is_flow_port_name(src_port) {
                return false;
            }
        }
        if dst_port != FLOW_PORT_PLACEHOLDER {
            let valid = input_ports_by_node
                .get(dst_node)
                .map(|ports| ports.contains(dst_port))
                .unwrap_or(false);
            if !valid && !is_flow_port_name(dst_port) {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn consistent_payload() -> Value {
        json!({
            "data": {
                "nodes": [
                    {"id": "a", "inputs": [], "outputs": ["值"]},
                    {"id": "b", "inputs": ["值"], "outputs": []},
                ],
                "edges": [
                    {"id": "e1", "src_node": "a", "src_port": "值", "dst_node": "b", "dst_port": "值"},
                ],
            }
        })
    }

    #[test]
    fn test_structural_check_accepts_valid_payload() {
        assert!(is_result_data_structurally_consistent(&consistent_payload()));
    }

    #[test]
    fn test_structural_check_rejects_unknown_port() {
        let mut payload = consistent_payload();
        payload["data"]["edges"][0]["dst_port"] = json!("不存在");
        assert!(!is_result_data_structurally_consistent(&payload));
    }

    #[test]
    fn test_structural_check_accepts_flow_placeholder() {
        let mut payload = consistent_payload();
        payload["data"]["edges"][0]["src_port"] = json!(FLOW_PORT_PLACEHOLDER);
        payload["data"]["edges"][0]["dst_port"] = json!("流程入");
        assert!(is_result_data_structurally_consistent(&payload));
    }

    #[test]
    fn test_structural_check_rejects_missing_node() {
        let mut payload = consistent_payload();
        payload["data"]["edges"][0]["src_node"] = json!("ghost");
        assert!(!is_result_data_structurally_consistent(&payload));
    }
}
