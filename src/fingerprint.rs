//! Content fingerprinting
//!
//! Three fingerprint families keep every cache honest:
//! - byte-level MD5 of files,
//! - an aggregate fingerprint of the on-disk node-definition state,
//! - SHA-1 signatures of a graph's node/edge content.
//!
//! The byte layouts are part of the persistent cache format and must not
//! change: signatures feed sorted ids with fixed separators.

use crate::graph::GraphModel;
use md5::Md5;
use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

/// Directories whose `.py` population defines the node-definition fingerprint.
pub const NODE_DEF_DIRS: [&str; 4] = [
    "plugins/nodes",
    "engine/nodes",
    "engine/graph",
    "assets/composites",
];

/// Deterministic identity of a graph's content state.
///
/// Positions are excluded; two models that differ only in node coordinates
/// share the node/edge hashes (the revision still tells them apart for
/// in-memory cache invalidation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSignature {
    pub revision: u64,
    pub version: u32,
    pub nodes_sha1: String,
    pub edges_sha1: String,
}

/// Byte-level MD5 of a file, streamed in 8 KiB chunks.
pub fn file_md5(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex_string(&hasher.finalize()))
}

/// Aggregate fingerprint of the node-definition state of a workspace.
///
/// For each watched directory the fingerprint folds in the `.py` file count
/// and the latest modification time, so touching any implementation file
/// invalidates every dependent cache.
pub fn node_defs_fingerprint(workspace_root: &Path) -> std::io::Result<String> {
    let mut parts = Vec::with_capacity(NODE_DEF_DIRS.len());
    for relative in NODE_DEF_DIRS {
        let directory = workspace_root.join(relative);
        let mut file_count: u64 = 0;
        let mut latest_mtime: u64 = 0;
        if directory.exists() {
            for entry in WalkDir::new(&directory).sort_by_file_name() {
                let entry = entry.map_err(std::io::Error::other)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if entry.path().extension().and_then(|e| e.to_str()) != Some("py") {
                    continue;
                }
                file_count += 1;
                let modified = entry.metadata().map_err(std::io::Error::other)?.modified()?;
                let seconds = modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or(0);
                latest_mtime = latest_mtime.max(seconds);
            }
        }
        parts.push(format!("{relative}:{file_count}:{latest_mtime}"));
    }
    Ok(parts.join(";"))
}

/// Compute the `(revision, version, nodes_sha1, edges_sha1)` signature.
pub fn graph_signature(model: &GraphModel) -> GraphSignature {
    let mut node_hasher = Sha1::new();
    for node_id in model.nodes.keys() {
        node_hasher.update(node_id.as_bytes());
        node_hasher.update(b"\x00");
    }

    let mut edge_hasher = Sha1::new();
    for (edge_id, edge) in &model.edges {
        edge_hasher.update(edge_id.as_bytes());
        edge_hasher.update(b"|");
        edge_hasher.update(edge.src_node.as_bytes());
        edge_hasher.update(b"->");
        edge_hasher.update(edge.dst_node.as_bytes());
        edge_hasher.update(b":");
        edge_hasher.update(edge.src_port.as_bytes());
        edge_hasher.update(b"/");
        edge_hasher.update(edge.dst_port.as_bytes());
        edge_hasher.update(b"\x00");
    }

    GraphSignature {
        revision: model.graph_revision,
        version: model.version,
        nodes_sha1: hex_string(&node_hasher.finalize()),
        edges_sha1: hex_string(&edge_hasher.finalize()),
    }
}

/// Content hash used for "is dirty?" checks.
///
/// Hashes the canonical serialization with positions and layout-derived
/// blocks stripped, so moving nodes or re-running layout leaves it stable.
pub fn graph_content_hash(model: &GraphModel) -> String {
    let mut serialized = model.serialize();
    if let Some(nodes) = serialized.get_mut("nodes").and_then(|v| v.as_array_mut()) {
        for node in nodes {
            if let Some(object) = node.as_object_mut() {
                object.remove("pos");
            }
        }
    }
    if let Some(root) = serialized.as_object_mut() {
        root.remove("basic_blocks");
    }
    let canonical = serde_json::to_string(&serialized).unwrap_or_default();
    let mut hasher = Sha1::new();
    hasher.update(canonical.as_bytes());
    hex_string(&hasher.finalize())
}

/// SHA-1 hex prefix used for deterministic edge ids.
pub fn sha1_hex_prefix(payload: &str, length: usize) -> String {
    let mut hasher = Sha1::new();
    hasher.update(payload.as_bytes());
    let digest = hex_string(&hasher.finalize());
    digest[..length.min(digest.len())].to_string()
}

fn hex_string(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        text.push_str(&format!("{byte:02x}"));
    }
    text
}
