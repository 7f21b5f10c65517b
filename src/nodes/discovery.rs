//! Implementation-file discovery
//!
//! Scans `plugins/nodes/**.py`, excluding `__init__.py` and helper modules
//! under `plugins/nodes/shared/`. Server-scoped files sort first so later
//! merge stages see a stable server-before-client order.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Discover implementation files to analyze. Returns paths only; nothing is
/// imported, so files with import-time side effects stay inert.
pub fn discover_implementation_files(workspace_path: &Path) -> std::io::Result<Vec<PathBuf>> {
    let impl_root = workspace_path.join("plugins").join("nodes");
    if !impl_root.exists() {
        return Ok(Vec::new());
    }
    let shared_root = impl_root.join("shared");

    let mut discovered: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(&impl_root).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }
        if path.file_name().and_then(|n| n.to_str()) == Some("__init__.py") {
            continue;
        }
        if path.starts_with(&shared_root) {
            continue;
        }
        discovered.push(path.to_path_buf());
    }

    discovered.sort_by_key(|path| (scope_priority(path), path.clone()));
    Ok(discovered)
}

fn scope_priority(path: &Path) -> u8 {
    let lower = path.to_string_lossy().to_lowercase();
    if lower.contains("/server/") || lower.contains("\\server\\") {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_files_sort_first_and_helpers_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        for relative in [
            "plugins/nodes/client/查询节点/读取变量.py",
            "plugins/nodes/server/执行节点/打印字符串.py",
            "plugins/nodes/server/执行节点/__init__.py",
            "plugins/nodes/shared/helpers.py",
        ] {
            let path = root.join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
            std::fs::write(&path, "# impl\n").expect("write");
        }

        let files = discover_implementation_files(root).expect("discover");
        assert_eq!(files.len(), 2);
        assert!(files[0].to_string_lossy().contains("server"));
        assert!(files[1].to_string_lossy().contains("client"));
    }

    #[test]
    fn test_missing_root_yields_empty_list() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = discover_implementation_files(dir.path()).expect("discover");
        assert!(files.is_empty());
    }
}
