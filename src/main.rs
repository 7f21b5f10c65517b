//! Workspace lint/validate CLI
//!
//! Scans a workspace: builds the node library from `plugins/nodes/`, lints
//! the implementation specs, then parses and validates every graph file
//! under `assets/graphs/`. With `--flow-tree` the control-flow tree of each
//! graph is printed as well.

use anyhow::{Context, Result};
use flowscript::graph::validation::{IssueLevel, Validator};
use flowscript::graph::GraphCodeParser;
use flowscript::layout::flow_tree::generate_flow_tree;
use flowscript::nodes::NodeLibrary;
use flowscript::settings::Settings;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

fn main() {
    flowscript::init_logging();
    let exit_code = match run() {
        Ok(error_count) if error_count == 0 => 0,
        Ok(_) => 1,
        Err(err) => {
            eprintln!("error: {err:#}");
            2
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<usize> {
    let mut arguments = std::env::args().skip(1);
    let Some(workspace_argument) = arguments.next() else {
        eprintln!("usage: flowscript <workspace> [--strict-entity] [--flow-tree]");
        return Ok(1);
    };
    let workspace = PathBuf::from(workspace_argument);
    let mut strict_entity = false;
    let mut print_flow_tree = false;
    for flag in arguments {
        match flag.as_str() {
            "--strict-entity" => strict_entity = true,
            "--flow-tree" => print_flow_tree = true,
            other => {
                eprintln!("unknown flag: {other}");
                return Ok(1);
            }
        }
    }

    let mut settings = Settings::load_from_workspace(&workspace)
        .with_context(|| format!("loading settings from {}", workspace.display()))?;
    if strict_entity {
        settings.strict_entity_inputs_wire_only = true;
    }

    let (library, normalized_specs) = NodeLibrary::load_from_workspace(&workspace)
        .context("building node library")?;
    println!("node library: {} definitions", library.len());

    let mut validator = Validator::new(Some(&library));
    validator.strict_entity_inputs = settings.strict_entity_inputs_wire_only;

    let mut total_errors = 0usize;
    let mut total_warnings = 0usize;

    let spec_report = validator.validate_specs(&normalized_specs);
    print_issues(&spec_report.issues);
    total_errors += spec_report.error_count();
    total_warnings += spec_report.warning_count();

    let graph_files = discover_graph_files(&workspace)?;
    println!("graph files to validate: {}", graph_files.len());

    let parser = GraphCodeParser::with_library(&library);
    for graph_file in &graph_files {
        match parser.parse_file(graph_file) {
            Ok(parsed) => {
                let report = validator.validate(&parsed);
                if !report.issues.is_empty() {
                    println!("-- {}", graph_file.display());
                    print_issues(&report.issues);
                }
                total_errors += report.error_count();
                total_warnings += report.warning_count();
                if print_flow_tree {
                    println!("{}", generate_flow_tree(&parsed.model));
                }
            }
            Err(err) => {
                println!("-- {}: parse failed: {err}", graph_file.display());
                total_errors += 1;
            }
        }
    }

    println!("validation finished: {total_errors} error(s), {total_warnings} warning(s)");
    Ok(total_errors)
}

fn discover_graph_files(workspace: &Path) -> Result<Vec<PathBuf>> {
    let graphs_root = workspace.join("assets").join("graphs");
    if !graphs_root.exists() {
        println!("graph directory {} missing, skipping", graphs_root.display());
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(&graphs_root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("py") {
            continue;
        }
        // Helper modules like `_prelude.py` are not class-convention graphs.
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('_'))
            .unwrap_or(true)
        {
            continue;
        }
        files.push(path.to_path_buf());
    }
    Ok(files)
}

fn print_issues(issues: &[flowscript::graph::ValidationIssue]) {
    for issue in issues {
        let level = match issue.level {
            IssueLevel::Error => "error",
            IssueLevel::Warning => "warning",
        };
        println!("  [{level}] {} at {}: {}", issue.code, issue.location, issue.detail);
    }
}
