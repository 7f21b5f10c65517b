//! Node registry
//!
//! Merges normalized specs into an indexed library keyed by
//! `"Category/Name"` and exposes the derived indices the layout and
//! validation layers need. The library is built once per workspace and is
//! immutable afterwards; callers pass it around explicitly.

use crate::nodes::discovery::discover_implementation_files;
use crate::nodes::extractor::extract_specs;
use crate::nodes::normalizer::normalize_specs;
use crate::nodes::types::NormalizedSpec;
use crate::PipelineError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Type substring that marks an entity-typed port.
pub const ENTITY_TYPE_KEYWORD: &str = "实体";

/// Port-name marker for variadic inputs.
pub const VARIADIC_PORT_MARKER: char = '~';

/// Indexed library of node definitions.
#[derive(Debug, Default)]
pub struct NodeLibrary {
    defs: BTreeMap<String, NormalizedSpec>,
    alias_index: BTreeMap<String, String>,
    title_index: BTreeMap<String, String>,
    entity_inputs: BTreeMap<String, BTreeSet<String>>,
    variadic_min: BTreeMap<String, u32>,
}

impl NodeLibrary {
    /// Merge normalized specs into a library.
    ///
    /// Duplicate `standard_key` across files is an error unless one scope is
    /// `server` and the other `client`; then both entries survive under
    /// scope-suffixed keys and the bare key resolves to the server one.
    pub fn build(specs: Vec<NormalizedSpec>) -> Result<Self, PipelineError> {
        let mut library = NodeLibrary::default();

        for spec in specs {
            if spec.name.is_empty() {
                log::warn!(
                    "skipping spec without a name from {} (validator will report it)",
                    spec.file_path.display()
                );
                continue;
            }
            library.insert_spec(spec)?;
        }

        library.rebuild_derived_indices();
        Ok(library)
    }

    /// Discover, extract, normalize and merge everything in a workspace.
    /// Returns the library plus the full normalized list for lint passes.
    pub fn load_from_workspace(
        workspace: &Path,
    ) -> Result<(Self, Vec<NormalizedSpec>), PipelineError> {
        let files = discover_implementation_files(workspace)?;
        let extracted = extract_specs(&files)?;
        let normalized = normalize_specs(&extracted);
        let library = Self::build(normalized.clone())?;
        Ok((library, normalized))
    }

    fn insert_spec(&mut self, spec: NormalizedSpec) -> Result<(), PipelineError> {
        let key = spec.standard_key.clone();
        match self.defs.get(&key) {
            None => {
                self.defs.insert(key, spec);
                Ok(())
            }
            Some(existing) => {
                let existing_scope = single_scope(existing);
                let incoming_scope = single_scope(&spec);
                let split = matches!(
                    (existing_scope.as_deref(), incoming_scope.as_deref()),
                    (Some("server"), Some("client")) | (Some("client"), Some("server"))
                );
                if !split {
                    return Err(PipelineError::DuplicateStandardKey {
                        key,
                        first: existing.file_path.clone(),
                        second: spec.file_path.clone(),
                    });
                }
                let existing = self.defs.remove(&key).unwrap_or_default();
                let existing_scope = existing_scope.unwrap_or_default();
                let incoming_scope = incoming_scope.unwrap_or_default();
                let server_entry = if existing_scope == "server" { &existing } else { &spec };
                self.defs.insert(key.clone(), server_entry.clone());
                self.defs.insert(format!("{key}@{existing_scope}"), existing);
                self.defs.insert(format!("{key}@{incoming_scope}"), spec);
                Ok(())
            }
        }
    }

    fn rebuild_derived_indices(&mut self) {
        self.alias_index.clear();
        self.title_index.clear();
        self.entity_inputs.clear();
        self.variadic_min.clear();

        for (key, spec) in &self.defs {
            if key.contains('@') {
                continue;
            }
            for alias in &spec.aliases {
                self.alias_index.entry(alias.clone()).or_insert_with(|| key.clone());
            }
            self.title_index.entry(spec.name.clone()).or_insert_with(|| key.clone());

            let entity_ports: BTreeSet<String> = spec
                .input_types
                .iter()
                .filter(|(_, type_name)| type_name.contains(ENTITY_TYPE_KEYWORD))
                .map(|(port, _)| port.clone())
                .collect();
            if !entity_ports.is_empty() {
                self.entity_inputs.insert(spec.name.clone(), entity_ports);
            }

            let variadic_count = spec
                .inputs
                .iter()
                .filter(|(port, _)| port.contains(VARIADIC_PORT_MARKER))
                .count();
            if variadic_count > 0 {
                let minimum = if variadic_count == 1 { 1 } else { 2 };
                self.variadic_min.insert(spec.name.clone(), minimum);
            }
        }
    }

    pub fn get(&self, standard_key: &str) -> Option<&NormalizedSpec> {
        self.defs.get(standard_key)
    }

    pub fn get_by_alias(&self, alias: &str) -> Option<&NormalizedSpec> {
        self.alias_index.get(alias).and_then(|key| self.defs.get(key))
    }

    /// Resolve a node definition by display name, falling back to aliases.
    pub fn get_by_title(&self, title: &str) -> Option<&NormalizedSpec> {
        self.title_index
            .get(title)
            .and_then(|key| self.defs.get(key))
            .or_else(|| self.get_by_alias(title))
    }

    /// Node name -> input ports whose declared type contains the entity keyword.
    pub fn entity_input_params_by_func(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.entity_inputs
    }

    /// Node name -> minimum variadic argument count (1 or 2).
    pub fn variadic_min_args(&self) -> &BTreeMap<String, u32> {
        &self.variadic_min
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &NormalizedSpec)> {
        self.defs.iter()
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

fn single_scope(spec: &NormalizedSpec) -> Option<String> {
    if spec.scopes.len() == 1 {
        Some(spec.scopes[0].clone())
    } else {
        None
    }
}
