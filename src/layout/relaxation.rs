//! Data-Y relaxation
//!
//! Iterative refinement of data-node Y coordinates inside one block. Hard
//! constraints are inviolable: the port-Y lower bound, the stacking gap
//! within an X column, and the multi-parent vertical interval. Soft goals
//! pull nodes toward the center of their neighbors; the compaction pull
//! drags nodes with large slack back toward their lower bound.
//!
//! Relative order within a column is preserved, so each pass either moves a
//! node strictly closer to a bounded target or leaves it pinned by a hard
//! constraint; iteration stops when nothing moves.

use crate::graph::model::GraphModel;
use crate::layout::constants::DATA_STACK_GAP;
use crate::layout::context::LayoutContext;
use crate::settings::Settings;
use std::collections::BTreeMap;

/// Convergence threshold in pixels.
const MOVE_EPSILON: f64 = 0.5;

/// Safety cap; convergence normally happens long before this.
const MAX_PASSES: usize = 64;

/// Precomputed per-node inputs for one relaxation run.
#[derive(Debug, Clone, Default)]
pub struct RelaxationInputs {
    pub heights: BTreeMap<String, f64>,
    /// Port-Y lower bound per data node (top may not go above it).
    pub lower_bounds: BTreeMap<String, f64>,
    /// X-column index per relaxable data node.
    pub columns: BTreeMap<String, i64>,
}

pub struct DataYRelaxationEngine<'a> {
    model: &'a GraphModel,
    context: &'a LayoutContext,
    settings: &'a Settings,
    inputs: RelaxationInputs,
}

impl<'a> DataYRelaxationEngine<'a> {
    pub fn new(
        model: &'a GraphModel,
        context: &'a LayoutContext,
        settings: &'a Settings,
        inputs: RelaxationInputs,
    ) -> Self {
        Self {
            model,
            context,
            settings,
            inputs,
        }
    }

    /// Relax until no node moves. Returns whether anything moved at all.
    pub fn relax_in_place(&self, positions: &mut BTreeMap<String, (f64, f64)>) -> bool {
        let mut moved_any = false;
        let node_ids: Vec<String> = self.inputs.columns.keys().cloned().collect();

        for pass in 0..MAX_PASSES {
            let mut moved_in_pass = false;
            for node_id in &node_ids {
                if self.relax_node(node_id, positions) {
                    moved_in_pass = true;
                    moved_any = true;
                }
            }
            if !moved_in_pass {
                if pass > 0 {
                    log::debug!("data-Y relaxation converged after {pass} passes");
                }
                return moved_any;
            }
        }
        log::warn!("data-Y relaxation hit the pass cap without converging");
        moved_any
    }

    fn relax_node(&self, node_id: &str, positions: &mut BTreeMap<String, (f64, f64)>) -> bool {
        let Some(&(x, current_y)) = positions.get(node_id) else { return false };
        let height = self.height_of(node_id);

        let parent_centers = self.neighbor_centers(node_id, positions, true);
        let child_centers = self.neighbor_centers(node_id, positions, false);

        let target_center = if !parent_centers.is_empty() {
            average(&parent_centers)
        } else if !child_centers.is_empty() {
            average(&child_centers)
        } else {
            return false;
        };

        let mut preferred_top = target_center - height * 0.5;

        // Compaction pull toward the hard lower bound.
        if let Some(&lower_bound) = self.inputs.lower_bounds.get(node_id) {
            let slack = preferred_top - lower_bound;
            if self.settings.layout_compact_data_y_in_block
                && slack > self.settings.layout_data_y_compact_slack_threshold
            {
                let pull = self.settings.layout_data_y_compact_pull.clamp(0.0, 1.0);
                preferred_top = lower_bound + slack * pull;
            }
            preferred_top = preferred_top.max(lower_bound);
        }

        // Multi-parent interval is a hard constraint on the center.
        if parent_centers.len() >= 2 {
            let min_center = parent_centers.iter().cloned().fold(f64::INFINITY, f64::min);
            let max_center = parent_centers.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            preferred_top = preferred_top
                .max(min_center - height * 0.5)
                .min(max_center - height * 0.5);
        }

        // Column stacking: preserve the current order, keep the gap to both
        // neighbors.
        let (above_limit, below_limit) = self.column_limits(node_id, current_y, positions);
        if let Some(limit) = above_limit {
            preferred_top = preferred_top.max(limit);
        }
        if let Some(limit) = below_limit {
            preferred_top = preferred_top.min(limit);
        }
        if let (Some(low), Some(high)) = (above_limit, below_limit) {
            if low > high {
                // Squeezed between neighbors; hard constraints win.
                preferred_top = low;
            }
        }
        if let Some(&lower_bound) = self.inputs.lower_bounds.get(node_id) {
            preferred_top = preferred_top.max(lower_bound);
        }

        if (preferred_top - current_y).abs() <= MOVE_EPSILON {
            return false;
        }
        positions.insert(node_id.to_string(), (x, preferred_top));
        true
    }

    fn height_of(&self, node_id: &str) -> f64 {
        self.inputs.heights.get(node_id).copied().unwrap_or(0.0)
    }

    /// Centers of placed data neighbors (parents = upstream producers).
    fn neighbor_centers(
        &self,
        node_id: &str,
        positions: &BTreeMap<String, (f64, f64)>,
        parents: bool,
    ) -> Vec<f64> {
        let edge_ids = if parents {
            self.context.in_data_edges(node_id)
        } else {
            self.context.out_data_edges(node_id)
        };
        let mut centers = Vec::new();
        for edge_id in edge_ids {
            let Some(edge) = self.model.edges.get(edge_id) else { continue };
            let neighbor = if parents { &edge.src_node } else { &edge.dst_node };
            let Some(&(_, neighbor_y)) = positions.get(neighbor) else { continue };
            centers.push(neighbor_y + self.height_of(neighbor) * 0.5);
        }
        centers
    }

    /// Allowed top-Y interval endpoints from same-column neighbors, keeping
    /// the current vertical order: `(min_top, max_top)`.
    fn column_limits(
        &self,
        node_id: &str,
        current_y: f64,
        positions: &BTreeMap<String, (f64, f64)>,
    ) -> (Option<f64>, Option<f64>) {
        let Some(&column) = self.inputs.columns.get(node_id) else {
            return (None, None);
        };
        let height = self.height_of(node_id);
        let mut above: Option<f64> = None;
        let mut below: Option<f64> = None;
        for (other_id, &other_column) in &self.inputs.columns {
            if other_id == node_id || other_column != column {
                continue;
            }
            let Some(&(_, other_y)) = positions.get(other_id) else { continue };
            let other_height = self.height_of(other_id);
            let is_above = (other_y, other_id.as_str()) < (current_y, node_id);
            if is_above {
                let limit = other_y + other_height + DATA_STACK_GAP;
                above = Some(above.map_or(limit, |existing: f64| existing.max(limit)));
            } else {
                let limit = other_y - DATA_STACK_GAP - height;
                below = Some(below.map_or(limit, |existing: f64| existing.min(limit)));
            }
        }
        (above, below)
    }
}

fn average(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    /// P1 and P2 feed X; X starts off-center and must end at the parents'
    /// center after relaxation.
    #[test]
    fn test_multi_parent_node_is_centered() {
        let mut model = GraphModel::new("relax", "relax");
        let parent1 = model.add_node("P1", "查询节点", &["in"], &["out"]);
        let parent2 = model.add_node("P2", "查询节点", &["in"], &["out"]);
        let merged = model.add_node("X", "查询节点", &["in1", "in2"], &["out"]);
        model.add_edge(parent1.clone(), "out", merged.clone(), "in1");
        model.add_edge(parent2.clone(), "out", merged.clone(), "in2");

        let context = LayoutContext::build(&model);
        let settings = Settings::default();

        let heights: BTreeMap<String, f64> = [
            (parent1.clone(), 90.0),
            (parent2.clone(), 90.0),
            (merged.clone(), 90.0),
        ]
        .into_iter()
        .collect();
        let columns: BTreeMap<String, i64> =
            [(parent1.clone(), 1), (parent2.clone(), 1), (merged.clone(), 2)]
                .into_iter()
                .collect();
        let inputs = RelaxationInputs {
            heights,
            lower_bounds: BTreeMap::new(),
            columns,
        };

        let mut positions: BTreeMap<String, (f64, f64)> = BTreeMap::new();
        positions.insert(parent1.clone(), (220.0, 0.0));
        positions.insert(parent2.clone(), (220.0, 400.0));
        positions.insert(merged.clone(), (440.0, 0.0));

        let engine = DataYRelaxationEngine::new(&model, &context, &settings, inputs);
        let changed = engine.relax_in_place(&mut positions);
        assert!(changed);

        let parent_center = (positions[&parent1].1 + positions[&parent2].1) / 2.0 + 45.0;
        let merged_center = positions[&merged].1 + 45.0;
        assert!(
            (merged_center - parent_center).abs() <= 10.0,
            "merged center {merged_center} should approach parent center {parent_center}"
        );
    }

    /// The lower bound is a hard floor even when centering would pull above it.
    #[test]
    fn test_port_lower_bound_is_inviolable() {
        let mut model = GraphModel::new("relax2", "relax2");
        let parent = model.add_node("P", "查询节点", &[], &["out"]);
        let child = model.add_node("C", "查询节点", &["in"], &["out"]);
        model.add_edge(parent.clone(), "out", child.clone(), "in");

        let context = LayoutContext::build(&model);
        let settings = Settings::default();
        let inputs = RelaxationInputs {
            heights: [(parent.clone(), 90.0), (child.clone(), 90.0)].into_iter().collect(),
            lower_bounds: [(parent.clone(), 300.0)].into_iter().collect(),
            columns: [(parent.clone(), 1)].into_iter().collect(),
        };

        let mut positions: BTreeMap<String, (f64, f64)> = BTreeMap::new();
        positions.insert(parent.clone(), (220.0, 320.0));
        positions.insert(child.clone(), (440.0, 0.0));

        let engine = DataYRelaxationEngine::new(&model, &context, &settings, inputs);
        engine.relax_in_place(&mut positions);
        assert!(positions[&parent].1 >= 300.0 - 1e-9);
    }

    /// Nodes sharing a column keep the stacking gap after relaxation.
    #[test]
    fn test_column_gap_is_maintained() {
        let mut model = GraphModel::new("relax3", "relax3");
        let a = model.add_node("A", "查询节点", &[], &["out"]);
        let b = model.add_node("B", "查询节点", &[], &["out"]);
        let consumer = model.add_node("C", "查询节点", &["in1", "in2"], &["out"]);
        model.add_edge(a.clone(), "out", consumer.clone(), "in1");
        model.add_edge(b.clone(), "out", consumer.clone(), "in2");

        let context = LayoutContext::build(&model);
        let settings = Settings::default();
        let inputs = RelaxationInputs {
            heights: [(a.clone(), 90.0), (b.clone(), 90.0), (consumer.clone(), 90.0)]
                .into_iter()
                .collect(),
            lower_bounds: BTreeMap::new(),
            columns: [(a.clone(), 1), (b.clone(), 1), (consumer.clone(), 2)]
                .into_iter()
                .collect(),
        };

        let mut positions: BTreeMap<String, (f64, f64)> = BTreeMap::new();
        positions.insert(a.clone(), (220.0, 0.0));
        positions.insert(b.clone(), (220.0, 100.0));
        positions.insert(consumer.clone(), (440.0, 40.0));

        let engine = DataYRelaxationEngine::new(&model, &context, &settings, inputs);
        engine.relax_in_place(&mut positions);

        let a_bottom = positions[&a].1 + 90.0;
        assert!(positions[&b].1 >= a_bottom + DATA_STACK_GAP - 1e-6);
    }
}
