//! Position application
//!
//! Applies block-relative coordinates to the model, propagates copy-node
//! positions back to originals that got no layout of their own, and
//! assembles the final `BasicBlock` list (flow nodes in execution order,
//! then the data nodes filtered to their owning block).

use crate::graph::model::{BasicBlock, GraphModel};
use crate::layout::blocks::LayoutBlock;
use crate::layout::constants::ORDER_MAX_FALLBACK;
use crate::layout::copy::{compute_copy_rank, is_copy_node, resolve_copy_block_index, strip_copy_suffix};
use crate::LayoutError;
use std::collections::{BTreeMap, BTreeSet};

pub struct PositionApplicator<'a> {
    model: &'a mut GraphModel,
    layout_blocks: &'a mut Vec<LayoutBlock>,
}

impl<'a> PositionApplicator<'a> {
    pub fn new(model: &'a mut GraphModel, layout_blocks: &'a mut Vec<LayoutBlock>) -> Self {
        Self { model, layout_blocks }
    }

    /// Apply final positions to all nodes and store the basic blocks.
    pub fn apply_positions(&mut self) -> Result<(), LayoutError> {
        if self.layout_blocks.iter().any(|block| block.order_index == 0) {
            return Err(LayoutError::MissingOrderIndex);
        }
        self.layout_blocks.sort_by_key(|block| block.order_index);

        let mut applied_node_ids: BTreeSet<String> = BTreeSet::new();
        for block in self.layout_blocks.iter() {
            let (block_left_x, block_top_y) = block.top_left_pos;
            for (node_id, (local_x, local_y)) in &block.node_local_pos {
                if let Some(node) = self.model.nodes.get_mut(node_id) {
                    node.pos = (block_left_x + local_x, block_top_y + local_y);
                    applied_node_ids.insert(node_id.clone());
                }
            }
        }

        self.propagate_copy_positions(&applied_node_ids);
        self.convert_and_save_basic_blocks();
        Ok(())
    }

    /// Copy positions flow back to originals only when the original itself
    /// received no block position; the smallest (block, counter) rank wins.
    fn propagate_copy_positions(&mut self, applied_node_ids: &BTreeSet<String>) {
        let mut overrides: BTreeMap<String, ((usize, usize), (f64, f64))> = BTreeMap::new();
        for node in self.model.nodes.values() {
            if !is_copy_node(node) {
                continue;
            }
            let target_id = if node.original_node_id.is_empty() {
                strip_copy_suffix(&node.id)
            } else {
                strip_copy_suffix(&node.original_node_id)
            };
            if target_id.is_empty() || applied_node_ids.contains(&target_id) {
                continue;
            }
            let rank = compute_copy_rank(node);
            match overrides.get(&target_id) {
                Some((existing_rank, _)) if *existing_rank <= rank => {}
                _ => {
                    overrides.insert(target_id, (rank, node.pos));
                }
            }
        }
        for (target_id, (_, pos)) in overrides {
            if let Some(node) = self.model.nodes.get_mut(&target_id) {
                node.pos = pos;
            }
        }
    }

    /// Copies belong to exactly one `BasicBlock`: the block whose index
    /// matches their `copy_block_id`. Without the filter the same copy would
    /// show up inside several blocks.
    fn convert_and_save_basic_blocks(&mut self) {
        let mut basic_blocks = Vec::with_capacity(self.layout_blocks.len());
        for block in self.layout_blocks.iter_mut() {
            let mut effective_data_nodes: Vec<String> = Vec::new();
            for node_id in &block.data_nodes {
                let Some(node) = self.model.nodes.get(node_id) else { continue };
                if is_copy_node(node) {
                    let expected_index = resolve_copy_block_index(node);
                    if expected_index > 0
                        && expected_index < ORDER_MAX_FALLBACK
                        && expected_index != block.order_index
                    {
                        continue;
                    }
                }
                effective_data_nodes.push(node_id.clone());
            }
            block.data_nodes = effective_data_nodes.clone();

            let mut nodes = block.flow_nodes.clone();
            nodes.extend(effective_data_nodes);
            basic_blocks.push(BasicBlock {
                nodes,
                color: block.color.clone(),
            });
        }
        self.model.basic_blocks = basic_blocks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positions_compose_block_and_local_offsets() {
        let mut model = GraphModel::new("apply", "apply");
        let flow = model.add_node("步骤", "执行节点", &["流程入"], &["流程出"]);
        let data = model.add_node("数据", "查询节点", &[], &["值"]);

        let mut block = LayoutBlock::with_order(1);
        block.flow_nodes = vec![flow.clone()];
        block.data_nodes = vec![data.clone()];
        block.top_left_pos = (1000.0, 500.0);
        block.node_local_pos.insert(flow.clone(), (380.0, 40.0));
        block.node_local_pos.insert(data.clone(), (40.0, 60.0));
        let mut blocks = vec![block];

        PositionApplicator::new(&mut model, &mut blocks)
            .apply_positions()
            .expect("apply");
        assert_eq!(model.nodes[&flow].pos, (1380.0, 540.0));
        assert_eq!(model.nodes[&data].pos, (1040.0, 560.0));
        assert_eq!(model.basic_blocks.len(), 1);
        assert_eq!(model.basic_blocks[0].nodes, vec![flow, data]);
    }

    #[test]
    fn test_zero_order_index_is_rejected() {
        let mut model = GraphModel::new("apply2", "apply2");
        let mut blocks = vec![LayoutBlock::default()];
        let result = PositionApplicator::new(&mut model, &mut blocks).apply_positions();
        assert!(matches!(result, Err(LayoutError::MissingOrderIndex)));
    }

    #[test]
    fn test_copy_filtered_to_matching_block() {
        let mut model = GraphModel::new("apply3", "apply3");
        let flow_a = model.add_node("步骤甲", "执行节点", &["流程入"], &["流程出"]);
        let flow_b = model.add_node("步骤乙", "执行节点", &["流程入"], &["流程出"]);
        let original = model.add_node("数据", "查询节点", &[], &["值"]);
        let copy_id = format!("{original}_copy_block_2_1");
        let mut copy = model.nodes[&original].clone();
        copy.id = copy_id.clone();
        copy.is_data_node_copy = true;
        copy.original_node_id = original.clone();
        copy.copy_block_id = "block_2".to_string();
        model.insert_node(copy);

        let mut block1 = LayoutBlock::with_order(1);
        block1.flow_nodes = vec![flow_a];
        block1.data_nodes = vec![original.clone(), copy_id.clone()];
        block1.node_local_pos.insert(original.clone(), (0.0, 0.0));
        let mut block2 = LayoutBlock::with_order(2);
        block2.flow_nodes = vec![flow_b];
        block2.data_nodes = vec![copy_id.clone()];
        block2.node_local_pos.insert(copy_id.clone(), (0.0, 0.0));
        let mut blocks = vec![block1, block2];

        PositionApplicator::new(&mut model, &mut blocks)
            .apply_positions()
            .expect("apply");
        assert!(!model.basic_blocks[0].nodes.contains(&copy_id));
        assert!(model.basic_blocks[1].nodes.contains(&copy_id));
    }
}
