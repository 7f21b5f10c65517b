//! Block positioning
//!
//! Per event group, blocks form a DAG through the flow edges that leave each
//! block's last node. Longest-path DP assigns the smallest column index
//! consistent with `column(parent) < column(child)`; blocks stack within
//! their column by stable order, then centering rules adjust vertical
//! positions subject to non-overlap. Event groups stack vertically.

use crate::graph::model::GraphModel;
use crate::layout::blocks::LayoutBlock;
use crate::layout::context::LayoutContext;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Block-to-block relationships derived from flow edges. Blocks are
/// addressed by their index in the layout-block list.
#[derive(Debug, Clone, Default)]
pub struct BlockRelations {
    /// Children in the parent's output-port order, deduplicated.
    pub ordered_children: BTreeMap<usize, Vec<usize>>,
    pub parent_sets: BTreeMap<usize, BTreeSet<usize>>,
    pub flow_to_block: BTreeMap<String, usize>,
}

/// Derive block relations from the model's flow edges.
pub fn analyze_block_relations(
    model: &GraphModel,
    context: &LayoutContext,
    blocks: &[LayoutBlock],
) -> BlockRelations {
    let mut relations = BlockRelations::default();
    let mut head_of_block: BTreeMap<&str, usize> = BTreeMap::new();
    for (index, block) in blocks.iter().enumerate() {
        for flow_id in &block.flow_nodes {
            relations.flow_to_block.insert(flow_id.clone(), index);
        }
        if let Some(head) = block.flow_nodes.first() {
            head_of_block.insert(head.as_str(), index);
        }
    }

    for (index, block) in blocks.iter().enumerate() {
        let mut children: Vec<usize> = Vec::new();
        for flow_id in &block.flow_nodes {
            for (_, successor) in context.ordered_flow_successors(model, flow_id) {
                let Some(&child_index) = head_of_block.get(successor.as_str()) else {
                    continue;
                };
                if child_index != index && !children.contains(&child_index) {
                    children.push(child_index);
                }
            }
        }
        for &child_index in &children {
            relations
                .parent_sets
                .entry(child_index)
                .or_default()
                .insert(index);
        }
        relations.ordered_children.insert(index, children);
    }
    relations
}

/// Longest-path column assignment within a group. Relaxation is bounded by
/// the group size, so flow cycles cannot loop forever.
pub fn compute_column_indices(
    group: &BTreeSet<usize>,
    relations: &BlockRelations,
) -> BTreeMap<usize, usize> {
    let mut columns: BTreeMap<usize, usize> = group.iter().map(|index| (*index, 0usize)).collect();
    for _ in 0..group.len().max(1) {
        let mut changed = false;
        for &parent in group {
            let parent_column = columns[&parent];
            for child in relations.ordered_children.get(&parent).into_iter().flatten() {
                if !group.contains(child) {
                    continue;
                }
                let wanted = parent_column + 1;
                if columns[child] < wanted {
                    columns.insert(*child, wanted);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    columns
}

/// Places blocks of one layout run. Owns the mutable block list for the
/// duration of positioning.
pub struct BlockPositioningEngine<'a> {
    pub blocks: &'a mut Vec<LayoutBlock>,
    pub initial_x: f64,
    pub initial_y: f64,
    pub block_x_spacing: f64,
    pub block_y_spacing: f64,
    pub tight_packing: bool,
    pub positioned: BTreeSet<usize>,
}

impl<'a> BlockPositioningEngine<'a> {
    pub fn new(
        blocks: &'a mut Vec<LayoutBlock>,
        initial_x: f64,
        initial_y: f64,
        block_x_spacing: f64,
        block_y_spacing: f64,
        tight_packing: bool,
    ) -> Self {
        Self {
            blocks,
            initial_x,
            initial_y,
            block_x_spacing,
            block_y_spacing,
            tight_packing,
            positioned: BTreeSet::new(),
        }
    }

    /// Block whose flow chain starts at the given event node.
    pub fn find_start_block(&self, event_node_id: &str) -> Option<usize> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.flow_nodes.first().map(String::as_str) == Some(event_node_id))
            .map(|(index, _)| index)
            .next()
            .or_else(|| {
                self.blocks
                    .iter()
                    .enumerate()
                    .filter(|(_, block)| block.event_root_id.as_deref() == Some(event_node_id))
                    .min_by_key(|(_, block)| block.order_index)
                    .map(|(index, _)| index)
            })
    }

    /// Child-closure of the start block, minus blocks positioned by earlier
    /// event groups.
    pub fn collect_group_blocks(&self, start: usize, relations: &BlockRelations) -> BTreeSet<usize> {
        let mut group: BTreeSet<usize> = BTreeSet::new();
        let mut queue: VecDeque<usize> = VecDeque::new();
        queue.push_back(start);
        while let Some(index) = queue.pop_front() {
            if self.positioned.contains(&index) || !group.insert(index) {
                continue;
            }
            for child in relations.ordered_children.get(&index).into_iter().flatten() {
                if !group.contains(child) && !self.positioned.contains(child) {
                    queue.push_back(*child);
                }
            }
        }
        group
    }

    /// Column pixel positions from the running max block width per column.
    pub fn compute_column_x_positions(
        &self,
        column_of: &BTreeMap<usize, usize>,
    ) -> BTreeMap<usize, f64> {
        let mut max_width: BTreeMap<usize, f64> = BTreeMap::new();
        for (&block_index, &column) in column_of {
            let width = self.blocks[block_index].width;
            let entry = max_width.entry(column).or_insert(0.0);
            if width > *entry {
                *entry = width;
            }
        }
        let mut column_left_x: BTreeMap<usize, f64> = BTreeMap::new();
        let mut cursor = self.initial_x;
        let last_column = max_width.keys().copied().max().unwrap_or(0);
        for column in 0..=last_column {
            column_left_x.insert(column, cursor);
            cursor += max_width.get(&column).copied().unwrap_or(0.0) + self.block_x_spacing;
        }
        column_left_x
    }

    /// Stack blocks in their columns and apply the centering rules.
    /// Returns the group's bottom Y.
    pub fn stack_blocks_in_columns(
        &mut self,
        column_of: &BTreeMap<usize, usize>,
        column_left_x: &BTreeMap<usize, f64>,
        group_top_y: f64,
        group: &BTreeSet<usize>,
        relations: &BlockRelations,
    ) -> f64 {
        // Column membership in stable slot order.
        let mut columns: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for &block_index in group {
            let column = column_of.get(&block_index).copied().unwrap_or(0);
            columns.entry(column).or_default().push(block_index);
        }
        for members in columns.values_mut() {
            members.sort_by_key(|&index| (self.blocks[index].order_index, index));
        }

        self.reorder_branch_children_locally(&mut columns, column_of, group, relations);
        self.initial_stack(&columns, column_left_x, group_top_y);
        self.apply_centering_rules(&columns, column_of, group_top_y, group, relations);

        if self.tight_packing {
            self.pack_blocks_left(group, column_left_x, column_of, relations);
        }

        for &block_index in group {
            self.positioned.insert(block_index);
        }

        group
            .iter()
            .map(|&index| self.blocks[index].bottom_y())
            .fold(group_top_y, f64::max)
    }

    /// Branch children from a shared parent may swap to match the parent's
    /// output-port order, but only within the slots they already occupy;
    /// unrelated blocks in the column keep theirs.
    fn reorder_branch_children_locally(
        &self,
        columns: &mut BTreeMap<usize, Vec<usize>>,
        column_of: &BTreeMap<usize, usize>,
        group: &BTreeSet<usize>,
        relations: &BlockRelations,
    ) {
        let mut parents: Vec<usize> = group.iter().copied().collect();
        parents.sort_by_key(|&index| (self.blocks[index].order_index, index));

        for parent in parents {
            let Some(children) = relations.ordered_children.get(&parent) else { continue };
            let mut children_by_column: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for &child in children {
                if !group.contains(&child) {
                    continue;
                }
                if let Some(&column) = column_of.get(&child) {
                    children_by_column.entry(column).or_default().push(child);
                }
            }
            for (column, port_ordered) in children_by_column {
                if port_ordered.len() < 2 {
                    continue;
                }
                let Some(members) = columns.get_mut(&column) else { continue };
                let mut slots: Vec<usize> = members
                    .iter()
                    .enumerate()
                    .filter(|(_, block)| port_ordered.contains(*block))
                    .map(|(slot, _)| slot)
                    .collect();
                slots.sort_unstable();
                for (slot, child) in slots.into_iter().zip(port_ordered) {
                    members[slot] = child;
                }
            }
        }
    }

    fn initial_stack(
        &mut self,
        columns: &BTreeMap<usize, Vec<usize>>,
        column_left_x: &BTreeMap<usize, f64>,
        group_top_y: f64,
    ) {
        for (&column, members) in columns {
            let left_x = column_left_x.get(&column).copied().unwrap_or(self.initial_x);
            let mut cursor = group_top_y;
            for &block_index in members {
                let block = &mut self.blocks[block_index];
                block.top_left_pos = (left_x, cursor);
                cursor += block.height + self.block_y_spacing;
            }
        }
    }

    fn apply_centering_rules(
        &mut self,
        columns: &BTreeMap<usize, Vec<usize>>,
        column_of: &BTreeMap<usize, usize>,
        group_top_y: f64,
        group: &BTreeSet<usize>,
        relations: &BlockRelations,
    ) {
        for members in columns.values() {
            for (slot, &block_index) in members.iter().enumerate() {
                let in_group_parents: Vec<usize> = relations
                    .parent_sets
                    .get(&block_index)
                    .into_iter()
                    .flatten()
                    .copied()
                    .filter(|parent| group.contains(parent))
                    .collect();

                // Rule: >=2 parents sharing one column center the child
                // between them.
                let parents_single_column = in_group_parents.len() >= 2
                    && in_group_parents
                        .iter()
                        .map(|parent| column_of.get(parent).copied().unwrap_or(0))
                        .collect::<BTreeSet<_>>()
                        .len()
                        == 1;
                if parents_single_column {
                    let center = in_group_parents
                        .iter()
                        .map(|&parent| self.blocks[parent].center_y())
                        .sum::<f64>()
                        / in_group_parents.len() as f64;
                    let desired_top = center - self.blocks[block_index].height * 0.5;
                    self.move_block_in_column(members, slot, desired_top, group_top_y);
                } else if let Some(parent) = self.unique_parent_of(block_index, &in_group_parents, relations, group)
                {
                    // Rule: mutual uniqueness aligns top_y with the parent.
                    let desired_top = self.blocks[parent].top_left_pos.1;
                    self.move_block_in_column(members, slot, desired_top, group_top_y);
                }

                // Rule: a block with >=2 children in one column moves toward
                // their preview center; an upstream unique chain follows.
                let in_group_children: Vec<usize> = relations
                    .ordered_children
                    .get(&block_index)
                    .into_iter()
                    .flatten()
                    .copied()
                    .filter(|child| group.contains(child))
                    .collect();
                let children_single_column = in_group_children.len() >= 2
                    && in_group_children
                        .iter()
                        .map(|child| column_of.get(child).copied().unwrap_or(0))
                        .collect::<BTreeSet<_>>()
                        .len()
                        == 1;
                if children_single_column {
                    let center = in_group_children
                        .iter()
                        .map(|&child| self.blocks[child].center_y())
                        .sum::<f64>()
                        / in_group_children.len() as f64;
                    let desired_top = center - self.blocks[block_index].height * 0.5;
                    self.move_block_in_column(members, slot, desired_top, group_top_y);
                    self.drag_unique_chain_up(block_index, relations, group);
                }
            }
        }
    }

    /// Mutual uniqueness: the block's only in-group parent whose only
    /// in-group child is this block.
    fn unique_parent_of(
        &self,
        block_index: usize,
        in_group_parents: &[usize],
        relations: &BlockRelations,
        group: &BTreeSet<usize>,
    ) -> Option<usize> {
        if in_group_parents.len() != 1 {
            return None;
        }
        let parent = in_group_parents[0];
        let parent_children: Vec<usize> = relations
            .ordered_children
            .get(&parent)
            .into_iter()
            .flatten()
            .copied()
            .filter(|child| group.contains(child))
            .collect();
        (parent_children == vec![block_index]).then_some(parent)
    }

    /// Move a block to the desired top, respecting the predecessor bound and
    /// pushing followers down to keep the stacking gap.
    fn move_block_in_column(
        &mut self,
        members: &[usize],
        slot: usize,
        desired_top: f64,
        group_top_y: f64,
    ) {
        let min_top = if slot > 0 {
            let previous = &self.blocks[members[slot - 1]];
            previous.bottom_y() + self.block_y_spacing
        } else {
            group_top_y
        };
        let new_top = desired_top.max(min_top);
        let block = &mut self.blocks[members[slot]];
        block.top_left_pos.1 = new_top;

        for follower_slot in slot + 1..members.len() {
            let required = self.blocks[members[follower_slot - 1]].bottom_y() + self.block_y_spacing;
            let follower = &mut self.blocks[members[follower_slot]];
            if follower.top_left_pos.1 < required {
                follower.top_left_pos.1 = required;
            }
        }
    }

    /// Propagate a shift through upstream mutual-uniqueness links: when the
    /// chain's lower end moves, every unique ancestor keeps top alignment.
    fn drag_unique_chain_up(
        &mut self,
        block_index: usize,
        relations: &BlockRelations,
        group: &BTreeSet<usize>,
    ) {
        let mut current = block_index;
        loop {
            let in_group_parents: Vec<usize> = relations
                .parent_sets
                .get(&current)
                .into_iter()
                .flatten()
                .copied()
                .filter(|parent| group.contains(parent))
                .collect();
            let Some(parent) = self.unique_parent_of(current, &in_group_parents, relations, group) else {
                return;
            };
            self.blocks[parent].top_left_pos.1 = self.blocks[current].top_left_pos.1;
            current = parent;
        }
    }

    /// Shift blocks leftward toward their parents without crossing the
    /// column's left boundary-relative order (parents' right edge bounds the
    /// shift).
    fn pack_blocks_left(
        &mut self,
        group: &BTreeSet<usize>,
        column_left_x: &BTreeMap<usize, f64>,
        column_of: &BTreeMap<usize, usize>,
        relations: &BlockRelations,
    ) {
        let mut ordered: Vec<usize> = group.iter().copied().collect();
        ordered.sort_by_key(|&index| (column_of.get(&index).copied().unwrap_or(0), index));
        for block_index in ordered {
            let parents: Vec<usize> = relations
                .parent_sets
                .get(&block_index)
                .into_iter()
                .flatten()
                .copied()
                .filter(|parent| group.contains(parent))
                .collect();
            if parents.is_empty() {
                continue;
            }
            let candidate = parents
                .iter()
                .map(|&parent| self.blocks[parent].right_x())
                .fold(f64::NEG_INFINITY, f64::max)
                + self.block_x_spacing;
            let column = column_of.get(&block_index).copied().unwrap_or(0);
            let floor = column
                .checked_sub(1)
                .and_then(|previous| column_left_x.get(&previous))
                .copied()
                .unwrap_or(self.initial_x);
            let current = self.blocks[block_index].top_left_pos.0;
            if candidate < current && candidate > floor {
                self.blocks[block_index].top_left_pos.0 = candidate;
            }
        }
    }

    /// Stack blocks that belong to no event group below everything else.
    pub fn place_orphan_blocks(&mut self) {
        let orphan_indices: Vec<usize> = (0..self.blocks.len())
            .filter(|index| !self.positioned.contains(index))
            .collect();
        if orphan_indices.is_empty() {
            return;
        }
        let mut cursor = self
            .positioned
            .iter()
            .map(|&index| self.blocks[index].bottom_y())
            .fold(self.initial_y, f64::max);
        let mut ordered = orphan_indices;
        ordered.sort_by_key(|&index| (self.blocks[index].order_index, index));
        for block_index in ordered {
            cursor += self.block_y_spacing;
            let block = &mut self.blocks[block_index];
            block.top_left_pos = (self.initial_x, cursor);
            cursor += block.height;
            self.positioned.insert(block_index);
        }
    }
}
