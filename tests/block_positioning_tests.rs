//! Block-positioning scenarios: vertical centering between parents and
//! children, mutual-uniqueness top alignment, and locality of branch
//! reordering within a column.

use flowscript::layout::positioning::{BlockPositioningEngine, BlockRelations};
use flowscript::layout::LayoutBlock;
use std::collections::{BTreeMap, BTreeSet};

fn block(order_index: usize, width: f64, height: f64) -> LayoutBlock {
    let mut block = LayoutBlock::with_order(order_index);
    block.width = width;
    block.height = height;
    block
}

fn center_y(block: &LayoutBlock) -> f64 {
    block.top_left_pos.1 + block.height * 0.5
}

fn relations_from(
    children: &[(usize, Vec<usize>)],
    parents: &[(usize, Vec<usize>)],
) -> BlockRelations {
    let mut relations = BlockRelations::default();
    for (parent, child_list) in children {
        relations.ordered_children.insert(*parent, child_list.clone());
    }
    for (child, parent_list) in parents {
        relations
            .parent_sets
            .insert(*child, parent_list.iter().copied().collect());
    }
    relations
}

#[test]
fn test_block_with_multiple_parents_is_centered_between_parents() {
    // Column 0: parents A(order 1), C(order 2), D(order 3); column 1 holds an
    // unrelated block above the multi-parent child B.
    let mut blocks = vec![
        block(1, 300.0, 100.0), // 0: A
        block(2, 300.0, 100.0), // 1: C
        block(3, 300.0, 100.0), // 2: D
        block(1, 300.0, 50.0),  // 3: unrelated
        block(2, 300.0, 100.0), // 4: B
    ];
    let relations = relations_from(
        &[(0, vec![4]), (1, vec![4]), (2, vec![4])],
        &[(4, vec![0, 1, 2])],
    );
    let column_of: BTreeMap<usize, usize> =
        [(0, 0), (1, 0), (2, 0), (3, 1), (4, 1)].into_iter().collect();
    let column_left_x: BTreeMap<usize, f64> = [(0, 0.0), (1, 600.0)].into_iter().collect();
    let group: BTreeSet<usize> = (0..5).collect();

    let mut engine = BlockPositioningEngine::new(&mut blocks, 0.0, 0.0, 200.0, 50.0, false);
    engine.stack_blocks_in_columns(&column_of, &column_left_x, 0.0, &group, &relations);

    let expected_center = (center_y(&blocks[0]) + center_y(&blocks[1]) + center_y(&blocks[2])) / 3.0;
    assert!((center_y(&blocks[4]) - expected_center).abs() < 1e-6);

    // The unrelated block keeps its slot above B, and B stays below it.
    assert!((blocks[3].top_left_pos.1 - 0.0).abs() < 1e-6);
    assert!(blocks[4].top_left_pos.1 >= blocks[3].top_left_pos.1 + blocks[3].height);
}

#[test]
fn test_block_with_multiple_children_moves_to_their_center() {
    let mut blocks = vec![
        block(1, 300.0, 100.0), // 0: parent
        block(1, 300.0, 100.0), // 1: child B
        block(2, 300.0, 100.0), // 2: child C
        block(3, 300.0, 100.0), // 3: child D
    ];
    let relations = relations_from(&[(0, vec![1, 2, 3])], &[]);
    let column_of: BTreeMap<usize, usize> = [(0, 0), (1, 1), (2, 1), (3, 1)].into_iter().collect();
    let column_left_x: BTreeMap<usize, f64> = [(0, 0.0), (1, 600.0)].into_iter().collect();
    let group: BTreeSet<usize> = (0..4).collect();

    let mut engine = BlockPositioningEngine::new(&mut blocks, 0.0, 0.0, 200.0, 50.0, false);
    engine.stack_blocks_in_columns(&column_of, &column_left_x, 0.0, &group, &relations);

    let expected_center = (center_y(&blocks[1]) + center_y(&blocks[2]) + center_y(&blocks[3])) / 3.0;
    assert!((center_y(&blocks[0]) - expected_center).abs() < 1e-6);
}

#[test]
fn test_unique_parent_child_chain_aligns_top_y_with_trailing_block_pushed_down() {
    let mut blocks = vec![
        block(1, 300.0, 120.0), // 0: preceding block in the parent column
        block(2, 300.0, 200.0), // 1: parent
        block(1, 300.0, 150.0), // 2: child (mutual uniqueness with parent)
        block(2, 300.0, 100.0), // 3: trailing block in the child column
    ];
    let relations = relations_from(&[(1, vec![2])], &[(2, vec![1])]);
    let column_of: BTreeMap<usize, usize> = [(0, 0), (1, 0), (2, 1), (3, 1)].into_iter().collect();
    let column_left_x: BTreeMap<usize, f64> = [(0, 0.0), (1, 600.0)].into_iter().collect();
    let group: BTreeSet<usize> = (0..4).collect();

    let mut engine = BlockPositioningEngine::new(&mut blocks, 0.0, 0.0, 200.0, 50.0, false);
    engine.stack_blocks_in_columns(&column_of, &column_left_x, 0.0, &group, &relations);

    assert!((blocks[2].top_left_pos.1 - blocks[1].top_left_pos.1).abs() < 1e-6);
    assert!(blocks[3].top_left_pos.1 >= blocks[2].top_left_pos.1 + blocks[2].height);
}

#[test]
fn test_unique_chain_root_follows_branching_block_down() {
    let mut blocks = vec![
        block(1, 300.0, 100.0), // 0: root
        block(2, 300.0, 120.0), // 1: branching
        block(3, 300.0, 180.0), // 2: leaf a
        block(4, 300.0, 220.0), // 3: leaf b
    ];
    let relations = relations_from(
        &[(0, vec![1]), (1, vec![2, 3])],
        &[(1, vec![0]), (2, vec![1]), (3, vec![1])],
    );
    let column_of: BTreeMap<usize, usize> = [(0, 0), (1, 1), (2, 2), (3, 2)].into_iter().collect();
    let column_left_x: BTreeMap<usize, f64> =
        [(0, 0.0), (1, 600.0), (2, 1200.0)].into_iter().collect();
    let group: BTreeSet<usize> = (0..4).collect();

    let mut engine = BlockPositioningEngine::new(&mut blocks, 0.0, 0.0, 200.0, 50.0, false);
    engine.stack_blocks_in_columns(&column_of, &column_left_x, 0.0, &group, &relations);

    // Root and branching keep top alignment even after the chain shifts down.
    assert!((blocks[0].top_left_pos.1 - blocks[1].top_left_pos.1).abs() < 1e-6);

    // Branching sits within its children's center interval.
    let branching_center = center_y(&blocks[1]);
    let low = center_y(&blocks[2]).min(center_y(&blocks[3]));
    let high = center_y(&blocks[2]).max(center_y(&blocks[3]));
    assert!(low <= branching_center && branching_center <= high);
}

#[test]
fn test_branch_children_reorder_is_local_and_leaves_unrelated_blocks_in_place() {
    let mut blocks = vec![
        block(1, 300.0, 100.0), // 0: parent
        block(1, 300.0, 100.0), // 1: child_first
        block(2, 300.0, 100.0), // 2: unrelated
        block(3, 300.0, 100.0), // 3: child_second
    ];
    // Port order is deliberately opposite to the order_index order.
    let relations = relations_from(&[(0, vec![3, 1])], &[(1, vec![0]), (3, vec![0])]);
    let column_of: BTreeMap<usize, usize> = [(0, 0), (1, 1), (2, 1), (3, 1)].into_iter().collect();
    let column_left_x: BTreeMap<usize, f64> = [(0, 0.0), (1, 600.0)].into_iter().collect();
    let group: BTreeSet<usize> = (0..4).collect();

    let mut engine = BlockPositioningEngine::new(&mut blocks, 0.0, 0.0, 200.0, 50.0, false);
    engine.stack_blocks_in_columns(&column_of, &column_left_x, 0.0, &group, &relations);

    // Children may swap slots, but the unrelated block stays between them
    // and slot pitch is preserved.
    let mut child_tops = [blocks[1].top_left_pos.1, blocks[3].top_left_pos.1];
    child_tops.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let unrelated_top = blocks[2].top_left_pos.1;
    let expected_gap = 150.0;
    assert!(child_tops[0] < unrelated_top && unrelated_top < child_tops[1]);
    assert!((unrelated_top - child_tops[0] - expected_gap).abs() < 1e-6);
    assert!((child_tops[1] - unrelated_top - expected_gap).abs() < 1e-6);
    // The swap actually happened: child_second occupies the top slot.
    assert!(blocks[3].top_left_pos.1 < blocks[1].top_left_pos.1);
}
