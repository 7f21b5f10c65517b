//! Layout constants
//!
//! Fixed geometry and color values shared by the layout stages. Tunables
//! that users may change live in [`crate::settings::Settings`] instead.

/// Default node width in pixels.
pub const NODE_WIDTH_DEFAULT: f64 = 300.0;

/// Fallback node height when a node has no ports.
pub const NODE_HEIGHT_DEFAULT: f64 = 100.0;

/// Height of the node title bar.
pub const NODE_HEADER_HEIGHT: f64 = 30.0;

/// Height of one port row.
pub const NODE_ROW_HEIGHT: f64 = 22.0;

/// Inner padding between a block border and its nodes.
pub const BLOCK_PADDING_DEFAULT: f64 = 40.0;

/// Horizontal gap between block columns.
pub const BLOCK_X_SPACING_DEFAULT: f64 = 200.0;

/// Vertical gap between stacked blocks in one column.
pub const BLOCK_Y_SPACING_DEFAULT: f64 = 50.0;

/// Canvas origin of the first event group.
pub const INITIAL_X_DEFAULT: f64 = 100.0;
pub const INITIAL_Y_DEFAULT: f64 = 100.0;

/// Vertical gap between event groups.
pub const EVENT_Y_GAP_DEFAULT: f64 = 160.0;

/// Horizontal pitch of data-node layers inside a block.
pub const DATA_SLOT_WIDTH: f64 = 340.0;

/// Vertical gap between consecutive flow nodes inside a block.
pub const FLOW_STACK_GAP: f64 = 40.0;

/// Minimum vertical gap between stacked data nodes in one layer column.
pub const DATA_STACK_GAP: f64 = 20.0;

/// Gap added below a consumer input-port row when seeding a data node's Y.
pub const INPUT_PORT_TO_DATA_GAP: f64 = 20.0;

/// Sort-key fallback for entities without a stable order.
pub const ORDER_MAX_FALLBACK: usize = 1_000_000;

/// Block fill palette, assigned round-robin by block order.
pub const BLOCK_COLORS_DEFAULT: [&str; 8] = [
    "#4C78A8", "#F58518", "#54A24B", "#B279A2", "#E45756", "#72B7B2", "#EECA3B", "#9D755D",
];

/// Color for a block's order index.
pub fn block_color(order_index: usize) -> String {
    let palette_index = order_index.saturating_sub(1) % BLOCK_COLORS_DEFAULT.len();
    BLOCK_COLORS_DEFAULT[palette_index].to_string()
}
