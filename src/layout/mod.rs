//! Deterministic multi-stage layout engine
//!
//! Pipeline: event discovery -> flow-only block identification -> global
//! cross-block copy planning -> per-block data placement -> block-tree
//! positioning -> position application. Every map iteration runs in sorted
//! key order; identical inputs produce identical coordinates on any machine.

pub mod apply;
pub mod blocks;
pub mod constants;
pub mod context;
pub mod copy;
pub mod events;
pub mod flow_tree;
pub mod positioning;
pub mod relaxation;
pub mod service;

pub use blocks::{LayoutBlock, YDebugInfo};
pub use context::{LayoutContext, LayoutContextCache};
pub use copy::GlobalCopyManager;
pub use service::{LayoutOptions, LayoutResult, LayoutService};
