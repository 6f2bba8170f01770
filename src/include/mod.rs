//! Include trees: per-call plans of which associations a cascade follows.

mod parser;
pub mod tree;

pub use tree::{IncludeEdge, IncludeNode, IncludeTree};
