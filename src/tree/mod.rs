//! Tree
//!
//! The in-memory tree a build grows, its flat encodings, and the visitor walks
//! used to read either of them.
pub mod encode;
pub mod growable;
pub mod traversal;

pub use encode::{decode_tree, encode, EncodedTree, Encoding, TreeAux};
pub use growable::GrowableTree;
pub use traversal::{
    traverse_breadth_first, traverse_depth_first, LeafNodeDescriptor, SplitNodeDescriptor, TreeView, TreeVisitor,
};
