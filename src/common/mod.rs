//! Shared utilities across rootfsbuilder modules.

pub mod temp;

pub use temp::{remove_tree, ScratchDir};
