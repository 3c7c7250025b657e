//! Pipeline stages.
//!
//! Each stage takes the scratch tree path and hands it on; none of them
//! looks at the state of a later stage.
//!
//! - [`populate`] - debootstrap a base system
//! - [`payload`] - extract an optional archive over the tree
//! - [`chroot`] - mount, customize, unmount
//! - [`package`] - tar the finished tree

pub mod chroot;
pub mod package;
pub mod payload;
pub mod populate;
