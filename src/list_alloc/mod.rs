//! Linked list allocator over a growable break region.

pub mod allocator;
pub mod header;
