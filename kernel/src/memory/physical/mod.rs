//! Physical memory management

pub mod buddy_allocator;

pub use buddy_allocator::{BuddyAllocator, PageFrame};
