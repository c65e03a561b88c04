//! Thread module

pub mod flags;
pub mod state;
pub mod thread;

pub use flags::ThreadFlags;
pub use state::ThreadState;
pub use thread::{Thread, ThreadId, ThreadType};
