/// Deque handle and single-element operations.
pub mod handle;
/// Timed and unbounded polls.
pub mod blocking;
/// Chunked bulk operations.
pub mod bulk;

pub use handle::*;
