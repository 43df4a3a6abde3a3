/// Key range bounds.
pub mod range;
/// Sorted set over map keys.
pub mod key_set;
/// Sorted set over map entries.
pub mod entry_set;

pub use entry_set::{Entry, EntrySet};
pub use key_set::KeySet;
pub use range::KeyRange;
