/// Sorted map handle.
pub mod sorted_map;

pub use sorted_map::*;
