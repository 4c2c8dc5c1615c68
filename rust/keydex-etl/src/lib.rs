//! External sort engine: collect key/value pairs into memory buffers,
//! spill sorted runs to temporary storage when a size threshold is hit,
//! and replay everything in globally sorted order through a k-way merge.

pub mod buffer;
pub mod collector;
pub mod provider;

pub use buffer::{
    AppendBuffer, BUFFER_OPTIMAL_SIZE, Buffer, Comparator, OldestEntryBuffer, SortableBuffer,
};
pub use collector::{Collector, LoadArgs, LoadDestination, NullDestination};
pub use provider::DataProvider;
